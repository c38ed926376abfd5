use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::calendar::compute_deadline;
use crate::escalation::{should_fire, Executor, RuleEngine};
use crate::models::{EscalationRule, Priority, SlaViolation, Ticket, TicketType, ViolationKind};
use crate::store::{Directory, Notifier, PolicyStore, RuleStore, TicketStore, ViolationStore};
use crate::violations::ViolationTracker;

/// What `run_ticket_checks` accomplished; failed steps are logged, not raised.
#[derive(Debug, Default)]
pub struct CheckOutcome {
    pub new_violations: Vec<SlaViolation>,
    pub fired_rules: Vec<EscalationRule>,
    pub violation_check_failed: bool,
    pub escalation_check_failed: bool,
}

/// Facade over the SLA core. Holds the injected collaborators and exposes
/// the operations the surrounding ticket-management code calls.
pub struct SlaEngine<'a> {
    policies: &'a dyn PolicyStore,
    violations: &'a dyn ViolationStore,
    rules: &'a dyn RuleStore,
    tickets: &'a dyn TicketStore,
    directory: &'a dyn Directory,
    notifier: &'a dyn Notifier,
}

impl<'a> SlaEngine<'a> {
    pub fn new(
        policies: &'a dyn PolicyStore,
        violations: &'a dyn ViolationStore,
        rules: &'a dyn RuleStore,
        tickets: &'a dyn TicketStore,
        directory: &'a dyn Directory,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self { policies, violations, rules, tickets, directory, notifier }
    }

    /// Wires every collaborator to one store that implements them all,
    /// which is how the CLI uses the SQLite `Database`.
    pub fn over<S>(store: &'a S) -> Self
    where
        S: PolicyStore + ViolationStore + RuleStore + TicketStore + Directory + Notifier,
    {
        Self::new(store, store, store, store, store, store)
    }

    fn tracker(&self) -> ViolationTracker<'a> {
        ViolationTracker::new(self.policies, self.violations)
    }

    fn rule_engine(&self) -> RuleEngine<'a> {
        RuleEngine::new(
            self.rules,
            Executor::new(self.tickets, self.directory, self.notifier),
        )
    }

    /// Calendar-aware deadline for the matching policy, or `None` when no
    /// policy covers the tuple (no obligation).
    pub fn calculate_deadline(
        &self,
        organization_id: i64,
        priority: Priority,
        ticket_type: TicketType,
        kind: ViolationKind,
        start: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let policy = self.policies.find_policy(organization_id, priority, ticket_type)?;
        Ok(policy.map(|p| {
            let hours = match kind {
                ViolationKind::Response => p.response_hours,
                ViolationKind::Resolution => p.resolution_hours,
            };
            compute_deadline(start, hours, &p.calendar)
        }))
    }

    pub fn check_sla_violations(&self, ticket: &Ticket) -> Result<Vec<SlaViolation>> {
        self.tracker().check(ticket)
    }

    pub fn check_sla_violations_at(
        &self,
        ticket: &Ticket,
        now: DateTime<Utc>,
    ) -> Result<Vec<SlaViolation>> {
        self.tracker().check_at(ticket, now)
    }

    pub fn resolve_sla_violation(&self, ticket_id: i64, kind: ViolationKind) -> Result<usize> {
        self.tracker().resolve(ticket_id, kind)
    }

    pub fn check_escalation_rules(&self, ticket: &Ticket) -> Result<Vec<EscalationRule>> {
        self.rule_engine().check(ticket)
    }

    pub fn check_escalation_rules_at(
        &self,
        ticket: &Ticket,
        now: DateTime<Utc>,
    ) -> Result<Vec<EscalationRule>> {
        self.rule_engine().check_at(ticket, now)
    }

    /// Dry-run helper: would this rule's condition hold right now?
    pub fn would_rule_fire(&self, rule: &EscalationRule, ticket: &Ticket) -> bool {
        should_fire(rule, ticket, Utc::now())
    }

    pub fn fire_rule_manually(&self, rule: &EscalationRule, ticket: &Ticket) -> Result<()> {
        self.rule_engine().fire_manual(rule, ticket)
    }

    /// The call-site error boundary: runs the violation check, then the
    /// escalation check, each isolated so a store failure in one never
    /// blocks the ticket mutation that triggered it (or the other check).
    pub fn run_ticket_checks(&self, ticket: &Ticket) -> CheckOutcome {
        self.run_ticket_checks_at(ticket, Utc::now())
    }

    pub fn run_ticket_checks_at(&self, ticket: &Ticket, now: DateTime<Utc>) -> CheckOutcome {
        let mut outcome = CheckOutcome::default();

        match self.tracker().check_at(ticket, now) {
            Ok(violations) => outcome.new_violations = violations,
            Err(e) => {
                outcome.violation_check_failed = true;
                warn!(ticket_id = ticket.id, error = %format!("{e:#}"), "SLA violation check failed");
            }
        }

        match self.rule_engine().check_at(ticket, now) {
            Ok(fired) => outcome.fired_rules = fired,
            Err(e) => {
                outcome.escalation_check_failed = true;
                warn!(ticket_id = ticket.id, error = %format!("{e:#}"), "escalation check failed");
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    use crate::calendar::BusinessCalendar;
    use crate::db::Database;
    use crate::models::{RuleAction, RuleTrigger, TicketStatus};

    fn monday_10am() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap()
    }

    fn seeded() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        db.create_policy(
            1,
            Priority::Normal,
            TicketType::Question,
            2.0,
            8.0,
            &BusinessCalendar::standard(),
        )
        .unwrap();
        let ticket_id = db
            .create_ticket(1, "help", None, Priority::Normal, TicketType::Question)
            .unwrap();
        (db, ticket_id)
    }

    #[test]
    fn calculate_deadline_respects_policy_and_absence() {
        let (db, _) = seeded();
        let engine = SlaEngine::over(&db);

        let deadline = engine
            .calculate_deadline(
                1,
                Priority::Normal,
                TicketType::Question,
                ViolationKind::Response,
                monday_10am(),
            )
            .unwrap();
        assert_eq!(deadline, Some(monday_10am() + Duration::hours(2)));

        // No policy for this tuple: no obligation, not an error.
        let none = engine
            .calculate_deadline(
                2,
                Priority::Normal,
                TicketType::Question,
                ViolationKind::Response,
                monday_10am(),
            )
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn run_ticket_checks_detects_and_escalates() {
        let (db, ticket_id) = seeded();
        db.create_rule(
            1,
            "still new after a day",
            &RuleTrigger::Age { hours: 24 },
            &RuleAction::ChangePriority(Priority::High),
        )
        .unwrap();

        let engine = SlaEngine::over(&db);
        let ticket = db.get_ticket(ticket_id).unwrap().unwrap();
        let later = ticket.created_at + Duration::days(3);

        let outcome = engine.run_ticket_checks_at(&ticket, later);
        assert!(!outcome.violation_check_failed);
        assert!(!outcome.escalation_check_failed);
        assert_eq!(outcome.new_violations.len(), 2);
        assert_eq!(outcome.fired_rules.len(), 1);

        let after = db.get_ticket(ticket_id).unwrap().unwrap();
        assert_eq!(after.priority, Priority::High);
        assert!(db.get_comments(ticket_id).unwrap().len() >= 2);

        // Same state re-checked: idempotent on both fronts.
        let outcome = engine.run_ticket_checks_at(&after, later + Duration::hours(1));
        assert!(outcome.new_violations.is_empty());
        assert!(outcome.fired_rules.is_empty());
    }

    #[test]
    fn would_rule_fire_is_side_effect_free() {
        let (db, ticket_id) = seeded();
        let engine = SlaEngine::over(&db);
        let ticket = db.get_ticket(ticket_id).unwrap().unwrap();

        let rule = EscalationRule {
            id: 1,
            organization_id: 1,
            name: "dry run".into(),
            trigger: RuleTrigger::StatusEquals(TicketStatus::New),
            action: RuleAction::ChangePriority(Priority::Urgent),
            active: true,
        };

        assert!(engine.would_rule_fire(&rule, &ticket));
        let unchanged = db.get_ticket(ticket_id).unwrap().unwrap();
        assert_eq!(unchanged.priority, Priority::Normal);
        assert!(db.get_comments(ticket_id).unwrap().is_empty());
    }

    #[test]
    fn resolve_sla_violation_clears_open_entries() {
        let (db, ticket_id) = seeded();
        let engine = SlaEngine::over(&db);
        let ticket = db.get_ticket(ticket_id).unwrap().unwrap();

        engine
            .check_sla_violations_at(&ticket, ticket.created_at + Duration::days(3))
            .unwrap();
        assert_eq!(engine.resolve_sla_violation(ticket_id, ViolationKind::Response).unwrap(), 1);
        assert_eq!(engine.resolve_sla_violation(ticket_id, ViolationKind::Response).unwrap(), 0);
    }
}
