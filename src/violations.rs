use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::calendar::compute_deadline;
use crate::models::{SlaViolation, Ticket, ViolationKind};
use crate::store::{NewViolation, PolicyStore, ViolationStore};

/// Detects breached response/resolution deadlines and records violations.
///
/// Detection is idempotent per kind: a check that finds an already-open
/// violation of a kind does not insert another row, so the request-triggered
/// call pattern (every ticket create/update) cannot pile up duplicates.
pub struct ViolationTracker<'a> {
    policies: &'a dyn PolicyStore,
    violations: &'a dyn ViolationStore,
}

impl<'a> ViolationTracker<'a> {
    pub fn new(policies: &'a dyn PolicyStore, violations: &'a dyn ViolationStore) -> Self {
        Self { policies, violations }
    }

    /// Returns the violations newly created by this call. No matching policy
    /// means no obligation: empty list, not an error. Store errors propagate.
    pub fn check_at(&self, ticket: &Ticket, now: DateTime<Utc>) -> Result<Vec<SlaViolation>> {
        let policy = match self.policies.find_policy(
            ticket.organization_id,
            ticket.priority,
            ticket.ticket_type,
        )? {
            Some(p) => p,
            None => {
                debug!(ticket_id = ticket.id, "no SLA policy matches; skipping");
                return Ok(vec![]);
            }
        };

        let mut created = Vec::new();

        if ticket.first_responded_at.is_none() {
            let deadline = compute_deadline(ticket.created_at, policy.response_hours, &policy.calendar);
            if let Some(v) = self.record_if_overdue(ticket, ViolationKind::Response, deadline, now)? {
                created.push(v);
            }
        }

        if ticket.resolved_at.is_none() {
            let deadline =
                compute_deadline(ticket.created_at, policy.resolution_hours, &policy.calendar);
            if let Some(v) = self.record_if_overdue(ticket, ViolationKind::Resolution, deadline, now)? {
                created.push(v);
            }
        }

        Ok(created)
    }

    pub fn check(&self, ticket: &Ticket) -> Result<Vec<SlaViolation>> {
        self.check_at(ticket, Utc::now())
    }

    fn record_if_overdue(
        &self,
        ticket: &Ticket,
        kind: ViolationKind,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<SlaViolation>> {
        if now <= deadline {
            return Ok(None);
        }
        if !self.violations.open_violations(ticket.id, kind)?.is_empty() {
            return Ok(None);
        }

        let overdue_minutes = (now - deadline).num_minutes();
        let new = NewViolation {
            ticket_id: ticket.id,
            organization_id: ticket.organization_id,
            kind,
            expected_deadline: deadline,
            overdue_minutes,
        };
        let id = self.violations.insert_violation(&new, now)?;
        debug!(ticket_id = ticket.id, %kind, overdue_minutes, "SLA violation recorded");

        Ok(Some(SlaViolation {
            id,
            ticket_id: new.ticket_id,
            organization_id: new.organization_id,
            kind,
            expected_deadline: deadline,
            overdue_minutes,
            resolved: false,
            resolved_at: None,
            created_at: now,
        }))
    }

    /// Marks all open violations of `kind` resolved. Called when the ticket
    /// acquires the corresponding completion timestamp. Returns the count.
    pub fn resolve_at(
        &self,
        ticket_id: i64,
        kind: ViolationKind,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        self.violations.resolve_violations(ticket_id, kind, now)
    }

    pub fn resolve(&self, ticket_id: i64, kind: ViolationKind) -> Result<usize> {
        self.resolve_at(ticket_id, kind, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use anyhow::anyhow;
    use chrono::{Duration, TimeZone};

    use crate::calendar::BusinessCalendar;
    use crate::models::{Priority, SlaPolicy, TicketStatus, TicketType};

    struct FakePolicies {
        policy: Option<SlaPolicy>,
        fail: bool,
    }

    impl PolicyStore for FakePolicies {
        fn find_policy(
            &self,
            organization_id: i64,
            priority: Priority,
            ticket_type: TicketType,
        ) -> Result<Option<SlaPolicy>> {
            if self.fail {
                return Err(anyhow!("policy store unavailable"));
            }
            Ok(self.policy.clone().filter(|p| {
                p.organization_id == organization_id
                    && p.priority == priority
                    && p.ticket_type == ticket_type
            }))
        }
    }

    #[derive(Default)]
    struct FakeViolations {
        rows: RefCell<Vec<SlaViolation>>,
    }

    impl ViolationStore for FakeViolations {
        fn insert_violation(&self, v: &NewViolation, now: DateTime<Utc>) -> Result<i64> {
            let mut rows = self.rows.borrow_mut();
            let id = rows.len() as i64 + 1;
            rows.push(SlaViolation {
                id,
                ticket_id: v.ticket_id,
                organization_id: v.organization_id,
                kind: v.kind,
                expected_deadline: v.expected_deadline,
                overdue_minutes: v.overdue_minutes,
                resolved: false,
                resolved_at: None,
                created_at: now,
            });
            Ok(id)
        }

        fn open_violations(&self, ticket_id: i64, kind: ViolationKind) -> Result<Vec<SlaViolation>> {
            Ok(self
                .rows
                .borrow()
                .iter()
                .filter(|v| v.ticket_id == ticket_id && v.kind == kind && !v.resolved)
                .cloned()
                .collect())
        }

        fn resolve_violations(
            &self,
            ticket_id: i64,
            kind: ViolationKind,
            now: DateTime<Utc>,
        ) -> Result<usize> {
            let mut count = 0;
            for v in self.rows.borrow_mut().iter_mut() {
                if v.ticket_id == ticket_id && v.kind == kind && !v.resolved {
                    v.resolved = true;
                    v.resolved_at = Some(now);
                    count += 1;
                }
            }
            Ok(count)
        }
    }

    fn policy() -> SlaPolicy {
        SlaPolicy {
            id: 1,
            organization_id: 1,
            priority: Priority::High,
            ticket_type: TicketType::Incident,
            response_hours: 2.0,
            resolution_hours: 8.0,
            calendar: BusinessCalendar::standard(),
            active: true,
        }
    }

    fn ticket(created_at: DateTime<Utc>) -> Ticket {
        Ticket {
            id: 10,
            organization_id: 1,
            subject: "server down".into(),
            description: None,
            status: TicketStatus::Open,
            priority: Priority::High,
            ticket_type: TicketType::Incident,
            assigned_to: None,
            version: 0,
            created_at,
            updated_at: created_at,
            first_responded_at: None,
            resolved_at: None,
        }
    }

    fn monday_10am() -> DateTime<Utc> {
        // 2026-01-05 is a Monday.
        Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap()
    }

    #[test]
    fn no_policy_means_no_violations() {
        let policies = FakePolicies { policy: None, fail: false };
        let violations = FakeViolations::default();
        let tracker = ViolationTracker::new(&policies, &violations);

        let created = tracker.check_at(&ticket(monday_10am()), monday_10am()).unwrap();
        assert!(created.is_empty());
        assert!(violations.rows.borrow().is_empty());
    }

    #[test]
    fn response_violation_when_deadline_missed() {
        let policies = FakePolicies { policy: Some(policy()), fail: false };
        let violations = FakeViolations::default();
        let tracker = ViolationTracker::new(&policies, &violations);

        // Response due Monday 12:00, resolution Tuesday 10:00. Check at
        // Monday 12:30: response overdue by 30 minutes, resolution not yet.
        let now = monday_10am() + Duration::minutes(150);
        let created = tracker.check_at(&ticket(monday_10am()), now).unwrap();

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].kind, ViolationKind::Response);
        assert_eq!(created[0].overdue_minutes, 30);
        assert_eq!(
            created[0].expected_deadline,
            monday_10am() + Duration::hours(2)
        );
    }

    #[test]
    fn overdue_minutes_floor() {
        let policies = FakePolicies { policy: Some(policy()), fail: false };
        let violations = FakeViolations::default();
        let tracker = ViolationTracker::new(&policies, &violations);

        // 90.9 minutes past the response deadline floors to 90.
        let now = monday_10am() + Duration::hours(2) + Duration::seconds(90 * 60 + 54);
        let created = tracker.check_at(&ticket(monday_10am()), now).unwrap();
        assert_eq!(created[0].overdue_minutes, 90);
    }

    #[test]
    fn responded_ticket_skips_response_check() {
        let policies = FakePolicies { policy: Some(policy()), fail: false };
        let violations = FakeViolations::default();
        let tracker = ViolationTracker::new(&policies, &violations);

        let mut t = ticket(monday_10am());
        t.first_responded_at = Some(monday_10am() + Duration::minutes(30));

        // Both budgets long blown, but only resolution can violate.
        let now = monday_10am() + Duration::days(7);
        let created = tracker.check_at(&t, now).unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].kind, ViolationKind::Resolution);
    }

    #[test]
    fn second_check_does_not_duplicate() {
        let policies = FakePolicies { policy: Some(policy()), fail: false };
        let violations = FakeViolations::default();
        let tracker = ViolationTracker::new(&policies, &violations);

        let now = monday_10am() + Duration::days(7);
        let first = tracker.check_at(&ticket(monday_10am()), now).unwrap();
        assert_eq!(first.len(), 2);

        let second = tracker
            .check_at(&ticket(monday_10am()), now + Duration::hours(1))
            .unwrap();
        assert!(second.is_empty());
        assert_eq!(violations.rows.borrow().len(), 2);
    }

    #[test]
    fn not_overdue_at_exact_deadline() {
        let policies = FakePolicies { policy: Some(policy()), fail: false };
        let violations = FakeViolations::default();
        let tracker = ViolationTracker::new(&policies, &violations);

        // now == deadline is not a breach; one second past is.
        let deadline = monday_10am() + Duration::hours(2);
        assert!(tracker.check_at(&ticket(monday_10am()), deadline).unwrap().is_empty());
        let created = tracker
            .check_at(&ticket(monday_10am()), deadline + Duration::seconds(1))
            .unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].overdue_minutes, 0);
    }

    #[test]
    fn resolve_marks_only_matching_kind() {
        let policies = FakePolicies { policy: Some(policy()), fail: false };
        let violations = FakeViolations::default();
        let tracker = ViolationTracker::new(&policies, &violations);

        let now = monday_10am() + Duration::days(7);
        tracker.check_at(&ticket(monday_10am()), now).unwrap();

        assert_eq!(tracker.resolve_at(10, ViolationKind::Response, now).unwrap(), 1);
        assert_eq!(tracker.resolve_at(10, ViolationKind::Response, now).unwrap(), 0);
        assert_eq!(
            violations.open_violations(10, ViolationKind::Resolution).unwrap().len(),
            1
        );
    }

    #[test]
    fn policy_store_errors_propagate() {
        let policies = FakePolicies { policy: None, fail: true };
        let violations = FakeViolations::default();
        let tracker = ViolationTracker::new(&policies, &violations);

        assert!(tracker.check_at(&ticket(monday_10am()), monday_10am()).is_err());
    }
}
