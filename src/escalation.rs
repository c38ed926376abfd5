use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::models::{EscalationRule, Notification, RuleAction, RuleTrigger, Ticket, User};
use crate::store::{Directory, Notifier, RuleStore, TicketStore};

/// True when `rule`'s condition holds for the ticket right now.
///
/// Age uses whole elapsed hours with floor semantics, so a 24-hour rule is
/// boundary-true at exactly 24 hours. Manual rules never fire in a scan.
pub fn should_fire(rule: &EscalationRule, ticket: &Ticket, now: DateTime<Utc>) -> bool {
    match &rule.trigger {
        RuleTrigger::Age { hours } => (now - ticket.created_at).num_hours() >= *hours,
        RuleTrigger::PriorityEquals(p) => ticket.priority == *p,
        RuleTrigger::StatusEquals(s) => ticket.status == *s,
        RuleTrigger::Manual => false,
    }
}

/// Identifies the qualifying condition a firing record covers. A rule fires
/// at most once per (rule, ticket, fingerprint); when the condition stops
/// holding the record is cleared so a later re-qualification fires again.
fn fingerprint(rule: &EscalationRule, ticket: &Ticket) -> String {
    match &rule.trigger {
        RuleTrigger::Age { hours } => format!("age>={}", hours),
        RuleTrigger::PriorityEquals(_) => format!("priority={}", ticket.priority),
        RuleTrigger::StatusEquals(_) => format!("status={}", ticket.status),
        RuleTrigger::Manual => "manual".to_string(),
    }
}

/// Applies a fired rule's action to a ticket.
pub struct Executor<'a> {
    tickets: &'a dyn TicketStore,
    directory: &'a dyn Directory,
    notifier: &'a dyn Notifier,
}

impl<'a> Executor<'a> {
    pub fn new(
        tickets: &'a dyn TicketStore,
        directory: &'a dyn Directory,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self { tickets, directory, notifier }
    }

    /// Dispatches on the rule's action kind. Store errors propagate;
    /// notification dispatch failures are logged and swallowed. Every call
    /// ends with an audit comment on the ticket, even when the action itself
    /// was a no-op, so the evaluation trail survives.
    pub fn execute(&self, rule: &EscalationRule, ticket: &Ticket) -> Result<()> {
        match &rule.action {
            RuleAction::NotifyUser { user_id } => {
                match self.directory.user_by_id(*user_id)? {
                    Some(user) => self.dispatch(&user.email, rule, ticket),
                    // Missing target user is a no-op, not an error.
                    None => warn!(rule = %rule.name, user_id, "notify target not found"),
                }
            }

            RuleAction::Reassign { user_id, role } => {
                self.reassign(rule, ticket, *user_id, role.as_deref())?;
            }

            RuleAction::ChangePriority(new_priority) => {
                if *new_priority != ticket.priority {
                    if self.tickets.change_ticket_priority(ticket.id, *new_priority, ticket.version)? {
                        self.tickets.append_comment(
                            ticket.id,
                            &format!(
                                "Priority changed {} -> {} by escalation rule \"{}\"",
                                ticket.priority, new_priority, rule.name
                            ),
                            true,
                        )?;
                        info!(ticket_id = ticket.id, rule = %rule.name, %new_priority, "priority escalated");
                    } else {
                        warn!(ticket_id = ticket.id, rule = %rule.name, "priority change lost a version race; skipped");
                    }
                }
            }

            RuleAction::NotifyList { recipients } => {
                // One bad address must not starve the rest of the list.
                for recipient in recipients {
                    self.dispatch(recipient, rule, ticket);
                }
            }

            RuleAction::Unknown(kind) => {
                warn!(rule = %rule.name, action_kind = %kind, "unknown escalation action; skipping");
            }
        }

        self.tickets.append_comment(
            ticket.id,
            &format!("Escalation rule \"{}\" executed: {}", rule.name, rule.action.kind()),
            true,
        )?;
        Ok(())
    }

    fn reassign(
        &self,
        rule: &EscalationRule,
        ticket: &Ticket,
        user_id: Option<i64>,
        role: Option<&str>,
    ) -> Result<()> {
        let assignee = match user_id {
            Some(id) => self.directory.user_by_id(id)?,
            None => match role {
                // Tie-break among role holders: least recently assigned wins.
                Some(role) => self
                    .directory
                    .users_with_role(ticket.organization_id, role)?
                    .into_iter()
                    .next(),
                None => None,
            },
        };

        let assignee: User = match assignee {
            Some(u) => u,
            None => {
                warn!(rule = %rule.name, ticket_id = ticket.id, "no assignee resolvable; reassign skipped");
                return Ok(());
            }
        };

        if ticket.assigned_to == Some(assignee.id) {
            debug!(ticket_id = ticket.id, rule = %rule.name, "already assigned to target; nothing to do");
            return Ok(());
        }

        if self.tickets.reassign_ticket(ticket.id, assignee.id, ticket.version)? {
            self.directory.mark_assigned(assignee.id, Utc::now())?;
            self.tickets.append_comment(
                ticket.id,
                &format!(
                    "Reassigned to {} by escalation rule \"{}\"",
                    assignee.name, rule.name
                ),
                true,
            )?;
            info!(ticket_id = ticket.id, rule = %rule.name, assignee = assignee.id, "ticket reassigned");
        } else {
            warn!(ticket_id = ticket.id, rule = %rule.name, "reassign lost a version race; skipped");
        }
        Ok(())
    }

    fn dispatch(&self, recipient: &str, rule: &EscalationRule, ticket: &Ticket) {
        let notification = Notification {
            ticket_id: ticket.id,
            subject: ticket.subject.clone(),
            priority: ticket.priority,
            rule_name: rule.name.clone(),
        };
        // Fire and forget: dispatch failures never abort the escalation.
        if let Err(e) = self.notifier.send(recipient, &notification) {
            warn!(recipient, rule = %rule.name, error = %format!("{e:#}"), "notification dispatch failed");
        }
    }
}

/// Evaluates organization-scoped escalation rules against a ticket and
/// executes the ones that fire, at most once per qualifying condition.
pub struct RuleEngine<'a> {
    rules: &'a dyn RuleStore,
    executor: Executor<'a>,
}

impl<'a> RuleEngine<'a> {
    pub fn new(rules: &'a dyn RuleStore, executor: Executor<'a>) -> Self {
        Self { rules, executor }
    }

    /// Evaluates all active rules for the ticket's organization, in store
    /// order. Fired rules have their actions applied before this returns.
    pub fn check_at(&self, ticket: &Ticket, now: DateTime<Utc>) -> Result<Vec<EscalationRule>> {
        let rules = self.rules.active_rules(ticket.organization_id)?;
        let mut fired = Vec::new();

        for rule in rules {
            if should_fire(&rule, ticket, now) {
                let fp = fingerprint(&rule, ticket);
                if self.rules.firing_recorded(rule.id, ticket.id, &fp)? {
                    debug!(rule = %rule.name, ticket_id = ticket.id, "already fired for this condition");
                    continue;
                }
                // Claim before executing: at-most-once per condition.
                self.rules.record_firing(rule.id, ticket.id, &fp, now)?;
                self.executor.execute(&rule, ticket)?;
                fired.push(rule);
            } else if !matches!(rule.trigger, RuleTrigger::Manual) {
                // Condition lapsed; let a future re-qualification fire again.
                self.rules.clear_firing(rule.id, ticket.id)?;
            }
        }

        Ok(fired)
    }

    pub fn check(&self, ticket: &Ticket) -> Result<Vec<EscalationRule>> {
        self.check_at(ticket, Utc::now())
    }

    /// Explicit invocation path: executes the rule regardless of its trigger.
    /// This is the only way a `manual` rule runs.
    pub fn fire_manual(&self, rule: &EscalationRule, ticket: &Ticket) -> Result<()> {
        info!(rule = %rule.name, ticket_id = ticket.id, "manual escalation invoked");
        self.executor.execute(rule, ticket)
    }
}
