//! Collaborator interfaces consumed by the SLA/escalation core.
//!
//! The engine never talks to SQLite directly; it holds references to these
//! traits so tests can substitute in-memory fakes. `crate::db::Database`
//! implements all of them over one SQLite file.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{
    EscalationRule, Notification, Priority, SlaPolicy, SlaViolation, Ticket, TicketType, User,
    ViolationKind,
};

/// Resolves the applicable SLA definition for an (org, priority, type) tuple.
pub trait PolicyStore {
    /// First active match, or `None`. Absence is not an error: callers treat
    /// "no policy" as "no obligation".
    fn find_policy(
        &self,
        organization_id: i64,
        priority: Priority,
        ticket_type: TicketType,
    ) -> Result<Option<SlaPolicy>>;
}

#[derive(Debug, Clone)]
pub struct NewViolation {
    pub ticket_id: i64,
    pub organization_id: i64,
    pub kind: ViolationKind,
    pub expected_deadline: DateTime<Utc>,
    pub overdue_minutes: i64,
}

pub trait ViolationStore {
    fn insert_violation(&self, violation: &NewViolation, now: DateTime<Utc>) -> Result<i64>;

    fn open_violations(&self, ticket_id: i64, kind: ViolationKind) -> Result<Vec<SlaViolation>>;

    /// Marks all open violations of `kind` resolved, stamping `resolved_at`.
    /// Returns how many rows changed; zero is a legitimate no-op.
    fn resolve_violations(
        &self,
        ticket_id: i64,
        kind: ViolationKind,
        now: DateTime<Utc>,
    ) -> Result<usize>;
}

pub trait RuleStore {
    /// Active rules scoped to the organization, in stable store order.
    fn active_rules(&self, organization_id: i64) -> Result<Vec<EscalationRule>>;

    /// True if this (rule, ticket) already fired for `fingerprint`.
    fn firing_recorded(&self, rule_id: i64, ticket_id: i64, fingerprint: &str) -> Result<bool>;

    /// Claims the firing before the action runs. At-most-once: a claim that
    /// precedes a failed execution is not rolled back.
    fn record_firing(
        &self,
        rule_id: i64,
        ticket_id: i64,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Forgets the firing once the condition no longer holds, so a later
    /// re-qualification fires again.
    fn clear_firing(&self, rule_id: i64, ticket_id: i64) -> Result<()>;
}

/// Ticket mutation surface the executor is allowed to touch.
///
/// The version-checked updates return `false` on a version conflict instead
/// of writing, so two concurrent check passes cannot both apply an action.
pub trait TicketStore {
    fn get_ticket(&self, id: i64) -> Result<Option<Ticket>>;

    fn reassign_ticket(&self, id: i64, user_id: i64, expected_version: i64) -> Result<bool>;

    fn change_ticket_priority(
        &self,
        id: i64,
        priority: Priority,
        expected_version: i64,
    ) -> Result<bool>;

    fn append_comment(&self, ticket_id: i64, body: &str, internal: bool) -> Result<i64>;
}

/// User/role resolver.
pub trait Directory {
    fn user_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Users holding `role` within the organization, least recently assigned
    /// first (never-assigned before everyone, ties by user id).
    fn users_with_role(&self, organization_id: i64, role: &str) -> Result<Vec<User>>;

    fn mark_assigned(&self, user_id: i64, now: DateTime<Utc>) -> Result<()>;
}

/// Notification dispatch. Failures are the caller's problem to isolate; the
/// executor logs and moves on rather than propagating.
pub trait Notifier {
    fn send(&self, recipient: &str, notification: &Notification) -> Result<()>;
}
