use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};
use tracing::warn;

use crate::calendar::BusinessCalendar;
use crate::models::{
    EscalationRule, Notification, Priority, RuleAction, RuleTrigger, SlaPolicy, SlaViolation,
    Ticket, TicketComment, TicketStatus, TicketType, User, ViolationKind,
};
use crate::store::{
    Directory, NewViolation, Notifier, PolicyStore, RuleStore, TicketStore, ViolationStore,
};

const SCHEMA_VERSION: i32 = 1;

/// SQLite backing store for tickets, policies, rules, violations, and the
/// notification outbox. Implements every collaborator trait the engine
/// consumes, so `SlaEngine::over(&db)` wires the whole core to one file.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open database")?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM pragma_user_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if version < SCHEMA_VERSION {
            self.conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS tickets (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    organization_id INTEGER NOT NULL,
                    subject TEXT NOT NULL,
                    description TEXT,
                    status TEXT NOT NULL DEFAULT 'new',
                    priority TEXT NOT NULL DEFAULT 'normal',
                    ticket_type TEXT NOT NULL DEFAULT 'question',
                    assigned_to INTEGER REFERENCES users(id),
                    version INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    first_responded_at TEXT,
                    resolved_at TEXT
                );

                CREATE TABLE IF NOT EXISTS ticket_comments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ticket_id INTEGER NOT NULL,
                    body TEXT NOT NULL,
                    internal INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (ticket_id) REFERENCES tickets(id) ON DELETE CASCADE
                );

                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    organization_id INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL,
                    role TEXT NOT NULL,
                    last_assigned_at TEXT
                );

                CREATE TABLE IF NOT EXISTS sla_policies (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    organization_id INTEGER NOT NULL,
                    priority TEXT NOT NULL,
                    ticket_type TEXT NOT NULL,
                    response_hours REAL NOT NULL,
                    resolution_hours REAL NOT NULL,
                    hours_start INTEGER NOT NULL,
                    hours_end INTEGER NOT NULL,
                    working_weekdays TEXT NOT NULL,
                    utc_offset_minutes INTEGER NOT NULL DEFAULT 0,
                    active INTEGER NOT NULL DEFAULT 1
                );

                CREATE TABLE IF NOT EXISTS policy_holidays (
                    policy_id INTEGER NOT NULL,
                    date TEXT NOT NULL,
                    PRIMARY KEY (policy_id, date),
                    FOREIGN KEY (policy_id) REFERENCES sla_policies(id) ON DELETE CASCADE
                );

                CREATE TABLE IF NOT EXISTS sla_violations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ticket_id INTEGER NOT NULL,
                    organization_id INTEGER NOT NULL,
                    kind TEXT NOT NULL,
                    expected_deadline TEXT NOT NULL,
                    overdue_minutes INTEGER NOT NULL,
                    resolved INTEGER NOT NULL DEFAULT 0,
                    resolved_at TEXT,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (ticket_id) REFERENCES tickets(id) ON DELETE CASCADE
                );

                CREATE TABLE IF NOT EXISTS escalation_rules (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    organization_id INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    trigger_kind TEXT NOT NULL,
                    trigger_hours INTEGER,
                    trigger_priority TEXT,
                    trigger_status TEXT,
                    action_kind TEXT NOT NULL,
                    target_user_id INTEGER,
                    target_role TEXT,
                    new_priority TEXT,
                    recipients TEXT,
                    active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS rule_firings (
                    rule_id INTEGER NOT NULL,
                    ticket_id INTEGER NOT NULL,
                    fingerprint TEXT NOT NULL,
                    fired_at TEXT NOT NULL,
                    PRIMARY KEY (rule_id, ticket_id),
                    FOREIGN KEY (rule_id) REFERENCES escalation_rules(id) ON DELETE CASCADE,
                    FOREIGN KEY (ticket_id) REFERENCES tickets(id) ON DELETE CASCADE
                );

                CREATE TABLE IF NOT EXISTS notifications (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    recipient TEXT NOT NULL,
                    ticket_id INTEGER NOT NULL,
                    subject TEXT NOT NULL,
                    priority TEXT NOT NULL,
                    rule_name TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_tickets_org ON tickets(organization_id);
                CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status);
                CREATE INDEX IF NOT EXISTS idx_comments_ticket ON ticket_comments(ticket_id);
                CREATE INDEX IF NOT EXISTS idx_users_org_role ON users(organization_id, role);
                CREATE INDEX IF NOT EXISTS idx_policies_lookup
                    ON sla_policies(organization_id, priority, ticket_type);
                CREATE INDEX IF NOT EXISTS idx_violations_ticket
                    ON sla_violations(ticket_id, kind, resolved);
                CREATE INDEX IF NOT EXISTS idx_rules_org ON escalation_rules(organization_id);
                "#,
            )?;

            self.conn
                .execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;
        }

        self.conn.execute("PRAGMA foreign_keys = ON", [])?;

        Ok(())
    }

    // Tickets (CRUD surface for the CLI; the engine only sees TicketStore)

    pub fn create_ticket(
        &self,
        organization_id: i64,
        subject: &str,
        description: Option<&str>,
        priority: Priority,
        ticket_type: TicketType,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO tickets (organization_id, subject, description, status, priority, ticket_type, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'new', ?4, ?5, ?6, ?6)",
            params![
                organization_id,
                subject,
                description,
                priority.to_string(),
                ticket_type.to_string(),
                now
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_tickets(
        &self,
        organization_id: Option<i64>,
        status_filter: Option<TicketStatus>,
    ) -> Result<Vec<Ticket>> {
        let mut sql = String::from(
            "SELECT id, organization_id, subject, description, status, priority, ticket_type,
                    assigned_to, version, created_at, updated_at, first_responded_at, resolved_at
             FROM tickets",
        );
        let mut conditions = Vec::new();
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(org) = organization_id {
            conditions.push(format!("organization_id = ?{}", params_vec.len() + 1));
            params_vec.push(Box::new(org));
        }
        if let Some(status) = status_filter {
            conditions.push(format!("status = ?{}", params_vec.len() + 1));
            params_vec.push(Box::new(status.to_string()));
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        let tickets = stmt
            .query_map(params_refs.as_slice(), ticket_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tickets)
    }

    pub fn set_ticket_status(&self, id: i64, status: TicketStatus) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let rows = self.conn.execute(
            "UPDATE tickets SET status = ?1, version = version + 1, updated_at = ?2 WHERE id = ?3",
            params![status.to_string(), now, id],
        )?;
        Ok(rows > 0)
    }

    pub fn set_ticket_priority(&self, id: i64, priority: Priority) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let rows = self.conn.execute(
            "UPDATE tickets SET priority = ?1, version = version + 1, updated_at = ?2 WHERE id = ?3",
            params![priority.to_string(), now, id],
        )?;
        Ok(rows > 0)
    }

    pub fn assign_ticket(&self, id: i64, user_id: i64) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let rows = self.conn.execute(
            "UPDATE tickets SET assigned_to = ?1, version = version + 1, updated_at = ?2 WHERE id = ?3",
            params![user_id, now, id],
        )?;
        Ok(rows > 0)
    }

    /// Stamps `first_responded_at` if not already set.
    pub fn mark_responded(&self, id: i64) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let rows = self.conn.execute(
            "UPDATE tickets SET first_responded_at = ?1, version = version + 1, updated_at = ?1
             WHERE id = ?2 AND first_responded_at IS NULL",
            params![now, id],
        )?;
        Ok(rows > 0)
    }

    /// Stamps `resolved_at` and moves the ticket to resolved.
    pub fn mark_resolved(&self, id: i64) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let rows = self.conn.execute(
            "UPDATE tickets SET resolved_at = ?1, status = 'resolved', version = version + 1, updated_at = ?1
             WHERE id = ?2 AND resolved_at IS NULL",
            params![now, id],
        )?;
        Ok(rows > 0)
    }

    pub fn get_comments(&self, ticket_id: i64) -> Result<Vec<TicketComment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ticket_id, body, internal, created_at
             FROM ticket_comments WHERE ticket_id = ?1 ORDER BY id",
        )?;
        let comments = stmt
            .query_map([ticket_id], |row| {
                Ok(TicketComment {
                    id: row.get(0)?,
                    ticket_id: row.get(1)?,
                    body: row.get(2)?,
                    internal: row.get::<_, i64>(3)? != 0,
                    created_at: parse_datetime(row.get::<_, String>(4)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    // Users

    pub fn create_user(
        &self,
        organization_id: i64,
        name: &str,
        email: &str,
        role: &str,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO users (organization_id, name, email, role) VALUES (?1, ?2, ?3, ?4)",
            params![organization_id, name, email, role],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_users(&self, organization_id: i64) -> Result<Vec<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, name, email, role, last_assigned_at
             FROM users WHERE organization_id = ?1 ORDER BY id",
        )?;
        let users = stmt
            .query_map([organization_id], user_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    // SLA policies

    pub fn create_policy(
        &self,
        organization_id: i64,
        priority: Priority,
        ticket_type: TicketType,
        response_hours: f64,
        resolution_hours: f64,
        calendar: &BusinessCalendar,
    ) -> Result<i64> {
        let weekdays = calendar
            .working_weekdays
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.conn.execute(
            "INSERT INTO sla_policies (organization_id, priority, ticket_type, response_hours,
                 resolution_hours, hours_start, hours_end, working_weekdays, utc_offset_minutes, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1)",
            params![
                organization_id,
                priority.to_string(),
                ticket_type.to_string(),
                response_hours,
                resolution_hours,
                calendar.hours_start,
                calendar.hours_end,
                weekdays,
                calendar.utc_offset_minutes
            ],
        )?;
        let policy_id = self.conn.last_insert_rowid();

        for date in &calendar.holidays {
            self.conn.execute(
                "INSERT OR IGNORE INTO policy_holidays (policy_id, date) VALUES (?1, ?2)",
                params![policy_id, date.to_string()],
            )?;
        }

        Ok(policy_id)
    }

    pub fn add_policy_holiday(&self, policy_id: i64, date: NaiveDate) -> Result<bool> {
        let rows = self.conn.execute(
            "INSERT OR IGNORE INTO policy_holidays (policy_id, date) VALUES (?1, ?2)",
            params![policy_id, date.to_string()],
        )?;
        Ok(rows > 0)
    }

    pub fn list_policies(&self, organization_id: i64) -> Result<Vec<SlaPolicy>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, priority, ticket_type, response_hours, resolution_hours,
                    hours_start, hours_end, working_weekdays, utc_offset_minutes, active
             FROM sla_policies WHERE organization_id = ?1 ORDER BY id",
        )?;
        let policies = stmt
            .query_map([organization_id], policy_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        policies
            .into_iter()
            .map(|p| self.attach_holidays(p))
            .collect()
    }

    fn attach_holidays(&self, mut policy: SlaPolicy) -> Result<SlaPolicy> {
        let mut stmt = self
            .conn
            .prepare("SELECT date FROM policy_holidays WHERE policy_id = ?1")?;
        let dates = stmt
            .query_map([policy.id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        policy.calendar.holidays = dates
            .iter()
            .filter_map(|d| d.parse::<NaiveDate>().ok())
            .collect();
        Ok(policy)
    }

    // Escalation rules

    pub fn create_rule(
        &self,
        organization_id: i64,
        name: &str,
        trigger: &RuleTrigger,
        action: &RuleAction,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();

        let (trigger_hours, trigger_priority, trigger_status) = match trigger {
            RuleTrigger::Age { hours } => (Some(*hours), None, None),
            RuleTrigger::PriorityEquals(p) => (None, Some(p.to_string()), None),
            RuleTrigger::StatusEquals(s) => (None, None, Some(s.to_string())),
            RuleTrigger::Manual => (None, None, None),
        };

        let (target_user_id, target_role, new_priority, recipients) = match action {
            RuleAction::NotifyUser { user_id } => (Some(*user_id), None, None, None),
            RuleAction::Reassign { user_id, role } => (*user_id, role.clone(), None, None),
            RuleAction::ChangePriority(p) => (None, None, Some(p.to_string()), None),
            RuleAction::NotifyList { recipients } => {
                (None, None, None, Some(serde_json::to_string(recipients)?))
            }
            RuleAction::Unknown(_) => (None, None, None, None),
        };

        self.conn.execute(
            "INSERT INTO escalation_rules (organization_id, name, trigger_kind, trigger_hours,
                 trigger_priority, trigger_status, action_kind, target_user_id, target_role,
                 new_priority, recipients, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 1, ?12)",
            params![
                organization_id,
                name,
                trigger.kind(),
                trigger_hours,
                trigger_priority,
                trigger_status,
                action.kind(),
                target_user_id,
                target_role,
                new_priority,
                recipients,
                now
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_rule(&self, id: i64) -> Result<Option<EscalationRule>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, name, trigger_kind, trigger_hours, trigger_priority,
                    trigger_status, action_kind, target_user_id, target_role, new_priority,
                    recipients, active
             FROM escalation_rules WHERE id = ?1",
        )?;
        let rule = stmt.query_row([id], rule_from_row).ok();
        Ok(rule)
    }

    pub fn list_rules(&self, organization_id: i64) -> Result<Vec<EscalationRule>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, name, trigger_kind, trigger_hours, trigger_priority,
                    trigger_status, action_kind, target_user_id, target_role, new_priority,
                    recipients, active
             FROM escalation_rules WHERE organization_id = ?1 ORDER BY id",
        )?;
        let rules = stmt
            .query_map([organization_id], rule_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    pub fn set_rule_active(&self, id: i64, active: bool) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE escalation_rules SET active = ?1 WHERE id = ?2",
            params![active as i64, id],
        )?;
        Ok(rows > 0)
    }

    // Violations (read surface for the CLI)

    pub fn list_violations(&self, ticket_id: i64) -> Result<Vec<SlaViolation>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ticket_id, organization_id, kind, expected_deadline, overdue_minutes,
                    resolved, resolved_at, created_at
             FROM sla_violations WHERE ticket_id = ?1 ORDER BY id",
        )?;
        let violations = stmt
            .query_map([ticket_id], violation_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(violations)
    }

    // Notification outbox

    pub fn list_notifications(&self) -> Result<Vec<(i64, String, Notification)>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, recipient, ticket_id, subject, priority, rule_name
             FROM notifications ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    Notification {
                        ticket_id: row.get(2)?,
                        subject: row.get(3)?,
                        priority: parse_or(row.get::<_, String>(4)?, Priority::Normal),
                        rule_name: row.get(5)?,
                    },
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl PolicyStore for Database {
    fn find_policy(
        &self,
        organization_id: i64,
        priority: Priority,
        ticket_type: TicketType,
    ) -> Result<Option<SlaPolicy>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, priority, ticket_type, response_hours, resolution_hours,
                    hours_start, hours_end, working_weekdays, utc_offset_minutes, active
             FROM sla_policies
             WHERE organization_id = ?1 AND priority = ?2 AND ticket_type = ?3 AND active = 1
             ORDER BY id LIMIT 1",
        )?;
        let policy = stmt
            .query_row(
                params![organization_id, priority.to_string(), ticket_type.to_string()],
                policy_from_row,
            )
            .ok();

        match policy {
            Some(p) => Ok(Some(self.attach_holidays(p)?)),
            None => Ok(None),
        }
    }
}

impl ViolationStore for Database {
    fn insert_violation(&self, violation: &NewViolation, now: DateTime<Utc>) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO sla_violations (ticket_id, organization_id, kind, expected_deadline,
                 overdue_minutes, resolved, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                violation.ticket_id,
                violation.organization_id,
                violation.kind.to_string(),
                violation.expected_deadline.to_rfc3339(),
                violation.overdue_minutes,
                now.to_rfc3339()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn open_violations(&self, ticket_id: i64, kind: ViolationKind) -> Result<Vec<SlaViolation>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ticket_id, organization_id, kind, expected_deadline, overdue_minutes,
                    resolved, resolved_at, created_at
             FROM sla_violations
             WHERE ticket_id = ?1 AND kind = ?2 AND resolved = 0 ORDER BY id",
        )?;
        let violations = stmt
            .query_map(params![ticket_id, kind.to_string()], violation_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(violations)
    }

    fn resolve_violations(
        &self,
        ticket_id: i64,
        kind: ViolationKind,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE sla_violations SET resolved = 1, resolved_at = ?1
             WHERE ticket_id = ?2 AND kind = ?3 AND resolved = 0",
            params![now.to_rfc3339(), ticket_id, kind.to_string()],
        )?;
        Ok(rows)
    }
}

impl RuleStore for Database {
    fn active_rules(&self, organization_id: i64) -> Result<Vec<EscalationRule>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, name, trigger_kind, trigger_hours, trigger_priority,
                    trigger_status, action_kind, target_user_id, target_role, new_priority,
                    recipients, active
             FROM escalation_rules WHERE organization_id = ?1 AND active = 1 ORDER BY id",
        )?;
        let rules = stmt
            .query_map([organization_id], rule_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    fn firing_recorded(&self, rule_id: i64, ticket_id: i64, fingerprint: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM rule_firings
                 WHERE rule_id = ?1 AND ticket_id = ?2 AND fingerprint = ?3",
                params![rule_id, ticket_id, fingerprint],
                |row| row.get(0),
            )
            .ok();
        Ok(found.is_some())
    }

    fn record_firing(
        &self,
        rule_id: i64,
        ticket_id: i64,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO rule_firings (rule_id, ticket_id, fingerprint, fired_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![rule_id, ticket_id, fingerprint, now.to_rfc3339()],
        )?;
        Ok(())
    }

    fn clear_firing(&self, rule_id: i64, ticket_id: i64) -> Result<()> {
        self.conn.execute(
            "DELETE FROM rule_firings WHERE rule_id = ?1 AND ticket_id = ?2",
            params![rule_id, ticket_id],
        )?;
        Ok(())
    }
}

impl TicketStore for Database {
    fn get_ticket(&self, id: i64) -> Result<Option<Ticket>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, subject, description, status, priority, ticket_type,
                    assigned_to, version, created_at, updated_at, first_responded_at, resolved_at
             FROM tickets WHERE id = ?1",
        )?;
        let ticket = stmt.query_row([id], ticket_from_row).ok();
        Ok(ticket)
    }

    fn reassign_ticket(&self, id: i64, user_id: i64, expected_version: i64) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let rows = self.conn.execute(
            "UPDATE tickets SET assigned_to = ?1, version = version + 1, updated_at = ?2
             WHERE id = ?3 AND version = ?4",
            params![user_id, now, id, expected_version],
        )?;
        Ok(rows > 0)
    }

    fn change_ticket_priority(
        &self,
        id: i64,
        priority: Priority,
        expected_version: i64,
    ) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let rows = self.conn.execute(
            "UPDATE tickets SET priority = ?1, version = version + 1, updated_at = ?2
             WHERE id = ?3 AND version = ?4",
            params![priority.to_string(), now, id, expected_version],
        )?;
        Ok(rows > 0)
    }

    fn append_comment(&self, ticket_id: i64, body: &str, internal: bool) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO ticket_comments (ticket_id, body, internal, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![ticket_id, body, internal as i64, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }
}

impl Directory for Database {
    fn user_by_id(&self, id: i64) -> Result<Option<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, name, email, role, last_assigned_at
             FROM users WHERE id = ?1",
        )?;
        let user = stmt.query_row([id], user_from_row).ok();
        Ok(user)
    }

    fn users_with_role(&self, organization_id: i64, role: &str) -> Result<Vec<User>> {
        // Least-recently-assigned first; never-assigned users lead.
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, name, email, role, last_assigned_at
             FROM users WHERE organization_id = ?1 AND role = ?2
             ORDER BY last_assigned_at IS NOT NULL, last_assigned_at, id",
        )?;
        let users = stmt
            .query_map(params![organization_id, role], user_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    fn mark_assigned(&self, user_id: i64, now: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE users SET last_assigned_at = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), user_id],
        )?;
        Ok(())
    }
}

/// Outbox dispatcher: records sends in the `notifications` table. Actual
/// transports (email/SMS providers) live outside this crate.
impl Notifier for Database {
    fn send(&self, recipient: &str, notification: &Notification) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO notifications (recipient, ticket_id, subject, priority, rule_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                recipient,
                notification.ticket_id,
                notification.subject,
                notification.priority.to_string(),
                notification.rule_name,
                now
            ],
        )?;
        Ok(())
    }
}

// Row mapping

fn ticket_from_row(row: &Row<'_>) -> rusqlite::Result<Ticket> {
    Ok(Ticket {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        subject: row.get(2)?,
        description: row.get(3)?,
        status: parse_or(row.get::<_, String>(4)?, TicketStatus::New),
        priority: parse_or(row.get::<_, String>(5)?, Priority::Normal),
        ticket_type: parse_or(row.get::<_, String>(6)?, TicketType::Question),
        assigned_to: row.get(7)?,
        version: row.get(8)?,
        created_at: parse_datetime(row.get::<_, String>(9)?),
        updated_at: parse_datetime(row.get::<_, String>(10)?),
        first_responded_at: row.get::<_, Option<String>>(11)?.map(parse_datetime),
        resolved_at: row.get::<_, Option<String>>(12)?.map(parse_datetime),
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        role: row.get(4)?,
        last_assigned_at: row.get::<_, Option<String>>(5)?.map(parse_datetime),
    })
}

fn policy_from_row(row: &Row<'_>) -> rusqlite::Result<SlaPolicy> {
    let weekdays: BTreeSet<u8> = row
        .get::<_, String>(8)?
        .split(',')
        .filter_map(|d| d.trim().parse().ok())
        .collect();

    Ok(SlaPolicy {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        priority: parse_or(row.get::<_, String>(2)?, Priority::Normal),
        ticket_type: parse_or(row.get::<_, String>(3)?, TicketType::Question),
        response_hours: row.get(4)?,
        resolution_hours: row.get(5)?,
        calendar: BusinessCalendar {
            hours_start: row.get(6)?,
            hours_end: row.get(7)?,
            working_weekdays: weekdays,
            holidays: BTreeSet::new(),
            utc_offset_minutes: row.get(9)?,
        },
        active: row.get::<_, i64>(10)? != 0,
    })
}

fn violation_from_row(row: &Row<'_>) -> rusqlite::Result<SlaViolation> {
    Ok(SlaViolation {
        id: row.get(0)?,
        ticket_id: row.get(1)?,
        organization_id: row.get(2)?,
        kind: parse_or(row.get::<_, String>(3)?, ViolationKind::Response),
        expected_deadline: parse_datetime(row.get::<_, String>(4)?),
        overdue_minutes: row.get(5)?,
        resolved: row.get::<_, i64>(6)? != 0,
        resolved_at: row.get::<_, Option<String>>(7)?.map(parse_datetime),
        created_at: parse_datetime(row.get::<_, String>(8)?),
    })
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<EscalationRule> {
    let trigger_kind: String = row.get(3)?;
    let trigger = match trigger_kind.as_str() {
        "age" => RuleTrigger::Age {
            hours: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
        },
        "priority_equals" => RuleTrigger::PriorityEquals(parse_or(
            row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            Priority::Normal,
        )),
        "status_equals" => RuleTrigger::StatusEquals(parse_or(
            row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            TicketStatus::Open,
        )),
        "manual" => RuleTrigger::Manual,
        other => {
            // Unknown trigger kinds degrade to manual: never fired by a scan.
            warn!(trigger_kind = other, "unknown trigger kind in rule store");
            RuleTrigger::Manual
        }
    };

    let action_kind: String = row.get(7)?;
    let action = match action_kind.as_str() {
        "notify_user" => RuleAction::NotifyUser {
            user_id: row.get::<_, Option<i64>>(8)?.unwrap_or(0),
        },
        "reassign" => RuleAction::Reassign {
            user_id: row.get(8)?,
            role: row.get(9)?,
        },
        "change_priority" => RuleAction::ChangePriority(parse_or(
            row.get::<_, Option<String>>(10)?.unwrap_or_default(),
            Priority::Normal,
        )),
        "notify_list" => {
            let raw: Option<String> = row.get(11)?;
            let recipients = raw
                .and_then(|r| serde_json::from_str(&r).ok())
                .unwrap_or_default();
            RuleAction::NotifyList { recipients }
        }
        other => RuleAction::Unknown(other.to_string()),
    };

    Ok(EscalationRule {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        name: row.get(2)?,
        trigger,
        action,
        active: row.get::<_, i64>(12)? != 0,
    })
}

fn parse_or<T: std::str::FromStr>(s: String, default: T) -> T {
    s.parse().unwrap_or(default)
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
