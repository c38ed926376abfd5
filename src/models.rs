use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::BusinessCalendar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Urgent => write!(f, "urgent"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    New,
    Open,
    Pending,
    Resolved,
    Closed,
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TicketStatus::New => write!(f, "new"),
            TicketStatus::Open => write!(f, "open"),
            TicketStatus::Pending => write!(f, "pending"),
            TicketStatus::Resolved => write!(f, "resolved"),
            TicketStatus::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "new" => Ok(TicketStatus::New),
            "open" => Ok(TicketStatus::Open),
            "pending" => Ok(TicketStatus::Pending),
            "resolved" => Ok(TicketStatus::Resolved),
            "closed" => Ok(TicketStatus::Closed),
            _ => Err(format!("Invalid ticket status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketType {
    Question,
    Incident,
    Problem,
    Task,
}

impl std::fmt::Display for TicketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TicketType::Question => write!(f, "question"),
            TicketType::Incident => write!(f, "incident"),
            TicketType::Problem => write!(f, "problem"),
            TicketType::Task => write!(f, "task"),
        }
    }
}

impl std::str::FromStr for TicketType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "question" => Ok(TicketType::Question),
            "incident" => Ok(TicketType::Incident),
            "problem" => Ok(TicketType::Problem),
            "task" => Ok(TicketType::Task),
            _ => Err(format!("Invalid ticket type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    pub organization_id: i64,
    pub subject: String,
    pub description: Option<String>,
    pub status: TicketStatus,
    pub priority: Priority,
    pub ticket_type: TicketType,
    pub assigned_to: Option<i64>,
    /// Bumped on every mutating update; used for optimistic concurrency.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub first_responded_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketComment {
    pub id: i64,
    pub ticket_id: i64,
    pub body: String,
    pub internal: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub organization_id: i64,
    pub name: String,
    pub email: String,
    pub role: String,
    pub last_assigned_at: Option<DateTime<Utc>>,
}

/// Response/resolution hour budgets for one (organization, priority, type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaPolicy {
    pub id: i64,
    pub organization_id: i64,
    pub priority: Priority,
    pub ticket_type: TicketType,
    pub response_hours: f64,
    pub resolution_hours: f64,
    pub calendar: BusinessCalendar,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationKind {
    Response,
    Resolution,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationKind::Response => write!(f, "response"),
            ViolationKind::Resolution => write!(f, "resolution"),
        }
    }
}

impl std::str::FromStr for ViolationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "response" => Ok(ViolationKind::Response),
            "resolution" => Ok(ViolationKind::Resolution),
            _ => Err(format!("Invalid violation kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaViolation {
    pub id: i64,
    pub ticket_id: i64,
    pub organization_id: i64,
    pub kind: ViolationKind,
    pub expected_deadline: DateTime<Utc>,
    pub overdue_minutes: i64,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Condition half of an escalation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RuleTrigger {
    /// Fires once the ticket is at least this many whole hours old.
    Age { hours: i64 },
    PriorityEquals(Priority),
    StatusEquals(TicketStatus),
    /// Never fires in a scan; only via explicit invocation.
    Manual,
}

impl RuleTrigger {
    pub fn kind(&self) -> &'static str {
        match self {
            RuleTrigger::Age { .. } => "age",
            RuleTrigger::PriorityEquals(_) => "priority_equals",
            RuleTrigger::StatusEquals(_) => "status_equals",
            RuleTrigger::Manual => "manual",
        }
    }
}

/// Action half of an escalation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RuleAction {
    NotifyUser { user_id: i64 },
    Reassign { user_id: Option<i64>, role: Option<String> },
    ChangePriority(Priority),
    NotifyList { recipients: Vec<String> },
    /// Action kind the store holds but this build does not understand.
    /// Executed as a logged no-op, never an error.
    Unknown(String),
}

impl RuleAction {
    pub fn kind(&self) -> &str {
        match self {
            RuleAction::NotifyUser { .. } => "notify_user",
            RuleAction::Reassign { .. } => "reassign",
            RuleAction::ChangePriority(_) => "change_priority",
            RuleAction::NotifyList { .. } => "notify_list",
            RuleAction::Unknown(kind) => kind,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRule {
    pub id: i64,
    pub organization_id: i64,
    pub name: String,
    pub trigger: RuleTrigger,
    pub action: RuleAction,
    pub active: bool,
}

/// Payload handed to the notification dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub ticket_id: i64,
    pub subject: String,
    pub priority: Priority,
    pub rule_name: String,
}
