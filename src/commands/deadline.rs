use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use deskwatch::db::Database;
use deskwatch::engine::SlaEngine;
use deskwatch::models::{Priority, TicketType, ViolationKind};

pub fn run(
    db: &Database,
    org: i64,
    priority: &str,
    ticket_type: &str,
    kind: &str,
    from: Option<&str>,
) -> Result<()> {
    let priority: Priority = priority.parse().map_err(|e: String| anyhow!(e))?;
    let ticket_type: TicketType = ticket_type.parse().map_err(|e: String| anyhow!(e))?;
    let kind: ViolationKind = kind.parse().map_err(|e: String| anyhow!(e))?;

    let start = match from {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map_err(|e| anyhow!("Invalid --from instant '{}': {}", s, e))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let deadline = SlaEngine::over(db).calculate_deadline(org, priority, ticket_type, kind, start)?;

    match deadline {
        Some(at) => println!("{} deadline: {}", kind, at.to_rfc3339()),
        None => println!(
            "No active SLA policy for org {} with priority {} and type {} (no obligation).",
            org, priority, ticket_type
        ),
    }
    Ok(())
}
