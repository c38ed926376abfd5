use anyhow::Result;

use deskwatch::db::Database;

pub fn run(db: &Database, ticket_id: i64) -> Result<()> {
    let violations = db.list_violations(ticket_id)?;
    if violations.is_empty() {
        println!("No SLA violations recorded for ticket #{}.", ticket_id);
        return Ok(());
    }

    for v in violations {
        let state = if v.resolved {
            format!(
                "resolved {}",
                v.resolved_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "(unknown)".to_string())
            )
        } else {
            "open".to_string()
        };
        println!(
            "#{:<4} {:<10} due {} ({} min overdue at detection) - {}",
            v.id,
            v.kind.to_string(),
            v.expected_deadline.to_rfc3339(),
            v.overdue_minutes,
            state
        );
    }
    Ok(())
}
