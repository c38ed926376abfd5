use anyhow::{bail, Result};

use deskwatch::db::Database;
use deskwatch::engine::SlaEngine;
use deskwatch::store::TicketStore;

pub fn run(db: &Database, id: i64) -> Result<()> {
    let ticket = match db.get_ticket(id)? {
        Some(t) => t,
        None => bail!("Ticket #{} not found", id),
    };

    let outcome = SlaEngine::over(db).run_ticket_checks(&ticket);

    if outcome.new_violations.is_empty() {
        println!("No new SLA violations for ticket #{}", id);
    }
    for v in &outcome.new_violations {
        println!(
            "SLA {} breach: due {}, {} minutes overdue",
            v.kind,
            v.expected_deadline.to_rfc3339(),
            v.overdue_minutes
        );
    }

    if outcome.fired_rules.is_empty() {
        println!("No escalation rules fired.");
    }
    for rule in &outcome.fired_rules {
        println!("Escalation rule \"{}\" fired ({})", rule.name, rule.action.kind());
    }

    if outcome.violation_check_failed || outcome.escalation_check_failed {
        bail!("One or more checks failed; see log");
    }
    Ok(())
}
