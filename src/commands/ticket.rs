use anyhow::{bail, Result};

use deskwatch::db::Database;
use deskwatch::engine::{CheckOutcome, SlaEngine};
use deskwatch::models::{Priority, Ticket, TicketStatus, TicketType, ViolationKind};
use deskwatch::store::TicketStore;

fn parse_priority(s: &str) -> Result<Priority> {
    s.parse().map_err(|e: String| anyhow::anyhow!(e))
}

fn parse_status(s: &str) -> Result<TicketStatus> {
    s.parse().map_err(|e: String| anyhow::anyhow!(e))
}

fn parse_type(s: &str) -> Result<TicketType> {
    s.parse().map_err(|e: String| anyhow::anyhow!(e))
}

fn require_ticket(db: &Database, id: i64) -> Result<Ticket> {
    match db.get_ticket(id)? {
        Some(t) => Ok(t),
        None => bail!("Ticket #{} not found", id),
    }
}

/// Every mutation ends here: re-run the SLA and escalation checks in their
/// own error boundaries, then tell the operator what happened.
fn run_checks(db: &Database, id: i64) -> Result<()> {
    let ticket = require_ticket(db, id)?;
    let outcome = SlaEngine::over(db).run_ticket_checks(&ticket);
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &CheckOutcome) {
    for v in &outcome.new_violations {
        println!(
            "SLA {} breach recorded: due {}, {} minutes overdue",
            v.kind,
            v.expected_deadline.to_rfc3339(),
            v.overdue_minutes
        );
    }
    for rule in &outcome.fired_rules {
        println!("Escalation rule \"{}\" fired ({})", rule.name, rule.action.kind());
    }
    if outcome.violation_check_failed {
        eprintln!("Warning: SLA violation check failed (see log)");
    }
    if outcome.escalation_check_failed {
        eprintln!("Warning: escalation check failed (see log)");
    }
}

pub fn create(
    db: &Database,
    org: i64,
    subject: &str,
    description: Option<&str>,
    priority: &str,
    ticket_type: &str,
) -> Result<()> {
    let priority = parse_priority(priority)?;
    let ticket_type = parse_type(ticket_type)?;

    let id = db.create_ticket(org, subject, description, priority, ticket_type)?;
    println!("Created ticket #{}", id);
    run_checks(db, id)
}

pub fn show(db: &Database, id: i64) -> Result<()> {
    let ticket = require_ticket(db, id)?;

    println!("Ticket #{}: {}", ticket.id, ticket.subject);
    println!("  Organization: {}", ticket.organization_id);
    println!("  Status:       {}", ticket.status);
    println!("  Priority:     {}", ticket.priority);
    println!("  Type:         {}", ticket.ticket_type);
    match ticket.assigned_to {
        Some(user) => println!("  Assigned to:  user #{}", user),
        None => println!("  Assigned to:  (unassigned)"),
    }
    println!("  Created:      {}", ticket.created_at.to_rfc3339());
    if let Some(at) = ticket.first_responded_at {
        println!("  Responded:    {}", at.to_rfc3339());
    }
    if let Some(at) = ticket.resolved_at {
        println!("  Resolved:     {}", at.to_rfc3339());
    }
    if let Some(desc) = &ticket.description {
        println!("\n{}", desc);
    }

    let comments = db.get_comments(id)?;
    if !comments.is_empty() {
        println!("\nComments:");
        for c in comments {
            let marker = if c.internal { " (internal)" } else { "" };
            println!("  [{}]{} {}", c.created_at.format("%Y-%m-%d %H:%M"), marker, c.body);
        }
    }

    Ok(())
}

pub fn list(db: &Database, org: Option<i64>, status: Option<&str>) -> Result<()> {
    let status = match status {
        Some(s) => Some(parse_status(s)?),
        None => None,
    };

    let tickets = db.list_tickets(org, status)?;
    if tickets.is_empty() {
        println!("No tickets found.");
        return Ok(());
    }

    for t in tickets {
        let assignee = t
            .assigned_to
            .map(|u| format!("#{}", u))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "#{:<5} [{:^8}] [{:^8}] org {:<4} assignee {:<6} {}",
            t.id, t.status, t.priority, t.organization_id, assignee, t.subject
        );
    }
    Ok(())
}

pub fn assign(db: &Database, id: i64, user: i64) -> Result<()> {
    if !db.assign_ticket(id, user)? {
        bail!("Ticket #{} not found", id);
    }
    println!("Assigned ticket #{} to user #{}", id, user);
    run_checks(db, id)
}

pub fn respond(db: &Database, id: i64) -> Result<()> {
    require_ticket(db, id)?;
    if !db.mark_responded(id)? {
        bail!("Ticket #{} already has a first response", id);
    }
    println!("Recorded first response on ticket #{}", id);

    // Completion timestamp set: close out the matching open violations.
    let resolved = SlaEngine::over(db).resolve_sla_violation(id, ViolationKind::Response)?;
    if resolved > 0 {
        println!("Resolved {} open response violation(s)", resolved);
    }
    run_checks(db, id)
}

pub fn resolve(db: &Database, id: i64) -> Result<()> {
    require_ticket(db, id)?;
    if !db.mark_resolved(id)? {
        bail!("Ticket #{} is already resolved", id);
    }
    println!("Resolved ticket #{}", id);

    let resolved = SlaEngine::over(db).resolve_sla_violation(id, ViolationKind::Resolution)?;
    if resolved > 0 {
        println!("Resolved {} open resolution violation(s)", resolved);
    }
    run_checks(db, id)
}

pub fn set_priority(db: &Database, id: i64, priority: &str) -> Result<()> {
    let priority = parse_priority(priority)?;
    if !db.set_ticket_priority(id, priority)? {
        bail!("Ticket #{} not found", id);
    }
    println!("Set ticket #{} priority to {}", id, priority);
    run_checks(db, id)
}

pub fn set_status(db: &Database, id: i64, status: &str) -> Result<()> {
    let status = parse_status(status)?;
    if !db.set_ticket_status(id, status)? {
        bail!("Ticket #{} not found", id);
    }
    println!("Set ticket #{} status to {}", id, status);
    run_checks(db, id)
}
