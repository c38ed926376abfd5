use anyhow::{anyhow, bail, Result};

use deskwatch::db::Database;
use deskwatch::engine::SlaEngine;
use deskwatch::models::{Priority, RuleAction, RuleTrigger, TicketStatus};
use deskwatch::store::TicketStore;

#[allow(clippy::too_many_arguments)]
pub fn add(
    db: &Database,
    org: i64,
    name: &str,
    trigger: &str,
    hours: Option<i64>,
    trigger_priority: Option<&str>,
    trigger_status: Option<&str>,
    action: &str,
    user: Option<i64>,
    role: Option<String>,
    new_priority: Option<&str>,
    recipients: Vec<String>,
) -> Result<()> {
    let trigger = match trigger {
        "age" => {
            let hours = hours.ok_or_else(|| anyhow!("age trigger requires --hours"))?;
            if hours < 0 {
                bail!("--hours must not be negative");
            }
            RuleTrigger::Age { hours }
        }
        "priority-equals" => {
            let p: Priority = trigger_priority
                .ok_or_else(|| anyhow!("priority-equals trigger requires --trigger-priority"))?
                .parse()
                .map_err(|e: String| anyhow!(e))?;
            RuleTrigger::PriorityEquals(p)
        }
        "status-equals" => {
            let s: TicketStatus = trigger_status
                .ok_or_else(|| anyhow!("status-equals trigger requires --trigger-status"))?
                .parse()
                .map_err(|e: String| anyhow!(e))?;
            RuleTrigger::StatusEquals(s)
        }
        "manual" => RuleTrigger::Manual,
        other => bail!(
            "Invalid trigger '{}'. Must be one of: age, priority-equals, status-equals, manual",
            other
        ),
    };

    let action = match action {
        "notify-user" => RuleAction::NotifyUser {
            user_id: user.ok_or_else(|| anyhow!("notify-user action requires --user"))?,
        },
        "reassign" => {
            if user.is_none() && role.is_none() {
                bail!("reassign action requires --user or --role");
            }
            RuleAction::Reassign { user_id: user, role }
        }
        "change-priority" => {
            let p: Priority = new_priority
                .ok_or_else(|| anyhow!("change-priority action requires --new-priority"))?
                .parse()
                .map_err(|e: String| anyhow!(e))?;
            RuleAction::ChangePriority(p)
        }
        "notify-list" => {
            if recipients.is_empty() {
                bail!("notify-list action requires at least one --recipient");
            }
            RuleAction::NotifyList { recipients }
        }
        other => bail!(
            "Invalid action '{}'. Must be one of: notify-user, reassign, change-priority, notify-list",
            other
        ),
    };

    let id = db.create_rule(org, name, &trigger, &action)?;
    println!("Created escalation rule #{} \"{}\" for org {}", id, name, org);
    Ok(())
}

pub fn list(db: &Database, org: i64) -> Result<()> {
    let rules = db.list_rules(org)?;
    if rules.is_empty() {
        println!("No escalation rules for org {}.", org);
        return Ok(());
    }

    for r in rules {
        let state = if r.active { "" } else { " (disabled)" };
        let trigger = match &r.trigger {
            RuleTrigger::Age { hours } => format!("age >= {}h", hours),
            RuleTrigger::PriorityEquals(p) => format!("priority == {}", p),
            RuleTrigger::StatusEquals(s) => format!("status == {}", s),
            RuleTrigger::Manual => "manual".to_string(),
        };
        println!("#{:<4} \"{}\": {} -> {}{}", r.id, r.name, trigger, r.action.kind(), state);
    }
    Ok(())
}

pub fn disable(db: &Database, id: i64) -> Result<()> {
    if !db.set_rule_active(id, false)? {
        bail!("Rule #{} not found", id);
    }
    println!("Disabled rule #{}", id);
    Ok(())
}

pub fn fire(db: &Database, id: i64, ticket_id: i64) -> Result<()> {
    let rule = match db.get_rule(id)? {
        Some(r) => r,
        None => bail!("Rule #{} not found", id),
    };
    let ticket = match db.get_ticket(ticket_id)? {
        Some(t) => t,
        None => bail!("Ticket #{} not found", ticket_id),
    };
    if rule.organization_id != ticket.organization_id {
        bail!(
            "Rule #{} belongs to org {}, ticket #{} to org {}",
            id,
            rule.organization_id,
            ticket_id,
            ticket.organization_id
        );
    }

    SlaEngine::over(db).fire_rule_manually(&rule, &ticket)?;
    println!("Fired rule \"{}\" against ticket #{}", rule.name, ticket_id);
    Ok(())
}
