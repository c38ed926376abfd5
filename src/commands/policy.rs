use std::collections::BTreeSet;

use anyhow::{anyhow, bail, Result};
use chrono::NaiveDate;

use deskwatch::calendar::BusinessCalendar;
use deskwatch::db::Database;
use deskwatch::models::{Priority, TicketType};

#[allow(clippy::too_many_arguments)]
pub fn add(
    db: &Database,
    org: i64,
    priority: &str,
    ticket_type: &str,
    response_hours: f64,
    resolution_hours: f64,
    hours_start: u32,
    hours_end: u32,
    weekdays: &str,
    utc_offset: i32,
    holidays: &[String],
) -> Result<()> {
    let priority: Priority = priority.parse().map_err(|e: String| anyhow!(e))?;
    let ticket_type: TicketType = ticket_type.parse().map_err(|e: String| anyhow!(e))?;

    if response_hours <= 0.0 || resolution_hours <= 0.0 {
        bail!("Response and resolution budgets must be positive");
    }

    let working_weekdays: BTreeSet<u8> = weekdays
        .split(',')
        .map(|d| {
            d.trim()
                .parse()
                .map_err(|_| anyhow!("Invalid weekday number '{}'", d.trim()))
        })
        .collect::<Result<_>>()?;

    let holiday_dates: BTreeSet<NaiveDate> = holidays
        .iter()
        .map(|h| {
            h.parse()
                .map_err(|_| anyhow!("Invalid holiday date '{}' (expected YYYY-MM-DD)", h))
        })
        .collect::<Result<_>>()?;

    let calendar = BusinessCalendar::new(
        hours_start,
        hours_end,
        working_weekdays,
        holiday_dates,
        utc_offset,
    )?;

    let id = db.create_policy(org, priority, ticket_type, response_hours, resolution_hours, &calendar)?;
    println!(
        "Created SLA policy #{} for org {} ({}/{}): respond {}h, resolve {}h",
        id, org, priority, ticket_type, response_hours, resolution_hours
    );
    Ok(())
}

pub fn list(db: &Database, org: i64) -> Result<()> {
    let policies = db.list_policies(org)?;
    if policies.is_empty() {
        println!("No SLA policies for org {}.", org);
        return Ok(());
    }

    for p in policies {
        let state = if p.active { "" } else { " (inactive)" };
        println!(
            "#{:<4} {}/{} respond {}h resolve {}h, hours {:02}:00-{:02}:00 UTC{:+}, {} holiday(s){}",
            p.id,
            p.priority,
            p.ticket_type,
            p.response_hours,
            p.resolution_hours,
            p.calendar.hours_start,
            p.calendar.hours_end,
            p.calendar.utc_offset_minutes / 60,
            p.calendar.holidays.len(),
            state
        );
    }
    Ok(())
}

pub fn holiday(db: &Database, id: i64, date: &str) -> Result<()> {
    let date: NaiveDate = date
        .parse()
        .map_err(|_| anyhow!("Invalid date '{}' (expected YYYY-MM-DD)", date))?;

    if db.add_policy_holiday(id, date)? {
        println!("Added holiday {} to policy #{}", date, id);
    } else {
        println!("Policy #{} already has holiday {}", id, date);
    }
    Ok(())
}
