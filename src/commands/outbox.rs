use anyhow::Result;

use deskwatch::db::Database;

pub fn run(db: &Database) -> Result<()> {
    let notifications = db.list_notifications()?;
    if notifications.is_empty() {
        println!("Outbox is empty.");
        return Ok(());
    }

    for (id, recipient, note) in notifications {
        println!(
            "#{:<4} to {:<30} ticket #{} [{}] \"{}\" (rule: {})",
            id, recipient, note.ticket_id, note.priority, note.subject, note.rule_name
        );
    }
    Ok(())
}
