use anyhow::Result;

use deskwatch::db::Database;

pub fn add(db: &Database, org: i64, name: &str, email: &str, role: &str) -> Result<()> {
    let id = db.create_user(org, name, email, role)?;
    println!("Created user #{} ({}, {}) in org {}", id, name, role, org);
    Ok(())
}

pub fn list(db: &Database, org: i64) -> Result<()> {
    let users = db.list_users(org)?;
    if users.is_empty() {
        println!("No users in org {}.", org);
        return Ok(());
    }

    for u in users {
        let last = u
            .last_assigned_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!("#{:<4} {:<20} {:<12} {} (last assigned: {})", u.id, u.name, u.role, u.email, last);
    }
    Ok(())
}
