use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use deskwatch::db::Database;

pub fn run(cwd: &Path) -> Result<()> {
    let deskwatch_dir = cwd.join(".deskwatch");

    if deskwatch_dir.exists() {
        println!("Already initialized at {}", deskwatch_dir.display());
        return Ok(());
    }

    fs::create_dir_all(&deskwatch_dir).context("Failed to create .deskwatch directory")?;

    let db_path = deskwatch_dir.join("helpdesk.db");
    Database::open(&db_path).context("Failed to initialize database")?;

    println!("Initialized deskwatch in {}", deskwatch_dir.display());
    println!("Next steps:");
    println!("  deskwatch user add <org> <name> <email>");
    println!("  deskwatch policy add <org> <priority> <type> --response-hours 4 --resolution-hours 24");
    println!("  deskwatch ticket create <org> \"<subject>\"");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn init_creates_dir_and_db() {
        let dir = tempdir().unwrap();
        run(dir.path()).unwrap();
        assert!(dir.path().join(".deskwatch").is_dir());
        assert!(dir.path().join(".deskwatch/helpdesk.db").exists());
    }

    #[test]
    fn init_is_idempotent() {
        let dir = tempdir().unwrap();
        run(dir.path()).unwrap();
        run(dir.path()).unwrap();
    }
}
