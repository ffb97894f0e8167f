use std::time::{Duration, Instant};

use camino::Utf8Path;
use rusqlite::Connection;
use tracing::{error, info};

use super::migrations::apply_migrations;
use crate::error::KiraError;

/// Opens (creating if needed) the hit database and brings its schema up to date.
pub fn open_db(path: &Utf8Path) -> Result<Connection, KiraError> {
    let started_at = Instant::now();
    if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
        std::fs::create_dir_all(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    }

    let mut conn = Connection::open(path.as_std_path()).inspect_err(|err| {
        error!(path = %path, error = %err, "db.open failed");
    })?;
    bootstrap_connection(&mut conn).inspect_err(|err| {
        error!(path = %path, error = %err, "db.bootstrap failed");
    })?;

    info!(
        path = %path,
        duration_ms = started_at.elapsed().as_millis() as u64,
        "db.open"
    );
    Ok(conn)
}

pub fn open_db_in_memory() -> Result<Connection, KiraError> {
    let mut conn = Connection::open_in_memory()?;
    bootstrap_connection(&mut conn)?;
    Ok(conn)
}

fn bootstrap_connection(conn: &mut Connection) -> Result<(), KiraError> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    apply_migrations(conn)?;
    Ok(())
}
