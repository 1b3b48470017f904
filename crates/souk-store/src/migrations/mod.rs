//! Schema upgrades for the local key-value database.
//!
//! `PRAGMA user_version` records the last applied step. Opening a
//! [`crate::SqliteStorage`] applies every later step in order, each in its
//! own transaction together with the version bump.

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type Step = fn(&Connection) -> rusqlite::Result<()>;

/// Upgrade steps; entry `n` moves the schema from version `n` to `n + 1`.
const STEPS: &[(&str, Step)] = &[("v001_initial", v001_initial::up)];

fn schema_version(conn: &Connection) -> Result<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Bring the schema up to date.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let from = schema_version(conn)?;
    let latest = STEPS.len() as u32;
    if from >= latest {
        tracing::debug!(version = from, "kv schema up to date");
        return Ok(());
    }

    for (version, (name, step)) in STEPS.iter().enumerate().skip(from as usize) {
        let target = version as u32 + 1;
        tracing::info!(step = name, target, "upgrading kv schema");

        let tx = conn.unchecked_transaction()?;
        step(&tx).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        tx.pragma_update(None, "user_version", target)?;
        tx.commit()?;
    }

    Ok(())
}
