//! Seed the store from JSON fixture files.
//!
//! Reads `users.json`, `servers.json`, and `jobs.json` (each a JSON array)
//! from a directory and replaces the whole store content with them. A
//! missing file counts as an empty array.

use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;
use tracing::info;

use scribegrid_state::{Snapshot, StateStore};

/// Build a snapshot from the fixture files in `dir`.
pub fn load_snapshot(dir: &Path) -> anyhow::Result<Snapshot> {
    Ok(Snapshot {
        users: read_array(&dir.join("users.json"))?,
        servers: read_array(&dir.join("servers.json"))?,
        jobs: read_array(&dir.join("jobs.json"))?,
    })
}

fn read_array<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parse {}", path.display()))
}

/// Replace the store content with the fixtures in `dir`.
pub fn seed(store: &StateStore, dir: &Path) -> anyhow::Result<Snapshot> {
    let snapshot = load_snapshot(dir)?;
    store.import_snapshot(&snapshot)?;
    info!(
        users = snapshot.users.len(),
        servers = snapshot.servers.len(),
        jobs = snapshot.jobs.len(),
        "store seeded"
    );
    Ok(snapshot)
}
