//! redb table definitions for the ScribeGrid state store.
//!
//! Each table uses `&str` keys (the document id) and `&[u8]` values
//! holding the JSON-serialized document.

use redb::TableDefinition;

/// Worker servers keyed by `{server_id}`.
pub const SERVERS: TableDefinition<&str, &[u8]> = TableDefinition::new("servers");

/// Transcription/translation jobs keyed by `{job_id}`.
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

/// User accounts (with embedded payments) keyed by `{user_id}`.
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
