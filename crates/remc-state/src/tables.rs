//! redb table definitions for the REMC state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Job rows keyed by `{job_id}`.
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

/// Node rows keyed by `{job_id}:{node_name}`.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Job leases keyed by `{job_id}`.
pub const LEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("leases");
