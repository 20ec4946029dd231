//! redb table definitions for the logplane state store.

use redb::TableDefinition;

/// Opaque blobs keyed by name. The endpoint registry lives under
/// [`crate::REGISTRY_KEY`].
pub const KV: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");
