use std::path::Path;

use logplane_provider::ProviderEngine;
use logplane_reconcile::HostSnapshot;

/// Print every peer's topology-stamped rules, keyed by relation id.
pub fn run(snapshot_path: &Path, relation_name: &str) -> anyhow::Result<()> {
    let snapshot = HostSnapshot::from_file(snapshot_path)?;
    let view = ProviderEngine::alerts(&snapshot.relations_named(relation_name));
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}
