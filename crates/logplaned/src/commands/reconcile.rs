use std::collections::BTreeMap;
use std::path::Path;

use tracing::info;

use logplane_agent::HttpFetcher;
use logplane_core::{LocalContainer, LogplaneConfig};
use logplane_reconcile::{Event, HostSnapshot, Reconciler, RecordingWriter};
use logplane_state::StateStore;

pub const STATE_FILE: &str = "logplane.redb";

pub async fn run(
    config_path: &Path,
    snapshot_path: &Path,
    root: &Path,
    data_dir: &Path,
    event: Option<&str>,
    log_targets: bool,
) -> anyhow::Result<()> {
    let config = LogplaneConfig::from_file(config_path)?;
    config.validate()?;
    let mut snapshot = HostSnapshot::from_file(snapshot_path)?;
    let event = match event {
        Some(text) => Event::from_json(text)?,
        None => Event::Tick,
    };

    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join(STATE_FILE);
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let timeout = config.timeouts.container();
    let mut containers = BTreeMap::new();
    for name in &snapshot.containers {
        let container = LocalContainer::open(name, &root.join(name))?
            .with_log_targets(log_targets)
            .with_timeout(timeout);
        containers.insert(name.clone(), container);
    }

    let reconciler = Reconciler::new(config, store, HttpFetcher::new());
    let mut writer = RecordingWriter::new();
    let outcome = reconciler
        .reconcile(&snapshot, &event, &mut containers, &mut writer)
        .await;

    snapshot.relations = event.apply(&snapshot.relations);
    writer.apply_to(&mut snapshot);
    snapshot.record(&outcome);
    snapshot.save(snapshot_path)?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use logplane_core::{Role, Topology};
    use logplane_reconcile::Status;

    #[tokio::test]
    async fn pass_without_relations_waits_and_rewrites_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("logplane.toml");
        let mut config = LogplaneConfig::scaffold(Role::Consumer);
        config.rules.path = dir.path().join("rules");
        config.agent.cache_dir = dir.path().join("cache");
        std::fs::write(&config_path, config.to_toml_string().unwrap()).unwrap();

        let snapshot_path = dir.path().join("host.json");
        let mut snapshot = HostSnapshot::new(Topology::new("lma", "0123456789abcdef", "app").with_unit("app/0"));
        snapshot.containers.push("workload".to_string());
        snapshot.save(&snapshot_path).unwrap();

        run(
            &config_path,
            &snapshot_path,
            &dir.path().join("containers"),
            &dir.path().join("data"),
            Some(r#"{"type":"container_ready"}"#),
            false,
        )
        .await
        .unwrap();

        let after = HostSnapshot::from_file(&snapshot_path).unwrap();
        assert!(matches!(after.status, Some(Status::Waiting(_))));
        assert!(dir.path().join("data").join(STATE_FILE).exists());
        assert!(dir.path().join("containers/workload").is_dir());
    }

    #[tokio::test]
    async fn malformed_event_is_rejected_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("logplane.toml");
        std::fs::write(&config_path, "").unwrap();
        let snapshot_path = dir.path().join("host.json");
        HostSnapshot::new(Topology::new("m", "u", "a")).save(&snapshot_path).unwrap();

        let err = run(
            &config_path,
            &snapshot_path,
            dir.path(),
            &dir.path().join("data"),
            Some("{not json"),
            false,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("invalid event"));
        assert!(!dir.path().join("data").exists());
    }
}
