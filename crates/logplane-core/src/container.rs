//! Workload container contract.
//!
//! The reconciler never touches the workload directly; it goes through a
//! `Container`. Pushes are atomic (write to a temporary sibling, then
//! rename), services are declared through layers, and the supervisor owns
//! the start/stop/restart verbs.
//!
//! `LocalContainer` maps container paths onto a root directory on the host
//! and keeps supervisor state (layers, running services) in a JSON file
//! under that root, so state survives across one-shot invocations. Each
//! blocking filesystem call runs on a worker thread and is abandoned with
//! `ContainerError::Timeout` once the container timeout elapses.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ConfigError, ContainerError, ContainerResult};

/// Supervisor layer: declared services and log forwarding targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, ServiceSpec>,
    #[serde(default, rename = "log-targets", skip_serializing_if = "BTreeMap::is_empty")]
    pub log_targets: BTreeMap<String, LogTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    #[serde(rename = "override")]
    pub override_mode: String,
    pub summary: String,
    pub command: String,
    pub startup: String,
}

/// Native `loki` log target understood by the container supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogTarget {
    #[serde(rename = "override")]
    pub override_mode: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub location: String,
    pub services: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

pub trait Container {
    fn name(&self) -> &str;

    fn can_connect(&self) -> bool;

    /// Read a file; `Ok(None)` if it does not exist.
    fn pull(&self, path: &str) -> ContainerResult<Option<Vec<u8>>>;

    /// Atomically replace a file, creating parent directories.
    fn push(&mut self, path: &str, data: &[u8], mode: u32) -> ContainerResult<()>;

    fn make_dir(&mut self, path: &str) -> ContainerResult<()>;

    /// Names of regular files directly inside `dir`, sorted. A missing
    /// directory lists as empty.
    fn list_files(&self, dir: &str) -> ContainerResult<Vec<String>>;

    /// Names of subdirectories directly inside `dir`, sorted.
    fn list_dirs(&self, dir: &str) -> ContainerResult<Vec<String>>;

    fn remove_path(&mut self, path: &str, recursive: bool) -> ContainerResult<()>;

    /// Merge a layer under `label`. Returns true if the plan changed.
    fn add_layer(&mut self, label: &str, layer: &Layer) -> ContainerResult<bool>;

    fn layer(&self, label: &str) -> Option<Layer>;

    fn restart(&mut self, service: &str) -> ContainerResult<()>;

    fn stop(&mut self, service: &str) -> ContainerResult<()>;

    fn is_running(&self, service: &str) -> bool;

    /// Whether the supervisor forwards logs to Loki on its own.
    fn supports_log_targets(&self) -> bool;
}

/// Pick the workload container to drive.
pub fn select_container(available: &[String], configured: Option<&str>) -> Result<String, ConfigError> {
    match (configured, available) {
        (Some(name), _) if available.iter().any(|c| c == name) => Ok(name.to_string()),
        (Some(name), _) => Err(ConfigError::UnknownContainer(name.to_string())),
        (None, []) => Err(ConfigError::NoContainer),
        (None, [only]) => Ok(only.clone()),
        (None, many) => Err(ConfigError::AmbiguousContainer(many.join(", "))),
    }
}

const SUPERVISOR_STATE_FILE: &str = ".logplane-supervisor.json";

/// Upper bound on a single container filesystem call.
pub const DEFAULT_CONTAINER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Serialize, Deserialize)]
struct SupervisorState {
    #[serde(default)]
    layers: BTreeMap<String, Layer>,
    #[serde(default)]
    running: BTreeSet<String>,
    #[serde(default)]
    restarts: BTreeMap<String, u32>,
}

/// Filesystem-backed container rooted at a host directory.
#[derive(Debug)]
pub struct LocalContainer {
    name: String,
    root: PathBuf,
    connected: bool,
    log_targets: bool,
    timeout: Duration,
    state: SupervisorState,
}

impl LocalContainer {
    /// Open (or create) a container rooted at `root`.
    pub fn open(name: &str, root: &Path) -> ContainerResult<Self> {
        std::fs::create_dir_all(root).map_err(|source| ContainerError::Io {
            path: root.display().to_string(),
            source,
        })?;
        let state_path = root.join(SUPERVISOR_STATE_FILE);
        let state = match std::fs::read(&state_path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| ContainerError::Supervisor(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SupervisorState::default(),
            Err(source) => {
                return Err(ContainerError::Io {
                    path: state_path.display().to_string(),
                    source,
                });
            }
        };
        debug!(%name, ?root, "local container opened");
        Ok(Self {
            name: name.to_string(),
            root: root.to_path_buf(),
            connected: true,
            log_targets: false,
            timeout: DEFAULT_CONTAINER_TIMEOUT,
            state,
        })
    }

    /// Simulate the supervisor becoming (un)reachable.
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn with_log_targets(mut self, supported: bool) -> Self {
        self.log_targets = supported;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of restarts issued for a service since the state file was created.
    pub fn restart_count(&self, service: &str) -> u32 {
        self.state.restarts.get(service).copied().unwrap_or(0)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, path: &str) -> ContainerResult<PathBuf> {
        let rel = Path::new(path.trim_start_matches('/'));
        if rel
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(ContainerError::Path {
                path: path.to_string(),
                reason: "parent traversal is not allowed".to_string(),
            });
        }
        Ok(self.root.join(rel))
    }

    fn ensure_connected(&self) -> ContainerResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(ContainerError::Unreachable(self.name.clone()))
        }
    }

    fn save_state(&self) -> ContainerResult<()> {
        let path = self.root.join(SUPERVISOR_STATE_FILE);
        let bytes = serde_json::to_vec_pretty(&self.state)
            .map_err(|e| ContainerError::Supervisor(e.to_string()))?;
        bounded(self.timeout, "save state", SUPERVISOR_STATE_FILE, move || {
            write_atomic(&path, &bytes, None)
        })
    }

    fn service_defined(&self, service: &str) -> bool {
        self.state
            .layers
            .values()
            .any(|layer| layer.services.contains_key(service))
    }
}

impl Container for LocalContainer {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_connect(&self) -> bool {
        self.connected
    }

    fn pull(&self, path: &str) -> ContainerResult<Option<Vec<u8>>> {
        self.ensure_connected()?;
        let host = self.host_path(path)?;
        let shown = path.to_string();
        bounded(self.timeout, "pull", path, move || match std::fs::read(&host) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ContainerError::Io { path: shown, source }),
        })
    }

    fn push(&mut self, path: &str, data: &[u8], mode: u32) -> ContainerResult<()> {
        self.ensure_connected()?;
        let host = self.host_path(path)?;
        let owned = data.to_vec();
        bounded(self.timeout, "push", path, move || {
            write_atomic(&host, &owned, Some(mode))
        })?;
        debug!(container = %self.name, %path, bytes = data.len(), "pushed file");
        Ok(())
    }

    fn make_dir(&mut self, path: &str) -> ContainerResult<()> {
        self.ensure_connected()?;
        let host = self.host_path(path)?;
        let shown = path.to_string();
        bounded(self.timeout, "make_dir", path, move || {
            std::fs::create_dir_all(&host).map_err(|source| ContainerError::Io { path: shown, source })
        })
    }

    fn list_files(&self, dir: &str) -> ContainerResult<Vec<String>> {
        self.ensure_connected()?;
        let host = self.host_path(dir)?;
        let shown = dir.to_string();
        bounded(self.timeout, "list_files", dir, move || {
            entry_names(&host, &shown, |t| t.is_file())
        })
    }

    fn list_dirs(&self, dir: &str) -> ContainerResult<Vec<String>> {
        self.ensure_connected()?;
        let host = self.host_path(dir)?;
        let shown = dir.to_string();
        bounded(self.timeout, "list_dirs", dir, move || {
            entry_names(&host, &shown, |t| t.is_dir())
        })
    }

    fn remove_path(&mut self, path: &str, recursive: bool) -> ContainerResult<()> {
        self.ensure_connected()?;
        let host = self.host_path(path)?;
        let shown = path.to_string();
        bounded(self.timeout, "remove_path", path, move || {
            let result = if host.is_dir() {
                if recursive {
                    std::fs::remove_dir_all(&host)
                } else {
                    std::fs::remove_dir(&host)
                }
            } else {
                std::fs::remove_file(&host)
            };
            match result {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(source) => Err(ContainerError::Io { path: shown, source }),
            }
        })
    }

    fn add_layer(&mut self, label: &str, layer: &Layer) -> ContainerResult<bool> {
        self.ensure_connected()?;
        if self.state.layers.get(label) == Some(layer) {
            return Ok(false);
        }
        self.state.layers.insert(label.to_string(), layer.clone());
        self.save_state()?;
        debug!(container = %self.name, %label, "layer replaced");
        Ok(true)
    }

    fn layer(&self, label: &str) -> Option<Layer> {
        self.state.layers.get(label).cloned()
    }

    fn restart(&mut self, service: &str) -> ContainerResult<()> {
        self.ensure_connected()?;
        if !self.service_defined(service) {
            return Err(ContainerError::UnknownService(service.to_string()));
        }
        self.state.running.insert(service.to_string());
        *self.state.restarts.entry(service.to_string()).or_default() += 1;
        self.save_state()
    }

    fn stop(&mut self, service: &str) -> ContainerResult<()> {
        self.ensure_connected()?;
        if self.state.running.remove(service) {
            self.save_state()?;
        }
        Ok(())
    }

    fn is_running(&self, service: &str) -> bool {
        self.state.running.contains(service)
    }

    fn supports_log_targets(&self) -> bool {
        self.log_targets
    }
}

/// Run a blocking call on a worker thread and wait at most `timeout`.
///
/// On timeout the worker is left to finish on its own; its result is
/// discarded.
fn bounded<T, F>(timeout: Duration, op: &'static str, path: &str, f: F) -> ContainerResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ContainerResult<T> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    std::thread::Builder::new()
        .name("container-io".to_string())
        .spawn(move || {
            let _ = tx.send(f());
        })
        .map_err(|source| ContainerError::Io {
            path: path.to_string(),
            source,
        })?;
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!(op, %path, ?timeout, "container call timed out");
            Err(ContainerError::Timeout {
                op,
                path: path.to_string(),
                timeout,
            })
        }
        Err(RecvTimeoutError::Disconnected) => Err(ContainerError::Supervisor(format!(
            "{op} on {path} aborted"
        ))),
    }
}

fn entry_names(
    host: &Path,
    shown: &str,
    keep: impl Fn(std::fs::FileType) -> bool,
) -> ContainerResult<Vec<String>> {
    let io_err = |source| ContainerError::Io {
        path: shown.to_string(),
        source,
    };
    let entries = match std::fs::read_dir(host) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(io_err(source)),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(io_err)?;
        if entry.file_type().map(&keep).unwrap_or(false) {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Replace `path` by writing a temporary sibling and renaming it over.
pub fn write_atomic(path: &Path, data: &[u8], mode: Option<u32>) -> ContainerResult<()> {
    let io_err = |source| ContainerError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ContainerError::Path {
            path: path.display().to_string(),
            reason: "no file name".to_string(),
        })?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    std::fs::write(&tmp, data).map_err(io_err)?;
    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(mode)).map_err(io_err)?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    std::fs::rename(&tmp, path).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_layer() -> Layer {
        let mut layer = Layer {
            summary: "agent".to_string(),
            ..Default::default()
        };
        layer.services.insert(
            "promtail".to_string(),
            ServiceSpec {
                override_mode: "replace".to_string(),
                summary: "promtail".to_string(),
                command: "/opt/promtail/promtail -config.file=/etc/promtail/config.yaml".to_string(),
                startup: "enabled".to_string(),
            },
        );
        layer
    }

    #[test]
    fn select_single_container() {
        assert_eq!(select_container(&["w".to_string()], None).unwrap(), "w");
    }

    #[test]
    fn select_ambiguous_without_name() {
        let available = vec!["a".to_string(), "b".to_string()];
        assert!(matches!(
            select_container(&available, None),
            Err(ConfigError::AmbiguousContainer(_))
        ));
        assert_eq!(select_container(&available, Some("b")).unwrap(), "b");
        assert!(matches!(
            select_container(&available, Some("c")),
            Err(ConfigError::UnknownContainer(_))
        ));
        assert!(matches!(select_container(&[], None), Err(ConfigError::NoContainer)));
    }

    #[test]
    fn push_pull_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = LocalContainer::open("w", dir.path()).unwrap();
        c.push("/etc/promtail/config.yaml", b"a: 1\n", 0o644).unwrap();
        assert_eq!(c.pull("/etc/promtail/config.yaml").unwrap().unwrap(), b"a: 1\n");
        assert!(c.pull("/etc/promtail/missing").unwrap().is_none());
        assert_eq!(c.list_files("/etc/promtail").unwrap(), vec!["config.yaml"]);
        assert!(c.list_files("/nope").unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn push_sets_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let mut c = LocalContainer::open("w", dir.path()).unwrap();
        c.push("/opt/promtail/bin", b"\x7fELF", 0o755).unwrap();
        let meta = std::fs::metadata(dir.path().join("opt/promtail/bin")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o755);
    }

    #[test]
    fn rejects_parent_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = LocalContainer::open("w", dir.path()).unwrap();
        assert!(matches!(
            c.push("/../escape", b"x", 0o644),
            Err(ContainerError::Path { .. })
        ));
    }

    #[test]
    fn unreachable_container_fails_io() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = LocalContainer::open("w", dir.path()).unwrap();
        c.set_connected(false);
        assert!(matches!(c.pull("/x"), Err(ContainerError::Unreachable(_))));
    }

    #[test]
    fn services_need_a_layer_and_state_persists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut c = LocalContainer::open("w", dir.path()).unwrap();
            assert!(matches!(c.restart("promtail"), Err(ContainerError::UnknownService(_))));
            assert!(c.add_layer("promtail", &service_layer()).unwrap());
            assert!(!c.add_layer("promtail", &service_layer()).unwrap());
            c.restart("promtail").unwrap();
            assert!(c.is_running("promtail"));
        }
        let mut c = LocalContainer::open("w", dir.path()).unwrap();
        assert!(c.is_running("promtail"));
        assert_eq!(c.restart_count("promtail"), 1);
        c.stop("promtail").unwrap();
        assert!(!c.is_running("promtail"));
    }

    #[test]
    fn list_dirs_only_reports_directories() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = LocalContainer::open("w", dir.path()).unwrap();
        c.push("/loki/rules/fake/a.rules", b"groups: []\n", 0o644).unwrap();
        c.make_dir("/loki/rules/fake/nested").unwrap();
        assert_eq!(c.list_dirs("/loki/rules/fake").unwrap(), vec!["nested"]);
        assert_eq!(c.list_files("/loki/rules/fake").unwrap(), vec!["a.rules"]);
        assert!(c.list_dirs("/missing").unwrap().is_empty());
    }

    #[test]
    fn slow_call_times_out() {
        let err = bounded(Duration::from_millis(20), "pull", "/slow", || {
            std::thread::sleep(Duration::from_millis(500));
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, ContainerError::Timeout { op: "pull", .. }));
        assert_eq!(
            bounded(Duration::from_secs(5), "pull", "/fast", || Ok(7)).unwrap(),
            7
        );
    }

    #[test]
    fn container_uses_configured_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = LocalContainer::open("w", dir.path())
            .unwrap()
            .with_timeout(Duration::from_secs(5));
        c.push("/etc/a", b"x", 0o644).unwrap();
        assert_eq!(c.pull("/etc/a").unwrap().unwrap(), b"x");
    }

    #[test]
    fn remove_path_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = LocalContainer::open("w", dir.path()).unwrap();
        c.push("/loki/rules/fake/a.rules", b"groups: []\n", 0o644).unwrap();
        c.remove_path("/loki/rules/fake", true).unwrap();
        c.remove_path("/loki/rules/fake", true).unwrap();
        assert!(c.list_files("/loki/rules/fake").unwrap().is_empty());
    }
}
