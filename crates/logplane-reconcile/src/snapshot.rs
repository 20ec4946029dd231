//! The host's view of the world for one pass, and the sinks a pass writes to.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use logplane_core::{Container, Relation, RelationWriter, Scope, Topology};

use crate::error::{ReconcileError, ReconcileResult};
use crate::outcome::{ReconcileOutcome, Status};

fn default_true() -> bool {
    true
}

/// Everything the host knows at the moment an event fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSnapshot {
    /// Local identity; `unit` is this unit's name.
    pub topology: Topology,
    #[serde(default)]
    pub is_leader: bool,
    #[serde(default)]
    pub relations: Vec<Relation>,
    /// Workload containers declared by the host.
    #[serde(default)]
    pub containers: Vec<String>,
    #[serde(default = "default_true")]
    pub prerequisites_ready: bool,
    #[serde(default)]
    pub tls_ready: bool,
    /// In-cluster address of this unit.
    #[serde(default)]
    pub fqdn: String,
    /// Status currently shown for this unit, as left by the previous pass.
    #[serde(default)]
    pub status: Option<Status>,
    /// Rules error already signalled to the host, as left by the previous pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_error: Option<String>,
}

impl HostSnapshot {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            is_leader: false,
            relations: Vec::new(),
            containers: Vec::new(),
            prerequisites_ready: true,
            tls_ready: false,
            fqdn: String::new(),
            status: None,
            rules_error: None,
        }
    }

    pub fn from_file(path: &Path) -> ReconcileResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ReconcileError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| ReconcileError::Snapshot(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> ReconcileResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ReconcileError::Snapshot(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| ReconcileError::Write {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Carry what a pass reported into the next pass's view.
    pub fn record(&mut self, outcome: &ReconcileOutcome) {
        self.status = Some(outcome.status.clone());
        self.rules_error = outcome.rules_error.clone();
    }

    /// Relations bound to `name`.
    pub fn relations_named(&self, name: &str) -> Vec<Relation> {
        self.relations
            .iter()
            .filter(|r| r.name == name)
            .cloned()
            .collect()
    }

    pub fn relation_mut(&mut self, id: u32) -> Option<&mut Relation> {
        self.relations.iter_mut().find(|r| r.id == id)
    }
}

/// Resolves a workload container by name.
pub trait ContainerHost {
    fn container(&mut self, name: &str) -> Option<&mut dyn Container>;
}

impl<C: Container> ContainerHost for BTreeMap<String, C> {
    fn container(&mut self, name: &str) -> Option<&mut dyn Container> {
        self.get_mut(name).map(|c| c as &mut dyn Container)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedWrite {
    pub relation_id: u32,
    pub scope: Scope,
    pub key: String,
    pub value: Option<String>,
}

/// Collects outbound relation writes in emission order.
#[derive(Debug, Clone, Default)]
pub struct RecordingWriter {
    pub writes: Vec<RecordedWrite>,
}

impl RecordingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Replay the writes into the snapshot's local bags, as the host
    /// would before the next event.
    pub fn apply_to(&self, snapshot: &mut HostSnapshot) {
        for w in &self.writes {
            if let Some(rel) = snapshot.relation_mut(w.relation_id) {
                rel.apply_local(w.scope, &w.key, w.value.as_deref());
            }
        }
    }
}

impl RelationWriter for RecordingWriter {
    fn write(&mut self, relation_id: u32, scope: Scope, key: &str, value: Option<&str>) {
        self.writes.push(RecordedWrite {
            relation_id,
            scope,
            key: key.to_string(),
            value: value.map(String::from),
        });
    }
}

/// Counts writes passing through to an inner writer.
pub(crate) struct CountingWriter<'a> {
    inner: &'a mut dyn RelationWriter,
    pub count: usize,
}

impl<'a> CountingWriter<'a> {
    pub fn new(inner: &'a mut dyn RelationWriter) -> Self {
        Self { inner, count: 0 }
    }
}

impl RelationWriter for CountingWriter<'_> {
    fn write(&mut self, relation_id: u32, scope: Scope, key: &str, value: Option<&str>) {
        self.count += 1;
        self.inner.write(relation_id, scope, key, value);
    }
}
