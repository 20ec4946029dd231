//! Host events that trigger a pass.
//!
//! The reconciler reads the whole snapshot on every pass; an event only
//! matters where it is fresher than the snapshot (a departing unit or a
//! breaking relation may still be listed) and for deciding whether a
//! stale ruler error may be cleared.

use serde::{Deserialize, Serialize};

use logplane_core::{DataBag, Relation};

use crate::error::{ReconcileError, ReconcileResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A peer joined or changed its data. `peer` is a unit name
    /// (`app/0`) for unit data or a bare application name for app data.
    Changed {
        relation_id: u32,
        peer: String,
        #[serde(default)]
        data: DataBag,
    },
    Departed { relation_id: u32, peer: String },
    Broken { relation_id: u32 },
    ContainerReady,
    Upgrade,
    ConfigChanged,
    Tick,
}

impl Event {
    pub fn from_json(text: &str) -> ReconcileResult<Self> {
        serde_json::from_str(text).map_err(|e| ReconcileError::Event(e.to_string()))
    }

    /// Whether this event carries a change to the relation graph.
    pub fn is_relation_event(&self) -> bool {
        matches!(
            self,
            Event::Changed { .. } | Event::Departed { .. } | Event::Broken { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::Changed { .. } => "changed",
            Event::Departed { .. } => "departed",
            Event::Broken { .. } => "broken",
            Event::ContainerReady => "container_ready",
            Event::Upgrade => "upgrade",
            Event::ConfigChanged => "config_changed",
            Event::Tick => "tick",
        }
    }

    /// The relations as they stand once this event has taken effect.
    pub fn apply(&self, relations: &[Relation]) -> Vec<Relation> {
        let mut relations = relations.to_vec();
        match self {
            Event::Broken { relation_id } => relations.retain(|r| r.id != *relation_id),
            Event::Departed { relation_id, peer } => {
                if let Some(rel) = relations.iter_mut().find(|r| r.id == *relation_id) {
                    rel.units.remove(peer);
                }
            }
            Event::Changed {
                relation_id,
                peer,
                data,
            } if !data.is_empty() => {
                if let Some(rel) = relations.iter_mut().find(|r| r.id == *relation_id) {
                    if peer.contains('/') {
                        rel.units.insert(peer.clone(), data.clone());
                    } else {
                        rel.app_data = data.clone();
                    }
                }
            }
            _ => {}
        }
        relations
    }
}
