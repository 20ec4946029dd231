//! EndpointRegistry: the consumer's view of reachable Loki push endpoints.
//!
//! Endpoints are keyed by `(relation_id, peer_unit)`. No endpoint outlives
//! its relation. The registry is persisted as one JSON blob after every
//! mutation and restored on start; the blob carries a schema version and
//! tolerates unknown or missing fields.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StateResult;
use crate::store::StateStore;

/// Key of the registry blob in the state store.
pub const REGISTRY_KEY: &str = "endpoint_registry";

const REGISTRY_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub scheme: String,
    pub path: String,
}

impl Endpoint {
    /// Split a URL into scheme and path. Returns `None` if there is no
    /// `scheme://host` prefix.
    pub fn parse(url: &str) -> Option<Self> {
        let (scheme, rest) = url.split_once("://")?;
        if scheme.is_empty() || rest.is_empty() {
            return None;
        }
        let path = rest.find('/').map(|idx| &rest[idx..]).unwrap_or("/");
        Some(Self {
            url: url.to_string(),
            scheme: scheme.to_string(),
            path: path.to_string(),
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryBlob {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    endpoints: Vec<StoredEndpoint>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEndpoint {
    relation_id: u32,
    peer: String,
    url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointRegistry {
    entries: BTreeMap<(u32, String), Endpoint>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from the store. A missing blob is an empty registry.
    pub fn load(store: &StateStore) -> StateResult<Self> {
        let blob: RegistryBlob = store.get_json(REGISTRY_KEY)?.unwrap_or_default();
        let mut registry = Self::new();
        for stored in blob.endpoints {
            match Endpoint::parse(&stored.url) {
                Some(endpoint) => {
                    registry
                        .entries
                        .insert((stored.relation_id, stored.peer), endpoint);
                }
                None => debug!(url = %stored.url, "dropping unparseable stored endpoint"),
            }
        }
        debug!(
            version = blob.version,
            endpoints = registry.len(),
            "endpoint registry restored"
        );
        Ok(registry)
    }

    /// Persist the registry. An empty registry removes its blob.
    pub fn save(&self, store: &StateStore) -> StateResult<()> {
        if self.entries.is_empty() {
            let removed = store.delete_blob(REGISTRY_KEY)?;
            debug!(removed, "endpoint registry cleared");
            return Ok(());
        }
        let blob = RegistryBlob {
            version: REGISTRY_SCHEMA_VERSION,
            endpoints: self
                .entries
                .iter()
                .map(|((relation_id, peer), endpoint)| StoredEndpoint {
                    relation_id: *relation_id,
                    peer: peer.clone(),
                    url: endpoint.url.clone(),
                })
                .collect(),
        };
        store.put_json(REGISTRY_KEY, &blob)
    }

    /// Insert or replace. Returns true if the registry changed.
    pub fn upsert(&mut self, relation_id: u32, peer: &str, endpoint: Endpoint) -> bool {
        let key = (relation_id, peer.to_string());
        if self.entries.get(&key) == Some(&endpoint) {
            return false;
        }
        debug!(relation_id, %peer, url = %endpoint.url, "endpoint upserted");
        self.entries.insert(key, endpoint);
        true
    }

    /// Drop every endpoint of a relation. Returns true if any was removed.
    pub fn remove(&mut self, relation_id: u32) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(rel, _), _| *rel != relation_id);
        before != self.entries.len()
    }

    pub fn remove_peer(&mut self, relation_id: u32, peer: &str) -> bool {
        self.entries
            .remove(&(relation_id, peer.to_string()))
            .is_some()
    }

    /// Make a relation's endpoints exactly `peers`.
    pub fn replace_relation(&mut self, relation_id: u32, peers: BTreeMap<String, Endpoint>) -> bool {
        let current: BTreeMap<String, Endpoint> = self
            .entries
            .iter()
            .filter(|((rel, _), _)| *rel == relation_id)
            .map(|((_, peer), ep)| (peer.clone(), ep.clone()))
            .collect();
        if current == peers {
            return false;
        }
        self.remove(relation_id);
        for (peer, endpoint) in peers {
            self.entries.insert((relation_id, peer), endpoint);
        }
        true
    }

    /// Drop relations that are no longer present.
    pub fn retain_relations(&mut self, live: &BTreeSet<u32>) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(rel, _), _| live.contains(rel));
        before != self.entries.len()
    }

    /// Distinct URLs in lexicographic order.
    pub fn urls(&self) -> Vec<String> {
        self.entries
            .values()
            .map(|ep| ep.url.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Entries ordered by `(relation_id, peer)`.
    pub fn entries(&self) -> impl Iterator<Item = (u32, &str, &Endpoint)> {
        self.entries
            .iter()
            .map(|((rel, peer), ep)| (*rel, peer.as_str(), ep))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
