//! ProviderEngine: publishes the push URL and aggregates peer rule bundles.
//!
//! Endpoint URLs are unit-scoped: every local unit advertises exactly one
//! URL on every relation. Rule bundles are application-scoped: a peer
//! application publishes `metadata` and `alert_rules` once.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use logplane_core::config::ProviderConfig;
use logplane_core::relation::{
    self, ALERT_RULES_KEY, BINARY_URL_KEY, BinaryUrlData, ENDPOINT_KEY, EndpointData, METADATA_KEY,
    Metadata, RelationPayload, sync_value,
};
use logplane_core::{AlertGroup, AlertRules, Relation, RelationWriter, Scope, Topology};

use crate::error::{ProviderError, ProviderResult};

/// Rules received from one related application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerBundle {
    pub relation_id: u32,
    pub topology: Topology,
    pub rules: AlertRules,
}

/// Bundles collected in one pass, plus per-relation decode failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleSet {
    pub bundles: Vec<PeerBundle>,
    pub errors: Vec<String>,
}

/// One entry of the aggregated `alerts()` view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertsEntry {
    #[serde(flatten)]
    pub metadata: Metadata,
    pub groups: Vec<AlertGroup>,
}

#[derive(Debug, Clone)]
pub struct ProviderEngine {
    port: u16,
    external_host: Option<String>,
    push_path: String,
    tenant: String,
    rules_root: String,
}

impl ProviderEngine {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            port: config.port,
            external_host: config.external_host.clone(),
            push_path: config.push_path.clone(),
            tenant: config.tenant.clone(),
            rules_root: config.rules_root.trim_end_matches('/').to_string(),
        }
    }

    /// `<rules_root>/<tenant>`.
    pub fn tenant_dir(&self) -> String {
        format!("{}/{}", self.rules_root, self.tenant)
    }

    /// `scheme://address:port/path` for this unit.
    ///
    /// `fqdn` is the unit's in-cluster name, used when no external host is
    /// configured.
    pub fn endpoint_url(&self, fqdn: &str, tls_ready: bool) -> String {
        let scheme = if tls_ready { "https" } else { "http" };
        let address = self.external_host.as_deref().unwrap_or(fqdn);
        format!("{scheme}://{address}:{}{}", self.port, self.push_path)
    }

    /// Write this unit's endpoint (and, on the leader, the agent binary URL)
    /// to every relation. Returns how many writes were issued.
    pub fn publish(
        &self,
        relations: &[Relation],
        writer: &mut dyn RelationWriter,
        url: &str,
        binary_zip_url: Option<&str>,
        is_leader: bool,
    ) -> ProviderResult<usize> {
        let endpoint = encode(&RelationPayload::Endpoint(EndpointData {
            url: url.to_string(),
        }))?;
        let binary = binary_zip_url
            .map(|u| {
                encode(&RelationPayload::BinaryUrl(BinaryUrlData {
                    promtail_binary_zip_url: u.to_string(),
                }))
            })
            .transpose()?;

        let mut writes = 0;
        for rel in relations {
            if sync_value(writer, rel, Scope::Unit, ENDPOINT_KEY, Some(&endpoint)) {
                writes += 1;
            }
            if is_leader {
                if let Some(binary) = &binary {
                    if sync_value(writer, rel, Scope::App, BINARY_URL_KEY, Some(binary)) {
                        writes += 1;
                    }
                }
            }
        }
        debug!(relations = relations.len(), writes, %url, "endpoint published");
        Ok(writes)
    }

    /// Aggregated view of every peer's rules, keyed by relation id.
    ///
    /// Relations missing either `metadata` or `alert_rules`, or whose data
    /// does not decode, are skipped.
    pub fn alerts(relations: &[Relation]) -> BTreeMap<u32, AlertsEntry> {
        relations
            .iter()
            .filter_map(|rel| match decode_bundle(rel) {
                Ok(Some((metadata, rules))) => Some((
                    rel.id,
                    AlertsEntry {
                        metadata,
                        groups: rules.groups,
                    },
                )),
                _ => None,
            })
            .collect()
    }

    /// Decode, validate and topology-stamp every peer's rules.
    pub fn collect_bundles(&self, relations: &[Relation]) -> BundleSet {
        let mut set = BundleSet::default();
        for rel in relations {
            let (metadata, mut rules) = match decode_bundle(rel) {
                Ok(Some(bundle)) => bundle,
                Ok(None) => continue,
                Err(e) => {
                    warn!(relation_id = rel.id, error = %e, "undecodable rule bundle");
                    set.errors
                        .push(format!("relation {}: invalid rule bundle: {e}", rel.id));
                    continue;
                }
            };

            let dropped = rules.retain_well_formed();
            if dropped > 0 {
                warn!(relation_id = rel.id, dropped, "dropped malformed peer rules");
                set.errors
                    .push(format!("relation {}: dropped {dropped} malformed rule(s)", rel.id));
            }

            let topology = metadata.to_topology();
            let labels = topology.application_labels();
            for rule in rules.groups.iter_mut().flat_map(|g| g.rules.iter_mut()) {
                rule.expr = topology.render(&rule.expr);
                rule.labels.extend(labels.clone());
            }

            set.bundles.push(PeerBundle {
                relation_id: rel.id,
                topology,
                rules,
            });
        }
        set
    }
}

fn decode_bundle(rel: &Relation) -> Result<Option<(Metadata, AlertRules)>, serde_json::Error> {
    let metadata: Option<Metadata> = relation::decode(&rel.app_data, METADATA_KEY)?;
    let rules: Option<AlertRules> = relation::decode(&rel.app_data, ALERT_RULES_KEY)?;
    Ok(metadata.zip(rules))
}

fn encode(payload: &RelationPayload) -> ProviderResult<String> {
    payload.encode().map_err(|e| ProviderError::Encode {
        what: payload.key().to_string(),
        reason: e.to_string(),
    })
}
