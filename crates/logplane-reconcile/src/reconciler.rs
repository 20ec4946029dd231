//! Reconciler: one pass per host event.
//!
//! Both roles start with the same gate: prerequisites ready, exactly one
//! workload container selected, container reachable. Anything else is a
//! Waiting or Blocked status and the pass stops there.
//!
//! # Consumer
//!
//! 1. Rebuild the endpoint registry from the relations' unit data.
//! 2. Converge the log agent onto `registry.urls()`.
//! 3. On the leader, publish `metadata`, `alert_rules` and `tests`.
//!
//! # Provider
//!
//! 1. Decode and validate every peer's rule bundle.
//! 2. Sync the tenant ruler directory.
//! 3. Probe the Loki ruler; discover the Loki version.
//! 4. Publish this unit's push endpoint (and the agent binary URL on the
//!    leader).
//!
//! A Blocked status left by a ruler rejection survives passes triggered by
//! anything other than a relation event, even when the ruler probe
//! recovers, so an operator sees it until the rules themselves change.

use tracing::{debug, error, info, warn};

use logplane_agent::binary::PROMTAIL_ZIP_URL;
use logplane_agent::{
    AgentError, AgentErrorKind, AgentSupervisor, BinaryProvisioner, BinarySpec, Fetcher,
    PromtailLayout,
};
use logplane_core::bundle::load_test_bundle;
use logplane_core::config::LogplaneConfig;
use logplane_core::error::ConfigError;
use logplane_core::relation::{
    self, ALERT_RULES_KEY, BINARY_URL_KEY, BinaryUrlData, METADATA_KEY, Metadata, TESTS_KEY,
    relation_ids, sync_value, unit_endpoints,
};
use logplane_core::{
    Container, Relation, RelationPayload, RelationWriter, Role, RuleLoader, Scope, Topology,
    select_container,
};
use logplane_health::{RulerProbe, fetch_build_info, probe_ruler};
use logplane_provider::ProviderEngine;
use logplane_state::{Endpoint, EndpointRegistry, StateResult, StateStore};

use crate::event::Event;
use crate::outcome::{RULER_ERROR_PREFIX, ReconcileOutcome, Signal, Status};
use crate::snapshot::{ContainerHost, CountingWriter, HostSnapshot};

pub struct Reconciler<F> {
    config: LogplaneConfig,
    store: StateStore,
    engine: ProviderEngine,
    agent: AgentSupervisor<F>,
}

impl<F: Fetcher> Reconciler<F> {
    /// Build a reconciler with the pinned Promtail release.
    pub fn new(config: LogplaneConfig, store: StateStore, fetcher: F) -> Self {
        let provisioner = BinaryProvisioner::new(BinarySpec::default(), &config.agent.cache_dir, fetcher)
            .with_resource(config.agent.resource_path.clone())
            .with_download_timeout(config.timeouts.download());
        let agent = AgentSupervisor::new(config.agent.mode, PromtailLayout::default(), provisioner)
            .with_log_files(config.agent.log_files.clone())
            .with_syslog(config.agent.enable_syslog.then_some(config.agent.syslog_port));
        Self::with_agent(config, store, agent)
    }

    pub fn with_agent(config: LogplaneConfig, store: StateStore, agent: AgentSupervisor<F>) -> Self {
        Self {
            engine: ProviderEngine::new(&config.provider),
            config,
            store,
            agent,
        }
    }

    pub fn config(&self) -> &LogplaneConfig {
        &self.config
    }

    pub fn engine(&self) -> &ProviderEngine {
        &self.engine
    }

    /// Run one pass. Never fails; failures are reported in the outcome.
    pub async fn reconcile(
        &self,
        snapshot: &HostSnapshot,
        event: &Event,
        host: &mut dyn ContainerHost,
        writer: &mut dyn RelationWriter,
    ) -> ReconcileOutcome {
        let mut counting = CountingWriter::new(writer);
        let relations = event.apply(&snapshot.relations_named(&self.config.relation_name));
        debug!(
            role = ?self.config.role,
            event = event.name(),
            relations = relations.len(),
            "reconcile pass starting"
        );

        let mut outcome = match self.workload(snapshot, host) {
            Err(status) => {
                let mut outcome = ReconcileOutcome::new(status);
                outcome.rules_error = snapshot.rules_error.clone();
                outcome
            }
            Ok(container) => match self.config.role {
                Role::Consumer => {
                    self.consumer_pass(snapshot, &relations, container, &mut counting)
                        .await
                }
                Role::Provider => {
                    self.provider_pass(snapshot, event, &relations, container, &mut counting)
                        .await
                }
            },
        };
        outcome.relation_writes = counting.count;

        info!(
            role = ?self.config.role,
            event = event.name(),
            status = %outcome.status,
            signals = outcome.signals.len(),
            files_written = outcome.files_written.len(),
            relation_writes = outcome.relation_writes,
            "reconcile pass complete"
        );
        outcome
    }

    fn workload<'h>(
        &self,
        snapshot: &HostSnapshot,
        host: &'h mut dyn ContainerHost,
    ) -> Result<&'h mut dyn Container, Status> {
        if !snapshot.prerequisites_ready {
            return Err(Status::Waiting("waiting for resource prerequisites".to_string()));
        }
        let name = select_container(&snapshot.containers, self.config.container_name.as_deref())
            .map_err(|e| match e {
                ConfigError::NoContainer => Status::Waiting("waiting for workload container".to_string()),
                e => Status::Blocked(e.to_string()),
            })?;
        let container = host
            .container(&name)
            .ok_or_else(|| Status::Waiting(format!("container {name} is not available")))?;
        if !container.can_connect() {
            return Err(Status::Waiting(format!("waiting for container {name}")));
        }
        Ok(container)
    }

    async fn consumer_pass(
        &self,
        snapshot: &HostSnapshot,
        relations: &[Relation],
        container: &mut dyn Container,
        writer: &mut dyn RelationWriter,
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::new(Status::Active);

        let clients = match self.sync_registry(relations, &mut outcome.signals) {
            Ok(clients) => clients,
            Err(e) => {
                error!(error = %e, "endpoint registry unreadable");
                outcome
                    .signals
                    .push(AgentError::new(AgentErrorKind::State, e.to_string()).into());
                outcome.rules_error =
                    self.publish_consumer_data(snapshot, relations, writer, &mut outcome.signals);
                outcome.status = Status::Waiting(format!("endpoint registry unavailable: {e}"));
                return outcome;
            }
        };
        let advertised = advertised_binary_url(relations);

        let agent_status = match self
            .agent
            .reconcile(container, &snapshot.topology, &clients, advertised.as_deref())
            .await
        {
            Ok(report) => {
                outcome.config_changed = report.config_changed;
                outcome.restarted = report.restarted;
                outcome.files_written = report.files_written;
                None
            }
            Err(e) => {
                error!(kind = %e.kind, detail = %e.detail, "agent reconcile failed");
                let status = agent_error_status(&e);
                outcome.signals.push(e.into());
                Some(status)
            }
        };

        outcome.rules_error = self.publish_consumer_data(snapshot, relations, writer, &mut outcome.signals);
        let rules_status = outcome.rules_error.clone().map(Status::Blocked);

        outcome.status = agent_status.or(rules_status).unwrap_or_else(|| {
            if clients.is_empty() {
                Status::Waiting("waiting for log push endpoints".to_string())
            } else {
                Status::Active
            }
        });
        outcome
    }

    /// Rebuild the persisted registry from `relations`; returns the client URLs.
    ///
    /// A registry that cannot be read is an error rather than an empty
    /// registry, so a storage fault never looks like endpoints joining.
    fn sync_registry(&self, relations: &[Relation], signals: &mut Vec<Signal>) -> StateResult<Vec<String>> {
        let mut registry = EndpointRegistry::load(&self.store)?;
        let was_empty = registry.is_empty();

        let mut changed = registry.retain_relations(&relation_ids(relations));
        for rel in relations {
            let peers = unit_endpoints(rel)
                .into_iter()
                .filter_map(|(unit, data)| match Endpoint::parse(&data.url) {
                    Some(endpoint) => Some((unit, endpoint)),
                    None => {
                        warn!(relation_id = rel.id, %unit, url = %data.url, "ignoring malformed endpoint url");
                        None
                    }
                })
                .collect();
            changed |= registry.replace_relation(rel.id, peers);
        }

        if changed {
            if let Err(e) = registry.save(&self.store) {
                error!(error = %e, "failed to persist endpoint registry");
                signals.push(AgentError::new(AgentErrorKind::State, e.to_string()).into());
            }
        }

        match (was_empty, registry.is_empty()) {
            (true, false) => {
                info!(endpoints = registry.len(), "push endpoints joined");
                signals.push(Signal::EndpointsJoined);
            }
            (false, true) => {
                info!("all push endpoints departed");
                signals.push(Signal::EndpointsDeparted);
            }
            _ => {}
        }
        Ok(registry.urls())
    }

    /// Publish this application's identity, rules and test bundle.
    /// Returns the rules error when any rule file was rejected.
    fn publish_consumer_data(
        &self,
        snapshot: &HostSnapshot,
        relations: &[Relation],
        writer: &mut dyn RelationWriter,
        signals: &mut Vec<Signal>,
    ) -> Option<String> {
        let topology = Topology {
            unit: None,
            ..snapshot.topology.clone()
        };
        let rules_config = &self.config.rules;
        let loaded = RuleLoader::new(topology.clone())
            .recursive(rules_config.recursive)
            .allow_free_standing(rules_config.allow_free_standing)
            .load(&rules_config.path);
        let error = loaded.error_message();
        if let Some(message) = &error {
            warn!(invalid = loaded.invalid_files.len(), %message, "some alert rule files were rejected");
        }
        let rules = loaded.into_rules();

        let mut rules_changed = false;
        if snapshot.is_leader {
            let metadata = encode(RelationPayload::Metadata(Metadata::from_topology(&topology)));
            let alert_rules = encode(RelationPayload::AlertRules(rules));
            let tests = rules_config
                .tests_path
                .as_deref()
                .and_then(|path| encode(RelationPayload::Tests(load_test_bundle(path))));

            for rel in relations {
                if let Some(metadata) = &metadata {
                    sync_value(writer, rel, Scope::App, METADATA_KEY, Some(metadata));
                }
                if let Some(alert_rules) = &alert_rules {
                    rules_changed |= sync_value(writer, rel, Scope::App, ALERT_RULES_KEY, Some(alert_rules));
                }
                if let Some(tests) = &tests {
                    sync_value(writer, rel, Scope::App, TESTS_KEY, Some(tests));
                }
            }
        }

        let already_reported = error.is_some() && snapshot.rules_error == error;
        if rules_changed || (error.is_some() && !already_reported) {
            signals.push(Signal::AlertRulesChanged {
                error: error.is_some(),
                message: error.clone(),
            });
        }
        error
    }

    async fn provider_pass(
        &self,
        snapshot: &HostSnapshot,
        event: &Event,
        relations: &[Relation],
        container: &mut dyn Container,
        writer: &mut dyn RelationWriter,
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::new(Status::Active);

        let set = self.engine.collect_bundles(relations);
        let sync = match self.engine.sync_rule_files(container, &set.bundles) {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "ruler directory sync failed");
                outcome.status = Status::Waiting(format!("failed to write ruler files: {e}"));
                return outcome;
            }
        };
        let tenant_dir = self.engine.tenant_dir();
        outcome.files_written = sync
            .written
            .iter()
            .map(|name| format!("{tenant_dir}/{name}"))
            .collect();

        let timeout = self.config.timeouts.probe();
        let address = &self.config.provider.loki_address;
        let probe = probe_ruler(address, timeout).await;
        if !matches!(probe, RulerProbe::Transient { .. }) {
            match fetch_build_info(address, timeout).await {
                Ok(info) => outcome.loki_version = Some(info.version),
                Err(e) => debug!(%address, error = %e, "loki build info unavailable"),
            }
        }

        let mut kept_ruler_error = false;
        let status = match &probe {
            RulerProbe::RuleError { status, body } => {
                warn!(status, %body, "loki ruler rejected rules");
                Status::Blocked(format!("{RULER_ERROR_PREFIX}: HTTP {status}: {body}"))
            }
            RulerProbe::Transient { reason } => Status::Waiting(format!("waiting for loki: {reason}")),
            RulerProbe::Healthy => match &snapshot.status {
                Some(prior) if prior.is_ruler_error() && !event.is_relation_event() => {
                    debug!("keeping ruler error until the rules change");
                    kept_ruler_error = true;
                    prior.clone()
                }
                _ => Status::Active,
            },
        };

        let rules_error = match &probe {
            RulerProbe::RuleError { body, .. } => Some(body.clone()),
            _ if kept_ruler_error => snapshot.rules_error.clone(),
            _ if !set.errors.is_empty() => Some(set.errors.join("; ")),
            _ => None,
        };
        if sync.changed() || (rules_error.is_some() && snapshot.rules_error != rules_error) {
            outcome.signals.push(Signal::AlertRulesChanged {
                error: rules_error.is_some(),
                message: rules_error.clone(),
            });
        }

        outcome.status = status;
        outcome.rules_error = rules_error;
        self.publish_endpoint(snapshot, relations, writer, &mut outcome);
        outcome
    }

    fn publish_endpoint(
        &self,
        snapshot: &HostSnapshot,
        relations: &[Relation],
        writer: &mut dyn RelationWriter,
        outcome: &mut ReconcileOutcome,
    ) {
        if snapshot.fqdn.is_empty() && self.config.provider.external_host.is_none() {
            warn!("no unit address known, endpoint not published");
            if outcome.status.is_active() {
                outcome.status = Status::Waiting("waiting for unit address".to_string());
            }
            return;
        }
        let url = self.engine.endpoint_url(&snapshot.fqdn, snapshot.tls_ready);
        if let Err(e) = self
            .engine
            .publish(relations, writer, &url, Some(PROMTAIL_ZIP_URL), snapshot.is_leader)
        {
            warn!(error = %e, "failed to publish endpoint");
            if outcome.status.is_active() {
                outcome.status = Status::Waiting(format!("failed to publish endpoint: {e}"));
            }
        }
    }
}

/// First agent binary URL advertised by a provider application.
fn advertised_binary_url(relations: &[Relation]) -> Option<String> {
    relations.iter().find_map(|rel| {
        match relation::decode::<BinaryUrlData>(&rel.app_data, BINARY_URL_KEY) {
            Ok(data) => data.map(|d| d.promtail_binary_zip_url),
            Err(e) => {
                warn!(relation_id = rel.id, error = %e, "undecodable binary url");
                None
            }
        }
    })
}

fn agent_error_status(e: &AgentError) -> Status {
    match e.kind {
        AgentErrorKind::Integrity => Status::Blocked(format!("promtail integrity check failed: {}", e.detail)),
        AgentErrorKind::Fetch => Status::Waiting(format!("promtail download failed: {}", e.detail)),
        AgentErrorKind::Render => Status::Blocked(format!("promtail config could not be rendered: {}", e.detail)),
        AgentErrorKind::ContainerPush | AgentErrorKind::Supervisor | AgentErrorKind::State => {
            Status::Waiting(format!("promtail not ready: {}", e.detail))
        }
    }
}

fn encode(payload: RelationPayload) -> Option<String> {
    match payload.encode() {
        Ok(value) => Some(value),
        Err(e) => {
            error!(key = payload.key(), error = %e, "failed to encode relation data");
            None
        }
    }
}
