//! AgentSupervisor: converges the workload's log shipping onto the
//! current set of push endpoints.
//!
//! Promtail mode writes the rendered config, makes sure a verified binary
//! is present and restarts the service only when something it depends on
//! changed. With no endpoints the service is stopped.
//!
//! Native mode declares one `loki` log target per endpoint on the
//! container supervisor. Targets for endpoints that went away are kept in
//! the layer with `services: ["-all"]` so the supervisor stops forwarding
//! to them.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use logplane_core::{AgentMode, Container, Layer, LogTarget, ServiceSpec, Topology};

use crate::binary::{BinaryProvisioner, Fetcher, Provisioned};
use crate::error::AgentError;
use crate::render::{PromtailLayout, RenderInputs, render_config};

pub const PROMTAIL_SERVICE: &str = "promtail";
pub const PROMTAIL_LAYER: &str = "promtail";
pub const FORWARDING_LAYER: &str = "log-forwarding";

const CONFIG_MODE: u32 = 0o644;

/// What one supervision pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentReport {
    pub config_changed: bool,
    pub layer_changed: bool,
    pub restarted: bool,
    pub stopped: bool,
    pub binary: Option<Provisioned>,
    pub files_written: Vec<String>,
}

pub struct AgentSupervisor<F> {
    mode: AgentMode,
    layout: PromtailLayout,
    provisioner: BinaryProvisioner<F>,
    log_files: Vec<String>,
    syslog_port: Option<u16>,
}

impl<F: Fetcher> AgentSupervisor<F> {
    pub fn new(mode: AgentMode, layout: PromtailLayout, provisioner: BinaryProvisioner<F>) -> Self {
        Self {
            mode,
            layout,
            provisioner,
            log_files: Vec::new(),
            syslog_port: None,
        }
    }

    pub fn with_log_files(mut self, files: Vec<String>) -> Self {
        self.log_files = files;
        self
    }

    pub fn with_syslog(mut self, port: Option<u16>) -> Self {
        self.syslog_port = port;
        self
    }

    pub fn layout(&self) -> &PromtailLayout {
        &self.layout
    }

    /// Render the Promtail config for `clients` without touching the workload.
    pub fn render(&self, topology: &Topology, clients: &[String]) -> Result<String, AgentError> {
        render_config(
            &self.layout,
            &RenderInputs {
                topology,
                log_files: &self.log_files,
                syslog_port: self.syslog_port,
                clients,
            },
        )
        .map_err(AgentError::render)
    }

    /// Converge the workload onto `clients`.
    ///
    /// `advertised_url` is a peer-published Promtail zip location.
    pub async fn reconcile(
        &self,
        container: &mut dyn Container,
        topology: &Topology,
        clients: &[String],
        advertised_url: Option<&str>,
    ) -> Result<AgentReport, AgentError> {
        match self.mode {
            AgentMode::Native if container.supports_log_targets() => {
                self.reconcile_native(container, topology, clients)
            }
            AgentMode::Native => {
                warn!(
                    container = %container.name(),
                    "container supervisor has no log targets, falling back to promtail"
                );
                self.reconcile_promtail(container, topology, clients, advertised_url)
                    .await
            }
            AgentMode::Promtail => {
                self.reconcile_promtail(container, topology, clients, advertised_url)
                    .await
            }
        }
    }

    async fn reconcile_promtail(
        &self,
        container: &mut dyn Container,
        topology: &Topology,
        clients: &[String],
        advertised_url: Option<&str>,
    ) -> Result<AgentReport, AgentError> {
        let mut report = AgentReport::default();

        if clients.is_empty() {
            if container.is_running(PROMTAIL_SERVICE) {
                container
                    .stop(PROMTAIL_SERVICE)
                    .map_err(AgentError::supervisor)?;
                info!(service = PROMTAIL_SERVICE, "no push endpoints, service stopped");
                report.stopped = true;
            }
            return Ok(report);
        }

        let provisioned = self.provisioner.provision(container, advertised_url).await?;
        if provisioned.pushed {
            report
                .files_written
                .push(self.provisioner.spec().workload_path());
        }
        report.binary = Some(provisioned);

        let rendered = self.render(topology, clients)?;
        let current = container
            .pull(&self.layout.config_path)
            .map_err(AgentError::push)?;
        if current.as_deref() != Some(rendered.as_bytes()) {
            container
                .push(&self.layout.config_path, rendered.as_bytes(), CONFIG_MODE)
                .map_err(AgentError::push)?;
            info!(path = %self.layout.config_path, clients = clients.len(), "promtail config written");
            report.config_changed = true;
            report.files_written.push(self.layout.config_path.clone());
        }

        report.layer_changed = container
            .add_layer(PROMTAIL_LAYER, &self.promtail_layer())
            .map_err(AgentError::supervisor)?;

        let restart_needed = report.config_changed
            || report.layer_changed
            || provisioned.pushed
            || !container.is_running(PROMTAIL_SERVICE);
        if restart_needed {
            container
                .restart(PROMTAIL_SERVICE)
                .map_err(AgentError::supervisor)?;
            info!(service = PROMTAIL_SERVICE, "service restarted");
            report.restarted = true;
        } else {
            debug!(service = PROMTAIL_SERVICE, "service unchanged");
        }
        Ok(report)
    }

    fn promtail_layer(&self) -> Layer {
        let command = format!(
            "{} -config.file={}",
            self.provisioner.spec().workload_path(),
            self.layout.config_path
        );
        let mut services = BTreeMap::new();
        services.insert(
            PROMTAIL_SERVICE.to_string(),
            ServiceSpec {
                override_mode: "replace".to_string(),
                summary: "promtail".to_string(),
                command,
                startup: "disabled".to_string(),
            },
        );
        Layer {
            summary: "promtail layer".to_string(),
            description: "promtail log shipper".to_string(),
            services,
            log_targets: BTreeMap::new(),
        }
    }

    fn reconcile_native(
        &self,
        container: &mut dyn Container,
        topology: &Topology,
        clients: &[String],
    ) -> Result<AgentReport, AgentError> {
        let layer = forwarding_layer(container.layer(FORWARDING_LAYER), topology, clients);
        let layer_changed = container
            .add_layer(FORWARDING_LAYER, &layer)
            .map_err(AgentError::supervisor)?;
        if layer_changed {
            info!(targets = clients.len(), "log forwarding targets updated");
        }
        Ok(AgentReport {
            layer_changed,
            ..AgentReport::default()
        })
    }
}

/// Stable log-target name for a push URL.
pub fn target_name(url: &str) -> String {
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    format!("loki-{}", &digest[..12])
}

/// Desired forwarding layer: active targets for `clients`, disabled
/// targets for everything the previous layer forwarded to.
fn forwarding_layer(previous: Option<Layer>, topology: &Topology, clients: &[String]) -> Layer {
    let labels = topology.label_set();
    let mut log_targets: BTreeMap<String, LogTarget> = previous
        .map(|layer| layer.log_targets)
        .unwrap_or_default()
        .into_iter()
        .map(|(name, target)| {
            (
                name,
                LogTarget {
                    services: vec!["-all".to_string()],
                    ..target
                },
            )
        })
        .collect();

    for url in clients {
        log_targets.insert(
            target_name(url),
            LogTarget {
                override_mode: "replace".to_string(),
                kind: "loki".to_string(),
                location: url.clone(),
                services: vec!["all".to_string()],
                labels: labels.clone(),
            },
        );
    }

    Layer {
        summary: "log forwarding".to_string(),
        description: "loki log targets".to_string(),
        services: BTreeMap::new(),
        log_targets,
    }
}
