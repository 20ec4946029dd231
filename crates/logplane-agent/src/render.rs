//! Promtail config rendering.
//!
//! Every map in the output is a `BTreeMap` and every list is built in a
//! fixed order, so identical inputs serialize to identical bytes.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use logplane_core::Topology;

pub const PROMTAIL_CONFIG_PATH: &str = "/etc/promtail/config.yaml";
pub const PROMTAIL_POSITIONS_PATH: &str = "/opt/promtail/positions.yaml";
pub const PROMTAIL_HTTP_PORT: u16 = 9080;
pub const PROMTAIL_GRPC_PORT: u16 = 9095;

/// Fixed locations and ports of the agent inside the workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromtailLayout {
    pub config_path: String,
    pub positions_path: String,
    pub http_port: u16,
    pub grpc_port: u16,
}

impl Default for PromtailLayout {
    fn default() -> Self {
        Self {
            config_path: PROMTAIL_CONFIG_PATH.to_string(),
            positions_path: PROMTAIL_POSITIONS_PATH.to_string(),
            http_port: PROMTAIL_HTTP_PORT,
            grpc_port: PROMTAIL_GRPC_PORT,
        }
    }
}

/// Everything a Promtail config is derived from.
#[derive(Debug, Clone, Copy)]
pub struct RenderInputs<'a> {
    pub topology: &'a Topology,
    pub log_files: &'a [String],
    /// Syslog listener port, when syslog forwarding is enabled.
    pub syslog_port: Option<u16>,
    pub clients: &'a [String],
}

#[derive(Debug, Serialize)]
struct PromtailConfig {
    server: Server,
    positions: Positions,
    scrape_configs: Vec<ScrapeConfig>,
    clients: Vec<Client>,
}

#[derive(Debug, Serialize)]
struct Server {
    http_listen_port: u16,
    grpc_listen_port: u16,
}

#[derive(Debug, Serialize)]
struct Positions {
    filename: String,
}

#[derive(Debug, Serialize)]
struct ScrapeConfig {
    job_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    static_configs: Option<Vec<StaticConfig>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    syslog: Option<Syslog>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    relabel_configs: Vec<Relabel>,
}

#[derive(Debug, Serialize)]
struct StaticConfig {
    targets: Vec<String>,
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct Syslog {
    listen_address: String,
    label_structured_data: bool,
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct Relabel {
    source_labels: Vec<String>,
    target_label: String,
}

#[derive(Debug, Serialize)]
struct Client {
    url: String,
}

/// Render the Promtail config YAML.
///
/// Duplicate log files and client URLs are dropped, keeping the first
/// occurrence. The `system` job is omitted when there are no log files.
pub fn render_config(layout: &PromtailLayout, inputs: &RenderInputs<'_>) -> Result<String, serde_yaml::Error> {
    let job = format!("juju_{}", inputs.topology.identifier());
    let topology_labels = inputs.topology.label_set();

    let mut scrape_configs = Vec::new();
    let files = dedup(inputs.log_files);
    if !files.is_empty() {
        let static_configs = files
            .into_iter()
            .map(|path| {
                let mut labels = topology_labels.clone();
                labels.insert("job".to_string(), job.clone());
                labels.insert("__path__".to_string(), path);
                StaticConfig {
                    targets: vec!["localhost".to_string()],
                    labels,
                }
            })
            .collect();
        scrape_configs.push(ScrapeConfig {
            job_name: "system".to_string(),
            static_configs: Some(static_configs),
            syslog: None,
            relabel_configs: Vec::new(),
        });
    }

    if let Some(port) = inputs.syslog_port {
        let mut labels = topology_labels.clone();
        labels.insert("job".to_string(), format!("{job}_syslog"));
        scrape_configs.push(ScrapeConfig {
            job_name: "syslog".to_string(),
            static_configs: None,
            syslog: Some(Syslog {
                listen_address: format!("127.0.0.1:{port}"),
                label_structured_data: true,
                labels,
            }),
            relabel_configs: vec![Relabel {
                source_labels: vec!["__syslog_message_hostname".to_string()],
                target_label: "hostname".to_string(),
            }],
        });
    }

    let config = PromtailConfig {
        server: Server {
            http_listen_port: layout.http_port,
            grpc_listen_port: layout.grpc_port,
        },
        positions: Positions {
            filename: layout.positions_path.clone(),
        },
        scrape_configs,
        clients: dedup(inputs.clients)
            .into_iter()
            .map(|url| Client { url })
            .collect(),
    };
    serde_yaml::to_string(&config)
}

fn dedup(items: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.as_str()))
        .cloned()
        .collect()
}
