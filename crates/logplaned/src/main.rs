//! logplaned: the Logplane daemon.
//!
//! Each host event is handed to a fresh process which runs exactly one
//! reconcile pass against a JSON snapshot of the host:
//!
//! ```text
//! logplaned reconcile --config logplane.toml --snapshot host.json \
//!     --root /var/lib/logplane/containers --data-dir /var/lib/logplane \
//!     --event '{"type":"departed","relation_id":3,"peer":"loki/1"}'
//! ```
//!
//! The remaining subcommands are operator tooling around the same crates.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "logplaned",
    about = "Logplane: Loki log-ingestion control plane",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Log output format: text or json.
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Command,
}

/// Identity the rules and labels are stamped with.
#[derive(clap::Args)]
struct TopologyArgs {
    #[arg(long)]
    model: String,
    #[arg(long)]
    model_uuid: String,
    #[arg(long)]
    application: String,
    #[arg(long)]
    unit: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one reconcile pass and write relation updates back into the snapshot.
    Reconcile {
        /// Path to logplane.toml.
        #[arg(long, default_value = "logplane.toml")]
        config: PathBuf,

        /// Host snapshot (JSON), rewritten in place after the pass.
        #[arg(long)]
        snapshot: PathBuf,

        /// Directory holding one root per workload container.
        #[arg(long)]
        root: PathBuf,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/logplane")]
        data_dir: PathBuf,

        /// The triggering event as JSON. Defaults to a periodic tick.
        #[arg(long)]
        event: Option<String>,

        /// Containers support native `loki` log targets.
        #[arg(long)]
        log_targets: bool,
    },
    /// Load and validate a directory of `.rule` files.
    Rules {
        #[arg(short, long)]
        path: PathBuf,
        #[command(flatten)]
        topology: TopologyArgs,
        /// Accept expressions without the topology placeholder.
        #[arg(long)]
        free_standing: bool,
        /// Only read files directly under `path`.
        #[arg(long)]
        no_recursive: bool,
    },
    /// Print the aggregated peer alert rules a provider would load.
    Alerts {
        /// Host snapshot (JSON).
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long, default_value = "logging")]
        relation_name: String,
    },
    /// Print the Promtail config for a set of Loki endpoints.
    Render {
        #[arg(long, default_value = "logplane.toml")]
        config: PathBuf,
        #[command(flatten)]
        topology: TopologyArgs,
        /// Loki push URL; repeat for several endpoints.
        #[arg(long = "endpoint")]
        endpoints: Vec<String>,
    },
    /// Probe a Loki ruler.
    Probe {
        /// Loki HTTP address (host:port).
        #[arg(long, default_value = "127.0.0.1:3100")]
        address: String,
        #[arg(long, default_value = "2000")]
        timeout_ms: u64,
    },
    /// Print a scaffolded logplane.toml.
    Init {
        /// consumer or provider.
        #[arg(long, default_value = "consumer")]
        role: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_format)?;

    match cli.command {
        Command::Reconcile {
            config,
            snapshot,
            root,
            data_dir,
            event,
            log_targets,
        } => {
            commands::reconcile::run(&config, &snapshot, &root, &data_dir, event.as_deref(), log_targets)
                .await
        }
        Command::Rules {
            path,
            topology,
            free_standing,
            no_recursive,
        } => commands::rules::run(&path, &topology.into_topology(), free_standing, !no_recursive),
        Command::Alerts {
            snapshot,
            relation_name,
        } => commands::alerts::run(&snapshot, &relation_name),
        Command::Render {
            config,
            topology,
            endpoints,
        } => commands::render::run(&config, &topology.into_topology(), &endpoints),
        Command::Probe { address, timeout_ms } => commands::probe::run(&address, timeout_ms).await,
        Command::Init { role } => commands::init::run(&role),
    }
}

impl TopologyArgs {
    fn into_topology(self) -> logplane_core::Topology {
        let topology = logplane_core::Topology::new(&self.model, &self.model_uuid, &self.application);
        match self.unit {
            Some(unit) => topology.with_unit(&unit),
            None => topology,
        }
    }
}

fn init_tracing(format: &str) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,logplaned=debug,logplane=debug"));
    // stdout carries command output; logs go to stderr.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        "json" => builder.json().init(),
        "text" => builder.init(),
        other => anyhow::bail!("unknown log format: {other} (expected text or json)"),
    }
    Ok(())
}
