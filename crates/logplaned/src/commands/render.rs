use std::path::Path;

use logplane_agent::{PromtailLayout, RenderInputs, render_config};
use logplane_core::{LogplaneConfig, Topology};

pub fn run(config_path: &Path, topology: &Topology, endpoints: &[String]) -> anyhow::Result<()> {
    let config = LogplaneConfig::from_file(config_path)?;
    let agent = &config.agent;
    let inputs = RenderInputs {
        topology,
        log_files: &agent.log_files,
        syslog_port: agent.enable_syslog.then_some(agent.syslog_port),
        clients: endpoints,
    };
    print!("{}", render_config(&PromtailLayout::default(), &inputs)?);
    Ok(())
}
