use logplane_core::{LogplaneConfig, Role};

pub fn run(role: &str) -> anyhow::Result<()> {
    let role = match role {
        "consumer" => Role::Consumer,
        "provider" => Role::Provider,
        other => anyhow::bail!("unknown role: {other} (expected consumer or provider)"),
    };
    print!("{}", LogplaneConfig::scaffold(role).to_toml_string()?);
    Ok(())
}
