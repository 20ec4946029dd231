use std::time::Duration;

use logplane_health::{RulerProbe, fetch_build_info, probe_ruler};

pub async fn run(address: &str, timeout_ms: u64) -> anyhow::Result<()> {
    let timeout = Duration::from_millis(timeout_ms);
    match probe_ruler(address, timeout).await {
        RulerProbe::Healthy => {
            let version = fetch_build_info(address, timeout)
                .await
                .map(|info| info.version)
                .unwrap_or_else(|_| "unknown".to_string());
            println!("healthy (loki {version})");
            Ok(())
        }
        RulerProbe::RuleError { status, body } => {
            anyhow::bail!("ruler rejected rules: HTTP {status}: {body}")
        }
        RulerProbe::Transient { reason } => anyhow::bail!("loki unreachable at {address}: {reason}"),
    }
}
