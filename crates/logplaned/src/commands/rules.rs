use std::path::Path;

use tracing::warn;

use logplane_core::{RuleLoader, Topology};

/// Print the loaded groups as YAML; fail if any file was rejected.
pub fn run(path: &Path, topology: &Topology, free_standing: bool, recursive: bool) -> anyhow::Result<()> {
    let loaded = RuleLoader::new(topology.clone())
        .recursive(recursive)
        .allow_free_standing(free_standing)
        .load(path);

    for file in &loaded.invalid_files {
        eprintln!("invalid: {}", file.display());
    }
    let message = loaded.error_message();
    let rules = loaded.into_rules();
    print!("{}", rules.to_yaml()?);

    if let Some(message) = message {
        warn!(path = ?path, "rules directory has invalid files");
        anyhow::bail!(message);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> Topology {
        Topology::new("lma", "0123456789abcdef", "app")
    }

    #[test]
    fn valid_directory_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("high.rule"),
            "alert: HighErrors\nexpr: sum(rate({%%juju_topology%%} |= \"error\" [5m])) > 1\n",
        )
        .unwrap();
        run(dir.path(), &topology(), false, true).unwrap();
    }

    #[test]
    fn invalid_file_fails_the_command() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.rule"), "expr: up\n").unwrap();
        let err = run(dir.path(), &topology(), false, true).unwrap_err();
        assert!(err.to_string().contains("broken.rule"));
    }
}
