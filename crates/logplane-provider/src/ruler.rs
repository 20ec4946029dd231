//! Loki ruler files.
//!
//! The tenant directory holds exactly one file per peer bundle with rules,
//! named `<identifier>_rel_<relation_id>_alert.rules`. A sync removes every
//! other file and subdirectory and rewrites only files whose content changed, each through
//! an atomic push, so an unchanged bundle set performs no writes and a
//! concurrent ruler read never sees a half-written file.

use std::collections::BTreeMap;

use tracing::{debug, info};

use logplane_core::Container;

use crate::engine::{PeerBundle, ProviderEngine};
use crate::error::{ProviderError, ProviderResult};

const RULE_FILE_MODE: u32 = 0o644;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSyncReport {
    pub written: Vec<String>,
    pub removed: Vec<String>,
}

impl RuleSyncReport {
    pub fn changed(&self) -> bool {
        !self.written.is_empty() || !self.removed.is_empty()
    }
}

pub fn rule_file_name(bundle: &PeerBundle) -> String {
    format!(
        "{}_rel_{}_alert.rules",
        bundle.topology.identifier(),
        bundle.relation_id
    )
}

impl ProviderEngine {
    /// Converge the tenant directory onto `bundles`.
    pub fn sync_rule_files(
        &self,
        container: &mut dyn Container,
        bundles: &[PeerBundle],
    ) -> ProviderResult<RuleSyncReport> {
        let dir = self.tenant_dir();
        let mut desired: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for bundle in bundles.iter().filter(|b| !b.rules.is_empty()) {
            let yaml = bundle.rules.to_yaml().map_err(|e| ProviderError::Encode {
                what: rule_file_name(bundle),
                reason: e.to_string(),
            })?;
            desired.insert(rule_file_name(bundle), yaml.into_bytes());
        }

        let mut report = RuleSyncReport::default();
        container.make_dir(&dir)?;
        for existing in container.list_files(&dir)? {
            if !desired.contains_key(&existing) {
                container.remove_path(&format!("{dir}/{existing}"), false)?;
                report.removed.push(existing);
            }
        }
        for subdir in container.list_dirs(&dir)? {
            container.remove_path(&format!("{dir}/{subdir}"), true)?;
            report.removed.push(format!("{subdir}/"));
        }
        for (name, content) in &desired {
            let path = format!("{dir}/{name}");
            if container.pull(&path)?.as_deref() == Some(content.as_slice()) {
                continue;
            }
            container.push(&path, content, RULE_FILE_MODE)?;
            report.written.push(name.clone());
        }

        if report.changed() {
            info!(
                tenant_dir = %dir,
                written = report.written.len(),
                removed = report.removed.len(),
                "ruler files updated"
            );
        } else {
            debug!(tenant_dir = %dir, "ruler files unchanged");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logplane_core::config::ProviderConfig;
    use logplane_core::{AlertGroup, AlertRule, AlertRules, LocalContainer, Topology};
    use std::collections::BTreeMap as Map;

    fn bundle(id: u32, app: &str, uuid: &str) -> PeerBundle {
        PeerBundle {
            relation_id: id,
            topology: Topology::new("m", uuid, app),
            rules: AlertRules::new(vec![AlertGroup {
                name: format!("m_{uuid}_{app}_alerts"),
                rules: vec![AlertRule {
                    alert: "A".to_string(),
                    expr: "up > 0".to_string(),
                    duration: None,
                    labels: Map::new(),
                    annotations: Map::new(),
                }],
            }]),
        }
    }

    fn setup() -> (tempfile::TempDir, LocalContainer, ProviderEngine) {
        let dir = tempfile::tempdir().unwrap();
        let container = LocalContainer::open("loki", dir.path()).unwrap();
        (dir, container, ProviderEngine::new(&ProviderConfig::default()))
    }

    #[test]
    fn writes_one_file_per_bundle() {
        let (_dir, mut c, engine) = setup();
        let report = engine
            .sync_rule_files(&mut c, &[bundle(1, "pa", "u1"), bundle(2, "pb", "u2")])
            .unwrap();
        assert_eq!(report.written.len(), 2);
        assert_eq!(
            c.list_files("/loki/rules/fake").unwrap(),
            vec!["m_u1_pa_rel_1_alert.rules", "m_u2_pb_rel_2_alert.rules"]
        );
        let text = String::from_utf8(
            c.pull("/loki/rules/fake/m_u1_pa_rel_1_alert.rules").unwrap().unwrap(),
        )
        .unwrap();
        assert!(text.starts_with("groups:"));
    }

    #[test]
    fn second_sync_is_a_no_op() {
        let (_dir, mut c, engine) = setup();
        let bundles = [bundle(1, "pa", "u1")];
        engine.sync_rule_files(&mut c, &bundles).unwrap();
        let report = engine.sync_rule_files(&mut c, &bundles).unwrap();
        assert!(!report.changed());
    }

    #[test]
    fn departed_peers_and_strays_are_removed() {
        let (_dir, mut c, engine) = setup();
        c.push("/loki/rules/fake/stray.rules", b"groups: []\n", 0o644).unwrap();
        engine
            .sync_rule_files(&mut c, &[bundle(1, "pa", "u1"), bundle(2, "pb", "u2")])
            .unwrap();
        let report = engine.sync_rule_files(&mut c, &[bundle(2, "pb", "u2")]).unwrap();
        assert_eq!(report.removed, vec!["m_u1_pa_rel_1_alert.rules"]);
        assert_eq!(
            c.list_files("/loki/rules/fake").unwrap(),
            vec!["m_u2_pb_rel_2_alert.rules"]
        );
    }

    #[test]
    fn stray_subdirectories_are_removed() {
        let (_dir, mut c, engine) = setup();
        c.push("/loki/rules/fake/old/nested.rules", b"groups: []\n", 0o644).unwrap();
        let report = engine.sync_rule_files(&mut c, &[bundle(1, "pa", "u1")]).unwrap();
        assert_eq!(report.removed, vec!["old/"]);
        assert!(c.list_dirs("/loki/rules/fake").unwrap().is_empty());
        assert_eq!(
            c.list_files("/loki/rules/fake").unwrap(),
            vec!["m_u1_pa_rel_1_alert.rules"]
        );
        assert!(!engine.sync_rule_files(&mut c, &[bundle(1, "pa", "u1")]).unwrap().changed());
    }

    #[test]
    fn empty_bundles_produce_no_file() {
        let (_dir, mut c, engine) = setup();
        let mut empty = bundle(1, "pa", "u1");
        empty.rules = AlertRules::default();
        engine.sync_rule_files(&mut c, &[empty]).unwrap();
        assert!(c.list_files("/loki/rules/fake").unwrap().is_empty());
    }
}
