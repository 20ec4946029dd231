//! Alert rules and the `.rule` file loader.
//!
//! Each `.rule` file holds exactly one rule. Files directly under the
//! rules root form one group; every subdirectory forms its own group,
//! named after its path relative to the root. Loading never fails as a
//! whole: a bad file is recorded in `invalid_files` and skipped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::RuleError;
use crate::topology::{TOPOLOGY_PLACEHOLDER, Topology};

/// File extension picked up by the loader.
pub const RULE_EXTENSION: &str = "rule";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRule {
    pub alert: String,
    pub expr: String,
    #[serde(rename = "for", default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertGroup {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<AlertRule>,
}

/// The `{groups: [...]}` document used both on disk and in relation data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRules {
    #[serde(default)]
    pub groups: Vec<AlertGroup>,
}

impl AlertRule {
    /// Parse and validate a single rule from YAML text.
    pub fn from_yaml(text: &str, allow_free_standing: bool) -> Result<Self, RuleError> {
        let doc: Value =
            serde_yaml::from_str(text).map_err(|e| RuleError::Parse(e.to_string()))?;
        let map = match &doc {
            Value::Mapping(map) => map,
            Value::Null => return Err(RuleError::MissingField("alert")),
            _ => return Err(RuleError::Parse("expected a mapping".to_string())),
        };

        let field = |key: &str| map.get(key).and_then(scalar).filter(|s| !s.trim().is_empty());
        let alert = field("alert").ok_or(RuleError::MissingField("alert"))?;
        let expr = field("expr").ok_or(RuleError::MissingField("expr"))?;
        if !allow_free_standing && !expr.contains(TOPOLOGY_PLACEHOLDER) {
            return Err(RuleError::MissingPlaceholder);
        }

        Ok(Self {
            alert,
            expr,
            duration: map.get("for").and_then(scalar),
            labels: string_map(map.get("labels"))?,
            annotations: string_map(map.get("annotations"))?,
        })
    }

    /// Stamp the producer identity into the rule.
    ///
    /// Topology labels win over author-supplied labels of the same name.
    pub fn stamp(&mut self, topology: &Topology) {
        self.expr = topology.render(&self.expr);
        self.labels.extend(topology.application_labels());
    }

    /// Structural check applied to rules received from peers.
    pub fn is_well_formed(&self) -> bool {
        !self.alert.trim().is_empty() && !self.expr.trim().is_empty()
    }
}

impl AlertRules {
    pub fn new(groups: Vec<AlertGroup>) -> Self {
        Self { groups }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|g| g.rules.is_empty())
    }

    pub fn rule_count(&self) -> usize {
        self.groups.iter().map(|g| g.rules.len()).sum()
    }

    /// Drop malformed rules and then empty groups. Returns how many rules
    /// were dropped.
    pub fn retain_well_formed(&mut self) -> usize {
        let before = self.rule_count();
        for group in &mut self.groups {
            group.rules.retain(AlertRule::is_well_formed);
        }
        self.groups.retain(|g| !g.name.is_empty() && !g.rules.is_empty());
        before - self.rule_count()
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Result of scanning a rules directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedRules {
    pub groups: Vec<AlertGroup>,
    pub invalid_files: Vec<PathBuf>,
}

impl LoadedRules {
    pub fn into_rules(self) -> AlertRules {
        AlertRules::new(self.groups)
    }

    /// Operator-facing summary of the rejected files, if any.
    pub fn error_message(&self) -> Option<String> {
        if self.invalid_files.is_empty() {
            return None;
        }
        let names: Vec<String> = self
            .invalid_files
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        Some(format!(
            "Failed to read alert rules from {} file(s): {}",
            names.len(),
            names.join(", ")
        ))
    }
}

/// Loads `.rule` files from a directory tree and stamps them with a topology.
#[derive(Debug, Clone)]
pub struct RuleLoader {
    topology: Topology,
    recursive: bool,
    allow_free_standing: bool,
}

impl RuleLoader {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            recursive: true,
            allow_free_standing: false,
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn allow_free_standing(mut self, allow: bool) -> Self {
        self.allow_free_standing = allow;
        self
    }

    pub fn load(&self, root: &Path) -> LoadedRules {
        let mut loaded = LoadedRules::default();
        if !root.is_dir() {
            debug!(?root, "rules directory absent");
            return loaded;
        }

        let mut walker = WalkDir::new(root).min_depth(1).sort_by_file_name();
        if !self.recursive {
            walker = walker.max_depth(1);
        }

        let mut grouped: BTreeMap<String, Vec<AlertRule>> = BTreeMap::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable rules entry");
                    if let Some(path) = e.path() {
                        loaded.invalid_files.push(path.to_path_buf());
                    }
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(RULE_EXTENSION)
            {
                continue;
            }

            match self.load_file(path) {
                Ok(rule) => {
                    let rel_dir = path
                        .parent()
                        .and_then(|dir| dir.strip_prefix(root).ok())
                        .unwrap_or_else(|| Path::new(""));
                    grouped
                        .entry(self.group_name(rel_dir))
                        .or_default()
                        .push(rule);
                }
                Err(e) => {
                    warn!(?path, error = %e, "invalid alert rule file");
                    loaded.invalid_files.push(path.to_path_buf());
                }
            }
        }

        loaded.groups = grouped
            .into_iter()
            .map(|(name, rules)| AlertGroup { name, rules })
            .collect();
        debug!(
            groups = loaded.groups.len(),
            invalid = loaded.invalid_files.len(),
            "alert rules loaded"
        );
        loaded
    }

    fn load_file(&self, path: &Path) -> Result<AlertRule, RuleError> {
        let text = std::fs::read_to_string(path).map_err(|e| RuleError::Io(e.to_string()))?;
        let mut rule = AlertRule::from_yaml(&text, self.allow_free_standing)?;
        rule.stamp(&self.topology);
        Ok(rule)
    }

    /// `<identifier>_alerts` at the root, `<identifier>_<a>_<b>_alerts`
    /// for rules under `a/b/`.
    fn group_name(&self, rel_dir: &Path) -> String {
        let suffix: Vec<String> = rel_dir
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if suffix.is_empty() {
            format!("{}_alerts", self.topology.identifier())
        } else {
            format!("{}_{}_alerts", self.topology.identifier(), suffix.join("_"))
        }
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_map(value: Option<&Value>) -> Result<BTreeMap<String, String>, RuleError> {
    let Some(value) = value else {
        return Ok(BTreeMap::new());
    };
    let map = match value {
        Value::Mapping(map) => map,
        Value::Null => return Ok(BTreeMap::new()),
        _ => return Err(RuleError::Parse("labels/annotations must be a mapping".to_string())),
    };
    map.iter()
        .map(|(k, v)| match (scalar(k), scalar(v)) {
            (Some(k), Some(v)) => Ok((k, v)),
            _ => Err(RuleError::Parse("non-scalar label or annotation".to_string())),
        })
        .collect()
}
