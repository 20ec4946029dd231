//! Relation data bags and their payload schemas.
//!
//! Relation data is a string→string map per application and per unit.
//! Every value logplane reads or writes is a JSON document with an explicit
//! schema; unknown fields are ignored so peers on newer versions can add
//! fields without breaking older ones.

use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::rules::AlertRules;
use crate::topology::Topology;

pub const ENDPOINT_KEY: &str = "endpoint";
pub const METADATA_KEY: &str = "metadata";
pub const ALERT_RULES_KEY: &str = "alert_rules";
pub const BINARY_URL_KEY: &str = "promtail_binary_zip_url";
pub const TESTS_KEY: &str = "tests";

pub type DataBag = BTreeMap<String, String>;

/// Snapshot of one relation as seen by the local unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub remote_app: Option<String>,
    /// Remote application data bag.
    #[serde(default)]
    pub app_data: DataBag,
    /// Remote unit data bags, keyed by unit name.
    #[serde(default)]
    pub units: BTreeMap<String, DataBag>,
    #[serde(default)]
    pub local_app_data: DataBag,
    #[serde(default)]
    pub local_unit_data: DataBag,
}

impl Relation {
    pub fn new(id: u32, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn local_bag(&self, scope: Scope) -> &DataBag {
        match scope {
            Scope::App => &self.local_app_data,
            Scope::Unit => &self.local_unit_data,
        }
    }

    /// Apply a write to the local bags, as a host would after a pass.
    pub fn apply_local(&mut self, scope: Scope, key: &str, value: Option<&str>) {
        let bag = match scope {
            Scope::App => &mut self.local_app_data,
            Scope::Unit => &mut self.local_unit_data,
        };
        match value {
            Some(v) => {
                bag.insert(key.to_string(), v.to_string());
            }
            None => {
                bag.remove(key);
            }
        }
    }
}

/// Which local data bag a write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    App,
    Unit,
}

/// Sink for outbound relation data. `None` removes the key.
pub trait RelationWriter {
    fn write(&mut self, relation_id: u32, scope: Scope, key: &str, value: Option<&str>);
}

/// Write `value` under `key` only when it differs from the snapshot.
///
/// Returns true when a write was issued.
pub fn sync_value(
    writer: &mut dyn RelationWriter,
    relation: &Relation,
    scope: Scope,
    key: &str,
    value: Option<&str>,
) -> bool {
    let current = relation.local_bag(scope).get(key).map(String::as_str);
    if current == value {
        return false;
    }
    writer.write(relation.id, scope, key, value);
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointData {
    pub url: String,
}

/// Identity a peer publishes next to its alert rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub model: String,
    pub model_uuid: String,
    pub application: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charm_name: Option<String>,
}

impl Metadata {
    pub fn from_topology(topology: &Topology) -> Self {
        Self {
            model: topology.model.clone(),
            model_uuid: topology.model_uuid.clone(),
            application: topology.application.clone(),
            charm_name: topology.charm.clone(),
        }
    }

    pub fn to_topology(&self) -> Topology {
        Topology {
            model: self.model.clone(),
            model_uuid: self.model_uuid.clone(),
            application: self.application.clone(),
            unit: None,
            charm: self.charm_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryUrlData {
    pub promtail_binary_zip_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestsData {
    #[serde(default)]
    pub tests: BTreeMap<String, String>,
}

/// Every payload logplane exchanges, tagged by the bag key it lives under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationPayload {
    Endpoint(EndpointData),
    Metadata(Metadata),
    AlertRules(AlertRules),
    BinaryUrl(BinaryUrlData),
    Tests(TestsData),
}

impl RelationPayload {
    pub fn key(&self) -> &'static str {
        match self {
            RelationPayload::Endpoint(_) => ENDPOINT_KEY,
            RelationPayload::Metadata(_) => METADATA_KEY,
            RelationPayload::AlertRules(_) => ALERT_RULES_KEY,
            RelationPayload::BinaryUrl(_) => BINARY_URL_KEY,
            RelationPayload::Tests(_) => TESTS_KEY,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            RelationPayload::Endpoint(v) => serde_json::to_string(v),
            RelationPayload::Metadata(v) => serde_json::to_string(v),
            RelationPayload::AlertRules(v) => serde_json::to_string(v),
            RelationPayload::BinaryUrl(v) => serde_json::to_string(v),
            RelationPayload::Tests(v) => serde_json::to_string(v),
        }
    }
}

/// Decode the JSON value stored under `key`. Absent key is `Ok(None)`.
pub fn decode<T: DeserializeOwned>(bag: &DataBag, key: &str) -> Result<Option<T>, serde_json::Error> {
    match bag.get(key) {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw).map(Some),
        _ => Ok(None),
    }
}

/// All endpoint URLs advertised by the units of a relation.
///
/// Units with missing or undecodable data are skipped.
pub fn unit_endpoints(relation: &Relation) -> BTreeMap<String, EndpointData> {
    relation
        .units
        .iter()
        .filter_map(|(unit, bag)| match decode::<EndpointData>(bag, ENDPOINT_KEY) {
            Ok(Some(endpoint)) => Some((unit.clone(), endpoint)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(relation_id = relation.id, %unit, error = %e, "undecodable endpoint data");
                None
            }
        })
        .collect()
}

/// Relation ids present in a snapshot.
pub fn relation_ids(relations: &[Relation]) -> BTreeSet<u32> {
    relations.iter().map(|r| r.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Vec<(u32, Scope, String, Option<String>)>);

    impl RelationWriter for Recorder {
        fn write(&mut self, relation_id: u32, scope: Scope, key: &str, value: Option<&str>) {
            self.0
                .push((relation_id, scope, key.to_string(), value.map(String::from)));
        }
    }

    #[test]
    fn sync_value_skips_identical_values() {
        let mut rel = Relation::new(3, "logging");
        rel.local_unit_data
            .insert(ENDPOINT_KEY.to_string(), "{\"url\":\"x\"}".to_string());
        let mut rec = Recorder::default();

        assert!(!sync_value(&mut rec, &rel, Scope::Unit, ENDPOINT_KEY, Some("{\"url\":\"x\"}")));
        assert!(sync_value(&mut rec, &rel, Scope::Unit, ENDPOINT_KEY, Some("{\"url\":\"y\"}")));
        assert!(!sync_value(&mut rec, &rel, Scope::App, ENDPOINT_KEY, None));
        assert_eq!(rec.0.len(), 1);
    }

    #[test]
    fn decode_ignores_unknown_fields() {
        let mut bag = DataBag::new();
        bag.insert(
            METADATA_KEY.to_string(),
            r#"{"model":"m","model_uuid":"u","application":"a","charm_name":"c","future":true}"#
                .to_string(),
        );
        let meta: Metadata = decode(&bag, METADATA_KEY).unwrap().unwrap();
        assert_eq!(meta.to_topology().identifier(), "m_u_a");
    }

    #[test]
    fn decode_absent_key_is_none() {
        let bag = DataBag::new();
        assert!(decode::<EndpointData>(&bag, ENDPOINT_KEY).unwrap().is_none());
    }

    #[test]
    fn unit_endpoints_skips_garbage() {
        let mut rel = Relation::new(1, "logging");
        let mut good = DataBag::new();
        good.insert(ENDPOINT_KEY.to_string(), r#"{"url":"http://l:3100/loki/api/v1/push"}"#.to_string());
        let mut bad = DataBag::new();
        bad.insert(ENDPOINT_KEY.to_string(), "not json".to_string());
        rel.units.insert("loki/0".to_string(), good);
        rel.units.insert("loki/1".to_string(), bad);
        rel.units.insert("loki/2".to_string(), DataBag::new());

        let eps = unit_endpoints(&rel);
        assert_eq!(eps.len(), 1);
        assert!(eps.contains_key("loki/0"));
    }

    #[test]
    fn payload_keys_match_wire_names() {
        let payload = RelationPayload::BinaryUrl(BinaryUrlData {
            promtail_binary_zip_url: "https://x/p.zip".to_string(),
        });
        assert_eq!(payload.key(), "promtail_binary_zip_url");
        assert_eq!(
            payload.encode().unwrap(),
            r#"{"promtail_binary_zip_url":"https://x/p.zip"}"#
        );
    }
}
