//! Producer identity.
//!
//! A `Topology` identifies where a log line or alert came from. It is
//! rendered two ways: a label set (`juju_model`, `juju_model_uuid`, ...)
//! attached to scrape targets and alert rules, and a LogQL filter
//! expression substituted for the `%%juju_topology%%` placeholder so one
//! tenant's rules only ever match that tenant's streams.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Placeholder that rule authors put inside a stream selector.
pub const TOPOLOGY_PLACEHOLDER: &str = "%%juju_topology%%";

const SHORT_UUID_LEN: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topology {
    pub model: String,
    pub model_uuid: String,
    pub application: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, alias = "charm_name", skip_serializing_if = "Option::is_none")]
    pub charm: Option<String>,
}

impl Topology {
    pub fn new(model: &str, model_uuid: &str, application: &str) -> Self {
        Self {
            model: model.to_string(),
            model_uuid: model_uuid.to_string(),
            application: application.to_string(),
            unit: None,
            charm: None,
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn with_charm(mut self, charm: &str) -> Self {
        self.charm = Some(charm.to_string());
        self
    }

    /// `<model>_<model_uuid>_<application>`, used in group and file names.
    pub fn identifier(&self) -> String {
        format!("{}_{}_{}", self.model, self.model_uuid, self.application)
    }

    /// First seven characters of the model uuid.
    pub fn short_model_uuid(&self) -> &str {
        match self.model_uuid.char_indices().nth(SHORT_UUID_LEN) {
            Some((idx, _)) => &self.model_uuid[..idx],
            None => &self.model_uuid,
        }
    }

    /// Full label set, including unit and charm when known.
    pub fn label_set(&self) -> BTreeMap<String, String> {
        let mut labels = self.application_labels();
        if let Some(unit) = &self.unit {
            labels.insert("juju_unit".to_string(), unit.clone());
        }
        labels
    }

    /// Labels that hold for every unit of the application.
    ///
    /// Alert rules are published application-wide, so they never carry
    /// `juju_unit`.
    pub fn application_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert("juju_model".to_string(), self.model.clone());
        labels.insert("juju_model_uuid".to_string(), self.model_uuid.clone());
        labels.insert("juju_application".to_string(), self.application.clone());
        if let Some(charm) = &self.charm {
            labels.insert("juju_charm".to_string(), charm.clone());
        }
        labels
    }

    /// `juju_model="…", juju_model_uuid="…", juju_application="…"`.
    pub fn filter_expression(&self) -> String {
        [
            ("juju_model", &self.model),
            ("juju_model_uuid", &self.model_uuid),
            ("juju_application", &self.application),
        ]
        .iter()
        .map(|(key, value)| format!("{key}=\"{value}\""))
        .collect::<Vec<_>>()
        .join(", ")
    }

    /// Replace every placeholder occurrence with the filter expression.
    pub fn render(&self, template: &str) -> String {
        template.replace(TOPOLOGY_PLACEHOLDER, &self.filter_expression())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> Topology {
        Topology::new("m", "1234567890ab", "pa")
            .with_unit("pa/0")
            .with_charm("demo")
    }

    #[test]
    fn identifier_joins_model_uuid_application() {
        assert_eq!(topology().identifier(), "m_1234567890ab_pa");
    }

    #[test]
    fn short_uuid_is_seven_chars() {
        assert_eq!(topology().short_model_uuid(), "1234567");
        assert_eq!(Topology::new("m", "abc", "a").short_model_uuid(), "abc");
    }

    #[test]
    fn filter_expression_has_fixed_order() {
        assert_eq!(
            topology().filter_expression(),
            r#"juju_model="m", juju_model_uuid="1234567890ab", juju_application="pa""#
        );
    }

    #[test]
    fn render_substitutes_every_placeholder() {
        let out = topology().render("sum(rate({%%juju_topology%%}[5m])) / count({%%juju_topology%%})");
        assert!(!out.contains(TOPOLOGY_PLACEHOLDER));
        assert_eq!(out.matches("juju_application=\"pa\"").count(), 2);
    }

    #[test]
    fn label_set_includes_unit_but_application_labels_do_not() {
        let t = topology();
        assert_eq!(t.label_set().get("juju_unit").map(String::as_str), Some("pa/0"));
        assert!(!t.application_labels().contains_key("juju_unit"));
        assert_eq!(
            t.application_labels().get("juju_charm").map(String::as_str),
            Some("demo")
        );
    }

    #[test]
    fn deserializes_charm_name_alias() {
        let t: Topology = serde_json::from_str(
            r#"{"model":"m","model_uuid":"u","application":"a","charm_name":"c","extra":1}"#,
        )
        .unwrap();
        assert_eq!(t.charm.as_deref(), Some("c"));
    }
}
