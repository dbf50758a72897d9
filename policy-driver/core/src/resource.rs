use crate::key::{Key, KeyKind, ProfilePart};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label maps are kept ordered so that logs and serialised forms are stable.
pub type Labels = BTreeMap<String, String>;

/// A workload endpoint's stored value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadEndpoint {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub profile_ids: Vec<String>,
    #[serde(default)]
    pub ipv4_nets: Vec<String>,
    #[serde(default)]
    pub ipv6_nets: Vec<String>,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
}

/// A host endpoint's stored value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HostEndpoint {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub expected_ipv4_addrs: Vec<String>,
    #[serde(default)]
    pub expected_ipv6_addrs: Vec<String>,
    #[serde(default)]
    pub profile_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<f64>,
    #[serde(default)]
    pub inbound_rules: Vec<Rule>,
    #[serde(default)]
    pub outbound_rules: Vec<Rule>,
}

/// The `rules` part of a profile. Rule-bearing exactly like a policy.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileRules {
    #[serde(default)]
    pub inbound_rules: Vec<Rule>,
    #[serde(default)]
    pub outbound_rules: Vec<Rule>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TierMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<f64>,
}

/// A single policy/profile rule.
///
/// Only the four selector slots are interpreted by the driver; everything
/// else, including fields this struct doesn't model, is carried through
/// re-serialisation verbatim (negated fields keep their `!`-prefixed wire
/// names).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_net: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_ports: Option<Vec<u16>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_net: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_ports: Option<Vec<u16>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icmp_type: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icmp_code: Option<i32>,

    #[serde(
        rename = "!protocol",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub not_protocol: Option<String>,
    #[serde(rename = "!src_tag", default, skip_serializing_if = "Option::is_none")]
    pub not_src_tag: Option<String>,
    #[serde(rename = "!src_net", default, skip_serializing_if = "Option::is_none")]
    pub not_src_net: Option<String>,
    #[serde(
        rename = "!src_selector",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub not_src_selector: Option<String>,
    #[serde(
        rename = "!src_ports",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub not_src_ports: Option<Vec<u16>>,
    #[serde(rename = "!dst_tag", default, skip_serializing_if = "Option::is_none")]
    pub not_dst_tag: Option<String>,
    #[serde(rename = "!dst_net", default, skip_serializing_if = "Option::is_none")]
    pub not_dst_net: Option<String>,
    #[serde(
        rename = "!dst_selector",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub not_dst_selector: Option<String>,
    #[serde(
        rename = "!dst_ports",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub not_dst_ports: Option<Vec<u16>>,
    #[serde(
        rename = "!icmp_type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub not_icmp_type: Option<i32>,
    #[serde(
        rename = "!icmp_code",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub not_icmp_code: Option<i32>,

    /// Fields the driver doesn't model, preserved for re-serialisation.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// === impl Rule ===

impl Rule {
    /// The four selector-bearing slots, in a fixed order.
    pub fn selector_slots(&self) -> [&Option<String>; 4] {
        [
            &self.src_selector,
            &self.dst_selector,
            &self.not_src_selector,
            &self.not_dst_selector,
        ]
    }

    pub fn selector_slots_mut(&mut self) -> [&mut Option<String>; 4] {
        [
            &mut self.src_selector,
            &mut self.dst_selector,
            &mut self.not_src_selector,
            &mut self.not_dst_selector,
        ]
    }
}

/// A typed store value, tagged to match its key's kind.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    WorkloadEndpoint(WorkloadEndpoint),
    HostEndpoint(HostEndpoint),
    Policy(Policy),
    ProfileRules(ProfileRules),
    ProfileTags(Vec<String>),
    ProfileLabels(Labels),
    TierMetadata(TierMetadata),
}

#[derive(Debug, thiserror::Error)]
#[error("invalid {kind:?} value: {source}")]
pub struct ValueParseError {
    pub kind: KeyKind,
    #[source]
    pub source: serde_json::Error,
}

// === impl Value ===

impl Value {
    /// Deserialises `raw` according to the key's kind.
    pub fn parse(key: &Key, raw: &str) -> Result<Value, ValueParseError> {
        let parsed = match key {
            Key::WorkloadEndpoint(_) => serde_json::from_str(raw).map(Value::WorkloadEndpoint),
            Key::HostEndpoint(_) => serde_json::from_str(raw).map(Value::HostEndpoint),
            Key::Policy(_) => serde_json::from_str(raw).map(Value::Policy),
            Key::Profile(k) => match k.part {
                ProfilePart::Rules => serde_json::from_str(raw).map(Value::ProfileRules),
                ProfilePart::Tags => serde_json::from_str(raw).map(Value::ProfileTags),
                ProfilePart::Labels => serde_json::from_str(raw).map(Value::ProfileLabels),
            },
            Key::TierMetadata(_) => serde_json::from_str(raw).map(Value::TierMetadata),
        };
        parsed.map_err(|source| ValueParseError {
            kind: key.kind(),
            source,
        })
    }

    /// Serialises the value back to its wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Value::WorkloadEndpoint(v) => serde_json::to_string(v),
            Value::HostEndpoint(v) => serde_json::to_string(v),
            Value::Policy(v) => serde_json::to_string(v),
            Value::ProfileRules(v) => serde_json::to_string(v),
            Value::ProfileTags(v) => serde_json::to_string(v),
            Value::ProfileLabels(v) => serde_json::to_string(v),
            Value::TierMetadata(v) => serde_json::to_string(v),
        }
    }
}
