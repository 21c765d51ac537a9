//! `postMessage` vocabulary shared by the host page and the embedded app.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::eligibility::answer_text;

pub const HEIGHT_REQUEST: &str = "solar-optly-height-request";
pub const HEIGHT: &str = "solar-optly-height";
pub const LOADER_COMPLETE: &str = "solar-optly-loader-complete";
pub const PREFILL_REQUEST: &str = "solar-optly-prefill-request";
pub const PREFILL: &str = "solar-optly-prefill";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProtocolMessage {
    /// Parent asks the child to measure and report.
    #[serde(rename = "solar-optly-height-request")]
    HeightRequest,
    /// Child reports the height of its rendered content for a logical page.
    #[serde(rename = "solar-optly-height")]
    Height {
        #[serde(deserialize_with = "lenient_number")]
        height: f64,
        #[serde(default)]
        path: String,
    },
    #[serde(rename = "solar-optly-loader-complete")]
    LoaderComplete,
    #[serde(rename = "solar-optly-prefill-request")]
    PrefillRequest,
    /// Captured form answers, delivered to the child on request.
    #[serde(rename = "solar-optly-prefill")]
    Prefill {
        #[serde(default, deserialize_with = "text_map")]
        answers: BTreeMap<String, String>,
    },
}

impl ProtocolMessage {
    /// Decodes an arbitrary `event.data` payload. Anything that is not one of
    /// ours, or is one of ours but malformed, is treated as absent.
    pub fn decode(data: &Value) -> Option<Self> {
        let kind = data.get("type")?.as_str()?;
        if !kind.starts_with("solar-optly-") {
            return None;
        }
        serde_json::from_value(data.clone()).ok()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolMessage::HeightRequest => HEIGHT_REQUEST,
            ProtocolMessage::Height { .. } => HEIGHT,
            ProtocolMessage::LoaderComplete => LOADER_COMPLETE,
            ProtocolMessage::PrefillRequest => PREFILL_REQUEST,
            ProtocolMessage::Prefill { .. } => PREFILL,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn lenient_number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let number = match value {
        Value::Number(number) => number.as_f64().unwrap_or(0.0),
        Value::String(raw) => raw.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    Ok(number)
}

fn text_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let map = match value {
        Value::Object(entries) => entries
            .into_iter()
            .map(|(key, value)| (key, answer_text(&value)))
            .collect(),
        _ => BTreeMap::new(),
    };
    Ok(map)
}

/// Which origins a receiver accepts and which target origin a sender uses.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OriginPolicy {
    /// The `*` wildcard: host and embedded app live on unrelated domains.
    #[default]
    Any,
    Exact(String),
}

impl OriginPolicy {
    pub fn allows(&self, origin: &str) -> bool {
        match self {
            OriginPolicy::Any => true,
            OriginPolicy::Exact(expected) => expected.eq_ignore_ascii_case(origin.trim()),
        }
    }

    pub fn target_origin(&self) -> &str {
        match self {
            OriginPolicy::Any => "*",
            OriginPolicy::Exact(origin) => origin,
        }
    }
}

impl From<String> for OriginPolicy {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed == "*" {
            OriginPolicy::Any
        } else {
            OriginPolicy::Exact(trimmed.trim_end_matches('/').to_string())
        }
    }
}

impl From<OriginPolicy> for String {
    fn from(value: OriginPolicy) -> Self {
        value.target_origin().to_string()
    }
}

impl fmt::Display for OriginPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.target_origin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_height_with_fractional_value() {
        let message = ProtocolMessage::decode(&json!({
            "type": "solar-optly-height",
            "height": 350.4,
            "path": "/address",
        }));

        assert_eq!(
            message,
            Some(ProtocolMessage::Height {
                height: 350.4,
                path: "/address".to_string(),
            })
        );
    }

    #[test]
    fn height_accepts_numeric_strings_and_defaults_garbage_to_zero() {
        let from_string = ProtocolMessage::decode(&json!({
            "type": "solar-optly-height",
            "height": "420",
        }));
        assert_eq!(
            from_string,
            Some(ProtocolMessage::Height {
                height: 420.0,
                path: String::new(),
            })
        );

        let garbage = ProtocolMessage::decode(&json!({
            "type": "solar-optly-height",
            "height": {"nested": true},
        }));
        assert!(matches!(
            garbage,
            Some(ProtocolMessage::Height { height, .. }) if height == 0.0
        ));
    }

    #[test]
    fn foreign_and_malformed_payloads_are_absent() {
        assert!(ProtocolMessage::decode(&json!("hello")).is_none());
        assert!(ProtocolMessage::decode(&json!({"type": "webpackOk"})).is_none());
        assert!(ProtocolMessage::decode(&json!({"type": "solar-optly-unknown"})).is_none());
        assert!(ProtocolMessage::decode(&json!({"type": "solar-optly-height"})).is_none());
    }

    #[test]
    fn unit_messages_serialize_with_type_only() {
        assert_eq!(
            ProtocolMessage::HeightRequest.to_value(),
            json!({"type": "solar-optly-height-request"})
        );
        assert_eq!(
            ProtocolMessage::LoaderComplete.to_value(),
            json!({"type": "solar-optly-loader-complete"})
        );
    }

    #[test]
    fn prefill_answers_are_coerced_to_text() {
        let message = ProtocolMessage::decode(&json!({
            "type": "solar-optly-prefill",
            "answers": {"first_name": "Ada", "age": 42, "missing": null},
        }))
        .expect("prefill decodes");

        let ProtocolMessage::Prefill { answers } = message else {
            panic!("expected prefill");
        };
        assert_eq!(answers.get("first_name").map(String::as_str), Some("Ada"));
        assert_eq!(answers.get("age").map(String::as_str), Some("42"));
        assert_eq!(answers.get("missing").map(String::as_str), Some(""));
    }

    #[test]
    fn origin_policy_round_trips_wildcard_and_exact() {
        assert_eq!(OriginPolicy::from("*".to_string()), OriginPolicy::Any);
        let exact = OriginPolicy::from("https://www.example.co.uk/".to_string());
        assert!(exact.allows("https://www.example.co.uk"));
        assert!(!exact.allows("https://evil.example"));
        assert_eq!(exact.target_origin(), "https://www.example.co.uk");
    }
}
