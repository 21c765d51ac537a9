//! Qualification rules and the analytics-event evaluator.

mod events;
mod extract;
mod rules;

pub use events::{
    AnalyticsEvent, EligibilityEvaluator, EvaluationContext, EventAction, EventKind,
    PrefillBackfill, QualifiedMatch,
};
pub use extract::{build_prefill_answers, extract_answer, extract_postcode, extract_text};
pub use rules::{RequiredAnswerRule, RuleMismatch, RuleSet};

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of a qualifying event, as persisted across the thank-you navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityRecord {
    pub matched_at: i64,
    #[serde(default)]
    pub prefill_postcode: String,
    #[serde(default)]
    pub prefill_first_name: String,
    #[serde(default)]
    pub prefill_answers: BTreeMap<String, String>,
}

impl EligibilityRecord {
    pub fn matched_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.matched_at).single()
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.matched_at
    }
}

/// `String(value)` semantics for the loosely typed answer payloads.
pub fn answer_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.clone(),
        Value::Array(items) => items.iter().map(answer_text).collect::<Vec<_>>().join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

/// Trimmed, lower-cased comparison form.
pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

pub(crate) fn normalize_value(value: &Value) -> String {
    normalize(&answer_text(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_uses_camel_case_wire_names() {
        let record = EligibilityRecord {
            matched_at: 1_700_000_000_000,
            prefill_postcode: "SW1A1AA".to_string(),
            prefill_first_name: "Ada".to_string(),
            prefill_answers: BTreeMap::from([("first_name".to_string(), "Ada".to_string())]),
        };

        let value = serde_json::to_value(&record).expect("record serializes");
        assert_eq!(
            value,
            json!({
                "matchedAt": 1_700_000_000_000_i64,
                "prefillPostcode": "SW1A1AA",
                "prefillFirstName": "Ada",
                "prefillAnswers": {"first_name": "Ada"},
            })
        );
        assert_eq!(
            record.matched_at_utc().map(|at| at.to_rfc3339()),
            Some("2023-11-14T22:13:20+00:00".to_string())
        );
    }

    #[test]
    fn answer_text_mirrors_string_coercion() {
        assert_eq!(answer_text(&json!(null)), "");
        assert_eq!(answer_text(&json!(true)), "true");
        assert_eq!(answer_text(&json!(12)), "12");
        assert_eq!(answer_text(&json!(["a", "b"])), "a,b");
        assert_eq!(normalize_value(&json!("  HomeOwner ")), "homeowner");
    }
}
