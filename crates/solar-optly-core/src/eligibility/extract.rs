use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::answer_text;

static MISSING: Value = Value::Null;

const POSTCODE_KEYS: [&str; 4] = [
    "primary_address_postalcode",
    "primary_address_postcode",
    "postcode",
    "answers[primary_address_postalcode]",
];

fn postcode_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)postcode|postal").expect("static pattern compiles"))
}

fn bracketed(key: &str) -> String {
    format!("answers[{key}]")
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn non_blank(value: Option<&Value>) -> Option<String> {
    let value = value.filter(|value| is_truthy(value))?;
    let text = answer_text(value);
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Raw answer for a question id; the `answers[<id>]` key shadows the bare id.
pub fn extract_answer<'a>(answers: &'a Map<String, Value>, question_id: &str) -> &'a Value {
    answers
        .get(&bracketed(question_id))
        .or_else(|| answers.get(question_id))
        .unwrap_or(&MISSING)
}

/// First non-blank value among `keys`, trying each bare key before its bracketed form.
pub fn extract_text(answers: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        non_blank(answers.get(*key)).or_else(|| non_blank(answers.get(&bracketed(key))))
    })
}

/// Postcode with whitespace removed and upper-cased.
pub fn extract_postcode(answers: &Map<String, Value>) -> Option<String> {
    let raw = extract_text(answers, &POSTCODE_KEYS).or_else(|| {
        answers
            .iter()
            .filter(|(key, _)| postcode_key_pattern().is_match(key))
            .find_map(|(_, value)| non_blank(Some(value)))
    })?;

    let compact = raw
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .collect::<String>()
        .to_uppercase();
    (!compact.is_empty()).then_some(compact)
}

/// Answers forwarded to the embedded app over the prefill message.
pub fn build_prefill_answers(
    answers: &Map<String, Value>,
    submission_id: Option<&str>,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "first_name".to_string(),
            extract_text(answers, &["first_name"]).unwrap_or_default(),
        ),
        (
            "primary_address_postalcode".to_string(),
            extract_postcode(answers).unwrap_or_default(),
        ),
        (
            "submissionId".to_string(),
            submission_id.unwrap_or_default().to_string(),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn answers(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("answers object")
    }

    #[test]
    fn missing_answer_is_null() {
        let answers = answers(json!({"other": "x"}));
        assert_eq!(extract_answer(&answers, "q"), &Value::Null);
    }

    #[test]
    fn text_prefers_bare_key_and_skips_blank_values() {
        let answers = answers(json!({
            "first_name": "   ",
            "answers[first_name]": "  Grace ",
        }));
        assert_eq!(extract_text(&answers, &["first_name"]), Some("Grace".to_string()));
    }

    #[test]
    fn postcode_checks_known_keys_first() {
        let answers = answers(json!({
            "alt_postal": "ZZ1 1ZZ",
            "answers[primary_address_postalcode]": "sw1a 1aa",
        }));
        assert_eq!(extract_postcode(&answers), Some("SW1A1AA".to_string()));
    }

    #[test]
    fn postcode_falls_back_to_any_postal_key_in_insertion_order() {
        let answers = answers(json!({
            "empty_postcode": "",
            "Home_PostCode_Field": " m1  1ae ",
            "billing_postal": "EC1A 1BB",
        }));
        assert_eq!(extract_postcode(&answers), Some("M11AE".to_string()));
    }

    #[test]
    fn postcode_absent_when_nothing_matches() {
        let answers = answers(json!({"first_name": "Ada"}));
        assert_eq!(extract_postcode(&answers), None);
    }

    #[test]
    fn prefill_answers_always_carry_three_fields() {
        let answers = answers(json!({"first_name": "Ada", "postcode": "sw1a 1aa"}));
        let prefill = build_prefill_answers(&answers, Some("sub-42"));
        assert_eq!(prefill.get("first_name").map(String::as_str), Some("Ada"));
        assert_eq!(
            prefill.get("primary_address_postalcode").map(String::as_str),
            Some("SW1A1AA")
        );
        assert_eq!(prefill.get("submissionId").map(String::as_str), Some("sub-42"));

        let empty = build_prefill_answers(&Map::new(), None);
        assert_eq!(empty.len(), 3);
        assert!(empty.values().all(String::is_empty));
    }
}
