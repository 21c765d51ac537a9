use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::extract::extract_answer;
use super::{normalize, normalize_value};

/// One question that must carry one of the accepted answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredAnswerRule {
    pub question_id: String,
    accepted: Vec<String>,
}

impl RequiredAnswerRule {
    pub fn new<I, S>(question_id: impl Into<String>, accepted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            question_id: question_id.into(),
            accepted: accepted
                .into_iter()
                .map(|value| normalize(value.as_ref()))
                .collect(),
        }
    }

    pub fn accepted(&self) -> &[String] {
        &self.accepted
    }

    pub fn matches(&self, answers: &Map<String, Value>) -> bool {
        let actual = normalize_value(extract_answer(answers, &self.question_id));
        self.accepted.iter().any(|expected| *expected == actual)
    }
}

/// The first rule an answer set failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleMismatch {
    pub question_id: String,
    pub expected_any_of: Vec<String>,
    pub received: String,
}

/// Conjunction of required answers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "BTreeMap<String, AcceptedValues>")]
pub struct RuleSet {
    rules: Vec<RequiredAnswerRule>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum AcceptedValues {
    One(String),
    Many(Vec<String>),
}

impl From<BTreeMap<String, AcceptedValues>> for RuleSet {
    fn from(value: BTreeMap<String, AcceptedValues>) -> Self {
        let rules = value
            .into_iter()
            .map(|(question_id, accepted)| match accepted {
                AcceptedValues::One(single) => RequiredAnswerRule::new(question_id, [single]),
                AcceptedValues::Many(many) => RequiredAnswerRule::new(question_id, many),
            })
            .collect();
        Self { rules }
    }
}

impl RuleSet {
    pub fn new(rules: Vec<RequiredAnswerRule>) -> Self {
        Self { rules }
    }

    /// Homeowner, house, not over 75 and no roof works planned.
    pub fn solar_defaults() -> Self {
        // Chameleon configs emit either label text ("homeowner") or binary values ("yes").
        Self::new(vec![
            RequiredAnswerRule::new(
                "a2f8b4ab-f96c-11e4-824b-22000a699fb3",
                ["homeowner", "yes"],
            ),
            RequiredAnswerRule::new("128a72ad-041e-11ed-a6b2-062f1bcd6de3", ["home"]),
            RequiredAnswerRule::new("a6c8cf0f-995a-11e7-bbea-02e4563f24a3", ["no"]),
            RequiredAnswerRule::new("b9f10adf-995a-11e7-bbea-02e4563f24a3", ["no"]),
        ])
    }

    pub fn rules(&self) -> &[RequiredAnswerRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn check(&self, answers: &Map<String, Value>) -> Result<(), RuleMismatch> {
        for rule in &self.rules {
            let actual = normalize_value(extract_answer(answers, &rule.question_id));
            debug!(
                question_id = %rule.question_id,
                expected_any_of = ?rule.accepted,
                actual = %actual,
                "evaluating answer"
            );
            if !rule.accepted.iter().any(|expected| *expected == actual) {
                return Err(RuleMismatch {
                    question_id: rule.question_id.clone(),
                    expected_any_of: rule.accepted.clone(),
                    received: actual,
                });
            }
        }
        Ok(())
    }

    pub fn is_eligible(&self, answers: &Map<String, Value>) -> bool {
        match self.check(answers) {
            Ok(()) => true,
            Err(mismatch) => {
                debug!(
                    question_id = %mismatch.question_id,
                    expected = %mismatch.expected_any_of.join(", "),
                    received = %mismatch.received,
                    "answer mismatch"
                );
                false
            }
        }
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::solar_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn answers(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("answers object")
    }

    fn qualifying() -> Map<String, Value> {
        answers(json!({
            "a2f8b4ab-f96c-11e4-824b-22000a699fb3": "yes",
            "128a72ad-041e-11ed-a6b2-062f1bcd6de3": "home",
            "a6c8cf0f-995a-11e7-bbea-02e4563f24a3": "no",
            "b9f10adf-995a-11e7-bbea-02e4563f24a3": "no",
        }))
    }

    #[test]
    fn qualifying_answers_pass_every_rule() {
        assert!(RuleSet::solar_defaults().is_eligible(&qualifying()));
    }

    #[test]
    fn missing_answer_fails_its_rule() {
        let mut partial = qualifying();
        partial.remove("a6c8cf0f-995a-11e7-bbea-02e4563f24a3");

        let mismatch = RuleSet::solar_defaults()
            .check(&partial)
            .expect_err("missing answer fails");
        assert_eq!(mismatch.question_id, "a6c8cf0f-995a-11e7-bbea-02e4563f24a3");
        assert_eq!(mismatch.received, "");
    }

    #[test]
    fn bracketed_keys_and_case_are_tolerated() {
        let answers = answers(json!({
            "answers[a2f8b4ab-f96c-11e4-824b-22000a699fb3]": " HomeOwner ",
            "128a72ad-041e-11ed-a6b2-062f1bcd6de3": "HOME",
            "answers[a6c8cf0f-995a-11e7-bbea-02e4563f24a3]": "No",
            "b9f10adf-995a-11e7-bbea-02e4563f24a3": "no ",
        }));
        assert!(RuleSet::solar_defaults().is_eligible(&answers));
    }

    #[test]
    fn bracketed_key_wins_over_bare_key() {
        let rules = RuleSet::new(vec![RequiredAnswerRule::new("q", ["yes"])]);
        let answers = answers(json!({"q": "yes", "answers[q]": "no"}));
        assert!(!rules.is_eligible(&answers));
    }

    #[test]
    fn deserializes_single_and_multiple_accepted_values() {
        let rules: RuleSet =
            serde_json::from_value(json!({"q1": "Yes", "q2": ["a", "B"]})).expect("rules parse");
        assert_eq!(rules.len(), 2);
        assert_eq!(rules.rules()[0].accepted(), ["yes".to_string()]);
        assert_eq!(rules.rules()[1].accepted(), ["a".to_string(), "b".to_string()]);
    }

    fn reference_eligible(rules: &[(String, Vec<String>)], answers: &Map<String, Value>) -> bool {
        rules.iter().all(|(id, accepted)| {
            let bracketed = format!("answers[{id}]");
            let raw = answers
                .get(&bracketed)
                .or_else(|| answers.get(id))
                .map(normalize_value)
                .unwrap_or_default();
            accepted.iter().any(|value| normalize(value) == raw)
        })
    }

    proptest! {
        #[test]
        fn eligibility_matches_reference_definition(
            table in proptest::collection::vec(
                ("[a-c]", proptest::collection::vec("[ ]?(Yes|no|Home)[ ]?", 1..3)),
                1..4,
            ),
            entries in proptest::collection::vec(
                (prop_oneof!["[a-c]", "[a-c]".prop_map(|id| format!("answers[{id}]"))],
                 "[ ]?(YES|No|home|maybe)[ ]?"),
                0..6,
            ),
        ) {
            let rules = RuleSet::new(
                table.iter()
                    .map(|(id, accepted)| RequiredAnswerRule::new(id.clone(), accepted.clone()))
                    .collect(),
            );
            let mut answers = Map::new();
            for (key, value) in entries {
                answers.insert(key, Value::String(value));
            }

            prop_assert_eq!(rules.is_eligible(&answers), reference_eligible(&table, &answers));
        }
    }
}
