use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::extract::{build_prefill_answers, extract_postcode, extract_text};
use super::rules::RuleSet;
use super::normalize_value;

/// Analytics event names this controller reacts to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PageChanged,
    ThankYouPageRequested,
    FormSubmit,
    WebformSubmissionCompleted,
    ThankYouPageReached,
    Other(String),
    Unnamed,
}

impl EventKind {
    fn from_name(name: Option<&str>) -> Self {
        match name {
            Some("pageChanged") => Self::PageChanged,
            Some("thankYouPageRequested") => Self::ThankYouPageRequested,
            Some("formSubmit") => Self::FormSubmit,
            Some("webform_submission_completed") => Self::WebformSubmissionCompleted,
            Some("thankYouPageReached") => Self::ThankYouPageReached,
            Some(other) => Self::Other(other.to_string()),
            None => Self::Unnamed,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::PageChanged => "pageChanged",
            Self::ThankYouPageRequested => "thankYouPageRequested",
            Self::FormSubmit => "formSubmit",
            Self::WebformSubmissionCompleted => "webform_submission_completed",
            Self::ThankYouPageReached => "thankYouPageReached",
            Self::Other(name) => name,
            Self::Unnamed => "(no event name)",
        }
    }
}

/// A `dataLayer` entry reduced to the fields the evaluator reads.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsEvent {
    pub kind: EventKind,
    pub answers: Map<String, Value>,
    pub iframe_id: Option<String>,
    pub submission_id: Option<String>,
    pub current_question: Option<Value>,
}

impl AnalyticsEvent {
    /// `None` for anything that is not an object.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let text = |key: &str| {
            object
                .get(key)
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        Some(Self {
            kind: EventKind::from_name(object.get("event").and_then(Value::as_str)),
            answers: object
                .get("answers")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            iframe_id: text("iFrameId"),
            submission_id: text("submissionId").or_else(|| text("submission_id")),
            current_question: object.get("currentQuestion").cloned(),
        })
    }
}

/// Flags the evaluator reads; it never writes them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationContext {
    pub qualified: bool,
    pub submit_stage_armed: bool,
}

/// Everything captured from a qualifying event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualifiedMatch {
    pub source: EventKind,
    pub postcode: Option<String>,
    pub first_name: Option<String>,
    pub prefill_answers: BTreeMap<String, String>,
    pub iframe_id: Option<String>,
}

/// Prefill fields offered by an event that arrived after qualification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrefillBackfill {
    pub source: EventKind,
    pub postcode: Option<String>,
    pub first_name: Option<String>,
    pub iframe_id: Option<String>,
    /// Whether the event should also re-assert the swap and lock.
    pub ensure_swap: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EventAction {
    ArmSubmitStage { armed: bool },
    ShowOverlay { iframe_id: Option<String> },
    HideOverlay { iframe_id: Option<String> },
    HideIframe { iframe_id: Option<String> },
    Qualify(QualifiedMatch),
    Backfill(PrefillBackfill),
    NoMatch { event: EventKind },
}

/// Maps one analytics event to the actions the controller should take.
pub struct EligibilityEvaluator<'a> {
    rules: &'a RuleSet,
}

impl<'a> EligibilityEvaluator<'a> {
    pub fn new(rules: &'a RuleSet) -> Self {
        Self { rules }
    }

    pub fn evaluate(&self, event: &AnalyticsEvent, context: EvaluationContext) -> Vec<EventAction> {
        let mut actions = Vec::new();

        if event.kind == EventKind::PageChanged {
            let question = event
                .current_question
                .as_ref()
                .map(normalize_value)
                .unwrap_or_default();
            actions.push(EventAction::ArmSubmitStage {
                armed: question == "phone number",
            });
        }

        let submit_like = matches!(
            event.kind,
            EventKind::ThankYouPageRequested | EventKind::FormSubmit
        );
        if submit_like && context.submit_stage_armed {
            actions.push(EventAction::ShowOverlay {
                iframe_id: event.iframe_id.clone(),
            });
        }

        if event.kind == EventKind::ThankYouPageRequested && context.qualified {
            actions.push(EventAction::HideIframe {
                iframe_id: event.iframe_id.clone(),
            });
        }

        match event.kind {
            EventKind::WebformSubmissionCompleted | EventKind::ThankYouPageReached => {
                actions.push(self.evaluate_answers(event, context));
            }
            _ => {}
        }

        actions
    }

    fn evaluate_answers(&self, event: &AnalyticsEvent, context: EvaluationContext) -> EventAction {
        let postcode = extract_postcode(&event.answers);
        let first_name = extract_text(&event.answers, &["first_name"]);
        debug!(
            event = event.kind.as_str(),
            answer_keys = ?event.answers.keys().collect::<Vec<_>>(),
            postcode = ?postcode,
            first_name = ?first_name,
            "processing answers"
        );

        if context.qualified {
            return EventAction::Backfill(PrefillBackfill {
                source: event.kind.clone(),
                postcode,
                first_name,
                iframe_id: event.iframe_id.clone(),
                ensure_swap: event.kind == EventKind::ThankYouPageReached,
            });
        }

        if self.rules.is_eligible(&event.answers) {
            return EventAction::Qualify(QualifiedMatch {
                source: event.kind.clone(),
                prefill_answers: build_prefill_answers(
                    &event.answers,
                    event.submission_id.as_deref(),
                ),
                postcode,
                first_name,
                iframe_id: event.iframe_id.clone(),
            });
        }

        match event.kind {
            EventKind::ThankYouPageReached => EventAction::HideOverlay {
                iframe_id: event.iframe_id.clone(),
            },
            _ => EventAction::NoMatch {
                event: event.kind.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn qualifying_event(name: &str) -> Value {
        json!({
            "event": name,
            "iFrameId": "mvfFormWidget-1",
            "submission_id": "sub-9",
            "answers": {
                "a2f8b4ab-f96c-11e4-824b-22000a699fb3": "yes",
                "128a72ad-041e-11ed-a6b2-062f1bcd6de3": "home",
                "a6c8cf0f-995a-11e7-bbea-02e4563f24a3": "no",
                "b9f10adf-995a-11e7-bbea-02e4563f24a3": "no",
                "first_name": "Ada",
                "primary_address_postalcode": "sw1a 1aa",
            }
        })
    }

    fn evaluate(value: Value, context: EvaluationContext) -> Vec<EventAction> {
        let rules = RuleSet::solar_defaults();
        let event = AnalyticsEvent::from_value(&value).expect("object event");
        EligibilityEvaluator::new(&rules).evaluate(&event, context)
    }

    #[test]
    fn non_objects_are_not_events() {
        assert!(AnalyticsEvent::from_value(&json!("gtm.js")).is_none());
        assert!(AnalyticsEvent::from_value(&json!(["event"])).is_none());
    }

    #[test]
    fn webform_submission_with_matching_answers_qualifies() {
        let actions = evaluate(
            qualifying_event("webform_submission_completed"),
            EvaluationContext::default(),
        );

        let [EventAction::Qualify(matched)] = actions.as_slice() else {
            panic!("expected a single qualify action, got {actions:?}");
        };
        assert_eq!(matched.postcode.as_deref(), Some("SW1A1AA"));
        assert_eq!(matched.first_name.as_deref(), Some("Ada"));
        assert_eq!(matched.iframe_id.as_deref(), Some("mvfFormWidget-1"));
        assert_eq!(
            matched.prefill_answers.get("submissionId").map(String::as_str),
            Some("sub-9")
        );
    }

    #[test]
    fn webform_submission_missing_answer_does_not_qualify() {
        let mut event = qualifying_event("webform_submission_completed");
        event["answers"]
            .as_object_mut()
            .expect("answers")
            .remove("b9f10adf-995a-11e7-bbea-02e4563f24a3");

        let actions = evaluate(event, EvaluationContext::default());
        assert_eq!(
            actions,
            vec![EventAction::NoMatch {
                event: EventKind::WebformSubmissionCompleted
            }]
        );
    }

    #[test]
    fn thank_you_reached_without_match_lowers_overlay() {
        let actions = evaluate(
            json!({"event": "thankYouPageReached", "iFrameId": "mvfFormWidget-2"}),
            EvaluationContext::default(),
        );
        assert_eq!(
            actions,
            vec![EventAction::HideOverlay {
                iframe_id: Some("mvfFormWidget-2".to_string())
            }]
        );
    }

    #[test]
    fn thank_you_reached_after_qualification_backfills() {
        let actions = evaluate(
            json!({
                "event": "thankYouPageReached",
                "answers": {"first_name": "Grace"},
            }),
            EvaluationContext {
                qualified: true,
                submit_stage_armed: false,
            },
        );

        let [EventAction::Backfill(backfill)] = actions.as_slice() else {
            panic!("expected backfill, got {actions:?}");
        };
        assert!(backfill.ensure_swap);
        assert_eq!(backfill.first_name.as_deref(), Some("Grace"));
        assert_eq!(backfill.postcode, None);
    }

    #[test]
    fn repeated_webform_submission_after_qualification_only_backfills() {
        let actions = evaluate(
            qualifying_event("webform_submission_completed"),
            EvaluationContext {
                qualified: true,
                submit_stage_armed: false,
            },
        );
        assert!(matches!(
            actions.as_slice(),
            [EventAction::Backfill(PrefillBackfill { ensure_swap: false, .. })]
        ));
    }

    #[test]
    fn phone_number_page_arms_the_submit_stage() {
        let armed = evaluate(
            json!({"event": "pageChanged", "currentQuestion": " Phone Number "}),
            EvaluationContext::default(),
        );
        assert_eq!(armed, vec![EventAction::ArmSubmitStage { armed: true }]);

        let disarmed = evaluate(
            json!({"event": "pageChanged", "currentQuestion": "Postcode"}),
            EvaluationContext::default(),
        );
        assert_eq!(disarmed, vec![EventAction::ArmSubmitStage { armed: false }]);
    }

    #[test]
    fn thank_you_requested_while_armed_and_qualified() {
        let actions = evaluate(
            json!({"event": "thankYouPageRequested", "iFrameId": "mvfFormWidget-3"}),
            EvaluationContext {
                qualified: true,
                submit_stage_armed: true,
            },
        );
        let iframe_id = Some("mvfFormWidget-3".to_string());
        assert_eq!(
            actions,
            vec![
                EventAction::ShowOverlay {
                    iframe_id: iframe_id.clone()
                },
                EventAction::HideIframe { iframe_id },
            ]
        );
    }

    #[test]
    fn form_submit_without_arming_does_nothing() {
        let actions = evaluate(json!({"event": "formSubmit"}), EvaluationContext::default());
        assert!(actions.is_empty());
    }
}
