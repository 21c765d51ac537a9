//! Scripted runs of the simulated browser, as used by the CLI and the
//! end-to-end tests.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::browser::{Browser, PageSnapshot, TimelineEntry};
use super::fixture::PageFixture;
use super::frame::AppProfile;
use super::page::{Capabilities, FakeSessionStorage};
use crate::config::ControllerConfig;
use crate::host::{HostError, WindowRef};

/// Time the simulation keeps running after the last step when no end is given.
const DEFAULT_TAIL_MS: i64 = 5_000;

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("unable to read scenario {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid scenario {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("scenario has no steps")]
    Empty,
    #[error("step {index} at {at_ms} ms runs before the step preceding it")]
    OutOfOrder { index: usize, at_ms: i64 },
    #[error("cannot move the clock back to {target_ms} ms (now {now_ms} ms)")]
    ClockRewind { target_ms: i64, now_ms: i64 },
    #[error("simulation exceeded {limit} steps at {now_ms} ms")]
    StepLimit { limit: usize, now_ms: i64 },
    #[error("simulated page rejected the step")]
    Host {
        #[source]
        source: HostError,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    #[serde(default)]
    pub name: String,
    pub href: String,
    #[serde(default)]
    pub page: PageFixture,
    #[serde(default)]
    pub app: AppProfile,
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Pre-seeded `sessionStorage`. Non-string values are stored as JSON text.
    #[serde(default)]
    pub session_storage: BTreeMap<String, Value>,
    #[serde(default)]
    pub start_ms: i64,
    pub steps: Vec<ScenarioStep>,
    #[serde(default)]
    pub run_until_ms: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioStep {
    pub at_ms: i64,
    #[serde(flatten)]
    pub action: ScenarioAction,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ScenarioAction {
    Install,
    Push {
        event: Value,
    },
    ReplacePush {
        #[serde(default = "default_replacement")]
        by: String,
    },
    Navigate {
        href: String,
        #[serde(default)]
        page: Option<PageFixture>,
    },
    SetIframeSrc {
        src: String,
    },
    InsertIframe {
        id: String,
        #[serde(default)]
        src: Option<String>,
    },
    AppendRow,
    ForeignMessage {
        data: Value,
        #[serde(default)]
        origin: String,
    },
    ResizeApp {
        height: f64,
    },
}

fn default_replacement() -> String {
    "vendorPush".to_string()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReport {
    pub name: String,
    pub timeline: Vec<TimelineEntry>,
    #[serde(rename = "final")]
    pub snapshot: PageSnapshot,
}

impl Scenario {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ScenarioError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ScenarioError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    fn validate(&self) -> Result<(), ScenarioError> {
        if self.steps.is_empty() {
            return Err(ScenarioError::Empty);
        }
        let mut previous = self.start_ms;
        for (index, step) in self.steps.iter().enumerate() {
            if step.at_ms < previous {
                return Err(ScenarioError::OutOfOrder {
                    index,
                    at_ms: step.at_ms,
                });
            }
            previous = step.at_ms;
        }
        Ok(())
    }

    pub fn browser(&self, config: &ControllerConfig) -> Browser {
        let mut storage = FakeSessionStorage::new(self.capabilities.storage);
        for (key, value) in &self.session_storage {
            let text = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            storage.seed(key, &text);
        }
        Browser::new(
            config.clone(),
            &self.href,
            &self.page,
            storage,
            self.capabilities,
            self.app.clone(),
            self.start_ms,
        )
    }

    pub fn run(&self, config: &ControllerConfig) -> Result<ScenarioReport, ScenarioError> {
        self.validate()?;
        let mut browser = self.browser(config);

        for step in &self.steps {
            browser.advance_to(step.at_ms)?;
            apply(&mut browser, &step.action, config)?;
        }

        let last = self.steps.last().map_or(self.start_ms, |step| step.at_ms);
        let end = self.run_until_ms.unwrap_or(last + DEFAULT_TAIL_MS).max(last);
        browser.advance_to(end)?;

        info!(
            scenario = %self.name,
            end_ms = end,
            entries = browser.timeline().len(),
            "scenario finished"
        );
        let snapshot = browser.snapshot();
        Ok(ScenarioReport {
            name: self.name.clone(),
            timeline: browser.into_timeline(),
            snapshot,
        })
    }
}

fn apply(browser: &mut Browser, action: &ScenarioAction, config: &ControllerConfig) -> Result<(), ScenarioError> {
    match action {
        ScenarioAction::Install => {
            browser.install();
        }
        ScenarioAction::Push { event } => {
            browser.push_event(event.clone());
        }
        ScenarioAction::ReplacePush { by } => browser.replace_data_layer_push(by),
        ScenarioAction::Navigate { href, page } => {
            browser.navigate(href, &page.clone().unwrap_or_default());
        }
        ScenarioAction::SetIframeSrc { src } => {
            browser.set_iframe_src(src);
        }
        ScenarioAction::InsertIframe { id, src } => {
            let src = src
                .clone()
                .unwrap_or_else(|| PageFixture::default().iframe_src);
            browser.insert_iframe(id, &src)?;
        }
        ScenarioAction::AppendRow => {
            browser.append_row()?;
        }
        ScenarioAction::ForeignMessage { data, origin } => {
            let origin = if origin.is_empty() {
                config.app_url.origin().ascii_serialization()
            } else {
                origin.clone()
            };
            browser.deliver_foreign_message(WindowRef::Foreign(0), &origin, data.clone());
        }
        ScenarioAction::ResizeApp { height } => browser.resize_app(*height),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_flattened_step_actions() {
        let scenario: Scenario = serde_json::from_value(json!({
            "name": "minimal",
            "href": "https://www.example.co.uk/solar/",
            "steps": [
                {"atMs": 0, "action": "install"},
                {"atMs": 10, "action": "push", "event": {"event": "pageChanged"}},
                {"atMs": 20, "action": "replacePush"},
            ]
        }))
        .expect("scenario parses");

        assert_eq!(scenario.steps.len(), 3);
        assert!(matches!(scenario.steps[0].action, ScenarioAction::Install));
        assert!(matches!(
            &scenario.steps[2].action,
            ScenarioAction::ReplacePush { by } if by == "vendorPush"
        ));
    }

    #[test]
    fn rejects_out_of_order_steps() {
        let scenario: Scenario = serde_json::from_value(json!({
            "href": "https://www.example.co.uk/solar/",
            "steps": [
                {"atMs": 50, "action": "install"},
                {"atMs": 10, "action": "appendRow"},
            ]
        }))
        .expect("scenario parses");

        let err = scenario
            .run(&ControllerConfig::default())
            .expect_err("steps are out of order");
        assert!(matches!(err, ScenarioError::OutOfOrder { index: 1, at_ms: 10 }));
    }

    #[test]
    fn empty_scenarios_are_rejected() {
        let scenario: Scenario = serde_json::from_value(json!({
            "href": "https://www.example.co.uk/solar/",
            "steps": []
        }))
        .expect("scenario parses");
        assert!(matches!(
            scenario.run(&ControllerConfig::default()),
            Err(ScenarioError::Empty)
        ));
    }
}
