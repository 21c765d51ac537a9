//! Process-wide flags owned by the host-page controller.
//!
//! Every field is either a latch (false → true once), a toggle that can be
//! re-derived, or a last-seen cache. Components receive `&mut ControllerState`
//! and check before acting, so any entry point may run any number of times.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::eligibility::EligibilityRecord;
use crate::host::NodeId;

/// A boolean that transitions from false to true at most once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Latch(bool);

impl Latch {
    pub fn is_set(self) -> bool {
        self.0
    }

    /// Sets the latch, returning `true` only on the transition.
    pub fn set(&mut self) -> bool {
        !std::mem::replace(&mut self.0, true)
    }
}

/// Prefill values captured from the qualifying event (or restored from the marker).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrefillCapture {
    pub postcode: Option<String>,
    pub first_name: Option<String>,
    pub answers: BTreeMap<String, String>,
}

impl PrefillCapture {
    pub fn to_record(&self, matched_at: i64) -> EligibilityRecord {
        EligibilityRecord {
            matched_at,
            prefill_postcode: self.postcode.clone().unwrap_or_default(),
            prefill_first_name: self.first_name.clone().unwrap_or_default(),
            prefill_answers: self.answers.clone(),
        }
    }

    pub fn restore(record: &EligibilityRecord) -> Self {
        let non_empty = |value: &str| (!value.is_empty()).then(|| value.to_string());
        Self {
            postcode: non_empty(&record.prefill_postcode),
            first_name: non_empty(&record.prefill_first_name),
            answers: record.prefill_answers.clone(),
        }
    }

    /// Fills only the fields that are still missing.
    pub fn backfill(&mut self, postcode: Option<&str>, first_name: Option<&str>) -> Vec<&'static str> {
        let mut filled = Vec::new();
        if self.postcode.is_none() {
            if let Some(postcode) = postcode.filter(|value| !value.is_empty()) {
                self.postcode = Some(postcode.to_string());
                filled.push("postcode");
            }
        }
        if self.first_name.is_none() {
            if let Some(first_name) = first_name.filter(|value| !value.is_empty()) {
                self.first_name = Some(first_name.to_string());
                filled.push("first_name");
            }
        }
        filled
    }
}

/// Where the swap of the target iframe currently stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapPhase {
    #[default]
    Unlocated,
    Located,
    Hidden,
    SrcRewritten,
    LoadPending,
    Revealed,
    LockEnforced,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ControllerState {
    /// Number of times the controller script has been injected into this page.
    pub injection_count: u32,
    pub script_loaded: Latch,
    pub qualified: Latch,
    pub iframe_injected: Latch,
    pub iframe_ready_for_reveal: bool,
    pub lock_active: Latch,
    pub submit_stage_armed: bool,
    pub prefill: PrefillCapture,
    pub swap_phase: SwapPhase,
    /// Id of the iframe the swap resolved to, used when later triggers carry none.
    pub swap_target_id: Option<String>,
    pub lock_target: Option<NodeId>,
    pub last_iframe_height: Option<u32>,
    pub height_handler_attached: Latch,
    pub visibility_observer_attached: Latch,
    pub data_layer_polling: Latch,
    pub data_layer_poll_count: u32,
    pub processed_event_indexes: BTreeSet<usize>,
    pub events_evaluated: usize,
    pub height_base_styled: BTreeSet<NodeId>,
    pub height_load_listeners: BTreeSet<NodeId>,
    pub reveal_load_listeners: BTreeSet<NodeId>,
}

impl ControllerState {
    /// Moves the phase forward; earlier phases never overwrite later ones.
    pub fn advance_phase(&mut self, phase: SwapPhase) {
        if phase > self.swap_phase {
            self.swap_phase = phase;
        }
    }
}
