//! Child side of the protocol, running inside the embedded app.
//!
//! The bridge reports its content height to the parent, announces loader
//! completion and, when loaded through the swap, asks the parent for the
//! answers captured on the marketing form.

mod height;
mod prefill;

pub use height::{ContentMeasurements, FrameId};
pub use prefill::{PrefillSeed, PrefillSink};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::host::{HostError, IncomingMessage, WindowRef};
use crate::protocol::{OriginPolicy, ProtocolMessage};
use crate::scheduler::Scheduler;
use crate::state::Latch;

/// What the bridge needs from the document it runs in.
pub trait EmbeddedHost {
    /// Logical route of the current page, e.g. `/loader`.
    fn path(&self) -> String;

    fn query_param(&self, name: &str) -> Option<String>;

    /// Whether `window.parent` is a different window.
    fn is_framed(&self) -> bool;

    fn measure(&self) -> ContentMeasurements;

    fn post_to_parent(&mut self, message: &ProtocolMessage, target_origin: &str) -> Result<(), HostError>;

    fn request_animation_frame(&mut self) -> FrameId;

    fn cancel_animation_frame(&mut self, frame: FrameId);

    /// Requests resize callbacks for `<body>` and `<html>`.
    fn observe_resize(&mut self) -> Result<(), HostError>;

    /// Requests subtree mutation callbacks for `<body>`.
    fn observe_body_mutations(&mut self) -> Result<(), HostError>;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    pub measure_delays_ms: Vec<i64>,
    pub prefill_request_delays_ms: Vec<i64>,
    pub message_origin: OriginPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            measure_delays_ms: vec![150, 600],
            prefill_request_delays_ms: vec![0, 300, 800],
            message_origin: OriginPolicy::Any,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeTask {
    Measure,
    RequestPrefill,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BridgeState {
    pub mounted: Latch,
    pub prefill_enabled: bool,
    pub prefill_applied: Latch,
    #[serde(skip)]
    pub pending_frame: Option<FrameId>,
    pub reports_sent: u32,
    pub last_reported_height: Option<u32>,
    pub prefill_requests_sent: u32,
}

pub struct EmbeddedBridge {
    config: BridgeConfig,
    state: BridgeState,
    timers: Scheduler<BridgeTask>,
}

impl EmbeddedBridge {
    pub fn new(config: BridgeConfig, now_ms: i64) -> Self {
        Self {
            config,
            state: BridgeState::default(),
            timers: Scheduler::new(now_ms),
        }
    }

    pub fn state(&self) -> &BridgeState {
        &self.state
    }

    pub fn next_due_at(&self) -> Option<i64> {
        self.timers.next_due_at()
    }

    /// App start. Later calls are no-ops.
    pub fn mount<E, S>(&mut self, host: &mut E, sink: &mut S)
    where
        E: EmbeddedHost + ?Sized,
        S: PrefillSink + ?Sized,
    {
        if !self.state.mounted.set() {
            return;
        }

        let seed = PrefillSeed::from_query(&*host);
        if !seed.is_empty() {
            debug!(seed = ?seed, "applying prefill from query string");
            sink.apply_prefill(seed);
        }

        if let Err(err) = host.observe_resize() {
            warn!(error = %err, "resize observer unavailable");
        }
        if let Err(err) = host.observe_body_mutations() {
            warn!(error = %err, "body mutation observer unavailable");
        }
        self.schedule_measure(host);
        for delay in &self.config.measure_delays_ms {
            self.timers.set_timeout(*delay, BridgeTask::Measure);
        }

        self.state.prefill_enabled =
            host.query_param("optly_iframe").as_deref() == Some("1") && host.is_framed();
        if self.state.prefill_enabled {
            for delay in self.config.prefill_request_delays_ms.clone() {
                if delay <= 0 {
                    self.request_prefill(host);
                } else {
                    self.timers.set_timeout(delay, BridgeTask::RequestPrefill);
                }
            }
        }
        info!(prefill = self.state.prefill_enabled, "embedded bridge mounted");
    }

    pub fn on_window_load<E: EmbeddedHost + ?Sized>(&mut self, host: &mut E) {
        self.schedule_measure(host);
    }

    pub fn on_window_resize<E: EmbeddedHost + ?Sized>(&mut self, host: &mut E) {
        self.schedule_measure(host);
    }

    pub fn on_content_resized<E: EmbeddedHost + ?Sized>(&mut self, host: &mut E) {
        self.schedule_measure(host);
    }

    pub fn on_body_mutation<E: EmbeddedHost + ?Sized>(&mut self, host: &mut E) {
        self.schedule_measure(host);
    }

    /// Measures and reports if `frame` is the latest one requested.
    pub fn on_animation_frame<E: EmbeddedHost + ?Sized>(&mut self, host: &mut E, frame: FrameId) {
        if self.state.pending_frame != Some(frame) {
            return;
        }
        self.state.pending_frame = None;
        self.report_height(host);
    }

    /// The loader page has finished its work.
    pub fn notify_loader_complete<E: EmbeddedHost + ?Sized>(&mut self, host: &mut E) {
        let origin = self.config.message_origin.target_origin().to_string();
        match host.post_to_parent(&ProtocolMessage::LoaderComplete, &origin) {
            Ok(()) => info!("posted loader-complete"),
            Err(err) => warn!(error = %err, "failed to post loader-complete"),
        }
    }

    pub fn on_message<E, S>(&mut self, host: &mut E, sink: &mut S, message: &IncomingMessage)
    where
        E: EmbeddedHost + ?Sized,
        S: PrefillSink + ?Sized,
    {
        if message.source != WindowRef::Parent || !self.config.message_origin.allows(&message.origin) {
            return;
        }
        match ProtocolMessage::decode(&message.data) {
            Some(ProtocolMessage::HeightRequest) => self.report_height(host),
            Some(ProtocolMessage::Prefill { answers }) => {
                if !self.state.prefill_enabled || answers.is_empty() {
                    return;
                }
                if !self.state.prefill_applied.set() {
                    return;
                }
                let seed = PrefillSeed::from_answers(&answers);
                info!(keys = ?answers.keys().collect::<Vec<_>>(), "applying prefill answers from parent");
                sink.apply_prefill(seed);
            }
            _ => {}
        }
    }

    pub fn run_due<E: EmbeddedHost + ?Sized>(&mut self, host: &mut E, now_ms: i64) -> usize {
        let mut ran = 0;
        while let Some(fired) = self.timers.pop_due(now_ms) {
            ran += 1;
            match fired.task {
                BridgeTask::Measure => self.schedule_measure(host),
                BridgeTask::RequestPrefill => self.request_prefill(host),
            }
        }
        self.timers.settle(now_ms);
        ran
    }

    /// Latest-state-wins: any pending frame is cancelled first.
    fn schedule_measure<E: EmbeddedHost + ?Sized>(&mut self, host: &mut E) {
        if let Some(pending) = self.state.pending_frame.take() {
            host.cancel_animation_frame(pending);
        }
        self.state.pending_frame = Some(host.request_animation_frame());
    }

    fn report_height<E: EmbeddedHost + ?Sized>(&mut self, host: &mut E) {
        let height = host.measure().height();
        if height == 0 {
            debug!("content height is zero, not reporting");
            return;
        }

        let message = ProtocolMessage::Height {
            height: f64::from(height),
            path: host.path(),
        };
        let origin = self.config.message_origin.target_origin().to_string();
        match host.post_to_parent(&message, &origin) {
            Ok(()) => {
                self.state.reports_sent += 1;
                self.state.last_reported_height = Some(height);
            }
            Err(err) => warn!(error = %err, "failed to post height"),
        }
    }

    fn request_prefill<E: EmbeddedHost + ?Sized>(&mut self, host: &mut E) {
        if !host.is_framed() {
            return;
        }
        let origin = self.config.message_origin.target_origin().to_string();
        match host.post_to_parent(&ProtocolMessage::PrefillRequest, &origin) {
            Ok(()) => self.state.prefill_requests_sent += 1,
            Err(err) => warn!(error = %err, "failed to request prefill"),
        }
    }
}
