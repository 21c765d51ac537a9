//! The embedded app as loaded into a simulated iframe.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::bridge::{
    BridgeConfig, ContentMeasurements, EmbeddedBridge, EmbeddedHost, FrameId, PrefillSeed,
    PrefillSink,
};
use crate::host::HostError;
use crate::protocol::ProtocolMessage;

/// How the simulated embedded app behaves after it loads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppProfile {
    pub load_latency_ms: i64,
    pub loader_ms: i64,
    pub loader_height: f64,
    pub next_path: String,
    pub page_height: f64,
    pub frame_interval_ms: i64,
}

impl Default for AppProfile {
    fn default() -> Self {
        Self {
            load_latency_ms: 120,
            loader_ms: 1_500,
            loader_height: 480.0,
            next_path: "/address".to_string(),
            page_height: 350.4,
            frame_interval_ms: 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddedDocument {
    origin: String,
    path: String,
    query: BTreeMap<String, String>,
    framed: bool,
    measurements: ContentMeasurements,
    next_frame: u64,
    requested_frames: Vec<FrameId>,
    cancelled_frames: BTreeSet<FrameId>,
    outbox: Vec<(ProtocolMessage, String)>,
    observing_resize: bool,
    observing_mutations: bool,
}

impl EmbeddedDocument {
    pub fn load(src: &str, height: f64) -> Self {
        let parsed = Url::parse(src).ok();
        let query: BTreeMap<String, String> = parsed
            .as_ref()
            .map(|url| url.query_pairs().into_owned().collect())
            .unwrap_or_default();
        Self {
            origin: parsed
                .as_ref()
                .map(|url| url.origin().ascii_serialization())
                .unwrap_or_else(|| "null".to_string()),
            path: parsed
                .as_ref()
                .map(|url| url.path().to_string())
                .unwrap_or_else(|| "/".to_string()),
            query,
            framed: true,
            measurements: Self::measure_for(height),
            next_frame: 1,
            requested_frames: Vec::new(),
            cancelled_frames: BTreeSet::new(),
            outbox: Vec::new(),
            observing_resize: false,
            observing_mutations: false,
        }
    }

    fn measure_for(height: f64) -> ContentMeasurements {
        ContentMeasurements {
            root_rect_height: height,
            root_scroll_height: height.floor(),
            app_root_offset_height: Some(height.floor()),
            container_offset_height: None,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn current_path(&self) -> &str {
        &self.path
    }

    /// Client-side route change inside the app.
    pub fn navigate(&mut self, path: &str, height: f64) {
        self.path = path.to_string();
        self.measurements = Self::measure_for(height);
    }

    pub fn set_height(&mut self, height: f64) {
        self.measurements = Self::measure_for(height);
    }

    pub fn is_observing(&self) -> bool {
        self.observing_resize && self.observing_mutations
    }

    pub fn is_cancelled(&self, frame: FrameId) -> bool {
        self.cancelled_frames.contains(&frame)
    }

    pub fn take_outbox(&mut self) -> Vec<(ProtocolMessage, String)> {
        std::mem::take(&mut self.outbox)
    }

    pub fn take_frame_requests(&mut self) -> Vec<FrameId> {
        std::mem::take(&mut self.requested_frames)
    }
}

impl EmbeddedHost for EmbeddedDocument {
    fn path(&self) -> String {
        self.path.clone()
    }

    fn query_param(&self, name: &str) -> Option<String> {
        self.query.get(name).cloned()
    }

    fn is_framed(&self) -> bool {
        self.framed
    }

    fn measure(&self) -> ContentMeasurements {
        self.measurements
    }

    fn post_to_parent(&mut self, message: &ProtocolMessage, target_origin: &str) -> Result<(), HostError> {
        self.outbox.push((message.clone(), target_origin.to_string()));
        Ok(())
    }

    fn request_animation_frame(&mut self) -> FrameId {
        let frame = FrameId(self.next_frame);
        self.next_frame += 1;
        self.requested_frames.push(frame);
        frame
    }

    fn cancel_animation_frame(&mut self, frame: FrameId) {
        self.cancelled_frames.insert(frame);
    }

    fn observe_resize(&mut self) -> Result<(), HostError> {
        self.observing_resize = true;
        Ok(())
    }

    fn observe_body_mutations(&mut self) -> Result<(), HostError> {
        self.observing_mutations = true;
        Ok(())
    }
}

/// Stands in for the booking wizard's user-data store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecordingSink {
    pub applied: Vec<PrefillSeed>,
}

impl PrefillSink for RecordingSink {
    fn apply_prefill(&mut self, seed: PrefillSeed) {
        self.applied.push(seed);
    }
}

/// One loaded instance of the embedded app.
pub struct EmbeddedFrame {
    pub src: String,
    pub document: EmbeddedDocument,
    pub bridge: EmbeddedBridge,
    pub sink: RecordingSink,
}

impl EmbeddedFrame {
    /// Loads the app and mounts its bridge.
    pub fn mount(src: &str, profile: &AppProfile, config: BridgeConfig, now_ms: i64) -> Self {
        let mut frame = Self {
            src: src.to_string(),
            document: EmbeddedDocument::load(src, profile.loader_height),
            bridge: EmbeddedBridge::new(config, now_ms),
            sink: RecordingSink::default(),
        };
        frame.bridge.mount(&mut frame.document, &mut frame.sink);
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_query_and_path_from_src() {
        let document = EmbeddedDocument::load(
            "https://solar-form-optly-def.vercel.app/loader?optly_iframe=1&prefill_first_name=Mary+Ann",
            480.0,
        );
        assert_eq!(document.current_path(), "/loader");
        assert_eq!(document.origin(), "https://solar-form-optly-def.vercel.app");
        assert_eq!(document.query_param("prefill_first_name").as_deref(), Some("Mary Ann"));
        assert_eq!(document.measure().height(), 480);
    }

    #[test]
    fn mounting_seeds_query_prefill_and_requests_parent_answers() {
        let mut frame = EmbeddedFrame::mount(
            "https://solar-form-optly-def.vercel.app/loader?optly_iframe=1&prefill_postcode=SW1A1AA",
            &AppProfile::default(),
            BridgeConfig::default(),
            0,
        );

        assert_eq!(frame.sink.applied.len(), 1);
        assert_eq!(frame.sink.applied[0].postcode.as_deref(), Some("SW1A1AA"));
        assert!(frame.document.is_observing());

        let outbox = frame.document.take_outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].0, ProtocolMessage::PrefillRequest);
        assert_eq!(outbox[0].1, "*");
        assert_eq!(frame.document.take_frame_requests().len(), 1);
    }

    #[test]
    fn superseded_animation_frames_are_cancelled_and_never_report() {
        let mut frame = EmbeddedFrame::mount(
            "https://solar-form-optly-def.vercel.app/address?optly_iframe=1",
            &AppProfile::default(),
            BridgeConfig::default(),
            0,
        );
        frame.document.take_outbox();

        frame.bridge.on_body_mutation(&mut frame.document);
        frame.bridge.on_window_resize(&mut frame.document);
        let requested = frame.document.take_frame_requests();
        assert_eq!(requested.len(), 3);
        let (stale, latest) = (&requested[..2], requested[2]);
        assert!(stale.iter().all(|id| frame.document.is_cancelled(*id)));
        assert!(!frame.document.is_cancelled(latest));

        for id in stale {
            frame.bridge.on_animation_frame(&mut frame.document, *id);
        }
        assert!(frame.document.take_outbox().is_empty());

        frame.bridge.on_animation_frame(&mut frame.document, latest);
        let outbox = frame.document.take_outbox();
        assert_eq!(outbox.len(), 1);
        assert!(matches!(outbox[0].0, ProtocolMessage::Height { .. }));
    }
}
