//! Event loop tying the simulated host page, its controller and any embedded
//! app instances to one virtual clock.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::dom::Document;
use super::fixture::{widget, PageFixture};
use super::frame::{AppProfile, EmbeddedFrame};
use super::page::{Capabilities, FakePage, FakeSessionStorage, Mutation};
use super::scenario::ScenarioError;
use crate::bridge::{BridgeConfig, FrameId, PrefillSeed};
use crate::config::ControllerConfig;
use crate::controller::{HostPageController, InstallOutcome};
use crate::height::ChannelOutcome;
use crate::host::{Dom, IncomingMessage, Location, NodeId, WindowRef};
use crate::iframe::{locate_iframe, AppDestination, OVERLAY_ATTR, SWAPPING_ATTR};
use crate::protocol::ProtocolMessage;
use crate::scheduler::Scheduler;
use crate::state::ControllerState;
use crate::visibility::HIDDEN_MARKER;

const MAX_SETTLE_ROUNDS: usize = 64;
const MAX_STEPS: usize = 100_000;

#[derive(Debug, Clone, PartialEq)]
enum BrowserEvent {
    FrameLoaded { iframe: NodeId, src: String },
    LoaderFinished { iframe: NodeId },
    AnimationFrame { iframe: NodeId, frame: FrameId },
    DeliverToFrame { iframe: NodeId, data: Value, origin: String },
    DeliverToParent { iframe: NodeId, data: Value, origin: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TimelineEvent {
    Installed { href: String, outcome: InstallOutcome },
    EventPushed { index: usize, name: Option<String>, forwarded: bool },
    PushReplaced { by: String },
    IframeNavigated { src: String },
    FrameLoaded { src: String, app: bool },
    LoaderFinished { path: String },
    MessageToFrame { message: String },
    MessageToParent { message: String, result: ChannelOutcome },
    ForeignMessage { result: ChannelOutcome },
    ScriptSetSrc { src: String },
    IframeInserted { id: String },
    RowAppended,
    AppResized { height: f64 },
    PageNavigated { href: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub at_ms: i64,
    #[serde(flatten)]
    pub event: TimelineEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IframeSnapshot {
    pub id: Option<String>,
    pub src: Option<String>,
    pub visibility: Option<String>,
    pub opacity: Option<String>,
    pub height: Option<String>,
    pub swapping: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowSnapshot {
    pub index: usize,
    pub hidden: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    pub href: String,
    pub now_ms: i64,
    pub state: ControllerState,
    pub iframe: Option<IframeSnapshot>,
    pub rows: Vec<RowSnapshot>,
    pub overlay_opacity: Option<String>,
    pub stored_marker: Option<String>,
    pub embedded_path: Option<String>,
    pub prefill_applied: Vec<PrefillSeed>,
}

pub struct Browser {
    now_ms: i64,
    config: ControllerConfig,
    bridge_config: BridgeConfig,
    profile: AppProfile,
    capabilities: Capabilities,
    page: FakePage,
    controller: HostPageController,
    frames: BTreeMap<NodeId, EmbeddedFrame>,
    events: Scheduler<BrowserEvent>,
    timeline: Vec<TimelineEntry>,
}

impl Browser {
    pub fn new(
        config: ControllerConfig,
        href: &str,
        fixture: &PageFixture,
        storage: FakeSessionStorage,
        capabilities: Capabilities,
        profile: AppProfile,
        now_ms: i64,
    ) -> Self {
        let document = fixture.render(&config).document;
        let bridge_config = BridgeConfig {
            message_origin: config.message_origin.clone(),
            ..BridgeConfig::default()
        };
        Self {
            now_ms,
            controller: HostPageController::new(config.clone(), now_ms),
            page: FakePage::new(href, document, storage, capabilities),
            config,
            bridge_config,
            profile,
            capabilities,
            frames: BTreeMap::new(),
            events: Scheduler::new(now_ms),
            timeline: Vec::new(),
        }
    }

    pub fn now(&self) -> i64 {
        self.now_ms
    }

    pub fn page(&self) -> &FakePage {
        &self.page
    }

    pub fn page_mut(&mut self) -> &mut FakePage {
        &mut self.page
    }

    pub fn controller(&self) -> &HostPageController {
        &self.controller
    }

    pub fn timeline(&self) -> &[TimelineEntry] {
        &self.timeline
    }

    pub fn into_timeline(self) -> Vec<TimelineEntry> {
        self.timeline
    }

    /// The iframe the controller would target.
    pub fn iframe(&self) -> Option<NodeId> {
        let preferred = self.controller.state().swap_target_id.as_deref();
        locate_iframe(&self.page, &self.config, preferred)
    }

    pub fn frame(&self, iframe: NodeId) -> Option<&EmbeddedFrame> {
        self.frames.get(&iframe)
    }

    pub fn install(&mut self) -> InstallOutcome {
        self.sync_clocks();
        let outcome = self.controller.install(&mut self.page);
        self.record(TimelineEvent::Installed {
            href: self.page.href(),
            outcome,
        });
        self.settle();
        outcome
    }

    /// `dataLayer.push(event)` from the host page.
    pub fn push_event(&mut self, event: Value) -> usize {
        self.sync_clocks();
        let name = event.get("event").and_then(Value::as_str).map(str::to_string);
        let (index, forwarded) = self.page.push_event(event.clone());
        if forwarded {
            self.controller.on_data_layer_push(&mut self.page, index, &event);
        }
        self.record(TimelineEvent::EventPushed {
            index,
            name,
            forwarded,
        });
        self.settle();
        index
    }

    pub fn replace_data_layer_push(&mut self, by: &str) {
        self.page.replace_push(by);
        self.record(TimelineEvent::PushReplaced { by: by.to_string() });
    }

    /// Another script on the page rewrites the iframe's `src`.
    pub fn set_iframe_src(&mut self, src: &str) -> bool {
        let Some(iframe) = self.iframe() else {
            return false;
        };
        self.sync_clocks();
        self.page.set_attribute(iframe, "src", src);
        self.record(TimelineEvent::ScriptSetSrc { src: src.to_string() });
        self.settle();
        true
    }

    /// The host page renders the form widget late.
    pub fn insert_iframe(&mut self, id: &str, src: &str) -> Result<NodeId, ScenarioError> {
        self.sync_clocks();
        let body = self.page.document.body();
        let holder = self.page.document.create("section");
        let iframe = widget(&mut self.page.document, holder, &self.config, id, src);
        self.page
            .insert(body, holder)
            .map_err(|source| ScenarioError::Host { source })?;
        self.record(TimelineEvent::IframeInserted { id: id.to_string() });
        self.settle();
        Ok(iframe)
    }

    /// The host page re-renders and adds another content row.
    pub fn append_row(&mut self) -> Result<NodeId, ScenarioError> {
        self.sync_clocks();
        let body = self.page.document.body();
        let row = self.page.document.create("div");
        self.page
            .document
            .set_attribute(row, "class", super::fixture::ROW_CLASSES);
        self.page
            .insert(body, row)
            .map_err(|source| ScenarioError::Host { source })?;
        self.record(TimelineEvent::RowAppended);
        self.settle();
        Ok(row)
    }

    pub fn deliver_foreign_message(&mut self, source: WindowRef, origin: &str, data: Value) -> ChannelOutcome {
        self.sync_clocks();
        let message = IncomingMessage {
            source,
            origin: origin.to_string(),
            data,
        };
        let result = self.controller.on_message(&mut self.page, &message);
        self.record(TimelineEvent::ForeignMessage { result });
        self.settle();
        result
    }

    /// The embedded app's content changes height.
    pub fn resize_app(&mut self, height: f64) {
        self.sync_clocks();
        for frame in self.frames.values_mut() {
            frame.document.set_height(height);
            frame.bridge.on_content_resized(&mut frame.document);
        }
        self.record(TimelineEvent::AppResized { height });
        self.settle();
    }

    /// Full-page navigation: a fresh document and controller, same session storage.
    pub fn navigate(&mut self, href: &str, fixture: &PageFixture) {
        let document: Document = fixture.render(&self.config).document;
        let storage = std::mem::take(self.page.storage_mut());
        self.page = FakePage::new(href, document, storage, self.capabilities);
        self.controller = HostPageController::new(self.config.clone(), self.now_ms);
        self.frames.clear();
        self.events = Scheduler::new(self.now_ms);
        self.record(TimelineEvent::PageNavigated {
            href: href.to_string(),
        });
    }

    pub fn advance_by(&mut self, delta_ms: i64) -> Result<(), ScenarioError> {
        self.advance_to(self.now_ms.saturating_add(delta_ms.max(0)))
    }

    /// Runs every timer, load and message due up to `target_ms`, in time order.
    pub fn advance_to(&mut self, target_ms: i64) -> Result<(), ScenarioError> {
        if target_ms < self.now_ms {
            return Err(ScenarioError::ClockRewind {
                target_ms,
                now_ms: self.now_ms,
            });
        }

        self.settle();
        let mut steps = 0usize;
        while let Some(at) = self.next_due_at().filter(|at| *at <= target_ms) {
            steps += 1;
            if steps > MAX_STEPS {
                return Err(ScenarioError::StepLimit {
                    limit: MAX_STEPS,
                    now_ms: self.now_ms,
                });
            }
            self.now_ms = self.now_ms.max(at);
            self.step(at);
            self.settle();
        }

        self.now_ms = target_ms;
        self.sync_clocks();
        self.settle();
        Ok(())
    }

    fn next_due_at(&self) -> Option<i64> {
        [self.controller.next_due_at(), self.events.next_due_at()]
            .into_iter()
            .chain(self.frames.values().map(|frame| frame.bridge.next_due_at()))
            .flatten()
            .min()
    }

    fn step(&mut self, at: i64) {
        if self.controller.next_due_at().is_some_and(|due| due <= at) {
            self.controller.run_due(&mut self.page, at);
            return;
        }
        if let Some(fired) = self.events.pop_due(at) {
            self.handle_event(fired.task);
            return;
        }
        for frame in self.frames.values_mut() {
            if frame.bridge.next_due_at().is_some_and(|due| due <= at) {
                frame.bridge.run_due(&mut frame.document, at);
            }
        }
    }

    fn sync_clocks(&mut self) {
        let now = self.now_ms;
        self.controller.run_due(&mut self.page, now);
        self.events.settle(now);
        for frame in self.frames.values_mut() {
            frame.bridge.run_due(&mut frame.document, now);
        }
    }

    fn handle_event(&mut self, event: BrowserEvent) {
        self.sync_clocks();
        match event {
            BrowserEvent::FrameLoaded { iframe, src } => self.frame_loaded(iframe, src),
            BrowserEvent::LoaderFinished { iframe } => {
                let Some(frame) = self.frames.get_mut(&iframe) else {
                    return;
                };
                frame
                    .document
                    .navigate(&self.profile.next_path, self.profile.page_height);
                frame.bridge.notify_loader_complete(&mut frame.document);
                frame.bridge.on_body_mutation(&mut frame.document);
                let path = self.profile.next_path.clone();
                self.record(TimelineEvent::LoaderFinished { path });
            }
            BrowserEvent::AnimationFrame { iframe, frame } => {
                if let Some(embedded) = self.frames.get_mut(&iframe) {
                    if !embedded.document.is_cancelled(frame) {
                        embedded.bridge.on_animation_frame(&mut embedded.document, frame);
                    }
                }
            }
            BrowserEvent::DeliverToFrame { iframe, data, origin } => {
                let Some(frame) = self.frames.get_mut(&iframe) else {
                    debug!(iframe = ?iframe, "message to a frame without the app dropped");
                    return;
                };
                let kind = describe(&data);
                let message = IncomingMessage {
                    source: WindowRef::Parent,
                    origin,
                    data,
                };
                frame.bridge.on_message(&mut frame.document, &mut frame.sink, &message);
                self.record(TimelineEvent::MessageToFrame { message: kind });
            }
            BrowserEvent::DeliverToParent { iframe, data, origin } => {
                let kind = describe(&data);
                let message = IncomingMessage {
                    source: WindowRef::Frame(iframe),
                    origin,
                    data,
                };
                let result = self.controller.on_message(&mut self.page, &message);
                self.record(TimelineEvent::MessageToParent {
                    message: kind,
                    result,
                });
            }
        }
    }

    fn frame_loaded(&mut self, iframe: NodeId, src: String) {
        let current = self.page.document.attribute(iframe, "src");
        if current != Some(src.as_str()) || !self.page.document.is_connected(iframe) {
            return;
        }

        let app = AppDestination::new(&self.config.app_url).matches(&src);
        if app {
            let mut frame = EmbeddedFrame::mount(&src, &self.profile, self.bridge_config.clone(), self.now_ms);
            frame.bridge.on_window_load(&mut frame.document);
            self.frames.insert(iframe, frame);
            self.events
                .set_timeout(self.profile.loader_ms, BrowserEvent::LoaderFinished { iframe });
        } else {
            self.frames.remove(&iframe);
        }
        self.record(TimelineEvent::FrameLoaded { src, app });

        if self.page.has_load_listener(iframe) {
            self.controller.on_iframe_load(&mut self.page, iframe);
        }
    }

    /// Delivers observer callbacks and cross-context traffic until nothing new is produced.
    fn settle(&mut self) {
        self.events.settle(self.now_ms);
        for _ in 0..MAX_SETTLE_ROUNDS {
            let mut progressed = false;

            for mutation in self.page.take_mutations() {
                progressed = true;
                match mutation {
                    Mutation::Attribute { node, name } if name == "src" => {
                        self.controller.on_src_mutation(&mut self.page, node);
                    }
                    Mutation::Attribute { .. } => {}
                    Mutation::ChildList => self.controller.on_document_mutation(&mut self.page),
                }
            }

            for (iframe, src) in self.page.take_frame_navigations() {
                progressed = true;
                self.frames.remove(&iframe);
                self.events.set_timeout(
                    self.profile.load_latency_ms,
                    BrowserEvent::FrameLoaded {
                        iframe,
                        src: src.clone(),
                    },
                );
                self.record(TimelineEvent::IframeNavigated { src });
            }

            let origin = self.page.origin();
            for posted in self.page.take_outbox() {
                progressed = true;
                match posted.target {
                    WindowRef::Frame(iframe) => {
                        self.events.set_timeout(
                            0,
                            BrowserEvent::DeliverToFrame {
                                iframe,
                                data: posted.message.to_value(),
                                origin: origin.clone(),
                            },
                        );
                    }
                    other => debug!(target = ?other, "message to a window outside the simulation dropped"),
                }
            }

            for (iframe, frame) in self.frames.iter_mut() {
                for (message, _target_origin) in frame.document.take_outbox() {
                    progressed = true;
                    self.events.set_timeout(
                        0,
                        BrowserEvent::DeliverToParent {
                            iframe: *iframe,
                            data: message.to_value(),
                            origin: frame.document.origin().to_string(),
                        },
                    );
                }
                for request in frame.document.take_frame_requests() {
                    progressed = true;
                    self.events.set_timeout(
                        self.profile.frame_interval_ms,
                        BrowserEvent::AnimationFrame {
                            iframe: *iframe,
                            frame: request,
                        },
                    );
                }
            }

            if !progressed {
                return;
            }
        }
        warn!(now_ms = self.now_ms, "simulation did not settle");
    }

    fn record(&mut self, event: TimelineEvent) {
        self.timeline.push(TimelineEntry {
            at_ms: self.now_ms,
            event,
        });
    }

    pub fn snapshot(&self) -> PageSnapshot {
        let document = &self.page.document;
        let iframe = self.iframe().map(|node| {
            let style = |name: &str| document.style(node, name).map(|style| style.value.clone());
            IframeSnapshot {
                id: document.attribute(node, "id").map(str::to_string),
                src: document.attribute(node, "src").map(str::to_string),
                visibility: style("visibility"),
                opacity: style("opacity"),
                height: style("height"),
                swapping: document.attribute(node, SWAPPING_ATTR).is_some(),
            }
        });

        let rows = document
            .query_all(None, &self.config.hidden_main_page_row_selector)
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, node)| RowSnapshot {
                index,
                hidden: document.attribute(node, HIDDEN_MARKER).is_some()
                    && document
                        .style(node, "display")
                        .is_some_and(|style| style.value == "none" && style.important),
            })
            .collect();

        let overlay_opacity = document
            .query_all(None, &format!("[{OVERLAY_ATTR}]"))
            .unwrap_or_default()
            .first()
            .and_then(|node| document.style(*node, "opacity"))
            .map(|style| style.value.clone());

        let embedded = self.iframe().and_then(|node| self.frames.get(&node));

        PageSnapshot {
            href: self.page.href(),
            now_ms: self.now_ms,
            state: self.controller.state().clone(),
            iframe,
            rows,
            overlay_opacity,
            stored_marker: self
                .page
                .storage()
                .get(&self.config.eligibility_storage_key)
                .map(str::to_string),
            embedded_path: embedded.map(|frame| frame.document.current_path().to_string()),
            prefill_applied: embedded
                .map(|frame| frame.sink.applied.clone())
                .unwrap_or_default(),
        }
    }
}

fn describe(data: &Value) -> String {
    ProtocolMessage::decode(data)
        .map(|message| message.kind().to_string())
        .unwrap_or_else(|| "unrecognised".to_string())
}
