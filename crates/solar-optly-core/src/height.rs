//! Parent side of the height negotiation with the embedded app.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::controller::ControllerTask;
use crate::host::{Dom, IncomingMessage, MessagePort, ScrollBehavior};
use crate::iframe::locate_iframe;
use crate::protocol::ProtocolMessage;
use crate::scheduler::Scheduler;
use crate::state::ControllerState;
use crate::telemetry::HEIGHT_TARGET;

const BASE_STYLES: &[(&str, &str)] = &[
    ("width", "100%"),
    ("max-width", "100%"),
    ("display", "block"),
    ("border", "0"),
];

const WRAPPER_CONSTRAINTS: &[&str] = &["height", "min-height"];

/// What a received message changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChannelOutcome {
    Ignored,
    LoaderComplete,
    HeightApplied {
        /// The stored height moved.
        changed: bool,
        /// The child reported a page other than the loader.
        past_loader: bool,
    },
    PrefillSent,
    PrefillUnavailable,
}

/// Clamps a reported height to a whole pixel count no smaller than `min`.
pub fn normalize_height(raw: f64, min: u32) -> u32 {
    let rounded = if raw.is_finite() && raw > 0.0 {
        raw.ceil().min(f64::from(u32::MAX)) as u32
    } else {
        0
    };
    rounded.max(min)
}

pub struct HeightChannel<'a> {
    config: &'a ControllerConfig,
}

impl<'a> HeightChannel<'a> {
    pub fn new(config: &'a ControllerConfig) -> Self {
        Self { config }
    }

    /// Styles the iframe, clears ancestor caps, registers the message handler
    /// once and schedules the initial height requests.
    pub fn attach<H: Dom + MessagePort + ?Sized>(
        &self,
        host: &mut H,
        state: &mut ControllerState,
        timers: &mut Scheduler<ControllerTask>,
        preferred_id: Option<&str>,
    ) -> bool {
        let Some(iframe) = locate_iframe(&*host, self.config, preferred_id) else {
            return false;
        };

        if state.height_base_styled.insert(iframe) {
            for (name, value) in BASE_STYLES {
                host.set_style(iframe, name, value);
            }
            host.set_attribute(iframe, "scrolling", "no");
        }
        self.clear_constraints(host, preferred_id);

        if state.height_load_listeners.insert(iframe) {
            if let Err(err) = host.listen_for_load(iframe) {
                warn!(target: HEIGHT_TARGET, error = %err, "unable to listen for iframe load");
            }
        }
        if state.height_handler_attached.set() {
            info!(target: HEIGHT_TARGET, "height message handler attached");
        }

        for delay in &self.config.height_request_delays_ms {
            if *delay <= 0 {
                self.request_height(host, preferred_id);
            } else {
                timers.set_timeout(
                    *delay,
                    ControllerTask::HeightRequest {
                        iframe_id: preferred_id.map(str::to_string),
                    },
                );
            }
        }

        info!(target: HEIGHT_TARGET, iframe = ?iframe, "iframe height sync active");
        true
    }

    /// Asks the child for a fresh measurement.
    pub fn request_height<H: Dom + MessagePort + ?Sized>(&self, host: &mut H, preferred_id: Option<&str>) -> bool {
        let Some(iframe) = locate_iframe(&*host, self.config, preferred_id) else {
            return false;
        };
        let Some(window) = host.content_window(iframe) else {
            return false;
        };

        match host.post_message(
            window,
            &ProtocolMessage::HeightRequest,
            self.config.message_origin.target_origin(),
        ) {
            Ok(()) => {
                debug!(target: HEIGHT_TARGET, "sent height request");
                true
            }
            Err(err) => {
                warn!(target: HEIGHT_TARGET, error = %err, "failed to send height request");
                false
            }
        }
    }

    /// Drops the iframe's `min-height` and the height caps of the widget
    /// wrapper and its first element child.
    pub fn clear_constraints<D: Dom + ?Sized>(&self, dom: &mut D, preferred_id: Option<&str>) {
        let Some(iframe) = locate_iframe(&*dom, self.config, preferred_id) else {
            return;
        };
        dom.remove_style_property(iframe, "min-height");

        let Some(wrapper) = dom.closest_with_class(iframe, &self.config.wrapper_class) else {
            return;
        };
        for name in WRAPPER_CONSTRAINTS {
            dom.remove_style_property(wrapper, name);
        }

        let Some(card) = dom.first_element_child(wrapper) else {
            return;
        };
        for name in WRAPPER_CONSTRAINTS {
            dom.remove_style_property(card, name);
        }
        debug!(target: HEIGHT_TARGET, iframe = ?iframe, "cleared wrapper height constraints");
    }

    /// Applies a reported height. Returns whether the stored height changed.
    pub fn apply_height<D: Dom + ?Sized>(
        &self,
        dom: &mut D,
        state: &mut ControllerState,
        preferred_id: Option<&str>,
        raw: f64,
    ) -> bool {
        let Some(iframe) = locate_iframe(&*dom, self.config, preferred_id) else {
            return false;
        };

        let height = normalize_height(raw, self.config.min_iframe_height);
        if state.last_iframe_height == Some(height) {
            return false;
        }
        let previous = state.last_iframe_height.replace(height);

        dom.remove_style_property(iframe, "min-height");
        dom.set_style(iframe, "height", &format!("{height}px"));
        self.clear_constraints(dom, preferred_id);

        if let Err(err) = dom.scroll_into_view(iframe, ScrollBehavior::Smooth) {
            debug!(target: HEIGHT_TARGET, error = %err, "smooth scroll failed, retrying instantly");
            if let Err(err) = dom.scroll_into_view(iframe, ScrollBehavior::Instant) {
                debug!(target: HEIGHT_TARGET, error = %err, "scroll into view failed");
            }
        }

        debug!(target: HEIGHT_TARGET, previous = ?previous, height, "applied iframe height");
        true
    }

    /// Handles one `message` event. Only messages from the target iframe's
    /// content window, from an accepted origin, are considered.
    pub fn handle_message<H: Dom + MessagePort + ?Sized>(
        &self,
        host: &mut H,
        state: &mut ControllerState,
        preferred_id: Option<&str>,
        message: &IncomingMessage,
    ) -> ChannelOutcome {
        if !state.height_handler_attached.is_set() {
            return ChannelOutcome::Ignored;
        }
        let Some(iframe) = locate_iframe(&*host, self.config, preferred_id) else {
            return ChannelOutcome::Ignored;
        };
        let Some(window) = host.content_window(iframe) else {
            return ChannelOutcome::Ignored;
        };
        if message.source != window || !self.config.message_origin.allows(&message.origin) {
            return ChannelOutcome::Ignored;
        }
        let Some(decoded) = ProtocolMessage::decode(&message.data) else {
            return ChannelOutcome::Ignored;
        };

        match decoded {
            ProtocolMessage::LoaderComplete => {
                state.iframe_ready_for_reveal = true;
                debug!(target: HEIGHT_TARGET, "received loader-complete");
                ChannelOutcome::LoaderComplete
            }
            ProtocolMessage::PrefillRequest => {
                if state.prefill.answers.is_empty() {
                    debug!(target: HEIGHT_TARGET, "prefill requested but nothing captured");
                    return ChannelOutcome::PrefillUnavailable;
                }
                let reply = ProtocolMessage::Prefill {
                    answers: state.prefill.answers.clone(),
                };
                match host.post_message(window, &reply, self.config.message_origin.target_origin()) {
                    Ok(()) => {
                        info!(
                            keys = ?state.prefill.answers.keys().collect::<Vec<_>>(),
                            "sent prefill answers to iframe"
                        );
                        ChannelOutcome::PrefillSent
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to send prefill answers");
                        ChannelOutcome::PrefillUnavailable
                    }
                }
            }
            ProtocolMessage::Height { height, path } => {
                let changed = self.apply_height(host, state, preferred_id, height);
                let past_loader = !path.is_empty() && path != self.config.loader_path;
                if past_loader {
                    state.iframe_ready_for_reveal = true;
                }
                debug!(target: HEIGHT_TARGET, height, path = %path, changed, "received height update");
                ChannelOutcome::HeightApplied {
                    changed,
                    past_loader,
                }
            }
            ProtocolMessage::HeightRequest | ProtocolMessage::Prefill { .. } => ChannelOutcome::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heights_are_rounded_up_and_floored_at_the_minimum() {
        assert_eq!(normalize_height(812.2, 200), 813);
        assert_eq!(normalize_height(150.0, 200), 200);
        assert_eq!(normalize_height(0.0, 200), 200);
        assert_eq!(normalize_height(-40.0, 200), 200);
        assert_eq!(normalize_height(f64::NAN, 200), 200);
        assert_eq!(normalize_height(f64::INFINITY, 200), 200);
    }
}
