//! Locating, hiding, redirecting and revealing the host page's form iframe.

mod destination;
mod lock;
mod overlay;

pub use destination::AppDestination;
pub use lock::IframeLock;
pub use overlay::OVERLAY_ATTR;

use tracing::{info, warn};

use crate::config::ControllerConfig;
use crate::controller::ControllerTask;
use crate::host::{Dom, NodeId};
use crate::scheduler::Scheduler;
use crate::state::{ControllerState, SwapPhase};

pub const SWAPPING_ATTR: &str = "data-solar-optly-swapping";
pub const MOUNTED_ATTR: &str = "data-solar-optly";
pub const REVEAL_TRANSITION: &str = "opacity 400ms ease";

/// Resolves the target iframe: exact id first (must be an `IFRAME`), then the
/// first iframe whose id starts with the configured prefix.
pub fn locate_iframe<D: Dom + ?Sized>(
    dom: &D,
    config: &ControllerConfig,
    preferred_id: Option<&str>,
) -> Option<NodeId> {
    if let Some(id) = preferred_id.filter(|id| !id.is_empty()) {
        if let Some(node) = dom.element_by_id(id) {
            if dom.tag_name(node).as_deref() == Some("IFRAME") {
                return Some(node);
            }
        }
    }

    let selector = format!("iframe[id^=\"{}\"]", config.iframe_id_prefix);
    match dom.query_selector(None, &selector) {
        Ok(node) => node,
        Err(err) => {
            warn!(selector = %selector, error = %err, "iframe lookup failed");
            None
        }
    }
}

/// Result of one attempt to point the iframe at the embedded app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapAttempt {
    Injected(Injection),
    AlreadyInjected,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Injection {
    pub iframe: NodeId,
    pub iframe_id: Option<String>,
    pub src: String,
}

pub struct IframeLifecycle<'a> {
    config: &'a ControllerConfig,
}

impl<'a> IframeLifecycle<'a> {
    pub fn new(config: &'a ControllerConfig) -> Self {
        Self { config }
    }

    pub fn target<D: Dom + ?Sized>(&self, dom: &D, preferred_id: Option<&str>) -> Option<NodeId> {
        locate_iframe(dom, self.config, preferred_id)
    }

    pub fn destination(&self) -> AppDestination<'a> {
        AppDestination::new(&self.config.app_url)
    }

    pub fn hide<D: Dom + ?Sized>(
        &self,
        dom: &mut D,
        state: &mut ControllerState,
        preferred_id: Option<&str>,
    ) -> bool {
        let Some(iframe) = self.target(&*dom, preferred_id) else {
            return false;
        };

        dom.set_style(iframe, "visibility", "hidden");
        dom.set_style(iframe, "opacity", "0");
        dom.set_style(iframe, "transition", "none");
        dom.set_attribute(iframe, SWAPPING_ATTR, "1");
        state.advance_phase(SwapPhase::Hidden);
        true
    }

    pub fn reveal<D: Dom + ?Sized>(
        &self,
        dom: &mut D,
        state: &mut ControllerState,
        preferred_id: Option<&str>,
    ) -> bool {
        let Some(iframe) = self.target(&*dom, preferred_id) else {
            return false;
        };

        dom.set_style(iframe, "transition", REVEAL_TRANSITION);
        dom.set_style(iframe, "visibility", "visible");
        dom.set_style(iframe, "opacity", "1");
        dom.remove_attribute(iframe, SWAPPING_ATTR);
        self.hide_overlay(dom, preferred_id);

        if state.iframe_injected.is_set() {
            state.advance_phase(SwapPhase::Revealed);
            if state.lock_active.is_set() {
                state.advance_phase(SwapPhase::LockEnforced);
            }
        }
        true
    }

    /// Queues the 250 ms wait loop that retries the swap until the iframe exists.
    pub fn start_swap_wait(
        &self,
        state: &ControllerState,
        timers: &mut Scheduler<ControllerTask>,
        preferred_id: Option<&str>,
    ) {
        if state.iframe_injected.is_set() {
            return;
        }
        let budget = crate::scheduler::PollBudget::with_deadline(timers.now(), self.config.max_wait_ms);
        timers.set_timeout(
            self.config.poll_ms,
            ControllerTask::SwapWait {
                iframe_id: preferred_id.map(str::to_string),
                budget,
            },
        );
    }

    /// Rewrites the iframe `src` once. Follow-up wiring (height sync, rows,
    /// lock) is left to the caller.
    pub fn swap_src<D: Dom + ?Sized>(
        &self,
        dom: &mut D,
        state: &mut ControllerState,
        timers: &mut Scheduler<ControllerTask>,
        preferred_id: Option<&str>,
    ) -> SwapAttempt {
        if state.iframe_injected.is_set() {
            return SwapAttempt::AlreadyInjected;
        }
        let Some(iframe) = self.target(&*dom, preferred_id) else {
            return SwapAttempt::NotFound;
        };
        state.advance_phase(SwapPhase::Located);

        let iframe_id = preferred_id
            .map(str::to_string)
            .or_else(|| dom.attribute(iframe, "id"));
        let src = self.destination().build(timers.now(), &state.prefill);

        self.hide(dom, state, iframe_id.as_deref());
        dom.set_attribute(iframe, "src", &src);
        dom.set_attribute(iframe, MOUNTED_ATTR, "mounted");
        state.iframe_injected.set();
        state.iframe_ready_for_reveal = false;
        state.swap_target_id = iframe_id.clone();
        state.advance_phase(SwapPhase::SrcRewritten);

        if state.reveal_load_listeners.insert(iframe) {
            if let Err(err) = dom.listen_for_load(iframe) {
                warn!(error = %err, "unable to listen for iframe load; relying on fallback reveal");
            }
        }
        state.advance_phase(SwapPhase::LoadPending);

        timers.set_timeout(
            self.config.reveal_fallback_ms,
            ControllerTask::RevealFallback {
                iframe_id: iframe_id.clone(),
            },
        );

        info!(iframe_id = ?iframe_id, src = %src, "injected app into iframe");
        SwapAttempt::Injected(Injection {
            iframe,
            iframe_id,
            src,
        })
    }

    /// Reveal-on-load: only once the iframe actually shows the app.
    pub fn on_load<D: Dom + ?Sized>(&self, dom: &mut D, state: &mut ControllerState, iframe: NodeId) {
        if !state.reveal_load_listeners.contains(&iframe) {
            return;
        }
        let current = dom.attribute(iframe, "src").unwrap_or_default();
        if !self.destination().matches(&current) {
            return;
        }
        let preferred = state.swap_target_id.clone();
        self.reveal(dom, state, preferred.as_deref());
    }
}
