use tracing::{info, warn};

use super::{locate_iframe, AppDestination, MOUNTED_ATTR};
use crate::config::ControllerConfig;
use crate::controller::ControllerTask;
use crate::host::Dom;
use crate::scheduler::Scheduler;
use crate::state::{ControllerState, SwapPhase};

/// Keeps a qualified user's iframe pointed at the embedded app.
pub struct IframeLock<'a> {
    config: &'a ControllerConfig,
}

impl<'a> IframeLock<'a> {
    pub fn new(config: &'a ControllerConfig) -> Self {
        Self { config }
    }

    /// Installs the src observer, load listener and periodic check once.
    /// Does nothing until the iframe exists.
    pub fn engage<D: Dom + ?Sized>(
        &self,
        dom: &mut D,
        state: &mut ControllerState,
        timers: &mut Scheduler<ControllerTask>,
        preferred_id: Option<&str>,
    ) -> bool {
        if state.lock_active.is_set() {
            return false;
        }
        let Some(iframe) = locate_iframe(&*dom, self.config, preferred_id) else {
            return false;
        };

        state.lock_active.set();
        state.lock_target = Some(iframe);
        info!(iframe = ?iframe, "locking iframe to app url");

        if let Err(err) = dom.observe_attribute(iframe, "src") {
            warn!(error = %err, "src observer unavailable; relying on interval enforcement");
        }
        if let Err(err) = dom.listen_for_load(iframe) {
            warn!(error = %err, "unable to listen for iframe load");
        }
        timers.set_interval(self.config.lock_interval_ms, ControllerTask::LockEnforce);

        if state.swap_phase >= SwapPhase::Revealed {
            state.advance_phase(SwapPhase::LockEnforced);
        }
        self.enforce(dom, state, timers.now());
        true
    }

    /// Rewrites `src` back to the app when a qualified user's iframe has drifted.
    /// Returns whether a rewrite happened.
    pub fn enforce<D: Dom + ?Sized>(&self, dom: &mut D, state: &ControllerState, now_ms: i64) -> bool {
        if !state.qualified.is_set() {
            return false;
        }
        let Some(iframe) = state.lock_target else {
            return false;
        };

        let destination = AppDestination::new(&self.config.app_url);
        let current = dom.attribute(iframe, "src").unwrap_or_default();
        if destination.matches(&current) {
            return false;
        }

        let forced = destination.build(now_ms, &state.prefill);
        dom.set_attribute(iframe, "src", &forced);
        dom.set_attribute(iframe, MOUNTED_ATTR, "mounted");
        info!(from = %current, to = %forced, "forced iframe src back to app");
        true
    }
}
