//! The host-page controller: entry points the page glue calls, and the
//! orchestration between the analytics hook, the iframe lifecycle, the height
//! channel and the row visibility controller.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::analytics::AnalyticsHook;
use crate::config::ControllerConfig;
use crate::eligibility::{
    AnalyticsEvent, EligibilityEvaluator, EvaluationContext, EventAction, PrefillBackfill,
    QualifiedMatch,
};
use crate::height::{ChannelOutcome, HeightChannel};
use crate::host::{HostPage, IncomingMessage, NodeId};
use crate::iframe::{IframeLifecycle, IframeLock, Injection, SwapAttempt};
use crate::persistence::EligibilityStore;
use crate::scheduler::{PendingTimer, PollBudget, PollStatus, Scheduler};
use crate::state::{ControllerState, PrefillCapture};
use crate::visibility::VisibilityController;

/// Deferred work the controller schedules for itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum ControllerTask {
    SwapWait {
        iframe_id: Option<String>,
        #[serde(skip)]
        budget: PollBudget,
    },
    RevealFallback {
        iframe_id: Option<String>,
    },
    HeightRequest {
        iframe_id: Option<String>,
    },
    LockEnforce,
    DataLayerPoll {
        #[serde(skip)]
        budget: PollBudget,
    },
}

/// How a page load was classified at install time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallOutcome {
    AlreadyLoaded,
    ThankYouResumed,
    ThankYouKept,
    FormPage,
}

/// All time-based behavior runs off the scheduler's virtual clock: drivers
/// advance it with [`HostPageController::run_due`] before delivering events.
pub struct HostPageController {
    config: ControllerConfig,
    state: ControllerState,
    timers: Scheduler<ControllerTask>,
}

impl HostPageController {
    pub fn new(config: ControllerConfig, now_ms: i64) -> Self {
        Self {
            config,
            state: ControllerState::default(),
            timers: Scheduler::new(now_ms),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn now(&self) -> i64 {
        self.timers.now()
    }

    pub fn next_due_at(&self) -> Option<i64> {
        self.timers.next_due_at()
    }

    pub fn pending_timers(&self) -> Vec<PendingTimer> {
        self.timers.pending()
    }

    /// Script entry point. Safe to call any number of times per page.
    pub fn install<H: HostPage + ?Sized>(&mut self, host: &mut H) -> InstallOutcome {
        self.state.injection_count += 1;
        info!(count = self.state.injection_count, "changes applied");
        if !self.state.script_loaded.set() {
            debug!("controller already loaded on this page");
            return InstallOutcome::AlreadyLoaded;
        }

        let href = host.href();
        let outcome = if href.contains(&self.config.typ_path_contains) {
            let store = EligibilityStore::new(
                &self.config.eligibility_storage_key,
                self.config.eligibility_ttl_ms,
            );
            match store.consume_if_fresh(host, self.timers.now()) {
                Some(record) => {
                    self.state.prefill = PrefillCapture::restore(&record);
                    self.state.qualified.set();
                    self.state.iframe_ready_for_reveal = false;

                    IframeLifecycle::new(&self.config).hide(host, &mut self.state, None);
                    self.sync_rows(host);
                    self.watch_rows(host);
                    info!(href = %href, "eligible thank-you page, swapping iframe");
                    self.start_swap(host, None);
                    InstallOutcome::ThankYouResumed
                }
                None => {
                    self.state.iframe_ready_for_reveal = false;
                    self.sync_rows(host);
                    self.watch_rows(host);
                    info!(href = %href, "no fresh eligibility marker, keeping original thank-you page");
                    InstallOutcome::ThankYouKept
                }
            }
        } else {
            self.sync_rows(host);
            self.watch_rows(host);
            InstallOutcome::FormPage
        };

        self.attach_analytics(host);
        outcome
    }

    /// Forwarded by the `dataLayer.push` wrapper after the original push ran.
    pub fn on_data_layer_push<H: HostPage + ?Sized>(&mut self, host: &mut H, index: usize, event: &Value) {
        if !AnalyticsHook::new(&self.config).claim(&mut self.state, index) {
            return;
        }
        self.process_event(host, event);
    }

    pub fn on_message<H: HostPage + ?Sized>(&mut self, host: &mut H, message: &IncomingMessage) -> ChannelOutcome {
        let preferred = self.state.swap_target_id.clone();
        let channel = HeightChannel::new(&self.config);
        let outcome = channel.handle_message(host, &mut self.state, preferred.as_deref(), message);

        match outcome {
            ChannelOutcome::LoaderComplete => {
                self.sync_rows(host);
                IframeLifecycle::new(&self.config).reveal(host, &mut self.state, preferred.as_deref());
            }
            ChannelOutcome::HeightApplied {
                changed,
                past_loader,
            } => {
                if past_loader {
                    self.sync_rows(host);
                }
                IframeLifecycle::new(&self.config).reveal(host, &mut self.state, preferred.as_deref());
                if changed {
                    channel.request_height(host, preferred.as_deref());
                }
            }
            ChannelOutcome::Ignored
            | ChannelOutcome::PrefillSent
            | ChannelOutcome::PrefillUnavailable => {}
        }
        outcome
    }

    pub fn on_iframe_load<H: HostPage + ?Sized>(&mut self, host: &mut H, iframe: NodeId) {
        IframeLifecycle::new(&self.config).on_load(host, &mut self.state, iframe);

        if self.state.height_load_listeners.contains(&iframe) {
            let preferred = self.state.swap_target_id.clone();
            let channel = HeightChannel::new(&self.config);
            channel.clear_constraints(host, preferred.as_deref());
            channel.request_height(host, preferred.as_deref());
        }

        if self.state.lock_target == Some(iframe) {
            IframeLock::new(&self.config).enforce(host, &self.state, self.timers.now());
        }
    }

    pub fn on_src_mutation<H: HostPage + ?Sized>(&mut self, host: &mut H, iframe: NodeId) {
        if self.state.lock_target == Some(iframe) {
            IframeLock::new(&self.config).enforce(host, &self.state, self.timers.now());
        }
    }

    pub fn on_document_mutation<H: HostPage + ?Sized>(&mut self, host: &mut H) {
        if self.state.visibility_observer_attached.is_set() {
            self.sync_rows(host);
        }
    }

    /// Runs every task due at or before `now_ms`, advancing the clock. Returns
    /// how many ran.
    pub fn run_due<H: HostPage + ?Sized>(&mut self, host: &mut H, now_ms: i64) -> usize {
        let mut ran = 0;
        while let Some(fired) = self.timers.pop_due(now_ms) {
            ran += 1;
            self.run_task(host, fired.task);
        }
        self.timers.settle(now_ms);
        ran
    }

    fn run_task<H: HostPage + ?Sized>(&mut self, host: &mut H, task: ControllerTask) {
        match task {
            ControllerTask::SwapWait {
                iframe_id,
                mut budget,
            } => {
                let lifecycle = IframeLifecycle::new(&self.config);
                lifecycle.hide(host, &mut self.state, iframe_id.as_deref());
                match lifecycle.swap_src(host, &mut self.state, &mut self.timers, iframe_id.as_deref()) {
                    SwapAttempt::Injected(injection) => self.after_injection(host, injection),
                    SwapAttempt::AlreadyInjected => {}
                    SwapAttempt::NotFound => {
                        if budget.tick(self.timers.now()) == PollStatus::Exhausted {
                            warn!(
                                prefix = %self.config.iframe_id_prefix,
                                waited_ms = self.timers.now() - budget.started_at,
                                "timed out waiting for iframe with id prefix"
                            );
                        } else {
                            self.timers.set_timeout(
                                self.config.poll_ms,
                                ControllerTask::SwapWait { iframe_id, budget },
                            );
                        }
                    }
                }
            }
            ControllerTask::RevealFallback { iframe_id } => {
                IframeLifecycle::new(&self.config).reveal(host, &mut self.state, iframe_id.as_deref());
            }
            ControllerTask::HeightRequest { iframe_id } => {
                HeightChannel::new(&self.config).request_height(host, iframe_id.as_deref());
            }
            ControllerTask::LockEnforce => {
                IframeLock::new(&self.config).enforce(host, &self.state, self.timers.now());
            }
            ControllerTask::DataLayerPoll { budget } => {
                AnalyticsHook::new(&self.config).wrap(host);
                self.replay_queue(host);
                AnalyticsHook::new(&self.config).finish_poll_tick(
                    &mut self.state,
                    &mut self.timers,
                    budget,
                );
            }
        }
    }

    fn attach_analytics<H: HostPage + ?Sized>(&mut self, host: &mut H) {
        self.replay_queue(host);
        let hook = AnalyticsHook::new(&self.config);
        hook.wrap(host);
        hook.start_polling(&mut self.state, &mut self.timers);
        info!("dataLayer hook attached");
    }

    fn replay_queue<H: HostPage + ?Sized>(&mut self, host: &mut H) {
        let unseen = AnalyticsHook::new(&self.config).take_unseen(&*host, &mut self.state);
        for queued in unseen {
            self.process_event(host, &queued.value);
        }
    }

    fn process_event<H: HostPage + ?Sized>(&mut self, host: &mut H, value: &Value) {
        let Some(event) = AnalyticsEvent::from_value(value) else {
            return;
        };
        self.state.events_evaluated += 1;
        debug!(event = event.kind.as_str(), "dataLayer event seen");

        let context = EvaluationContext {
            qualified: self.state.qualified.is_set(),
            submit_stage_armed: self.state.submit_stage_armed,
        };
        let actions = EligibilityEvaluator::new(&self.config.required_answers).evaluate(&event, context);
        for action in actions {
            self.apply_action(host, action);
        }
    }

    fn apply_action<H: HostPage + ?Sized>(&mut self, host: &mut H, action: EventAction) {
        let lifecycle = IframeLifecycle::new(&self.config);
        match action {
            EventAction::ArmSubmitStage { armed } => {
                if armed != self.state.submit_stage_armed {
                    debug!(armed, "submit stage toggled");
                }
                self.state.submit_stage_armed = armed;
            }
            EventAction::ShowOverlay { iframe_id } => {
                lifecycle.show_overlay(host, iframe_id.as_deref());
            }
            EventAction::HideOverlay { iframe_id } => {
                lifecycle.hide_overlay(host, iframe_id.as_deref());
            }
            EventAction::HideIframe { iframe_id } => {
                lifecycle.hide(host, &mut self.state, iframe_id.as_deref());
            }
            EventAction::Qualify(matched) => self.on_qualified(host, matched),
            EventAction::Backfill(backfill) => self.on_backfill(host, backfill),
            EventAction::NoMatch { event } => {
                info!(event = event.as_str(), "submission did not meet eligibility");
            }
        }
    }

    fn on_qualified<H: HostPage + ?Sized>(&mut self, host: &mut H, matched: QualifiedMatch) {
        if self.state.qualified.is_set() {
            return;
        }

        if let Some(postcode) = matched.postcode {
            info!(postcode = %postcode, "captured prefill postcode");
            self.state.prefill.postcode = Some(postcode);
        }
        if let Some(first_name) = matched.first_name {
            info!(first_name = %first_name, "captured prefill first name");
            self.state.prefill.first_name = Some(first_name);
        }
        self.state.prefill.answers = matched.prefill_answers;
        self.state.qualified.set();
        self.state.iframe_ready_for_reveal = false;

        let store = EligibilityStore::new(
            &self.config.eligibility_storage_key,
            self.config.eligibility_ttl_ms,
        );
        store.persist(host, &self.state.prefill.to_record(self.timers.now()));
        info!(via = matched.source.as_str(), "eligibility matched");

        if let Some(iframe_id) = matched.iframe_id.as_deref() {
            let lifecycle = IframeLifecycle::new(&self.config);
            lifecycle.show_overlay(host, Some(iframe_id));
            lifecycle.hide(host, &mut self.state, Some(iframe_id));
            info!(iframe_id, "hiding iframe until app swap completes");
        }
        self.start_swap(host, matched.iframe_id.as_deref());
    }

    fn on_backfill<H: HostPage + ?Sized>(&mut self, host: &mut H, backfill: PrefillBackfill) {
        let filled = self
            .state
            .prefill
            .backfill(backfill.postcode.as_deref(), backfill.first_name.as_deref());
        if !filled.is_empty() {
            info!(via = backfill.source.as_str(), fields = ?filled, "backfilled prefill values");
        }
        if backfill.ensure_swap {
            self.start_swap(host, backfill.iframe_id.as_deref());
        }
    }

    /// Queues the swap wait loop and tries to engage the lock straight away.
    fn start_swap<H: HostPage + ?Sized>(&mut self, host: &mut H, iframe_id: Option<&str>) {
        IframeLifecycle::new(&self.config).start_swap_wait(&self.state, &mut self.timers, iframe_id);
        IframeLock::new(&self.config).engage(host, &mut self.state, &mut self.timers, iframe_id);
    }

    fn after_injection<H: HostPage + ?Sized>(&mut self, host: &mut H, injection: Injection) {
        let preferred = injection.iframe_id.as_deref();
        HeightChannel::new(&self.config).attach(host, &mut self.state, &mut self.timers, preferred);
        self.sync_rows(host);
        IframeLock::new(&self.config).engage(host, &mut self.state, &mut self.timers, preferred);
    }

    fn sync_rows<H: HostPage + ?Sized>(&self, host: &mut H) -> usize {
        VisibilityController::new(
            &self.config.hidden_main_page_row_selector,
            &self.config.hidden_main_page_row_indexes,
        )
        .sync(host, &self.state)
    }

    fn watch_rows<H: HostPage + ?Sized>(&mut self, host: &mut H) {
        VisibilityController::new(
            &self.config.hidden_main_page_row_selector,
            &self.config.hidden_main_page_row_indexes,
        )
        .watch(host, &mut self.state);
    }
}
