//! Hooks the host page's analytics queue so every event reaches the evaluator once.

use serde_json::Value;
use tracing::{debug, info};

use crate::config::ControllerConfig;
use crate::controller::ControllerTask;
use crate::host::DataLayer;
use crate::scheduler::{PollBudget, PollStatus, Scheduler};
use crate::state::ControllerState;

/// An event taken from the queue together with its position.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    pub index: usize,
    pub value: Value,
}

pub struct AnalyticsHook<'a> {
    config: &'a ControllerConfig,
}

impl<'a> AnalyticsHook<'a> {
    pub fn new(config: &'a ControllerConfig) -> Self {
        Self { config }
    }

    /// Installs the forwarding wrapper unless the current `push` already carries it.
    pub fn wrap<Q: DataLayer + ?Sized>(&self, queue: &mut Q) -> bool {
        if queue.push_is_wrapped() {
            return false;
        }
        let original = queue.wrap_push();
        info!(original = %original, "dataLayer.push wrapped");
        true
    }

    /// Claims an index for processing. `false` means it was already handled.
    pub fn claim(&self, state: &mut ControllerState, index: usize) -> bool {
        state.processed_event_indexes.insert(index)
    }

    /// Every queued event not yet processed, in queue order, each claimed.
    pub fn take_unseen<Q: DataLayer + ?Sized>(&self, queue: &Q, state: &mut ControllerState) -> Vec<QueuedEvent> {
        let mut unseen = Vec::new();
        for index in 0..queue.len() {
            if !self.claim(state, index) {
                continue;
            }
            if let Some(value) = queue.event(index) {
                unseen.push(QueuedEvent { index, value });
            }
        }
        if !unseen.is_empty() {
            debug!(count = unseen.len(), "replaying queued analytics events");
        }
        unseen
    }

    /// Starts the watchdog that re-wraps `push` if the page replaces it.
    pub fn start_polling(&self, state: &mut ControllerState, timers: &mut Scheduler<ControllerTask>) -> bool {
        if !state.data_layer_polling.set() {
            return false;
        }
        let budget = PollBudget::with_iterations(timers.now(), self.config.data_layer_poll_limit);
        timers.set_timeout(self.config.data_layer_poll_ms, ControllerTask::DataLayerPoll { budget });
        true
    }

    /// Books one watchdog tick and re-arms it unless qualified or out of budget.
    pub fn finish_poll_tick(
        &self,
        state: &mut ControllerState,
        timers: &mut Scheduler<ControllerTask>,
        mut budget: PollBudget,
    ) -> bool {
        let status = budget.tick(timers.now());
        state.data_layer_poll_count = budget.iterations;
        if state.qualified.is_set() || status == PollStatus::Exhausted {
            debug!(iterations = budget.iterations, "dataLayer polling stopped");
            return false;
        }
        timers.set_timeout(self.config.data_layer_poll_ms, ControllerTask::DataLayerPoll { budget });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Queue {
        events: Vec<Value>,
        wrapped: bool,
    }

    impl DataLayer for Queue {
        fn len(&self) -> usize {
            self.events.len()
        }

        fn event(&self, index: usize) -> Option<Value> {
            self.events.get(index).cloned()
        }

        fn push_is_wrapped(&self) -> bool {
            self.wrapped
        }

        fn wrap_push(&mut self) -> String {
            self.wrapped = true;
            "Array.prototype.push".to_string()
        }
    }

    #[test]
    fn replay_claims_each_index_once() {
        let config = ControllerConfig::default();
        let hook = AnalyticsHook::new(&config);
        let mut state = ControllerState::default();
        let mut queue = Queue {
            events: vec![json!({"event": "gtm.js"}), json!({"event": "pageChanged"})],
            wrapped: false,
        };

        assert_eq!(hook.take_unseen(&queue, &mut state).len(), 2);
        assert!(hook.take_unseen(&queue, &mut state).is_empty());

        queue.events.push(json!({"event": "formSubmit"}));
        let fresh = hook.take_unseen(&queue, &mut state);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].index, 2);
        assert!(!hook.claim(&mut state, 2));
    }

    #[test]
    fn wrap_is_skipped_when_marker_present() {
        let config = ControllerConfig::default();
        let hook = AnalyticsHook::new(&config);
        let mut queue = Queue {
            events: Vec::new(),
            wrapped: false,
        };
        assert!(hook.wrap(&mut queue));
        assert!(!hook.wrap(&mut queue));
    }

    #[test]
    fn polling_stops_at_the_iteration_limit() {
        let config = ControllerConfig {
            data_layer_poll_limit: 3,
            ..ControllerConfig::default()
        };
        let hook = AnalyticsHook::new(&config);
        let mut state = ControllerState::default();
        let mut timers = Scheduler::new(0);

        assert!(hook.start_polling(&mut state, &mut timers));
        assert!(!hook.start_polling(&mut state, &mut timers));

        let mut ticks = 0;
        while let Some(fired) = timers.pop_due(i64::MAX) {
            let ControllerTask::DataLayerPoll { budget } = fired.task else {
                panic!("unexpected task");
            };
            ticks += 1;
            hook.finish_poll_tick(&mut state, &mut timers, budget);
        }
        assert_eq!(ticks, 3);
        assert_eq!(state.data_layer_poll_count, 3);
    }
}
