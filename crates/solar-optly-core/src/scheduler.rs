//! Virtual-clock timer queue.
//!
//! Components never own a real timer. They register work with a `Scheduler`
//! and the runtime driver pops due entries as the clock advances, which keeps
//! every polling loop steppable from tests.

/// Handle returned for every scheduled entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

#[derive(Debug, Clone)]
struct ScheduledTask<T> {
    id: TimerId,
    due_at: i64,
    order: u64,
    interval_ms: Option<i64>,
    task: T,
}

/// Snapshot of a queued entry, ordered by due time then insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTimer {
    pub id: TimerId,
    pub due_at: i64,
    pub interval_ms: Option<i64>,
}

/// An entry popped from the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Fired<T> {
    pub id: TimerId,
    pub due_at: i64,
    pub task: T,
}

#[derive(Debug, Clone)]
pub struct Scheduler<T> {
    now_ms: i64,
    queue: Vec<ScheduledTask<T>>,
    next_id: u64,
    next_order: u64,
}

impl<T: Clone> Scheduler<T> {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms,
            queue: Vec::new(),
            next_id: 1,
            next_order: 0,
        }
    }

    pub fn now(&self) -> i64 {
        self.now_ms
    }

    pub fn set_timeout(&mut self, delay_ms: i64, task: T) -> TimerId {
        self.push(delay_ms.max(0), None, task)
    }

    pub fn set_interval(&mut self, interval_ms: i64, task: T) -> TimerId {
        let interval_ms = interval_ms.max(1);
        self.push(interval_ms, Some(interval_ms), task)
    }

    /// Returns whether the id was still queued.
    pub fn clear(&mut self, id: TimerId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|entry| entry.id != id);
        before != self.queue.len()
    }

    pub fn next_due_at(&self) -> Option<i64> {
        self.queue.iter().map(|entry| entry.due_at).min()
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn pending(&self) -> Vec<PendingTimer> {
        let mut timers = self
            .queue
            .iter()
            .map(|entry| (entry.order, PendingTimer {
                id: entry.id,
                due_at: entry.due_at,
                interval_ms: entry.interval_ms,
            }))
            .collect::<Vec<_>>();
        timers.sort_by_key(|(order, timer)| (timer.due_at, *order));
        timers.into_iter().map(|(_, timer)| timer).collect()
    }

    /// Pops the earliest entry due at or before `until`, moving the clock to its due time.
    /// Interval entries are re-queued before being returned.
    pub fn pop_due(&mut self, until: i64) -> Option<Fired<T>> {
        let index = self
            .queue
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.due_at <= until)
            .min_by_key(|(_, entry)| (entry.due_at, entry.order))
            .map(|(index, _)| index)?;

        let entry = self.queue.remove(index);
        if entry.due_at > self.now_ms {
            self.now_ms = entry.due_at;
        }

        if let Some(interval_ms) = entry.interval_ms {
            let order = self.take_order();
            self.queue.push(ScheduledTask {
                id: entry.id,
                due_at: entry.due_at + interval_ms,
                order,
                interval_ms: Some(interval_ms),
                task: entry.task.clone(),
            });
        }

        Some(Fired {
            id: entry.id,
            due_at: entry.due_at,
            task: entry.task,
        })
    }

    /// Moves the clock forward once every due entry up to `target_ms` has been popped.
    pub fn settle(&mut self, target_ms: i64) {
        if target_ms > self.now_ms {
            self.now_ms = target_ms;
        }
    }

    fn push(&mut self, delay_ms: i64, interval_ms: Option<i64>, task: T) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        let order = self.take_order();
        self.queue.push(ScheduledTask {
            id,
            due_at: self.now_ms.saturating_add(delay_ms),
            order,
            interval_ms,
            task,
        });
        id
    }

    fn take_order(&mut self) -> u64 {
        let order = self.next_order;
        self.next_order += 1;
        order
    }
}

/// Stop condition for self-rearming polling loops: a deadline and/or an iteration cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub started_at: i64,
    pub deadline_ms: Option<i64>,
    pub max_iterations: Option<u32>,
    pub iterations: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Continue,
    Exhausted,
}

impl PollBudget {
    pub fn with_deadline(started_at: i64, max_wait_ms: i64) -> Self {
        Self {
            started_at,
            deadline_ms: Some(max_wait_ms),
            max_iterations: None,
            iterations: 0,
        }
    }

    pub fn with_iterations(started_at: i64, max_iterations: u32) -> Self {
        Self {
            started_at,
            deadline_ms: None,
            max_iterations: Some(max_iterations),
            iterations: 0,
        }
    }

    /// Records one iteration at `now_ms` and reports whether another is allowed.
    pub fn tick(&mut self, now_ms: i64) -> PollStatus {
        self.iterations = self.iterations.saturating_add(1);
        if let Some(limit) = self.max_iterations {
            if self.iterations >= limit {
                return PollStatus::Exhausted;
            }
        }
        if let Some(deadline) = self.deadline_ms {
            if now_ms - self.started_at > deadline {
                return PollStatus::Exhausted;
            }
        }
        PollStatus::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_due_then_insertion_order() {
        let mut scheduler = Scheduler::new(1_000);
        scheduler.set_timeout(50, "late");
        scheduler.set_timeout(10, "first");
        scheduler.set_timeout(10, "second");

        let mut fired = Vec::new();
        while let Some(entry) = scheduler.pop_due(2_000) {
            fired.push(entry.task);
        }
        scheduler.settle(2_000);

        assert_eq!(fired, vec!["first", "second", "late"]);
        assert_eq!(scheduler.now(), 2_000);
    }

    #[test]
    fn interval_rearms_until_cleared() {
        let mut scheduler = Scheduler::new(0);
        let id = scheduler.set_interval(500, "tick");

        let mut count = 0;
        while scheduler.pop_due(1_600).is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
        assert_eq!(scheduler.next_due_at(), Some(2_000));

        assert!(scheduler.clear(id));
        assert!(scheduler.is_idle());
        assert!(!scheduler.clear(id));
    }

    #[test]
    fn entries_after_window_stay_queued() {
        let mut scheduler = Scheduler::new(0);
        scheduler.set_timeout(300, ());
        assert!(scheduler.pop_due(299).is_none());
        assert_eq!(scheduler.pending().len(), 1);
    }

    #[test]
    fn poll_budget_respects_deadline_and_cap() {
        let mut deadline = PollBudget::with_deadline(0, 1_000);
        assert_eq!(deadline.tick(1_000), PollStatus::Continue);
        assert_eq!(deadline.tick(1_001), PollStatus::Exhausted);

        let mut capped = PollBudget::with_iterations(0, 2);
        assert_eq!(capped.tick(0), PollStatus::Continue);
        assert_eq!(capped.tick(0), PollStatus::Exhausted);
    }
}
