//! Cooperative timer queue.
//!
//! Every timer in the crate (setup timeout, connected grace delay, socket close
//! grace, per-command timeout, poll tick) is a [`Task`] in a single
//! [`Scheduler`]. The scheduler keeps a virtual clock: the event loop advances
//! it from real time, tests advance it by hand, so state machines can be
//! exercised without sleeping.
//!
//! # Example
//!
//! ```
//! use ap_session::scheduler::Scheduler;
//! use std::time::Duration;
//!
//! let mut timers = Scheduler::new();
//! let id = timers.schedule(Duration::from_millis(50), "close");
//!
//! timers.advance_by(Duration::from_millis(49));
//! assert!(timers.pop_due().is_none());
//!
//! timers.advance_by(Duration::from_millis(1));
//! assert_eq!(timers.pop_due(), Some((id, "close")));
//! ```

use crate::session::SessionId;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Smallest period accepted for repeating tasks.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Handle to a scheduled task. Cancelling a handle twice is harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Deferred work understood by the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Association setup timeout elapsed.
    SetupTimeout,
    /// Grace delay before reporting Connected elapsed.
    ConnectedGrace,
    /// Close the socket of a write-only command.
    CloseSocket(SessionId),
    /// No response arrived for the pending command.
    CommandTimeout(SessionId),
    /// Polling session wants a new engine cycle.
    PollTick,
}

/// The scheduler type shared by all state machines.
pub type Timers = Scheduler<Task>;

#[derive(Debug)]
struct Scheduled<T> {
    task: T,
    period: Option<Duration>,
}

/// Deadline-ordered task queue with a virtual clock.
#[derive(Debug)]
pub struct Scheduler<T> {
    now: Duration,
    next_id: u64,
    queue: BTreeMap<(Duration, TimerId), Scheduled<T>>,
    deadlines: HashMap<TimerId, Duration>,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Scheduler<T> {
    /// Create an empty scheduler with the clock at zero.
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            next_id: 0,
            queue: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Run `task` once after `delay`.
    pub fn schedule(&mut self, delay: Duration, task: T) -> TimerId {
        self.insert(delay, None, task)
    }

    /// Run `task` after `first`, then every `period` (fixed rate).
    pub fn schedule_repeating(&mut self, first: Duration, period: Duration, task: T) -> TimerId {
        self.insert(first, Some(period.max(MIN_PERIOD)), task)
    }

    fn insert(&mut self, delay: Duration, period: Option<Duration>, task: T) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        let deadline = self.now + delay;
        self.deadlines.insert(id, deadline);
        self.queue.insert((deadline, id), Scheduled { task, period });
        id
    }

    /// Cancel a task.
    ///
    /// Returns `true` if the task was still pending. Cancelling an unknown,
    /// fired or already cancelled task returns `false` and has no effect.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.deadlines.remove(&id) {
            Some(deadline) => {
                self.queue.remove(&(deadline, id));
                true
            }
            None => false,
        }
    }

    /// Check whether a task is still scheduled.
    pub fn is_pending(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id)
    }

    /// Deadline of the earliest pending task.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.queue.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Number of pending tasks.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns true if nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Move the clock forward to `now`. The clock never goes backwards.
    pub fn advance_to(&mut self, now: Duration) {
        if now > self.now {
            self.now = now;
        }
    }

    /// Move the clock forward by `delta`.
    pub fn advance_by(&mut self, delta: Duration) {
        self.now += delta;
    }
}

impl<T: Clone> Scheduler<T> {
    /// Remove and return the earliest task whose deadline has passed.
    ///
    /// Repeating tasks are re-queued one period after their previous deadline
    /// before being returned, so a task may cancel its own timer while handling
    /// the tick.
    pub fn pop_due(&mut self) -> Option<(TimerId, T)> {
        let &(deadline, id) = self.queue.keys().next()?;
        if deadline > self.now {
            return None;
        }
        let scheduled = self.queue.remove(&(deadline, id))?;
        match scheduled.period {
            Some(period) => {
                let next = deadline + period;
                let task = scheduled.task.clone();
                self.deadlines.insert(id, next);
                self.queue.insert((next, id), scheduled);
                Some((id, task))
            }
            None => {
                self.deadlines.remove(&id);
                Some((id, scheduled.task))
            }
        }
    }
}
