//! Tick scheduler - countdown based deferred and repeating execution.
//!
//! Tasks are submitted from any thread into a lock-free pending queue and
//! merged into the active set at the start of the next `advance()`. A task
//! submitted during tick N therefore starts counting at tick N+1 at the
//! earliest, which rules out same-tick reentrant firing.
//!
//! # Per-task tick
//!
//! ```text
//! pre-delay left?      -> decrement, stop
//! countdown += 1
//! cancel predicate?    -> abort
//! countdown >= delay   -> fire
//!     one-shot         -> complete
//!     repeating        -> countdown = 0, loops += 1, complete if bound reached
//! ```
//!
//! The `>=` comparison means a task fires at most once per tick even if its
//! countdown were ever to overshoot, so a backlog never fires in a burst.
//!
//! # Faults
//!
//! Actions run without an exception boundary. A panicking action unwinds
//! out of `advance()` to the host; the scheduler itself stays consistent
//! (the panicking task is kept and the remaining tasks are untouched) and
//! can be advanced again if the host chooses to catch the unwind.

use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::trace;

/// The work a task performs when it fires.
pub type TaskAction = Box<dyn FnMut() + Send>;

/// Predicate evaluated every counted tick; `true` aborts the task.
pub type CancelPredicate = Box<dyn Fn(&TaskProgress) -> bool + Send>;

/// Read-only view of a task's counters, handed to cancel predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskProgress {
    /// Ticks counted towards the next firing
    pub countdown: u32,

    /// Completed repeat cycles
    pub loop_count: u32,

    /// Ticks still to wait before counting starts
    pub pre_delay_remaining: u32,
}

#[derive(Debug, Default)]
struct TaskShared {
    cancel_requested: AtomicBool,
    finished: AtomicBool,
    fired: AtomicU32,
}

/// Handle to a submitted task.
///
/// Cancelling through the handle takes effect at the next `advance()`; an
/// action that is already running is never interrupted.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    shared: Arc<TaskShared>,
}

impl TaskHandle {
    /// Requests cancellation.
    pub fn cancel(&self) {
        self.shared.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.shared.cancel_requested.load(Ordering::SeqCst)
    }

    /// True once the task has left the scheduler, for any reason.
    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::SeqCst)
    }

    /// Number of times the action has run.
    pub fn fire_count(&self) -> u32 {
        self.shared.fired.load(Ordering::SeqCst)
    }
}

/// Builder for a scheduled task.
pub struct TaskBuilder {
    delay: u32,
    repeating: bool,
    max_repeats: Option<u32>,
    pre_delay: u32,
    action: TaskAction,
    cancel_when: Option<CancelPredicate>,
    on_cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TaskBuilder {
    /// One-shot task firing after `delay` ticks (0 is clamped to 1).
    pub fn once<F>(delay: u32, action: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self {
            delay: delay.max(1),
            repeating: false,
            max_repeats: None,
            pre_delay: 0,
            action: Box::new(action),
            cancel_when: None,
            on_cancel: None,
        }
    }

    /// Task firing every `delay` ticks until cancelled (0 is clamped to 1).
    pub fn repeating<F>(delay: u32, action: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self {
            repeating: true,
            ..Self::once(delay, action)
        }
    }

    /// Stops a repeating task after `max_loops` firings. Zero never fires.
    pub fn bounded(mut self, max_loops: u32) -> Self {
        self.max_repeats = Some(max_loops);
        self
    }

    /// Waits `ticks` extra ticks before the countdown starts.
    pub fn pre_delay(mut self, ticks: u32) -> Self {
        self.pre_delay = ticks;
        self
    }

    /// Aborts the task the first counted tick `predicate` returns true.
    pub fn cancel_when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&TaskProgress) -> bool + Send + 'static,
    {
        self.cancel_when = Some(Box::new(predicate));
        self
    }

    /// Runs once if the task is aborted (handle, predicate, zero bound).
    /// Not called when a task completes normally.
    pub fn on_cancel<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_cancel = Some(Box::new(callback));
        self
    }

    fn build(self) -> (ScheduledTask, TaskHandle) {
        let shared = Arc::new(TaskShared::default());
        if self.max_repeats == Some(0) {
            shared.cancel_requested.store(true, Ordering::SeqCst);
        }

        let task = ScheduledTask {
            delay: self.delay,
            repeating: self.repeating,
            max_repeats: self.max_repeats,
            pre_delay: self.pre_delay,
            countdown: 0,
            loop_count: 0,
            action: self.action,
            cancel_when: self.cancel_when,
            on_cancel: self.on_cancel,
            shared: Arc::clone(&shared),
        };

        (task, TaskHandle { shared })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskEnd {
    Completed,
    Aborted,
}

struct ScheduledTask {
    delay: u32,
    repeating: bool,
    max_repeats: Option<u32>,
    pre_delay: u32,
    countdown: u32,
    loop_count: u32,
    action: TaskAction,
    cancel_when: Option<CancelPredicate>,
    on_cancel: Option<Box<dyn FnOnce() + Send>>,
    shared: Arc<TaskShared>,
}

impl ScheduledTask {
    fn progress(&self) -> TaskProgress {
        TaskProgress {
            countdown: self.countdown,
            loop_count: self.loop_count,
            pre_delay_remaining: self.pre_delay,
        }
    }

    /// Advances this task by one tick. `Some` means it leaves the active set.
    fn do_tick(&mut self) -> Option<TaskEnd> {
        if self.shared.cancel_requested.load(Ordering::SeqCst) {
            return Some(TaskEnd::Aborted);
        }

        if self.pre_delay > 0 {
            self.pre_delay -= 1;
            return None;
        }

        self.countdown += 1;

        if let Some(predicate) = &self.cancel_when {
            if predicate(&self.progress()) {
                return Some(TaskEnd::Aborted);
            }
        }

        if self.countdown < self.delay {
            return None;
        }

        (self.action)();
        self.shared.fired.fetch_add(1, Ordering::SeqCst);

        if !self.repeating {
            return Some(TaskEnd::Completed);
        }

        self.countdown = 0;
        // Unbounded tasks may run past u32::MAX cycles; bounded ones stop first.
        self.loop_count = self.loop_count.wrapping_add(1);
        match self.max_repeats {
            Some(max) if self.loop_count >= max => Some(TaskEnd::Completed),
            _ => None,
        }
    }

    fn finish(&mut self, end: TaskEnd) {
        self.shared.finished.store(true, Ordering::SeqCst);
        if end == TaskEnd::Aborted {
            if let Some(callback) = self.on_cancel.take() {
                callback();
            }
        }
    }
}

/// Submission side of the scheduler, usable from any thread.
pub trait Schedule {
    /// Enqueues a task built with `TaskBuilder`.
    fn submit(&self, task: TaskBuilder) -> TaskHandle;

    /// Fires `action` once, `delay` ticks from the next advance.
    fn schedule<F>(&self, delay: u32, action: F) -> TaskHandle
    where
        F: FnMut() + Send + 'static,
        Self: Sized,
    {
        self.submit(TaskBuilder::once(delay, action))
    }

    /// Fires `action` every `delay` ticks until cancelled.
    fn schedule_repeating<F>(&self, delay: u32, action: F) -> TaskHandle
    where
        F: FnMut() + Send + 'static,
        Self: Sized,
    {
        self.submit(TaskBuilder::repeating(delay, action))
    }

    /// Fires `action` every tick, `max_loops` times.
    fn schedule_repeating_bounded<F>(&self, max_loops: u32, action: F) -> TaskHandle
    where
        F: FnMut() + Send + 'static,
        Self: Sized,
    {
        self.submit(TaskBuilder::repeating(1, action).bounded(max_loops))
    }

    /// Waits `pre_delay` ticks, then fires `action` every `delay` ticks.
    fn schedule_repeating_after<F>(&self, pre_delay: u32, delay: u32, action: F) -> TaskHandle
    where
        F: FnMut() + Send + 'static,
        Self: Sized,
    {
        self.submit(TaskBuilder::repeating(delay, action).pre_delay(pre_delay))
    }
}

/// Cloneable producer handle onto a scheduler's pending queue.
#[derive(Clone)]
pub struct SchedulerHandle {
    pending: Arc<SegQueue<ScheduledTask>>,
}

impl Schedule for SchedulerHandle {
    fn submit(&self, task: TaskBuilder) -> TaskHandle {
        let (task, handle) = task.build();
        self.pending.push(task);
        handle
    }
}

/// Countdown-based task scheduler driven once per logical tick.
pub struct TickScheduler {
    /// Tasks submitted since the last advance (multi-producer, lock-free)
    pending: Arc<SegQueue<ScheduledTask>>,

    /// Tasks being counted down (tick thread only)
    active: Vec<ScheduledTask>,

    /// Number of advances so far
    ticks: u64,
}

impl TickScheduler {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(SegQueue::new()),
            active: Vec::new(),
            ticks: 0,
        }
    }

    /// Returns a producer handle for other threads and callbacks.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            pending: Arc::clone(&self.pending),
        }
    }

    /// Runs one tick. Must be called exactly once per logical tick.
    pub fn advance(&mut self) {
        self.ticks += 1;

        let mut drained = 0usize;
        while let Some(task) = self.pending.pop() {
            self.active.push(task);
            drained += 1;
        }

        let before = self.active.len();
        self.active.retain_mut(|task| match task.do_tick() {
            None => true,
            Some(end) => {
                task.finish(end);
                false
            }
        });

        trace!(
            tick = self.ticks,
            drained,
            removed = before - self.active.len(),
            active = self.active.len(),
            "Scheduler advanced"
        );
    }

    /// Aborts every pending and active task.
    pub fn clear(&mut self) {
        while let Some(task) = self.pending.pop() {
            self.active.push(task);
        }
        for mut task in self.active.drain(..) {
            task.finish(TaskEnd::Aborted);
        }
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of `advance()` calls so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

impl Default for TickScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Schedule for TickScheduler {
    fn submit(&self, task: TaskBuilder) -> TaskHandle {
        let (task, handle) = task.build();
        self.pending.push(task);
        handle
    }
}
