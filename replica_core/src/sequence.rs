//! Sequenced animator - a chain of timed steps driven once per tick.
//!
//! A chain holds nodes, each followed by an interval: the number of ticks
//! to wait after the node reports done before the next node is started.
//!
//! ```text
//! tick:   1        2        3        4
//!         start A  tick A   start B  tick B
//!                  (done)            (done) -> chain done
//!         [A, interval 1] [B, interval 0]
//! ```
//!
//! A node is started on the tick it is loaded and ticked on every later
//! tick until it reports done. With an interval of zero the chain moves on
//! the same tick the node finishes; otherwise it waits that many full ticks.
//! The cursor only ever moves forward, and once the chain is done every
//! call is a no-op.

use tracing::trace;

/// One step of an animation chain.
pub trait SequenceNode: Send {
    /// Called once, on the tick the node is loaded.
    fn start(&mut self);

    /// Called on each following tick while the node is not done.
    fn tick(&mut self);

    fn is_done(&self) -> bool;

    /// Called when the node is skipped or the chain is aborted before the
    /// node finished (including nodes that never started).
    fn cancel(&mut self);
}

/// Global abort condition, evaluated every tick.
pub type ChainPredicate = Box<dyn Fn() -> bool + Send>;

struct ChainLink {
    node: Box<dyn SequenceNode>,
    interval: u32,
}

/// An ordered chain of nodes with inter-node delays.
pub struct AnimationChain {
    links: Vec<ChainLink>,

    /// Index of the loaded node, if any
    current: Option<usize>,

    /// Index the next `skip()` will load
    next_index: usize,

    /// Ticks the current node has been done for
    since_done: u32,

    /// Ticks the current node has been loaded for
    node_age: u32,

    cancel_predicates: Vec<ChainPredicate>,
    running: bool,
    done: bool,
}

impl AnimationChain {
    pub fn new() -> Self {
        Self {
            links: Vec::new(),
            current: None,
            next_index: 0,
            since_done: 0,
            node_age: 0,
            cancel_predicates: Vec::new(),
            running: false,
            done: false,
        }
    }

    /// Appends a node followed by `interval` ticks of waiting.
    pub fn add_node(&mut self, node: impl SequenceNode + 'static, interval: u32) -> &mut Self {
        self.links.push(ChainLink {
            node: Box::new(node),
            interval,
        });
        self
    }

    /// Builder-style `add_node`.
    pub fn then(mut self, node: impl SequenceNode + 'static, interval: u32) -> Self {
        self.add_node(node, interval);
        self
    }

    /// Appends a global abort condition.
    pub fn add_cancel_predicate<P>(&mut self, predicate: P) -> &mut Self
    where
        P: Fn() -> bool + Send + 'static,
    {
        self.cancel_predicates.push(Box::new(predicate));
        self
    }

    /// Starts the chain. No-op while running, once done, or when empty.
    pub fn start(&mut self) {
        if self.running || self.done || self.links.is_empty() {
            return;
        }
        self.running = true;
    }

    /// Per-frame driver.
    pub fn tick(&mut self) {
        if !self.running || self.done {
            return;
        }

        match self.current {
            None => self.skip(),
            Some(index) => {
                let link = &mut self.links[index];
                if link.node.is_done() {
                    if self.since_done >= link.interval {
                        self.skip();
                    }
                } else {
                    link.node.tick();
                    if link.node.is_done() {
                        self.since_done = 0;
                        if link.interval == 0 {
                            self.skip();
                        }
                    }
                }
            }
        }

        if self.done {
            return;
        }

        if self.cancel_predicates.iter().any(|predicate| predicate()) {
            trace!(index = ?self.current, "Animation chain aborted by predicate");
            self.cancel();
            return;
        }

        self.node_age += 1;
        if let Some(index) = self.current {
            if self.links[index].node.is_done() {
                self.since_done += 1;
            }
        }
    }

    /// Moves to the next node, cancelling the current one if unfinished.
    ///
    /// Past the last node the chain is marked done without touching any node.
    pub fn skip(&mut self) {
        if self.done {
            return;
        }

        if let Some(index) = self.current.take() {
            let node = &mut self.links[index].node;
            if !node.is_done() {
                node.cancel();
            }
        }

        if self.next_index >= self.links.len() {
            self.finish();
            return;
        }

        let index = self.next_index;
        self.next_index += 1;
        self.current = Some(index);
        self.since_done = 0;
        self.node_age = 0;
        self.links[index].node.start();
    }

    /// Aborts the chain, cancelling every node that has not finished.
    pub fn cancel(&mut self) {
        if self.done {
            return;
        }

        let first_unfinished = self.current.unwrap_or(self.next_index);
        for link in self.links.iter_mut().skip(first_unfinished) {
            if !link.node.is_done() {
                link.node.cancel();
            }
        }
        self.current = None;
        self.next_index = self.links.len();
        self.finish();
    }

    fn finish(&mut self) {
        self.done = true;
        self.running = false;
    }

    /// Display flag: true between `start()` and completion.
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Index of the loaded node.
    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    /// Ticks since the current node was loaded.
    pub fn node_age(&self) -> u32 {
        self.node_age
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl Default for AnimationChain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AnimationChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimationChain")
            .field("len", &self.links.len())
            .field("current", &self.current)
            .field("running", &self.running)
            .field("done", &self.done)
            .finish()
    }
}

/// A chain is itself a node, so chains nest.
impl SequenceNode for AnimationChain {
    fn start(&mut self) {
        AnimationChain::start(self);
        AnimationChain::tick(self);
    }

    fn tick(&mut self) {
        AnimationChain::tick(self);
    }

    fn is_done(&self) -> bool {
        self.done || self.links.is_empty()
    }

    fn cancel(&mut self) {
        AnimationChain::cancel(self);
    }
}

/// Waits a fixed number of ticks.
#[derive(Debug, Clone)]
pub struct WaitNode {
    ticks: u32,
    elapsed: u32,
    cancelled: bool,
}

impl WaitNode {
    /// Done after `ticks` calls to `tick()`; zero is done on start.
    pub fn new(ticks: u32) -> Self {
        Self {
            ticks,
            elapsed: 0,
            cancelled: false,
        }
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }
}

impl SequenceNode for WaitNode {
    fn start(&mut self) {
        self.elapsed = 0;
    }

    fn tick(&mut self) {
        self.elapsed += 1;
    }

    fn is_done(&self) -> bool {
        self.cancelled || self.elapsed >= self.ticks
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }
}

/// Runs a callback on start and is done immediately.
pub struct CallbackNode {
    callback: Option<Box<dyn FnOnce() + Send>>,
}

impl CallbackNode {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
        }
    }
}

impl SequenceNode for CallbackNode {
    fn start(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback();
        }
    }

    fn tick(&mut self) {}

    fn is_done(&self) -> bool {
        self.callback.is_none()
    }

    fn cancel(&mut self) {
        self.callback = None;
    }
}

/// Runs a callback on start and on each tick, `times` calls in total.
pub struct RepeatNode {
    callback: Box<dyn FnMut(u32) + Send>,
    times: u32,
    calls: u32,
    cancelled: bool,
}

impl RepeatNode {
    /// The callback receives the zero-based call index.
    pub fn new<F>(times: u32, callback: F) -> Self
    where
        F: FnMut(u32) + Send + 'static,
    {
        Self {
            callback: Box::new(callback),
            times,
            calls: 0,
            cancelled: false,
        }
    }

    fn call(&mut self) {
        if self.calls < self.times {
            (self.callback)(self.calls);
            self.calls += 1;
        }
    }
}

impl SequenceNode for RepeatNode {
    fn start(&mut self) {
        self.call();
    }

    fn tick(&mut self) {
        self.call();
    }

    fn is_done(&self) -> bool {
        self.cancelled || self.calls >= self.times
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }
}
