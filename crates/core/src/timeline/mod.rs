//! Time sources and frame scheduling.
//!
//! Everything in the engine reads time through [`Clock`] so cache expiry and
//! input throttling can be driven deterministically from tests.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::Instant,
};

/// Monotonic millisecond time source.
pub trait Clock {
    fn now_ms(&self) -> f64;
}

pub type SharedClock = Rc<dyn Clock>;

/// Wall clock measured from construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ms: f64) {
        self.now.set(ms);
    }

    pub fn advance(&self, delta_ms: f64) {
        self.now.set((self.now.get() + delta_ms).max(0.0));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.now.get()
    }
}

/// Opaque id of a pending frame callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameToken(pub u64);

/// Source of animation-frame callbacks.
///
/// At most one callback is in flight per render loop; the loop requests the
/// next one at the end of each frame and cancels the pending one on dispose.
pub trait FrameScheduler {
    fn request(&mut self) -> FrameToken;
    fn cancel(&mut self, token: FrameToken);
}

/// Scheduler for headless runs: records the pending token and lets the
/// driver decide when to fire it.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    next_id: u64,
    pending: Option<FrameToken>,
    requested: u64,
    cancelled: u64,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Option<FrameToken> {
        self.pending
    }

    /// Consumes the pending callback, returning whether one was registered.
    pub fn fire(&mut self) -> bool {
        self.pending.take().is_some()
    }

    pub fn requested(&self) -> u64 {
        self.requested
    }

    pub fn cancelled(&self) -> u64 {
        self.cancelled
    }
}

impl FrameScheduler for ManualScheduler {
    fn request(&mut self) -> FrameToken {
        self.next_id += 1;
        self.requested += 1;
        let token = FrameToken(self.next_id);
        self.pending = Some(token);
        token
    }

    fn cancel(&mut self, token: FrameToken) {
        if self.pending == Some(token) {
            self.pending = None;
            self.cancelled += 1;
        }
    }
}

/// Lets a driver keep a handle on the scheduler it hands to a loop.
impl<S: FrameScheduler + ?Sized> FrameScheduler for Rc<RefCell<S>> {
    fn request(&mut self) -> FrameToken {
        self.borrow_mut().request()
    }

    fn cancel(&mut self, token: FrameToken) {
        self.borrow_mut().cancel(token)
    }
}
