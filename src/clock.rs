//! Time source for every wait in the relay.
//!
//! The relay only ever needs "how long since X" and "sleep for d", so the
//! clock exposes elapsed time since an arbitrary origin. Tests drive a
//! [`ManualClock`] whose `sleep` advances time instantly and can run a hook,
//! which is how simulated output is appended to a tailed file mid-wait.

use std::cell::{Cell, RefCell};
use std::time::{Duration, Instant};

pub trait Clock {
    /// Monotonic time since the clock's origin.
    fn now(&self) -> Duration;

    /// Block the caller for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by [`Instant`] and `thread::sleep`.
#[derive(Debug, Clone, Copy)]
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
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

type SleepHook = Box<dyn FnMut(Duration)>;

/// Simulated clock: `sleep` advances `now` without blocking.
#[derive(Default)]
pub struct ManualClock {
    now: Cell<Duration>,
    on_sleep: RefCell<Option<SleepHook>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` with the post-sleep time after every simulated sleep.
    pub fn with_sleep_hook(hook: impl FnMut(Duration) + 'static) -> Self {
        Self {
            now: Cell::new(Duration::ZERO),
            on_sleep: RefCell::new(Some(Box::new(hook))),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
        if let Some(hook) = self.on_sleep.borrow_mut().as_mut() {
            hook(self.now.get());
        }
    }
}
