//! The few things the runtime needs from the hardware: a millisecond
//! counter and a way to doze until the next interrupt.

use core::cell::Cell;

use alloc::rc::Rc;

#[cfg(feature = "std")]
pub use self::hosted::StdClock;

#[cfg(target_arch = "arm")]
pub use self::arm::wait_for_interrupt;

/// Milliseconds, both as durations and as points on the scheduler's timeline.
pub type Millis = u64;

/// A free-running millisecond counter. The counter may wrap; the scheduler
/// only ever looks at differences between readings.
pub trait Clock {
    fn now_ms(&self) -> u32;

    fn elapsed_ms(&self, since: u32) -> u32 {
        self.now_ms().wrapping_sub(since)
    }

    /// Park the CPU until something happens. The millisecond tick is itself
    /// an interrupt, so this returns at least once per millisecond.
    fn wait_for_interrupt(&self);
}

/// Work the loop may do while it knows nothing else can run, such as heap
/// compaction or dropping into a low-power mode. `budget` is how long the
/// loop expects to stay idle.
pub trait IdleHook {
    fn on_idle(&mut self, budget: Millis);
}

impl<F> IdleHook for F
    where F: FnMut(Millis)
{
    fn on_idle(&mut self, budget: Millis) {
        self(budget)
    }
}

/// A clock that only moves when told to. Each `wait_for_interrupt`
/// counts as one millisecond tick, so idle waits complete instantly in
/// wall time while the timeline stays exact.
///
/// Clones share the same counter.
#[derive(Clone, Default, Debug)]
pub struct ManualClock {
    now: Rc<Cell<u32>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(ms: u32) -> Self {
        let clock = Self::new();
        clock.now.set(ms);
        clock
    }

    pub fn advance(&self, ms: u32) {
        self.now.set(self.now.get().wrapping_add(ms));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.get()
    }

    fn wait_for_interrupt(&self) {
        self.advance(1);
    }
}

#[cfg(target_arch = "arm")]
mod arm {
    /// Sleep until the next interrupt; the SysTick keeps this bounded.
    #[inline]
    pub fn wait_for_interrupt() {
        cortex_m::asm::wfi();
    }
}

#[cfg(feature = "std")]
mod hosted {
    use std::time::{Duration, Instant};

    use super::Clock;

    /// Hosted clock backed by `std::time::Instant`.
    pub struct StdClock {
        origin: Instant,
    }

    impl StdClock {
        pub fn new() -> Self {
            Self {
                origin: Instant::now(),
            }
        }
    }

    impl Default for StdClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for StdClock {
        fn now_ms(&self) -> u32 {
            self.origin.elapsed().as_millis() as u32
        }

        fn wait_for_interrupt(&self) {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}
