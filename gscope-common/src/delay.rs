//! Busy-wait helper for fault injection
//!
//! Probes may stall the triggering thread for a configured duration to widen
//! race windows in the monitored program. The sandbox has no sleep, so the
//! wait spins on a monotonic clock inside two nested bounded loops; when the
//! iteration budget runs out first the probe simply continues.

/// Iterations per loop level
pub const MAX_LOOP_ITERS: u32 = 1 << 23;

/// Monotonic nanosecond clock (`bpf_ktime_get_ns` in the sandbox)
pub trait Clock {
    fn now_ns(&self) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayOutcome {
    Elapsed,
    /// The loop budget ran out before the duration elapsed
    BudgetExhausted,
}

/// Deadline shared between the loop levels
#[derive(Debug, Clone, Copy)]
pub struct DelayState {
    pub start_ns: u64,
    pub delay_ns: u64,
    pub done: bool,
}

impl DelayState {
    pub fn start<C: Clock + ?Sized>(clock: &C, delay_ns: u64) -> Self {
        Self { start_ns: clock.now_ns(), delay_ns, done: delay_ns == 0 }
    }

    /// Sample the clock once; returns whether the deadline is reached
    pub fn poll<C: Clock + ?Sized>(&mut self, clock: &C) -> bool {
        if !self.done {
            self.done = clock.now_ns().wrapping_sub(self.start_ns) >= self.delay_ns;
        }
        self.done
    }

    #[must_use]
    pub fn outcome(&self) -> DelayOutcome {
        if self.done {
            DelayOutcome::Elapsed
        } else {
            DelayOutcome::BudgetExhausted
        }
    }
}

/// Spin until `delay_ns` elapsed or `outer * inner` clock samples were taken
pub fn spin_delay_bounded<C: Clock + ?Sized>(
    clock: &C,
    delay_ns: u64,
    outer: u32,
    inner: u32,
) -> DelayOutcome {
    let mut state = DelayState::start(clock, delay_ns);
    'outer: for _ in 0..outer {
        for _ in 0..inner {
            if state.poll(clock) {
                break 'outer;
            }
        }
    }
    state.outcome()
}

/// Spin with the full [`MAX_LOOP_ITERS`] budget on both levels
pub fn spin_delay<C: Clock + ?Sized>(clock: &C, delay_ns: u64) -> DelayOutcome {
    spin_delay_bounded(clock, delay_ns, MAX_LOOP_ITERS, MAX_LOOP_ITERS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Clock advancing a fixed step per sample
    struct SteppingClock {
        now: Cell<u64>,
        step: u64,
    }

    impl Clock for SteppingClock {
        fn now_ns(&self) -> u64 {
            let now = self.now.get();
            self.now.set(now + self.step);
            now
        }
    }

    #[test]
    fn test_zero_delay_returns_immediately() {
        let clock = SteppingClock { now: Cell::new(0), step: 0 };
        assert_eq!(spin_delay(&clock, 0), DelayOutcome::Elapsed);
    }

    #[test]
    fn test_elapses_once_clock_passes_deadline() {
        let clock = SteppingClock { now: Cell::new(1_000), step: 10 };
        assert_eq!(spin_delay(&clock, 1_000), DelayOutcome::Elapsed);
        // One sample at start plus 100 polls
        assert_eq!(clock.now.get(), 1_000 + 101 * 10);
    }

    #[test]
    fn test_budget_exhaustion_returns_early() {
        let clock = SteppingClock { now: Cell::new(0), step: 1 };
        assert_eq!(spin_delay_bounded(&clock, 1_000_000, 4, 4), DelayOutcome::BudgetExhausted);
        assert_eq!(clock.now.get(), 17);
    }
}
