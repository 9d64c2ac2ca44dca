//! Virtual clock for discrete-event time.
//!
//! Simulated time advances only inside the engine's event loop,
//! immediately before a handler is dispatched, to the popped event's
//! time. Handlers may read the clock freely but must never advance it;
//! the clock enforces this with a dispatch guard armed by the engine
//! around every handler invocation.

use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
};

use maquette_types::SimTime;

use crate::SimError;

/// Thread-safe virtual clock.
///
/// A single time value behind a mutex, shared by the engine, the
/// workload generator, and the handlers of one run.
#[derive(Debug, Default)]
pub struct SimClock {
    /// Current simulation time in nanoseconds since run start.
    now_ns: Mutex<u64>,

    /// Armed while a handler executes; `set` fails during dispatch.
    dispatching: AtomicBool,
}

impl SimClock {
    /// Creates a clock starting at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a clock starting at the given time.
    pub fn starting_at(time: SimTime) -> Self {
        Self {
            now_ns: Mutex::new(time.as_nanos()),
            dispatching: AtomicBool::new(false),
        }
    }

    /// Returns the current simulation time.
    pub fn now(&self) -> SimTime {
        let guard = self.now_ns.lock().expect("clock mutex poisoned");
        SimTime::from_nanos(*guard)
    }

    /// Returns `now - earlier` in nanoseconds (zero if `earlier` is later).
    pub fn since(&self, earlier: SimTime) -> u64 {
        self.now().saturating_since(earlier)
    }

    /// Replaces the current time.
    ///
    /// Only the engine loop calls this; a handler attempting to advance
    /// the clock mid-dispatch gets `SimError::ClockMisuse`. Time must not
    /// go backwards (debug-asserted).
    pub fn set(&self, time: SimTime) -> Result<(), SimError> {
        if self.dispatching.load(Ordering::Acquire) {
            return Err(SimError::ClockMisuse);
        }

        let mut guard = self.now_ns.lock().expect("clock mutex poisoned");
        debug_assert!(
            time.as_nanos() >= *guard,
            "time cannot go backwards: current={}, target={}",
            *guard,
            time.as_nanos()
        );
        *guard = time.as_nanos();
        Ok(())
    }

    /// Arms the dispatch guard. Engine-internal.
    pub(crate) fn begin_dispatch(&self) {
        self.dispatching.store(true, Ordering::Release);
    }

    /// Disarms the dispatch guard. Engine-internal.
    pub(crate) fn end_dispatch(&self) {
        self.dispatching.store(false, Ordering::Release);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_starts_at_zero() {
        let clock = SimClock::new();
        assert_eq!(clock.now(), SimTime::ZERO);
    }

    #[test]
    fn clock_set_and_since() {
        let clock = SimClock::new();
        clock.set(SimTime::from_millis(5.0)).expect("should set");
        assert_eq!(clock.now(), SimTime::from_millis(5.0));
        assert_eq!(
            clock.since(SimTime::from_millis(2.0)),
            SimTime::from_millis(3.0).as_nanos()
        );
    }

    #[test]
    fn clock_set_fails_during_dispatch() {
        let clock = SimClock::new();
        clock.begin_dispatch();

        let err = clock.set(SimTime::from_millis(1.0)).unwrap_err();
        assert!(matches!(err, SimError::ClockMisuse));

        clock.end_dispatch();
        clock
            .set(SimTime::from_millis(1.0))
            .expect("should set after dispatch");
    }

    #[test]
    #[should_panic(expected = "time cannot go backwards")]
    fn clock_set_backwards_panics_in_debug() {
        let clock = SimClock::starting_at(SimTime::from_millis(10.0));
        let _ = clock.set(SimTime::from_millis(1.0));
    }
}
