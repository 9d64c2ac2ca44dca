//! Dispatch trace for run debugging.
//!
//! The engine records every dispatched event into a bounded ring
//! buffer. When a run misbehaves, the tail of the trace shows what the
//! loop actually did without re-running the simulation. Recording cost
//! is one small struct per event; the buffer drops its oldest entries
//! once full.

use std::{collections::VecDeque, sync::Mutex};

use maquette_types::SimTime;
use serde::Serialize;

use crate::event::EventType;

/// What happened when an event was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DispatchOutcome {
    /// The handler returned `Ok`.
    Handled,
    /// The handler returned an error (non-fatal).
    HandlerError,
    /// No handler was registered for the event type.
    NoHandler,
}

/// One dispatched event.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchRecord {
    /// Virtual time of the event.
    pub time: SimTime,
    /// The event's type.
    pub event_type: EventType,
    /// Dispatch outcome.
    pub outcome: DispatchOutcome,
}

/// Bounded ring buffer of dispatch records.
#[derive(Debug)]
pub struct EventTrace {
    inner: Mutex<VecDeque<DispatchRecord>>,
    capacity: usize,
}

impl EventTrace {
    /// Default number of records retained.
    pub const DEFAULT_CAPACITY: usize = 1_024;

    /// Creates a trace retaining up to `capacity` records. A capacity of
    /// zero disables recording.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(Self::DEFAULT_CAPACITY))),
            capacity,
        }
    }

    /// Appends a record, evicting the oldest when full.
    pub fn record(&self, time: SimTime, event_type: EventType, outcome: DispatchOutcome) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock().expect("trace mutex poisoned");
        if inner.len() == self.capacity {
            inner.pop_front();
        }
        inner.push_back(DispatchRecord {
            time,
            event_type,
            outcome,
        });
    }

    /// Returns the retained records, oldest first.
    pub fn records(&self) -> Vec<DispatchRecord> {
        let inner = self.inner.lock().expect("trace mutex poisoned");
        inner.iter().cloned().collect()
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("trace mutex poisoned");
        inner.len()
    }

    /// Returns true when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventTrace {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_in_order() {
        let trace = EventTrace::default();
        trace.record(
            SimTime::from_millis(1.0),
            EventType::RequestArrival,
            DispatchOutcome::Handled,
        );
        trace.record(
            SimTime::from_millis(2.0),
            EventType::RequestStart,
            DispatchOutcome::HandlerError,
        );

        let records = trace.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event_type, EventType::RequestArrival);
        assert_eq!(records[1].outcome, DispatchOutcome::HandlerError);
    }

    #[test]
    fn evicts_oldest_when_full() {
        let trace = EventTrace::with_capacity(3);
        for i in 0..5 {
            trace.record(
                SimTime::from_millis(f64::from(i)),
                EventType::RequestArrival,
                DispatchOutcome::Handled,
            );
        }

        let records = trace.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].time, SimTime::from_millis(2.0));
        assert_eq!(records[2].time, SimTime::from_millis(4.0));
    }

    #[test]
    fn zero_capacity_disables_recording() {
        let trace = EventTrace::with_capacity(0);
        trace.record(
            SimTime::ZERO,
            EventType::SimulationEnd,
            DispatchOutcome::Handled,
        );
        assert!(trace.is_empty());
    }
}
