//! Events and the priority-time event queue.
//!
//! Events are ordered by `(time, priority, insertion order)`: earlier
//! virtual time first, ties broken by lower priority value, remaining
//! ties by stable FIFO. The queue is safe under concurrent producers
//! (the workload generator task, handlers) and a single consumer (the
//! engine loop).

use std::{
    cmp::{Ordering as CmpOrdering, Reverse},
    collections::BinaryHeap,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use maquette_types::{EventId, InstanceId, RequestId, SimTime};

/// Payload of a scheduled event.
///
/// Each variant names exactly the fields its handler requires, replacing
/// the loose `data` map a dynamically typed implementation would carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A root request arrives at a service endpoint.
    RequestArrival {
        service_id: String,
        endpoint_path: String,
    },
    /// An admitted or dequeued request begins processing.
    RequestStart {
        request_id: RequestId,
        /// Pre-selected instance; resolved from request metadata or by
        /// fresh selection when absent.
        instance_id: Option<InstanceId>,
    },
    /// A processing request finishes.
    RequestComplete { request_id: RequestId },
    /// A completed request fans out to a downstream endpoint.
    DownstreamCall {
        parent_id: RequestId,
        target_service: String,
        target_path: String,
    },
    /// Add replicas to a service.
    ScaleUp { service_id: String, replicas: u32 },
    /// Remove replicas from a service.
    ScaleDown { service_id: String, replicas: u32 },
    /// End of the simulation.
    SimulationEnd,
}

impl EventKind {
    /// Returns the payload-free discriminant used for handler dispatch.
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::RequestArrival { .. } => EventType::RequestArrival,
            EventKind::RequestStart { .. } => EventType::RequestStart,
            EventKind::RequestComplete { .. } => EventType::RequestComplete,
            EventKind::DownstreamCall { .. } => EventType::DownstreamCall,
            EventKind::ScaleUp { .. } => EventType::ScaleUp,
            EventKind::ScaleDown { .. } => EventType::ScaleDown,
            EventKind::SimulationEnd => EventType::SimulationEnd,
        }
    }
}

/// Discriminant of [`EventKind`], used as the handler registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum EventType {
    RequestArrival,
    RequestStart,
    RequestComplete,
    DownstreamCall,
    ScaleUp,
    ScaleDown,
    SimulationEnd,
}

/// A scheduled event.
#[derive(Debug, Clone)]
pub struct Event {
    /// Queue-assigned id.
    pub id: EventId,

    /// Virtual time at which the event fires.
    pub time: SimTime,

    /// Tie-break priority at equal times; lower values pop first.
    pub priority: u32,

    /// Insertion sequence number; stable FIFO tie-break.
    pub seq: u64,

    /// Payload.
    pub kind: EventKind,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.time, self.priority, self.seq).cmp(&(other.time, other.priority, other.seq))
    }
}

/// Default priority for events without an explicit one.
pub const DEFAULT_PRIORITY: u32 = 100;

/// Concurrent priority queue of scheduled events.
///
/// Duplicate payloads are permitted; the queue performs no deduplication.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: Mutex<BinaryHeap<Reverse<Event>>>,
    next_id: AtomicU64,
    next_seq: AtomicU64,
}

impl EventQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules an event at `time` with the default priority.
    pub fn schedule(&self, time: SimTime, kind: EventKind) -> EventId {
        self.schedule_with_priority(time, DEFAULT_PRIORITY, kind)
    }

    /// Schedules an event at `time` with an explicit priority.
    ///
    /// Lower priority values pop first among events at the same time.
    pub fn schedule_with_priority(&self, time: SimTime, priority: u32, kind: EventKind) -> EventId {
        let id = EventId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let event = Event {
            id,
            time,
            priority,
            seq,
            kind,
        };

        let mut heap = self.heap.lock().expect("event queue mutex poisoned");
        heap.push(Reverse(event));
        id
    }

    /// Removes and returns the next event, or `None` when empty.
    pub fn pop(&self) -> Option<Event> {
        let mut heap = self.heap.lock().expect("event queue mutex poisoned");
        heap.pop().map(|Reverse(event)| event)
    }

    /// Returns a clone of the next event without removing it.
    pub fn peek(&self) -> Option<Event> {
        let heap = self.heap.lock().expect("event queue mutex poisoned");
        heap.peek().map(|Reverse(event)| event.clone())
    }

    /// Returns the time of the next event without removing it.
    pub fn peek_time(&self) -> Option<SimTime> {
        let heap = self.heap.lock().expect("event queue mutex poisoned");
        heap.peek().map(|Reverse(event)| event.time)
    }

    /// Returns the number of pending events.
    pub fn len(&self) -> usize {
        let heap = self.heap.lock().expect("event queue mutex poisoned");
        heap.len()
    }

    /// Returns true if no events are pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discards all pending events.
    pub fn clear(&self) {
        let mut heap = self.heap.lock().expect("event queue mutex poisoned");
        heap.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
