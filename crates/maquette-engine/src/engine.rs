//! The discrete-event loop.
//!
//! One engine per run: pops events in `(time, priority, insertion)`
//! order, advances the virtual clock to each event's time, and
//! dispatches to the handler registered for the event type. Handlers
//! run one at a time; their errors are logged and never stop the run.
//!
//! The loop observes two external signals:
//! - a cancellation watch, checked at the top of every iteration;
//! - the producer horizon, which caps how far virtual time may advance
//!   while the workload generator still owes earlier events.

use std::{collections::HashMap, sync::Arc, time::Duration};

use maquette_types::{SimTime, ns_to_ms};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{
    ProducerHorizon, SimError,
    event::{EventKind, EventType},
    handlers::{EventHandler, SimContext},
    trace::{DispatchOutcome, EventTrace},
};

/// Tunables of the event loop.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Pace event processing so wall-clock time tracks virtual time.
    pub real_time_mode: bool,

    /// Wall-time pause while waiting on an empty queue or the producer
    /// horizon.
    pub idle_wait: Duration,

    /// When the queue runs dry this close to the end (in nanoseconds of
    /// virtual time), the run finishes instead of waiting for more
    /// producer events.
    pub tail_window_ns: u64,

    /// Per-event cap on real-time-mode pacing sleeps.
    pub max_pacing_sleep: Duration,

    /// Dispatch records retained for debugging; zero disables tracing.
    pub trace_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            real_time_mode: false,
            idle_wait: Duration::from_millis(1),
            tail_window_ns: 1_000_000, // 1ms of virtual time
            max_pacing_sleep: Duration::from_secs(1),
            trace_capacity: EventTrace::DEFAULT_CAPACITY,
        }
    }
}

/// The event loop for one run.
pub struct Engine {
    ctx: Arc<SimContext>,
    handlers: HashMap<EventType, Arc<dyn EventHandler>>,
    horizon: ProducerHorizon,
    config: EngineConfig,
    cancel_tx: watch::Sender<bool>,
    trace: EventTrace,
}

impl Engine {
    /// Creates an engine over the given context.
    ///
    /// `horizon` bounds how far the loop may run ahead of the workload
    /// generator; pass [`ProducerHorizon::unbounded`] when driving the
    /// engine without one.
    pub fn new(ctx: Arc<SimContext>, horizon: ProducerHorizon, config: EngineConfig) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        let trace = EventTrace::with_capacity(config.trace_capacity);
        Self {
            ctx,
            handlers: HashMap::new(),
            horizon,
            config,
            cancel_tx,
            trace,
        }
    }

    /// Returns the dispatch trace of this engine.
    pub fn trace(&self) -> &EventTrace {
        &self.trace
    }

    /// Registers the handler for an event type, replacing any previous
    /// registration.
    pub fn register_handler(&mut self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(event_type, handler);
    }

    /// Returns the shared context.
    pub fn context(&self) -> &Arc<SimContext> {
        &self.ctx
    }

    /// Returns a handle observers can use to watch for cancellation.
    pub fn cancel_receiver(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }

    /// Signals cancellation and clears the queue. An in-flight
    /// [`Engine::run`] returns `SimError::Cancelled`.
    pub fn stop(&self) {
        let _ = self.cancel_tx.send(true);
        self.ctx.queue.clear();
    }

    /// Runs the simulation for `duration_ns` of virtual time.
    ///
    /// Schedules the `SimulationEnd` event, then loops until it is
    /// reached, the queue runs permanently dry inside the tail window,
    /// or cancellation is signaled.
    pub async fn run(&self, duration_ns: u64) -> Result<(), SimError> {
        let start = self.ctx.clock.now();
        let end_time: SimTime = start.saturating_add_nanos(duration_ns);
        self.ctx.queue.schedule(end_time, EventKind::SimulationEnd);

        let cancel_rx = self.cancel_tx.subscribe();
        debug!(start = %start, end = %end_time, "engine loop starting");

        loop {
            if *cancel_rx.borrow() {
                self.ctx.queue.clear();
                return Err(SimError::Cancelled);
            }

            let horizon = self.horizon.get();
            let Some(next_time) = self.ctx.queue.peek_time() else {
                // Empty queue: give producers a chance to inject, then
                // finish if we are already inside the tail window.
                let now = self.ctx.clock.now();
                if now >= end_time {
                    break;
                }
                tokio::time::sleep(self.config.idle_wait).await;
                if self.ctx.queue.peek_time().is_none()
                    && end_time.saturating_since(now) <= self.config.tail_window_ns
                {
                    self.ctx.clock.set(end_time)?;
                    break;
                }
                continue;
            };

            if next_time > horizon && horizon < end_time {
                // The generator still owes events at or before
                // `horizon`; advancing past it could put a later
                // injection in the past. Move the clock up to the
                // horizon so the generator's lookahead window can
                // progress, then let it inject.
                if horizon > self.ctx.clock.now() {
                    self.ctx.clock.set(horizon)?;
                }
                tokio::time::sleep(self.config.idle_wait).await;
                continue;
            }

            let Some(event) = self.ctx.queue.pop() else {
                continue;
            };

            if event.kind == EventKind::SimulationEnd {
                // A stale end marker (e.g. left over from a differently
                // sized schedule) is re-anchored instead of ending the
                // run early or late.
                let drift = event.time.as_nanos().abs_diff(end_time.as_nanos());
                if drift > self.config.tail_window_ns {
                    warn!(scheduled = %event.time, expected = %end_time, "rescheduling stale end event");
                    self.ctx.queue.schedule(end_time, EventKind::SimulationEnd);
                    continue;
                }
                self.ctx.clock.set(end_time)?;
                break;
            }

            let previous = self.ctx.clock.now();
            if event.time > previous {
                self.ctx.clock.set(event.time)?;
            }

            if self.config.real_time_mode && event.time > previous {
                let advanced = event.time.saturating_since(previous);
                let pace = Duration::from_nanos(advanced).min(self.config.max_pacing_sleep);
                tokio::time::sleep(pace).await;
                if *cancel_rx.borrow() {
                    self.ctx.queue.clear();
                    return Err(SimError::Cancelled);
                }
            }

            let event_type = event.kind.event_type();
            match self.handlers.get(&event_type) {
                None => {
                    warn!(event = ?event_type, "no handler registered, skipping");
                    self.trace
                        .record(event.time, event_type, DispatchOutcome::NoHandler);
                }
                Some(handler) => {
                    self.ctx.clock.begin_dispatch();
                    let result = handler.handle(&self.ctx, &event);
                    self.ctx.clock.end_dispatch();
                    let outcome = match &result {
                        Ok(()) => DispatchOutcome::Handled,
                        Err(_) => DispatchOutcome::HandlerError,
                    };
                    self.trace.record(event.time, event_type, outcome);
                    if let Err(err) = result {
                        debug!(
                            event = ?event_type,
                            time_ms = ns_to_ms(event.time.as_nanos()),
                            error = %err,
                            "handler failed, continuing"
                        );
                    }
                }
            }
        }

        debug!(final_time = %self.ctx.clock.now(), "engine loop finished");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
