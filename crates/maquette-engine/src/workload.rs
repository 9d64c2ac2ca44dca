//! Continuous workload generation.
//!
//! One [`WorkloadState`] per run turns the scenario's workload patterns
//! into a stream of `RequestArrival` events. A background task ticks
//! every 500ms of wall time (and once immediately on start), scheduling
//! every arrival that falls inside a one-second sim-time lookahead
//! window. Rates and patterns can be swapped mid-run.
//!
//! # Producer horizon
//!
//! The generator publishes a conservative horizon: the smallest
//! `next_event_time` over its active patterns. Every arrival at or
//! before the horizon has already been scheduled, so the engine can
//! safely process events up to it without risking a later injection in
//! its past. When the generator stops (cancellation or no active
//! patterns) the horizon becomes unbounded.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use maquette_scenario::{ArrivalKind, ArrivalSpec, WorkloadSpec, parse_downstream_target};
use maquette_types::{SimTime, ns_to_sec, sec_to_ns};
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::{EventQueue, SimClock, SimError, SimRng, event::EventKind};

/// Wall-time interval between generator ticks.
pub const EVENT_GENERATION_TICK: Duration = Duration::from_millis(500);

/// Sim-time lookahead window per tick, in nanoseconds.
pub const LOOKAHEAD_NS: u64 = 1_000_000_000;

// ============================================================================
// Producer Horizon
// ============================================================================

/// Conservative bound under which all producer events are scheduled.
///
/// Shared between the workload generator (writer) and the engine loop
/// (reader). The engine never advances virtual time past the horizon
/// while it is below the scheduled end of the run.
#[derive(Debug, Clone)]
pub struct ProducerHorizon(Arc<AtomicU64>);

impl ProducerHorizon {
    /// A horizon with no producers: the engine may process freely.
    pub fn unbounded() -> Self {
        Self(Arc::new(AtomicU64::new(u64::MAX)))
    }

    /// A horizon starting at the given time.
    pub fn starting_at(time: SimTime) -> Self {
        Self(Arc::new(AtomicU64::new(time.as_nanos())))
    }

    /// Returns the current horizon.
    pub fn get(&self) -> SimTime {
        SimTime::from_nanos(self.0.load(Ordering::Acquire))
    }

    /// Publishes a new horizon value.
    pub fn publish(&self, time: SimTime) {
        self.0.store(time.as_nanos(), Ordering::Release);
    }

    /// Lowers the horizon to `time` if it currently sits above it.
    pub fn lower_to(&self, time: SimTime) {
        self.0.fetch_min(time.as_nanos(), Ordering::AcqRel);
    }

    /// Removes the bound entirely.
    pub fn release(&self) {
        self.0.store(u64::MAX, Ordering::Release);
    }
}

// ============================================================================
// Pattern State
// ============================================================================

#[derive(Debug)]
struct PatternState {
    from: String,
    service_id: String,
    endpoint_path: String,
    arrival: ArrivalSpec,
    /// Phase anchor for bursty arrivals.
    anchor: SimTime,
    last_event_time: SimTime,
    next_event_time: SimTime,
    active: bool,
}

/// Read-only view of one workload pattern.
#[derive(Debug, Clone, Serialize)]
pub struct PatternSnapshot {
    /// Pattern key, `"{from}:{to}"`.
    pub key: String,
    /// Logical traffic source.
    pub from: String,
    /// Target service id.
    pub service_id: String,
    /// Target endpoint path.
    pub endpoint_path: String,
    /// Current arrival spec.
    pub arrival: ArrivalSpec,
    /// Sim time of the most recently scheduled arrival.
    pub last_event_time: SimTime,
    /// Sim time of the next arrival to schedule.
    pub next_event_time: SimTime,
    /// Whether the pattern is generating.
    pub active: bool,
}

// ============================================================================
// Inter-arrival Sampling
// ============================================================================

/// Samples the next inter-arrival gap in seconds.
///
/// Non-positive configured rates sample as 1 RPS; the stored rate is
/// left untouched. Bursty patterns with complete burst parameters
/// alternate burst/quiet phases anchored at `anchor`; incomplete ones
/// degrade to plain Poisson.
pub fn sample_inter_arrival(
    spec: &ArrivalSpec,
    rng: &mut SimRng,
    now: SimTime,
    anchor: SimTime,
) -> f64 {
    let rate = if spec.rate_rps > 0.0 {
        spec.rate_rps
    } else {
        1.0
    };

    match spec.kind {
        ArrivalKind::Poisson | ArrivalKind::Exponential | ArrivalKind::Unknown => {
            rng.exponential(rate)
        }
        ArrivalKind::Uniform | ArrivalKind::Constant => 1.0 / rate,
        ArrivalKind::Normal | ArrivalKind::Gaussian => {
            let mean = 1.0 / rate;
            let sigma = spec
                .std_dev_rps
                .map_or(0.1 * mean, |sd| sd / (rate * rate));
            rng.normal(mean, sigma).max(0.001)
        }
        ArrivalKind::Bursty => match (
            spec.burst_rate_rps,
            spec.burst_duration_seconds,
            spec.quiet_duration_seconds,
        ) {
            (Some(burst_rate), Some(burst_len), Some(quiet_len))
                if burst_rate > 0.0 && burst_len > 0.0 && quiet_len >= 0.0 =>
            {
                let cycle = burst_len + quiet_len;
                let elapsed = ns_to_sec(now.saturating_since(anchor));
                let position = if cycle > 0.0 { elapsed % cycle } else { 0.0 };
                let effective = if position < burst_len { burst_rate } else { rate };
                rng.exponential(effective)
            }
            _ => rng.exponential(rate),
        },
    }
}

// ============================================================================
// Workload State
// ============================================================================

/// Workload patterns and the generator loop for one run.
pub struct WorkloadState {
    patterns: RwLock<HashMap<String, Arc<Mutex<PatternState>>>>,
    queue: Arc<EventQueue>,
    clock: Arc<SimClock>,
    rng: Mutex<SimRng>,
    end_time: SimTime,
    horizon: ProducerHorizon,
}

impl WorkloadState {
    /// Builds pattern states from the scenario's workload entries and
    /// seeds each one's first arrival time.
    pub fn new(
        workload: &[WorkloadSpec],
        queue: Arc<EventQueue>,
        clock: Arc<SimClock>,
        mut rng: SimRng,
        end_time: SimTime,
        horizon: ProducerHorizon,
    ) -> Result<Self, SimError> {
        let now = clock.now();
        let mut patterns = HashMap::new();
        let mut min_next = u64::MAX;

        for spec in workload {
            let (service_id, endpoint_path) = parse_downstream_target(&spec.to)
                .map_err(|err| SimError::InvalidPattern(err.to_string()))?;

            let gap = sample_inter_arrival(&spec.arrival, &mut rng, now, now);
            let next_event_time = now.saturating_add_nanos(sec_to_ns(gap).max(1));
            min_next = min_next.min(next_event_time.as_nanos());

            patterns.insert(
                spec.key(),
                Arc::new(Mutex::new(PatternState {
                    from: spec.from.clone(),
                    service_id,
                    endpoint_path,
                    arrival: spec.arrival.clone(),
                    anchor: now,
                    last_event_time: now,
                    next_event_time,
                    active: true,
                })),
            );
        }

        horizon.publish(SimTime::from_nanos(min_next));

        Ok(Self {
            patterns: RwLock::new(patterns),
            queue,
            clock,
            rng: Mutex::new(rng),
            end_time,
            horizon,
        })
    }

    /// Spawns the generator task.
    ///
    /// Ticks immediately once, then every [`EVENT_GENERATION_TICK`] of
    /// wall time, until cancellation is signaled. On exit the producer
    /// horizon is released so the engine can finish the run.
    pub fn start(
        self: &Arc<Self>,
        mut cancel: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(EVENT_GENERATION_TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    changed = cancel.changed() => {
                        if changed.is_err() || *cancel.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        state.generate_tick();
                    }
                }
            }

            state.horizon.release();
            debug!("workload generator stopped");
        })
    }

    /// Runs one generation pass: schedules every active pattern's
    /// arrivals inside the lookahead window, then republishes the
    /// horizon.
    fn generate_tick(&self) {
        let now = self.clock.now();
        let lookahead = SimTime::from_nanos(
            (now.as_nanos().saturating_add(LOOKAHEAD_NS)).min(self.end_time.as_nanos()),
        );

        let states: Vec<Arc<Mutex<PatternState>>> = {
            let patterns = self.patterns.read().expect("workload lock poisoned");
            patterns.values().cloned().collect()
        };

        let mut min_next = u64::MAX;
        for state in states {
            let mut pattern = state.lock().expect("pattern mutex poisoned");
            if !pattern.active {
                continue;
            }

            while pattern.next_event_time < lookahead && pattern.next_event_time < self.end_time {
                self.queue.schedule(
                    pattern.next_event_time,
                    EventKind::RequestArrival {
                        service_id: pattern.service_id.clone(),
                        endpoint_path: pattern.endpoint_path.clone(),
                    },
                );
                pattern.last_event_time = pattern.next_event_time;

                let gap = {
                    let mut rng = self.rng.lock().expect("rng mutex poisoned");
                    sample_inter_arrival(
                        &pattern.arrival,
                        &mut rng,
                        pattern.next_event_time,
                        pattern.anchor,
                    )
                };
                // Strictly forward, even for degenerate samples.
                pattern.next_event_time = pattern
                    .next_event_time
                    .saturating_add_nanos(sec_to_ns(gap).max(1));
            }

            min_next = min_next.min(pattern.next_event_time.as_nanos());
        }

        self.horizon.publish(SimTime::from_nanos(min_next));
    }

    /// Updates a pattern's rate in place and reseeds its next arrival at
    /// the current sim time, so the new rate takes effect within one
    /// generator tick.
    pub fn update_rate(&self, key: &str, new_rps: f64) -> Result<(), SimError> {
        if new_rps <= 0.0 {
            return Err(SimError::InvalidRate(new_rps));
        }

        let state = {
            let patterns = self.patterns.read().expect("workload lock poisoned");
            patterns
                .get(key)
                .cloned()
                .ok_or_else(|| SimError::WorkloadPatternNotFound(key.to_string()))?
        };

        let now = self.clock.now();
        {
            let mut pattern = state.lock().expect("pattern mutex poisoned");
            pattern.arrival.rate_rps = new_rps;
            pattern.next_event_time = now;
        }
        // Pull the horizon back so the engine waits for the reseed.
        self.horizon.lower_to(now);
        Ok(())
    }

    /// Replaces a pattern wholesale: new source, target and arrival
    /// spec, with the next arrival reseeded at the current sim time.
    pub fn update_pattern(&self, key: &str, spec: &WorkloadSpec) -> Result<(), SimError> {
        let (service_id, endpoint_path) = parse_downstream_target(&spec.to)
            .map_err(|err| SimError::InvalidPattern(err.to_string()))?;

        let state = {
            let patterns = self.patterns.read().expect("workload lock poisoned");
            patterns
                .get(key)
                .cloned()
                .ok_or_else(|| SimError::WorkloadPatternNotFound(key.to_string()))?
        };

        let now = self.clock.now();
        {
            let mut pattern = state.lock().expect("pattern mutex poisoned");
            pattern.from = spec.from.clone();
            pattern.service_id = service_id;
            pattern.endpoint_path = endpoint_path;
            pattern.arrival = spec.arrival.clone();
            pattern.anchor = now;
            pattern.next_event_time = now;
        }
        self.horizon.lower_to(now);
        Ok(())
    }

    /// Pauses or resumes a pattern.
    ///
    /// Paused patterns stop generating but keep their state; resuming
    /// reseeds the next arrival at the current sim time.
    pub fn set_active(&self, key: &str, active: bool) -> Result<(), SimError> {
        let state = {
            let patterns = self.patterns.read().expect("workload lock poisoned");
            patterns
                .get(key)
                .cloned()
                .ok_or_else(|| SimError::WorkloadPatternNotFound(key.to_string()))?
        };

        let now = self.clock.now();
        {
            let mut pattern = state.lock().expect("pattern mutex poisoned");
            if pattern.active == active {
                return Ok(());
            }
            pattern.active = active;
            if active {
                pattern.next_event_time = now;
            }
        }
        if active {
            self.horizon.lower_to(now);
        }
        Ok(())
    }

    /// Returns a snapshot of one pattern.
    pub fn get_pattern(&self, key: &str) -> Option<PatternSnapshot> {
        let patterns = self.patterns.read().expect("workload lock poisoned");
        patterns.get(key).map(|state| {
            let pattern = state.lock().expect("pattern mutex poisoned");
            Self::snapshot_of(key, &pattern)
        })
    }

    /// Returns snapshots of all patterns, sorted by key.
    pub fn get_all_patterns(&self) -> Vec<PatternSnapshot> {
        let patterns = self.patterns.read().expect("workload lock poisoned");
        let mut snapshots: Vec<PatternSnapshot> = patterns
            .iter()
            .map(|(key, state)| {
                let pattern = state.lock().expect("pattern mutex poisoned");
                Self::snapshot_of(key, &pattern)
            })
            .collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }

    fn snapshot_of(key: &str, pattern: &PatternState) -> PatternSnapshot {
        PatternSnapshot {
            key: key.to_string(),
            from: pattern.from.clone(),
            service_id: pattern.service_id.clone(),
            endpoint_path: pattern.endpoint_path.clone(),
            arrival: pattern.arrival.clone(),
            last_event_time: pattern.last_event_time,
            next_event_time: pattern.next_event_time,
            active: pattern.active,
        }
    }

    /// Returns the number of configured patterns.
    pub fn pattern_count(&self) -> usize {
        let patterns = self.patterns.read().expect("workload lock poisoned");
        patterns.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
