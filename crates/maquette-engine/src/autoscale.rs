//! Autoscaling decision hook.
//!
//! The core never scales on its own; after each completion it offers the
//! affected service's load to a [`ScalingPolicy`], and schedules a
//! `ScaleUp`/`ScaleDown` event only when the policy asks for one. The
//! default policy never does.

use std::{
    collections::HashMap,
    sync::Mutex,
};

use maquette_scenario::AutoscalingSpec;
use maquette_types::SimTime;

use crate::resources::ServiceLoad;

/// A scaling decision for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingAction {
    /// Add this many replicas.
    Up(u32),
    /// Remove up to this many replicas.
    Down(u32),
}

/// Decides whether a service should change its replica count.
pub trait ScalingPolicy: Send + Sync {
    /// Returns the action to take for the given load, if any.
    fn decide(&self, load: &ServiceLoad, now: SimTime) -> Option<ScalingAction>;
}

/// The default policy: never scales.
#[derive(Debug, Default)]
pub struct NoAutoscaling;

impl ScalingPolicy for NoAutoscaling {
    fn decide(&self, _load: &ServiceLoad, _now: SimTime) -> Option<ScalingAction> {
        None
    }
}

/// Threshold autoscaler over mean CPU utilization.
///
/// Scales up one replica when mean utilization exceeds the configured
/// threshold, down one when it falls below half of it, within the
/// `[min_replicas, max_replicas]` band. Decisions per service are rate
/// limited by a sim-time cool-down so a burst does not trigger a
/// scaling staircase.
#[derive(Debug)]
pub struct UtilizationAutoscaler {
    min_replicas: usize,
    max_replicas: usize,
    cpu_threshold: f64,
    cooldown_ms: f64,
    last_decision: Mutex<HashMap<String, SimTime>>,
}

impl UtilizationAutoscaler {
    /// Default sim-time cool-down between decisions for one service.
    pub const DEFAULT_COOLDOWN_MS: f64 = 5_000.0;

    /// Creates an autoscaler from scenario settings.
    pub fn from_spec(spec: &AutoscalingSpec) -> Self {
        Self {
            min_replicas: spec.min_replicas.max(1) as usize,
            max_replicas: spec.max_replicas.max(spec.min_replicas.max(1)) as usize,
            cpu_threshold: spec.cpu_threshold.clamp(0.0, 1.0),
            cooldown_ms: Self::DEFAULT_COOLDOWN_MS,
            last_decision: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the decision cool-down.
    pub fn with_cooldown_ms(mut self, cooldown_ms: f64) -> Self {
        self.cooldown_ms = cooldown_ms;
        self
    }

    fn in_cooldown(&self, service: &str, now: SimTime) -> bool {
        let last = self.last_decision.lock().expect("autoscaler mutex poisoned");
        last.get(service)
            .is_some_and(|at| now.saturating_since(*at) < maquette_types::ms_to_ns(self.cooldown_ms))
    }

    fn note_decision(&self, service: &str, now: SimTime) {
        let mut last = self.last_decision.lock().expect("autoscaler mutex poisoned");
        last.insert(service.to_string(), now);
    }
}

impl ScalingPolicy for UtilizationAutoscaler {
    fn decide(&self, load: &ServiceLoad, now: SimTime) -> Option<ScalingAction> {
        if load.instance_count == 0 || self.in_cooldown(&load.service, now) {
            return None;
        }

        if load.mean_cpu_utilization > self.cpu_threshold
            && load.instance_count < self.max_replicas
        {
            self.note_decision(&load.service, now);
            return Some(ScalingAction::Up(1));
        }

        if load.mean_cpu_utilization < self.cpu_threshold / 2.0
            && load.total_queue_length == 0
            && load.instance_count > self.min_replicas
        {
            self.note_decision(&load.service, now);
            return Some(ScalingAction::Down(1));
        }

        None
    }
}

// ============================================================================
// Tests
// ============================================================================
