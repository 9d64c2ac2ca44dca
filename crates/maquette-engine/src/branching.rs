//! Branching strategies for downstream fan-out.
//!
//! On request completion the service graph yields candidate downstream
//! edges; a branching strategy decides which of them to actually call,
//! and how many times.

use std::collections::HashMap;

use crate::{SimRng, graph::Edge};

/// A downstream call chosen by a branching strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCall {
    /// Target service id.
    pub target_service: String,
    /// Target endpoint path.
    pub target_path: String,
}

impl ResolvedCall {
    fn from_edge(edge: &Edge) -> Self {
        Self {
            target_service: edge.target_service.clone(),
            target_path: edge.target_path.clone(),
        }
    }
}

/// Chooses which candidate downstream calls to perform.
pub trait BranchingStrategy: Send + Sync {
    /// Selects the calls to emit for the given candidate edges.
    fn select_calls(&self, candidates: &[&Edge], rng: &mut SimRng) -> Vec<ResolvedCall>;
}

/// Emits each candidate `call_count_mean` times on average, resolving
/// fractional means by stochastic rounding: `n = ⌊mean⌋`, plus one with
/// probability `mean − n`. Missing or non-positive means count as 1.
#[derive(Debug, Default)]
pub struct DefaultBranching;

impl BranchingStrategy for DefaultBranching {
    fn select_calls(&self, candidates: &[&Edge], rng: &mut SimRng) -> Vec<ResolvedCall> {
        let mut calls = Vec::new();
        for edge in candidates {
            let mean = edge.call_count_mean.filter(|m| *m > 0.0).unwrap_or(1.0);
            let mut count = mean.floor() as u64;
            let fraction = mean - mean.floor();
            if rng.next_bool_with_probability(fraction) {
                count += 1;
            }
            for _ in 0..count {
                calls.push(ResolvedCall::from_edge(edge));
            }
        }
        calls
    }
}

/// Includes each candidate at most once, with a per-endpoint probability
/// from a preconfigured map keyed by `"svc:path"`. Candidates without an
/// entry fall back to `min(1, call_count_mean)`.
#[derive(Debug, Default)]
pub struct ProbabilisticBranching {
    probabilities: HashMap<String, f64>,
}

impl ProbabilisticBranching {
    /// Creates a strategy from per-endpoint probabilities.
    pub fn new(probabilities: HashMap<String, f64>) -> Self {
        Self { probabilities }
    }
}

impl BranchingStrategy for ProbabilisticBranching {
    fn select_calls(&self, candidates: &[&Edge], rng: &mut SimRng) -> Vec<ResolvedCall> {
        let mut calls = Vec::new();
        for edge in candidates {
            let probability = self
                .probabilities
                .get(&edge.target_key())
                .copied()
                .unwrap_or_else(|| edge.call_count_mean.unwrap_or(1.0).min(1.0));
            if rng.next_bool_with_probability(probability) {
                calls.push(ResolvedCall::from_edge(edge));
            }
        }
        calls
    }
}

// ============================================================================
// Tests
// ============================================================================
