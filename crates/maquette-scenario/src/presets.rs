//! Canned scenarios.
//!
//! Small, known-good deployments used by tests, benchmarks, and demos.
//! Each preset returns a validated [`Scenario`]; callers tweak rates or
//! replica counts by editing the returned value.

use crate::{ArrivalSpec, Scenario, ScenarioBuilder};

/// One service on one host with a single endpoint.
///
/// Host: 2 cores, 4 GB. Endpoint: 10ms ± 2ms CPU, 1ms network.
pub fn single_service(rate_rps: f64) -> Scenario {
    ScenarioBuilder::new()
        .host("h1", 2, 4.0)
        .service("app", 1, |svc| {
            svc.endpoint("/run", 10.0, 2.0, |ep| ep.net_latency(1.0, 0.2))
        })
        .workload("client", "app:/run", ArrivalSpec::poisson(rate_rps))
        .build()
        .expect("single-service preset is valid")
}

/// Classic edge → application → database chain across two hosts.
pub fn three_tier(rate_rps: f64) -> Scenario {
    ScenarioBuilder::new()
        .host("web-1", 4, 8.0)
        .host("db-1", 8, 32.0)
        .service("edge", 2, |svc| {
            svc.endpoint("/request", 3.0, 0.5, |ep| {
                ep.net_latency(1.0, 0.2).downstream("app:/handle", 1.0)
            })
        })
        .service("app", 2, |svc| {
            svc.endpoint("/handle", 12.0, 3.0, |ep| {
                ep.net_latency(0.5, 0.1)
                    .memory_mb(64.0)
                    .downstream("db:/query", 2.0)
            })
        })
        .service("db", 1, |svc| {
            svc.endpoint("/query", 5.0, 1.0, |ep| ep.memory_mb(128.0))
        })
        .workload("client", "edge:/request", ArrivalSpec::poisson(rate_rps))
        .build()
        .expect("three-tier preset is valid")
}

/// One aggregator fanning out to `width` leaf services.
///
/// `width` is clamped to at least 1.
pub fn fan_out(width: usize, rate_rps: f64) -> Scenario {
    let width = width.max(1);
    let mut builder = ScenarioBuilder::new().host("h1", 8, 16.0);

    builder = builder.service("aggregator", 2, |svc| {
        svc.endpoint("/gather", 4.0, 1.0, |mut ep| {
            ep = ep.net_latency(1.0, 0.2);
            for i in 0..width {
                ep = ep.downstream(&format!("leaf-{i}:/part"), 1.0);
            }
            ep
        })
    });

    for i in 0..width {
        builder = builder.service(&format!("leaf-{i}"), 1, |svc| {
            svc.endpoint("/part", 6.0, 1.5, |ep| ep)
        });
    }

    builder
        .workload("client", "aggregator:/gather", ArrivalSpec::poisson(rate_rps))
        .build()
        .expect("fan-out preset is valid")
}

// ============================================================================
// Tests
// ============================================================================
