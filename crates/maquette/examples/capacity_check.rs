//! Answers a capacity question for a small three-tier deployment:
//! how does p99 latency move when checkout traffic triples?
//!
//! ```sh
//! cargo run --example capacity_check
//! ```

use maquette::{Maquette, Result};

const DEPLOYMENT: &str = r#"
hosts:
  - id: web-1
    cpu_cores: 4
    memory_gb: 8
  - id: db-1
    cpu_cores: 8
    memory_gb: 32
services:
  - id: edge
    replicas: 2
    endpoints:
      - path: /checkout
        mean_cpu_ms: 3
        cpu_sigma_ms: 0.5
        net_latency_ms:
          mean: 1
          sigma: 0.2
        downstream:
          - to: "app:/handle"
            call_count_mean: 1
  - id: app
    replicas: 2
    endpoints:
      - path: /handle
        mean_cpu_ms: 12
        cpu_sigma_ms: 3
        default_memory_mb: 64
        downstream:
          - to: "db:/query"
            call_count_mean: 2
  - id: db
    replicas: 1
    endpoints:
      - path: /query
        mean_cpu_ms: 5
        cpu_sigma_ms: 1
        default_memory_mb: 128
workload:
  - from: storefront
    to: "edge:/checkout"
    arrival:
      type: poisson
      rate_rps: RATE
"#;

#[tokio::main]
async fn main() -> Result<()> {
    let sim = Maquette::new();

    for rate in [50, 150] {
        let scenario = DEPLOYMENT.replace("RATE", &rate.to_string());
        let metrics = sim.simulate(&scenario, 5_000, Some(7)).await?;

        println!("--- {rate} RPS of checkout traffic ---");
        println!(
            "  {} requests, {:.0} rps sustained, {} failed",
            metrics.total_requests, metrics.throughput_rps, metrics.failed_requests
        );
        println!(
            "  latency p50 {:.1} ms / p95 {:.1} ms / p99 {:.1} ms",
            metrics.p50_latency_ms, metrics.p95_latency_ms, metrics.p99_latency_ms
        );
        let mut endpoints: Vec<_> = metrics.endpoints.iter().collect();
        endpoints.sort_by(|a, b| a.0.cmp(b.0));
        for (endpoint, summary) in endpoints {
            println!(
                "    {endpoint}: {} calls, p99 {:.1} ms",
                summary.count, summary.p99_ms
            );
        }
    }

    Ok(())
}
