//! Plain-text run reports.
//!
//! Renders a run record into the compact summary operators paste into
//! incident docs and capacity reviews. Formatting only; every number
//! comes from the run's aggregated metrics.

use std::fmt::Write as _;

use maquette_types::{Run, RunStatus};

/// Renders a run into a multi-line text report.
pub fn render_report(run: &Run) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "run {}", run.id);
    let _ = writeln!(out, "  status:     {}", run.status);
    if let Some(error) = &run.error {
        let _ = writeln!(out, "  error:      {error}");
    }
    if let Some(duration_ms) = run.duration_ms {
        let _ = writeln!(out, "  wall time:  {duration_ms} ms");
    }
    let _ = writeln!(out, "  sim time:   {} ms", run.config.duration_ms);

    let Some(metrics) = &run.metrics else {
        if run.status == RunStatus::Cancelled {
            let _ = writeln!(out, "  metrics:    none (cancelled before finalization)");
        } else {
            let _ = writeln!(out, "  metrics:    none");
        }
        return out;
    };

    let _ = writeln!(out, "  requests:   {} total, {} completed, {} failed",
        metrics.total_requests, metrics.completed_requests, metrics.failed_requests);
    let _ = writeln!(out, "  throughput: {:.2} rps", metrics.throughput_rps);
    let _ = writeln!(
        out,
        "  latency:    mean {:.2} ms, p50 {:.2} ms, p95 {:.2} ms, p99 {:.2} ms",
        metrics.mean_latency_ms,
        metrics.p50_latency_ms,
        metrics.p95_latency_ms,
        metrics.p99_latency_ms
    );

    if !metrics.endpoints.is_empty() {
        let _ = writeln!(out, "  endpoints:");
        let mut keys: Vec<&String> = metrics.endpoints.keys().collect();
        keys.sort();
        for key in keys {
            let ep = &metrics.endpoints[key];
            let _ = writeln!(
                out,
                "    {key}: {} reqs, p50 {:.2} ms, p99 {:.2} ms",
                ep.count, ep.p50_ms, ep.p99_ms
            );
        }
    }

    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use maquette_types::{
        EndpointLatencySummary, RunConfig, RunId, RunMetricsSummary,
    };

    fn completed_run() -> Run {
        let mut run = Run::new(
            RunId::parse("report-test").unwrap(),
            RunConfig::new("").with_duration_ms(1_000),
        );
        run.status = RunStatus::Completed;
        run.duration_ms = Some(42);

        let mut metrics = RunMetricsSummary {
            total_requests: 100,
            completed_requests: 95,
            failed_requests: 5,
            mean_latency_ms: 12.5,
            p50_latency_ms: 11.0,
            p95_latency_ms: 30.0,
            p99_latency_ms: 45.0,
            throughput_rps: 100.0,
            ..RunMetricsSummary::default()
        };
        metrics.endpoints.insert(
            "a:/x".to_string(),
            EndpointLatencySummary {
                count: 95,
                mean_ms: 12.5,
                p50_ms: 11.0,
                p95_ms: 30.0,
                p99_ms: 45.0,
            },
        );
        run.metrics = Some(metrics);
        run
    }

    #[test]
    fn renders_completed_run() {
        let report = render_report(&completed_run());

        assert!(report.contains("run report-test"));
        assert!(report.contains("status:     completed"));
        assert!(report.contains("100 total, 95 completed, 5 failed"));
        assert!(report.contains("throughput: 100.00 rps"));
        assert!(report.contains("a:/x: 95 reqs"));
    }

    #[test]
    fn renders_cancelled_run_without_metrics() {
        let mut run = Run::new(RunId::parse("cancelled-test").unwrap(), RunConfig::new(""));
        run.status = RunStatus::Cancelled;

        let report = render_report(&run);
        assert!(report.contains("cancelled before finalization"));
    }

    #[test]
    fn renders_failure_reason() {
        let mut run = Run::new(RunId::parse("failed-test").unwrap(), RunConfig::new(""));
        run.status = RunStatus::Failed;
        run.error = Some("service dependency cycle detected".to_string());

        let report = render_report(&run);
        assert!(report.contains("error:      service dependency cycle detected"));
    }
}
