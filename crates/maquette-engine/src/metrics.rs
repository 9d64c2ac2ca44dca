//! Metric recording (write side) and summary aggregation.
//!
//! Handlers emit point-in-time records through [`MetricsRecorder`]; at
//! teardown the executor converts the recorded series into a
//! [`RunMetricsSummary`]. Latency samples additionally feed an HDR
//! histogram so percentiles do not require storing sorted samples.

use std::{collections::HashMap, sync::Mutex, time::Duration};

use hdrhistogram::Histogram;
use maquette_types::{EndpointLatencySummary, RunMetricsSummary, SeriesSummary, SimTime, label, metric};

use crate::RequestStore;

/// One recorded sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricPoint {
    /// Virtual time of the sample.
    pub time: SimTime,
    /// Sample value.
    pub value: f64,
}

/// A metric series identity: name plus sorted label pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    /// Metric name.
    pub name: String,
    /// Label pairs, sorted by key.
    pub labels: Vec<(String, String)>,
}

struct Inner {
    series: HashMap<SeriesKey, Vec<MetricPoint>>,
    latencies_us: Histogram<u64>,
    endpoint_latencies_us: HashMap<String, Histogram<u64>>,
    recording: bool,
}

/// Thread-safe metric store for one run.
///
/// A single mutex guards both the time series and the latency histogram.
pub struct MetricsRecorder {
    inner: Mutex<Inner>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                series: HashMap::new(),
                latencies_us: Histogram::new(3).expect("three significant figures is valid"),
                endpoint_latencies_us: HashMap::new(),
                recording: true,
            }),
        }
    }

    /// Records one sample.
    ///
    /// Latency samples (`request_latency_ms`) also feed the percentile
    /// histogram at microsecond resolution. Records arriving after
    /// [`MetricsRecorder::stop`] are dropped.
    pub fn record(&self, name: &str, value: f64, time: SimTime, labels: &[(&str, &str)]) {
        let mut inner = self.inner.lock().expect("metrics mutex poisoned");
        if !inner.recording {
            return;
        }

        if name == metric::REQUEST_LATENCY_MS {
            let micros = (value.max(0.0) * 1_000.0) as u64;
            inner.latencies_us.saturating_record(micros);

            let service = labels
                .iter()
                .find(|(k, _)| *k == label::SERVICE)
                .map(|(_, v)| *v);
            let endpoint = labels
                .iter()
                .find(|(k, _)| *k == label::ENDPOINT)
                .map(|(_, v)| *v);
            if let (Some(service), Some(endpoint)) = (service, endpoint) {
                inner
                    .endpoint_latencies_us
                    .entry(format!("{service}:{endpoint}"))
                    .or_insert_with(|| {
                        Histogram::new(3).expect("three significant figures is valid")
                    })
                    .saturating_record(micros);
            }
        }

        let mut sorted: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        sorted.sort();

        let key = SeriesKey {
            name: name.to_string(),
            labels: sorted,
        };
        inner
            .series
            .entry(key)
            .or_default()
            .push(MetricPoint { time, value });
    }

    /// Freezes the recorder; subsequent records are dropped.
    pub fn stop(&self) {
        let mut inner = self.inner.lock().expect("metrics mutex poisoned");
        inner.recording = false;
    }

    /// Returns the number of distinct series recorded.
    pub fn series_count(&self) -> usize {
        let inner = self.inner.lock().expect("metrics mutex poisoned");
        inner.series.len()
    }

    /// Returns the total sample count for a metric name across label sets.
    pub fn sample_count(&self, name: &str) -> u64 {
        let inner = self.inner.lock().expect("metrics mutex poisoned");
        inner
            .series
            .iter()
            .filter(|(key, _)| key.name == name)
            .map(|(_, points)| points.len() as u64)
            .sum()
    }

    /// Converts the recorded series into a run summary.
    ///
    /// `throughput_rps` is `total_requests / wall_duration_s`, zero when
    /// the wall duration is zero.
    pub fn summarize(&self, store: &RequestStore, wall_duration: Duration) -> RunMetricsSummary {
        let inner = self.inner.lock().expect("metrics mutex poisoned");

        let mut series: HashMap<String, SeriesSummary> = HashMap::new();
        for (key, points) in &inner.series {
            let summary = series.entry(key.name.clone()).or_insert(SeriesSummary {
                count: 0,
                total: 0.0,
                mean: 0.0,
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
            });
            for point in points {
                summary.count += 1;
                summary.total += point.value;
                summary.min = summary.min.min(point.value);
                summary.max = summary.max.max(point.value);
            }
        }
        for summary in series.values_mut() {
            if summary.count > 0 {
                summary.mean = summary.total / summary.count as f64;
            } else {
                summary.min = 0.0;
                summary.max = 0.0;
            }
        }

        let hist = &inner.latencies_us;
        let (mean, p50, p95, p99) = if hist.is_empty() {
            (0.0, 0.0, 0.0, 0.0)
        } else {
            (
                hist.mean() / 1_000.0,
                hist.value_at_quantile(0.50) as f64 / 1_000.0,
                hist.value_at_quantile(0.95) as f64 / 1_000.0,
                hist.value_at_quantile(0.99) as f64 / 1_000.0,
            )
        };

        let endpoints = inner
            .endpoint_latencies_us
            .iter()
            .map(|(key, hist)| {
                (
                    key.clone(),
                    EndpointLatencySummary {
                        count: hist.len(),
                        mean_ms: hist.mean() / 1_000.0,
                        p50_ms: hist.value_at_quantile(0.50) as f64 / 1_000.0,
                        p95_ms: hist.value_at_quantile(0.95) as f64 / 1_000.0,
                        p99_ms: hist.value_at_quantile(0.99) as f64 / 1_000.0,
                    },
                )
            })
            .collect();

        let total_requests = store.total();
        let wall_s = wall_duration.as_secs_f64();
        let throughput_rps = if wall_s > 0.0 {
            total_requests as f64 / wall_s
        } else {
            0.0
        };

        RunMetricsSummary {
            total_requests,
            completed_requests: store.completed(),
            failed_requests: store.failed(),
            mean_latency_ms: mean,
            p50_latency_ms: p50,
            p95_latency_ms: p95,
            p99_latency_ms: p99,
            throughput_rps,
            series,
            endpoints,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use maquette_types::{Request, label};

    #[test]
    fn records_series_by_name_and_labels() {
        let recorder = MetricsRecorder::new();
        let t = SimTime::from_millis(1.0);

        recorder.record(metric::REQUEST_COUNT, 1.0, t, &[(label::SERVICE, "a")]);
        recorder.record(metric::REQUEST_COUNT, 1.0, t, &[(label::SERVICE, "a")]);
        recorder.record(metric::REQUEST_COUNT, 1.0, t, &[(label::SERVICE, "b")]);

        assert_eq!(recorder.series_count(), 2);
        assert_eq!(recorder.sample_count(metric::REQUEST_COUNT), 3);
    }

    #[test]
    fn label_order_does_not_split_series() {
        let recorder = MetricsRecorder::new();
        let t = SimTime::ZERO;

        recorder.record(
            metric::CPU_UTILIZATION,
            0.5,
            t,
            &[(label::INSTANCE, "a-0"), (label::HOST, "h1")],
        );
        recorder.record(
            metric::CPU_UTILIZATION,
            0.6,
            t,
            &[(label::HOST, "h1"), (label::INSTANCE, "a-0")],
        );

        assert_eq!(recorder.series_count(), 1);
    }

    #[test]
    fn stop_drops_further_records() {
        let recorder = MetricsRecorder::new();
        recorder.record(metric::REQUEST_COUNT, 1.0, SimTime::ZERO, &[]);
        recorder.stop();
        recorder.record(metric::REQUEST_COUNT, 1.0, SimTime::ZERO, &[]);

        assert_eq!(recorder.sample_count(metric::REQUEST_COUNT), 1);
    }

    #[test]
    fn summary_percentiles_and_throughput() {
        let recorder = MetricsRecorder::new();
        let store = RequestStore::new();

        for i in 0..100u32 {
            let request = Request::arriving("a", "/x", SimTime::ZERO);
            let id = request.id;
            store.insert(request);
            store
                .mark_completed(id, SimTime::from_millis(f64::from(i + 1)))
                .unwrap();
            recorder.record(
                metric::REQUEST_LATENCY_MS,
                f64::from(i + 1),
                SimTime::from_millis(f64::from(i + 1)),
                &[(label::SERVICE, "a"), (label::ENDPOINT, "/x")],
            );
        }

        let summary = recorder.summarize(&store, Duration::from_secs(10));

        assert_eq!(summary.total_requests, 100);
        assert_eq!(summary.completed_requests, 100);
        assert!((summary.throughput_rps - 10.0).abs() < 1e-9);

        // Latencies are 1..=100 ms; the histogram is accurate to ~0.1%.
        assert!((summary.p50_latency_ms - 50.0).abs() < 2.0);
        assert!((summary.p95_latency_ms - 95.0).abs() < 2.0);
        assert!((summary.p99_latency_ms - 99.0).abs() < 2.0);
        assert!((summary.mean_latency_ms - 50.5).abs() < 2.0);

        let counts = summary.series.get(metric::REQUEST_LATENCY_MS).unwrap();
        assert_eq!(counts.count, 100);
        assert!((counts.min - 1.0).abs() < f64::EPSILON);
        assert!((counts.max - 100.0).abs() < f64::EPSILON);

        let endpoint = summary.endpoints.get("a:/x").expect("endpoint summary");
        assert_eq!(endpoint.count, 100);
        assert!((endpoint.p50_ms - 50.0).abs() < 2.0);
    }

    #[test]
    fn latency_without_endpoint_labels_skips_breakdown() {
        let recorder = MetricsRecorder::new();
        let store = RequestStore::new();

        recorder.record(metric::REQUEST_LATENCY_MS, 5.0, SimTime::ZERO, &[]);

        let summary = recorder.summarize(&store, Duration::from_secs(1));
        assert!(summary.endpoints.is_empty());
        assert!(summary.p50_latency_ms > 0.0);
    }

    #[test]
    fn zero_duration_means_zero_throughput() {
        let recorder = MetricsRecorder::new();
        let store = RequestStore::new();
        store.insert(Request::arriving("a", "/x", SimTime::ZERO));

        let summary = recorder.summarize(&store, Duration::ZERO);
        assert!((summary.throughput_rps - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_recorder_summarizes_to_zeros() {
        let recorder = MetricsRecorder::new();
        let store = RequestStore::new();

        let summary = recorder.summarize(&store, Duration::from_secs(1));
        assert_eq!(summary.total_requests, 0);
        assert!((summary.p99_latency_ms - 0.0).abs() < f64::EPSILON);
        assert!(summary.series.is_empty());
    }
}
