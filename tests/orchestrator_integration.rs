//! Orchestrator Integration Tests
//!
//! Drives the full inference cycle with deterministic in-process stubs for
//! the telemetry source, the forecasting model and the alert dispatcher.
//! No network, no model files.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use machine_sentry::config::MachineConfig;
use machine_sentry::notify::{NotificationDispatcher, NotifyError};
use machine_sentry::oracle::{OracleError, PredictionOracle};
use machine_sentry::pipeline::{
    CycleOutcome, InferenceEngine, RollingBuffer, SchedulerOrchestrator, SourceError, TelemetrySource,
};
use machine_sentry::processing::{AnomalyScorer, PostProcessor, SignalConditioner};
use machine_sentry::types::{AlertPayload, FeatureVector, MachineStatus, Row};

// ============================================================================
// Stubs
// ============================================================================

fn t0() -> DateTime<Utc> {
    Utc.timestamp_opt(1_714_557_600, 0).unwrap()
}

/// Healthy machine: every channel oscillates well inside its limits.
fn healthy_row(i: usize) -> Row {
    let phase = i as f64 / 12.0;
    [
        7.5 + 0.4 * phase.sin(),
        38.0 + 1.5 * phase.cos(),
        37.0 + 1.0 * phase.sin(),
        -0.6 + 0.1 * phase.cos(),
        -0.7 + 0.1 * phase.sin(),
        9.8 + 0.3 * phase.cos(),
    ]
}

fn healthy_window(n: usize) -> Vec<FeatureVector> {
    (0..n)
        .map(|i| FeatureVector::from_row(t0() + ChronoDuration::seconds(i as i64 * 10), "lathe-3", healthy_row(i)))
        .collect()
}

/// Returns at most `available` healthy readings.
struct StubSource {
    available: AtomicUsize,
}

impl StubSource {
    fn new(available: usize) -> Arc<Self> {
        Arc::new(Self {
            available: AtomicUsize::new(available),
        })
    }
}

#[async_trait]
impl TelemetrySource for StubSource {
    async fn query_last_n(&self, n: usize) -> Result<Vec<FeatureVector>, SourceError> {
        Ok(healthy_window(self.available.load(Ordering::SeqCst).min(n)))
    }

    fn source_name(&self) -> &str {
        "stub"
    }
}

/// Returns the same forecast every call and counts calls. Fails while
/// `failing` is set.
struct StubOracle {
    forecast: Vec<Row>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl StubOracle {
    fn new(forecast: Vec<Row>) -> Arc<Self> {
        Arc::new(Self {
            forecast,
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PredictionOracle for StubOracle {
    async fn forecast(&self, context: &[Row]) -> Result<Vec<Row>, OracleError> {
        assert_eq!(context.len(), 240, "oracle must only see full windows");
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(OracleError::Runtime("model crashed".to_string()));
        }
        Ok(self.forecast.clone())
    }

    fn oracle_name(&self) -> &str {
        "stub"
    }
}

/// Records every alert it is handed.
#[derive(Default)]
struct RecordingDispatcher {
    alerts: Mutex<Vec<(AlertPayload, u64)>>,
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn notify(&self, alert: &AlertPayload, inference_count: u64) -> Result<bool, NotifyError> {
        self.alerts.lock().unwrap().push((alert.clone(), inference_count));
        Ok(true)
    }

    fn dispatcher_name(&self) -> &str {
        "recording"
    }
}

/// Smooth, in-range 60-row forecast.
fn steady_forecast() -> Vec<Row> {
    (0..60).map(|i| healthy_row(240 + i)).collect()
}

fn config() -> MachineConfig {
    let mut config = MachineConfig::default();
    config.machine.id = "lathe-3".to_string();
    config
}

fn build(
    source: &Arc<StubSource>,
    oracle: &Arc<StubOracle>,
    dispatcher: &Arc<RecordingDispatcher>,
    config: &MachineConfig,
) -> SchedulerOrchestrator {
    SchedulerOrchestrator::from_config(
        config,
        Arc::clone(source) as Arc<dyn TelemetrySource>,
        Arc::clone(oracle) as Arc<dyn PredictionOracle>,
        Arc::clone(dispatcher) as Arc<dyn NotificationDispatcher>,
    )
    .unwrap()
}

// ============================================================================
// Scheduling
// ============================================================================

#[tokio::test]
async fn short_window_never_reaches_oracle() {
    let source = StubSource::new(200);
    let oracle = StubOracle::new(steady_forecast());
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let orch = build(&source, &oracle, &dispatcher, &config());

    for _ in 0..3 {
        assert!(matches!(orch.run_cycle().await, CycleOutcome::Skipped { .. }));
    }
    assert_eq!(oracle.calls(), 0);
    assert!(orch.last_prediction().is_none());
    assert_eq!(orch.status().cycles_skipped, 3);
    assert!(!orch.status().buffer_ready);
}

#[tokio::test]
async fn data_arriving_later_unblocks_inference() {
    let source = StubSource::new(100);
    let oracle = StubOracle::new(steady_forecast());
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let orch = build(&source, &oracle, &dispatcher, &config());

    assert!(!orch.refresh_buffer().await);
    assert_eq!(orch.buffer_snapshot().len(), 0);

    source.available.store(240, Ordering::SeqCst);
    assert!(matches!(orch.run_cycle().await, CycleOutcome::Published { .. }));
    assert_eq!(oracle.calls(), 1);
}

#[test]
fn full_replace_leaves_no_old_points() {
    let buffer = RollingBuffer::new(340);
    buffer.replace(healthy_window(240)).unwrap();

    let shifted: Vec<FeatureVector> = healthy_window(480).split_off(240);
    let expected = shifted.clone();
    buffer.replace(shifted).unwrap();

    assert_eq!(buffer.size(), 240);
    assert_eq!(*buffer.snapshot(), expected);
}

// ============================================================================
// End-to-end cycle
// ============================================================================

#[tokio::test]
async fn end_to_end_cycle_publishes_and_retains_previous() {
    let source = StubSource::new(240);
    let oracle = StubOracle::new(steady_forecast());
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let config = config();
    let orch = build(&source, &oracle, &dispatcher, &config);

    assert!(orch.refresh_buffer().await);
    assert_eq!(orch.buffer_snapshot().len(), 240);

    let first = orch.run_cycle().await;
    assert_eq!(
        first,
        CycleOutcome::Published {
            inference_count: 1,
            status: MachineStatus::Normal
        }
    );
    let result = orch.last_prediction().unwrap();
    assert_eq!(result.inference_count, 1);
    assert_eq!(result.context.len(), 240);
    assert_eq!(result.raw_forecast, steady_forecast());
    assert_eq!(result.processed_forecast.len(), 60);
    // smooth forecast has no outliers, so the leading rows pass through untouched
    let cleaned = PostProcessor::from_config(&config.postprocess).remove_outliers(&steady_forecast());
    assert_eq!(result.processed_forecast[..3], cleaned[..3]);
    assert!(result.verdict.critical_features.is_empty());
    assert!(orch.previous_forecast().is_none());
    assert_eq!(*orch.last_lookback(), result.context);

    orch.run_cycle().await;
    let current = orch.last_prediction().unwrap();
    let previous = orch.previous_forecast().unwrap();
    assert_eq!(current.inference_count, 2);
    assert_eq!(previous.inference_count, 1);
    assert!(Arc::ptr_eq(&previous, &result));

    let status = orch.status();
    assert_eq!(status.inference_count, 2);
    assert!(status.has_previous_forecast);
    assert_eq!(status.scaling_mode, "unscaled");
    assert_eq!(status.oracle, "stub");
    assert!(dispatcher.alerts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn critical_forecast_dispatches_alert() {
    let source = StubSource::new(240);
    // tempA runs hot for the whole horizon
    let hot: Vec<Row> = steady_forecast()
        .into_iter()
        .map(|mut r| {
            r[1] = 52.0;
            r
        })
        .collect();
    let oracle = StubOracle::new(hot);
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let mut config = config();
    // score the raw forecast so the hot rows are not pulled back into range
    config.postprocess.preserve_leading = 60;
    let orch = build(&source, &oracle, &dispatcher, &config);

    let outcome = orch.run_cycle().await;
    assert_eq!(
        outcome,
        CycleOutcome::Published {
            inference_count: 1,
            status: MachineStatus::Critical
        }
    );

    let alerts = dispatcher.alerts.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    let (alert, count) = &alerts[0];
    assert_eq!(*count, 1);
    assert_eq!(alert.machine_id, "lathe-3");
    assert_eq!(alert.critical_features, vec!["tempA".to_string()]);
    assert_eq!(alert.anomaly_scores["tempA"], 100.0);
    assert_eq!(orch.status().alerts_sent, 1);
}

#[tokio::test]
async fn failed_cycle_keeps_last_prediction() {
    let source = StubSource::new(240);
    let oracle = StubOracle::new(steady_forecast());
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let orch = build(&source, &oracle, &dispatcher, &config());

    assert!(matches!(orch.run_cycle().await, CycleOutcome::Published { inference_count: 1, .. }));
    let first = orch.last_prediction().unwrap();

    oracle.failing.store(true, Ordering::SeqCst);
    assert!(matches!(orch.run_cycle().await, CycleOutcome::Failed(msg) if msg.contains("model crashed")));

    let kept = orch.last_prediction().unwrap();
    assert!(Arc::ptr_eq(&first, &kept));
    assert_eq!(kept.inference_count, 1);
    assert!(orch.previous_forecast().is_none());
    let status = orch.status();
    assert_eq!(status.inference_count, 1);
    assert_eq!(status.cycles_failed, 1);
    assert!(status.has_prediction);
    assert!(!status.has_previous_forecast);
}

#[tokio::test]
async fn non_finite_forecast_fails_without_touching_results() {
    let source = StubSource::new(240);
    let mut nan_forecast = steady_forecast();
    nan_forecast[5][2] = f64::NAN;
    let oracle = StubOracle::new(nan_forecast);
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let orch = build(&source, &oracle, &dispatcher, &config());

    assert!(matches!(orch.run_cycle().await, CycleOutcome::Failed(_)));
    assert!(orch.last_prediction().is_none());
    assert_eq!(orch.status().cycles_failed, 1);
    assert_eq!(orch.status().inference_count, 0);
}

// ============================================================================
// Determinism
// ============================================================================

#[tokio::test]
async fn identical_window_gives_identical_verdict() {
    let config = config();
    let oracle = StubOracle::new(steady_forecast());
    let engine = InferenceEngine::new(
        SignalConditioner::from_config(&config.conditioning).unwrap(),
        PostProcessor::from_config(&config.postprocess),
        AnomalyScorer::from_config(&config.anomaly),
        Arc::clone(&oracle) as Arc<dyn PredictionOracle>,
        240,
        60,
    );
    let window = healthy_window(240);
    let at = t0();

    let a = engine.run(&window, at).await.unwrap();
    let b = engine.run(&window, at).await.unwrap();
    assert_eq!(a.verdict, b.verdict);
    let bits = |rows: &[Row]| rows.iter().flatten().map(|v| v.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(&a.physical_forecast), bits(&b.physical_forecast));
    assert_eq!(oracle.calls(), 2);
}

#[tokio::test]
async fn repeated_cycles_on_static_data_agree() {
    let source = StubSource::new(240);
    let oracle = StubOracle::new(steady_forecast());
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let orch = build(&source, &oracle, &dispatcher, &config());

    orch.run_cycle().await;
    orch.run_cycle().await;
    let current = orch.last_prediction().unwrap();
    let previous = orch.previous_forecast().unwrap();
    assert_eq!(current.verdict.status, previous.verdict.status);
    assert_eq!(current.verdict.anomaly_scores, previous.verdict.anomaly_scores);
    assert_eq!(current.verdict.message, previous.verdict.message);
    assert_eq!(current.physical_forecast, previous.physical_forecast);
}
