//! Scheduled inference orchestrator.
//!
//! Two cooperating loops share a [`RollingBuffer`] and a [`ResultCache`]:
//!
//! ```text
//! BufferRefresh (every collection interval)
//!   source.query_last_n(context) ──full window──▶ buffer.replace()
//!
//! Inference (every inference interval, first run immediately)
//!   buffer.latest(context) ─▶ condition ─▶ oracle ─▶ post-process
//!     ─▶ inverse scale ─▶ score ─▶ publish ─▶ notify (critical only)
//! ```
//!
//! A failure anywhere in a cycle only costs that cycle: the previously
//! published result stays visible and the loop tries again next interval.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::buffer::RollingBuffer;
use super::source::TelemetrySource;
use super::state::{InferenceStatus, OrchestratorPhase, ResultCache, SchedulerStats};
use crate::config::defaults::REFRESH_LOG_EVERY;
use crate::config::MachineConfig;
use crate::notify::NotificationDispatcher;
use crate::oracle::{OracleError, PredictionOracle};
use crate::processing::{AnomalyScorer, PostProcessor, ProcessingError, SignalConditioner};
use crate::types::{
    to_matrix, AlertPayload, AnomalyVerdict, FeatureVector, InferenceResult, MachineStatus, Row, NUM_FEATURES,
};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Insufficient data: need {needed} readings, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Non-finite values in {0}")]
    NonFinite(&'static str),
}

fn all_finite(rows: &[Row]) -> bool {
    rows.iter().flatten().all(|v| v.is_finite())
}

// ============================================================================
// Inference Engine
// ============================================================================

/// Forecast matrices and verdict from one pass of the model pipeline.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    /// Oracle output, model space
    pub raw_forecast: Vec<Row>,
    /// After outlier removal and context rescale, model space
    pub processed_forecast: Vec<Row>,
    /// Processed forecast in sensor units
    pub physical_forecast: Vec<Row>,
    pub verdict: AnomalyVerdict,
}

/// The stateless part of a cycle: everything between a context window and
/// a verdict.
pub struct InferenceEngine {
    conditioner: SignalConditioner,
    postprocessor: PostProcessor,
    scorer: AnomalyScorer,
    oracle: Arc<dyn PredictionOracle>,
    context_length: usize,
    prediction_length: usize,
}

impl InferenceEngine {
    pub fn new(
        conditioner: SignalConditioner,
        postprocessor: PostProcessor,
        scorer: AnomalyScorer,
        oracle: Arc<dyn PredictionOracle>,
        context_length: usize,
        prediction_length: usize,
    ) -> Self {
        Self {
            conditioner,
            postprocessor,
            scorer,
            oracle,
            context_length,
            prediction_length,
        }
    }

    pub fn from_config(config: &MachineConfig, oracle: Arc<dyn PredictionOracle>) -> Result<Self, ProcessingError> {
        Ok(Self::new(
            SignalConditioner::from_config(&config.conditioning)?,
            PostProcessor::from_config(&config.postprocess),
            AnomalyScorer::from_config(&config.anomaly),
            oracle,
            config.inference.context_length,
            config.inference.prediction_length,
        ))
    }

    pub const fn conditioner(&self) -> &SignalConditioner {
        &self.conditioner
    }

    pub fn oracle_name(&self) -> &str {
        self.oracle.oracle_name()
    }

    /// Run the newest `context_length` readings of `window` through the
    /// pipeline. The oracle is never called on a short window.
    pub async fn run(&self, window: &[FeatureVector], at: DateTime<Utc>) -> Result<EngineOutput, PipelineError> {
        if window.len() < self.context_length {
            return Err(PipelineError::InsufficientData {
                needed: self.context_length,
                available: window.len(),
            });
        }
        let window = &window[window.len() - self.context_length..];

        let raw = to_matrix(window);
        if !all_finite(&raw) {
            return Err(PipelineError::NonFinite("context window"));
        }

        let scaled = self.conditioner.condition(&raw);
        if !all_finite(&scaled) {
            return Err(PipelineError::NonFinite("conditioned context"));
        }
        debug!(rows = scaled.len(), mode = self.conditioner.scaling().label(), "Context conditioned");

        let raw_forecast = self.oracle.forecast(&scaled).await?;
        if raw_forecast.len() != self.prediction_length {
            return Err(OracleError::Shape {
                expected_rows: self.prediction_length,
                expected_cols: NUM_FEATURES,
                rows: raw_forecast.len(),
                cols: NUM_FEATURES,
            }
            .into());
        }
        if !all_finite(&raw_forecast) {
            return Err(PipelineError::NonFinite("oracle forecast"));
        }
        debug!(oracle = self.oracle.oracle_name(), rows = raw_forecast.len(), "Forecast received");

        let processed_forecast = self.postprocessor.process(&raw_forecast, &scaled)?;
        let physical_forecast = self.conditioner.to_physical(&processed_forecast);
        if !all_finite(&physical_forecast) {
            return Err(PipelineError::NonFinite("post-processed forecast"));
        }
        debug!(
            preserved = self.postprocessor.preserve_leading,
            method = %self.postprocessor.method,
            "Forecast post-processed"
        );

        let verdict = self.scorer.score(&physical_forecast, at);
        Ok(EngineOutput {
            raw_forecast,
            processed_forecast,
            physical_forecast,
            verdict,
        })
    }
}

// ============================================================================
// Scheduler Orchestrator
// ============================================================================

/// Result of one pass of the inference loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Published { inference_count: u64, status: MachineStatus },
    /// Not enough buffered readings even after a backfill
    Skipped { available: usize },
    Failed(String),
}

/// Owns the buffer, the published results and the two periodic loops.
pub struct SchedulerOrchestrator {
    engine: InferenceEngine,
    source: Arc<dyn TelemetrySource>,
    notifier: Arc<dyn NotificationDispatcher>,
    buffer: RollingBuffer,
    results: ResultCache,
    stats: SchedulerStats,
    machine_id: String,
    context_length: usize,
    inference_interval: Duration,
    collection_interval: Duration,
    running: AtomicBool,
    shutdown: Mutex<Option<CancellationToken>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SchedulerOrchestrator {
    pub fn new(
        engine: InferenceEngine,
        source: Arc<dyn TelemetrySource>,
        notifier: Arc<dyn NotificationDispatcher>,
        config: &MachineConfig,
    ) -> Self {
        Self {
            engine,
            source,
            notifier,
            buffer: RollingBuffer::new(config.inference.buffer_capacity()),
            results: ResultCache::new(),
            stats: SchedulerStats::default(),
            machine_id: config.machine.id.clone(),
            context_length: config.inference.context_length,
            inference_interval: config.inference.interval(),
            collection_interval: config.telemetry.collection_interval(),
            running: AtomicBool::new(false),
            shutdown: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Build the engine from `config` around the given collaborators.
    pub fn from_config(
        config: &MachineConfig,
        source: Arc<dyn TelemetrySource>,
        oracle: Arc<dyn PredictionOracle>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Result<Self, ProcessingError> {
        let engine = InferenceEngine::from_config(config, oracle)?;
        Ok(Self::new(engine, source, notifier, config))
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Pre-fill the buffer, then spawn both loops.
    ///
    /// The loops stop when `parent` is cancelled or [`stop`](Self::stop) is
    /// called. Calling `start` on a running orchestrator is a no-op.
    pub async fn start(self: &Arc<Self>, parent: &CancellationToken) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return;
        }
        let token = parent.child_token();
        *self.shutdown.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());

        self.prefill().await;

        let refresh = tokio::spawn(Arc::clone(self).run_refresh_loop(token.clone()));
        let inference = tokio::spawn(Arc::clone(self).run_inference_loop(token));
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([refresh, inference]);
    }

    /// Cancel both loops and wait for them to exit.
    pub async fn stop(&self) {
        if let Some(token) = self.shutdown.lock().unwrap_or_else(PoisonError::into_inner).take() {
            token.cancel();
        }
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Orchestrator loop panicked: {}", e);
            }
        }
        self.running.store(false, Ordering::SeqCst);
        self.stats.set_phase(OrchestratorPhase::Stopped);
        info!("🛑 Orchestrator stopped | {}", self.stats);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Initial buffer fill before the loops start.
    pub async fn prefill(&self) {
        self.stats.set_phase(OrchestratorPhase::Collecting);
        if self.refresh_buffer().await {
            info!(size = self.buffer.size(), source = self.source.source_name(), "Buffer pre-filled");
        } else {
            warn!(
                size = self.buffer.size(),
                needed = self.context_length,
                "Pre-fill incomplete, inference will wait for data"
            );
        }
    }

    /// Refresh the buffer every collection interval until cancelled.
    pub async fn run_refresh_loop(self: Arc<Self>, token: CancellationToken) {
        info!("[BufferRefresh] Task starting with interval {:?}", self.collection_interval);
        let mut interval = tokio::time::interval(self.collection_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the buffer was just pre-filled.
        interval.tick().await;

        loop {
            tokio::select! {
                () = token.cancelled() => {
                    info!("[BufferRefresh] Received shutdown signal after {} refreshes", self.stats.buffer_refreshes());
                    return;
                }
                _ = interval.tick() => {
                    self.refresh_buffer().await;
                }
            }
        }
    }

    /// Run a cycle immediately, then one per inference interval until
    /// cancelled. Cancellation also interrupts the sleep.
    pub async fn run_inference_loop(self: Arc<Self>, token: CancellationToken) {
        info!("[Inference] Task starting with interval {:?}", self.inference_interval);

        loop {
            if token.is_cancelled() {
                break;
            }
            let outcome = self.run_cycle().await;
            debug!(?outcome, "[Inference] Cycle finished");

            if let Ok(step) = chrono::Duration::from_std(self.inference_interval) {
                self.stats.set_next_inference(Utc::now() + step);
            }
            tokio::select! {
                () = token.cancelled() => break,
                () = tokio::time::sleep(self.inference_interval) => {}
            }
        }
        info!("[Inference] Received shutdown signal after {} inferences", self.stats.inferences_run());
    }

    // ------------------------------------------------------------------------
    // Cycles
    // ------------------------------------------------------------------------

    /// Query the newest `context_length` readings and swap them in.
    ///
    /// A partial, empty or failed query leaves the buffer untouched.
    /// Returns whether the buffer was replaced.
    pub async fn refresh_buffer(&self) -> bool {
        let readings = match self.source.query_last_n(self.context_length).await {
            Ok(readings) => readings,
            Err(e) => {
                warn!(source = self.source.source_name(), error = %e, "[BufferRefresh] Query failed");
                return false;
            }
        };
        if readings.len() < self.context_length {
            warn!(
                received = readings.len(),
                needed = self.context_length,
                "[BufferRefresh] Partial window, buffer left untouched"
            );
            return false;
        }

        match self.buffer.replace(readings) {
            Ok(size) => {
                let count = self.stats.record_refresh(Utc::now());
                if count % REFRESH_LOG_EVERY == 0 {
                    info!(size, refreshes = count, "[BufferRefresh] Buffer refreshed");
                } else {
                    debug!(size, refreshes = count, "[BufferRefresh] Buffer refreshed");
                }
                true
            }
            Err(e) => {
                warn!(error = %e, "[BufferRefresh] Rejected telemetry batch");
                false
            }
        }
    }

    /// One pass of the inference loop: backfill if needed, run the engine,
    /// publish and notify.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let window = match self.buffer.latest(self.context_length) {
            Some(window) => window,
            None => {
                info!(
                    size = self.buffer.size(),
                    needed = self.context_length,
                    "[Inference] Buffer short, attempting backfill"
                );
                self.refresh_buffer().await;
                match self.buffer.latest(self.context_length) {
                    Some(window) => window,
                    None => {
                        let available = self.buffer.size();
                        self.stats.record_skip();
                        self.stats.set_phase(OrchestratorPhase::Collecting);
                        warn!(available, needed = self.context_length, "[Inference] Skipping cycle, insufficient data");
                        return CycleOutcome::Skipped { available };
                    }
                }
            }
        };

        self.results.set_lookback(window.clone());
        self.stats.set_phase(OrchestratorPhase::Inferring);
        let at = Utc::now();

        let output = match self.engine.run(&window, at).await {
            Ok(output) => output,
            Err(e) => {
                self.stats.record_failure();
                self.stats.set_phase(OrchestratorPhase::Degraded);
                error!(error = %e, "[Inference] Cycle failed, keeping previous result");
                return CycleOutcome::Failed(e.to_string());
            }
        };

        self.stats.set_phase(OrchestratorPhase::Publishing);
        let inference_count = self.stats.next_inference_count();
        let status = output.verdict.status;
        let alert = output
            .verdict
            .is_critical()
            .then(|| AlertPayload::from_verdict(&output.verdict, &self.machine_id));

        if alert.is_some() {
            warn!(
                inference = inference_count,
                critical = ?output.verdict.critical_features,
                "🚨 [Inference] {}",
                output.verdict.message
            );
        } else {
            info!(inference = inference_count, "✅ [Inference] {}", output.verdict.message);
        }

        self.results.publish(InferenceResult {
            inference_count,
            context: window,
            raw_forecast: output.raw_forecast,
            processed_forecast: output.processed_forecast,
            physical_forecast: output.physical_forecast,
            verdict: output.verdict,
            completed_at: Utc::now(),
        });
        self.stats.set_last_inference(at);

        if let Some(alert) = alert {
            self.dispatch(&alert, inference_count).await;
        }

        self.stats.set_phase(OrchestratorPhase::Ready);
        CycleOutcome::Published { inference_count, status }
    }

    async fn dispatch(&self, alert: &AlertPayload, inference_count: u64) {
        match self.notifier.notify(alert, inference_count).await {
            Ok(true) => {
                self.stats.record_alert();
                info!(via = self.notifier.dispatcher_name(), "📧 Alert dispatched for inference #{}", inference_count);
            }
            Ok(false) => {
                debug!(via = self.notifier.dispatcher_name(), "Alert not delivered (no endpoint)");
            }
            Err(e) => {
                error!(via = self.notifier.dispatcher_name(), error = %e, "Alert dispatch failed");
            }
        }
    }

    // ------------------------------------------------------------------------
    // Read-only query surface
    // ------------------------------------------------------------------------

    pub fn last_prediction(&self) -> Option<Arc<InferenceResult>> {
        self.results.current()
    }

    pub fn previous_forecast(&self) -> Option<Arc<InferenceResult>> {
        self.results.previous()
    }

    /// The context window used by the most recent attempted cycle.
    pub fn last_lookback(&self) -> Arc<Vec<FeatureVector>> {
        self.results.lookback()
    }

    pub fn buffer_snapshot(&self) -> Arc<Vec<FeatureVector>> {
        self.buffer.snapshot()
    }

    pub fn latest_reading(&self) -> Option<FeatureVector> {
        self.buffer.newest()
    }

    pub const fn collection_interval(&self) -> Duration {
        self.collection_interval
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn status(&self) -> InferenceStatus {
        let buffer_size = self.buffer.size();
        InferenceStatus {
            running: self.is_running(),
            phase: self.stats.phase(),
            inference_interval_secs: self.inference_interval.as_secs(),
            collection_interval_secs: self.collection_interval.as_secs(),
            context_length: self.context_length,
            prediction_length: self.engine.prediction_length,
            buffer_size,
            buffer_capacity: self.buffer.capacity(),
            buffer_ready: buffer_size >= self.context_length,
            inference_count: self.stats.inferences_run(),
            cycles_skipped: self.stats.cycles_skipped(),
            cycles_failed: self.stats.cycles_failed(),
            buffer_refreshes: self.stats.buffer_refreshes(),
            alerts_sent: self.stats.alerts_sent(),
            last_inference_time: self.stats.last_inference(),
            next_inference_time: self.stats.next_inference(),
            last_refresh_time: self.stats.last_refresh(),
            has_prediction: self.results.current().is_some(),
            has_previous_forecast: self.results.previous().is_some(),
            scaling_mode: self.engine.conditioner().scaling().label(),
            oracle: self.engine.oracle_name().to_string(),
            source: self.source.source_name().to_string(),
            notifier: self.notifier.dispatcher_name().to_string(),
        }
    }
}
