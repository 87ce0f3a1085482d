//! Shared orchestrator state: published results, counters and phase.
//!
//! Everything here is read by API handlers while the two loops write it, so
//! publication goes through `ArcSwap` and counters are plain atomics.

use arc_swap::ArcSwap;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::types::{FeatureVector, InferenceResult};

// ============================================================================
// Result Cache
// ============================================================================

#[derive(Default)]
struct Published {
    current: Option<Arc<InferenceResult>>,
    previous: Option<Arc<InferenceResult>>,
}

/// Current and previous inference results plus the last context window.
///
/// Readers see either the old pair or the new pair, never a mix.
#[derive(Default)]
pub struct ResultCache {
    published: ArcSwap<Published>,
    lookback: ArcSwap<Vec<FeatureVector>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `result` as current, shifting the old current into previous.
    ///
    /// Only the inference loop publishes, so load-then-store is race free.
    pub fn publish(&self, result: InferenceResult) {
        let old = self.published.load_full();
        self.published.store(Arc::new(Published {
            current: Some(Arc::new(result)),
            previous: old.current.clone(),
        }));
    }

    pub fn set_lookback(&self, window: Vec<FeatureVector>) {
        self.lookback.store(Arc::new(window));
    }

    pub fn current(&self) -> Option<Arc<InferenceResult>> {
        self.published.load().current.clone()
    }

    pub fn previous(&self) -> Option<Arc<InferenceResult>> {
        self.published.load().previous.clone()
    }

    pub fn lookback(&self) -> Arc<Vec<FeatureVector>> {
        self.lookback.load_full()
    }
}

// ============================================================================
// Orchestrator Phase
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorPhase {
    /// Constructed, not started
    Idle,
    /// Waiting for a full context window
    Collecting,
    /// Buffer full, waiting for the next inference tick
    Ready,
    /// Running the model pipeline
    Inferring,
    /// Installing a new result
    Publishing,
    /// Last cycle failed; previous result still served
    Degraded,
    Stopped,
}

impl OrchestratorPhase {
    const ALL: [Self; 7] = [
        Self::Idle,
        Self::Collecting,
        Self::Ready,
        Self::Inferring,
        Self::Publishing,
        Self::Degraded,
        Self::Stopped,
    ];

    const fn index(self) -> u8 {
        self as u8
    }

    fn from_index(i: u8) -> Self {
        Self::ALL.get(usize::from(i)).copied().unwrap_or(Self::Idle)
    }
}

impl std::fmt::Display for OrchestratorPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Collecting => write!(f, "Collecting"),
            Self::Ready => write!(f, "Ready"),
            Self::Inferring => write!(f, "Inferring"),
            Self::Publishing => write!(f, "Publishing"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

// ============================================================================
// Scheduler Statistics
// ============================================================================

const NO_TIME: i64 = i64::MIN;

/// Lock-free counters and timestamps shared by both loops.
pub struct SchedulerStats {
    inferences_run: AtomicU64,
    cycles_skipped: AtomicU64,
    cycles_failed: AtomicU64,
    buffer_refreshes: AtomicU64,
    alerts_sent: AtomicU64,
    last_inference_ms: AtomicI64,
    next_inference_ms: AtomicI64,
    last_refresh_ms: AtomicI64,
    phase: AtomicU8,
}

impl Default for SchedulerStats {
    fn default() -> Self {
        Self {
            inferences_run: AtomicU64::new(0),
            cycles_skipped: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            buffer_refreshes: AtomicU64::new(0),
            alerts_sent: AtomicU64::new(0),
            last_inference_ms: AtomicI64::new(NO_TIME),
            next_inference_ms: AtomicI64::new(NO_TIME),
            last_refresh_ms: AtomicI64::new(NO_TIME),
            phase: AtomicU8::new(OrchestratorPhase::Idle.index()),
        }
    }
}

fn store_time(slot: &AtomicI64, at: DateTime<Utc>) {
    slot.store(at.timestamp_millis(), Ordering::Relaxed);
}

fn load_time(slot: &AtomicI64) -> Option<DateTime<Utc>> {
    match slot.load(Ordering::Relaxed) {
        NO_TIME => None,
        ms => Utc.timestamp_millis_opt(ms).single(),
    }
}

impl SchedulerStats {
    /// Bump the inference counter and return the new value.
    pub fn next_inference_count(&self) -> u64 {
        self.inferences_run.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn inferences_run(&self) -> u64 {
        self.inferences_run.load(Ordering::SeqCst)
    }

    pub fn record_skip(&self) {
        self.cycles_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycles_skipped(&self) -> u64 {
        self.cycles_skipped.load(Ordering::Relaxed)
    }

    pub fn record_failure(&self) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycles_failed(&self) -> u64 {
        self.cycles_failed.load(Ordering::Relaxed)
    }

    /// Count a successful buffer replace and return the running total.
    pub fn record_refresh(&self, at: DateTime<Utc>) -> u64 {
        store_time(&self.last_refresh_ms, at);
        self.buffer_refreshes.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn buffer_refreshes(&self) -> u64 {
        self.buffer_refreshes.load(Ordering::Relaxed)
    }

    pub fn record_alert(&self) {
        self.alerts_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn alerts_sent(&self) -> u64 {
        self.alerts_sent.load(Ordering::Relaxed)
    }

    pub fn set_last_inference(&self, at: DateTime<Utc>) {
        store_time(&self.last_inference_ms, at);
    }

    pub fn last_inference(&self) -> Option<DateTime<Utc>> {
        load_time(&self.last_inference_ms)
    }

    pub fn set_next_inference(&self, at: DateTime<Utc>) {
        store_time(&self.next_inference_ms, at);
    }

    pub fn next_inference(&self) -> Option<DateTime<Utc>> {
        load_time(&self.next_inference_ms)
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        load_time(&self.last_refresh_ms)
    }

    pub fn set_phase(&self, phase: OrchestratorPhase) {
        self.phase.store(phase.index(), Ordering::Relaxed);
    }

    pub fn phase(&self) -> OrchestratorPhase {
        OrchestratorPhase::from_index(self.phase.load(Ordering::Relaxed))
    }
}

impl std::fmt::Display for SchedulerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Scheduler: {} inferences ({} skipped, {} failed), {} refreshes, {} alerts",
            self.inferences_run(),
            self.cycles_skipped(),
            self.cycles_failed(),
            self.buffer_refreshes(),
            self.alerts_sent()
        )
    }
}

// ============================================================================
// Inference Status
// ============================================================================

/// Point-in-time view of the scheduler for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceStatus {
    pub running: bool,
    pub phase: OrchestratorPhase,
    pub inference_interval_secs: u64,
    pub collection_interval_secs: u64,
    pub context_length: usize,
    pub prediction_length: usize,
    pub buffer_size: usize,
    pub buffer_capacity: usize,
    pub buffer_ready: bool,
    pub inference_count: u64,
    pub cycles_skipped: u64,
    pub cycles_failed: u64,
    pub buffer_refreshes: u64,
    pub alerts_sent: u64,
    pub last_inference_time: Option<DateTime<Utc>>,
    pub next_inference_time: Option<DateTime<Utc>>,
    pub last_refresh_time: Option<DateTime<Utc>>,
    pub has_prediction: bool,
    pub has_previous_forecast: bool,
    pub scaling_mode: &'static str,
    pub oracle: String,
    pub source: String,
    pub notifier: String,
}
