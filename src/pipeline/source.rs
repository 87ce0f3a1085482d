//! Telemetry source abstraction.
//!
//! The orchestrator pulls the most recent readings on its own schedule; a
//! source only has to answer "give me the last N points". Returning fewer
//! than requested is normal (cold start, gaps) and is not an error.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::CsvReplayConfig;
use crate::types::{FeatureVector, Row, FEATURE_NAMES, NUM_FEATURES};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telemetry backend returned status {status}: {body}")]
    Status { status: reqwest::StatusCode, body: String },

    #[error("Malformed telemetry data: {0}")]
    Parse(String),

    #[error("Failed to read {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
}

/// Where readings come from.
#[async_trait]
pub trait TelemetrySource: Send + Sync + 'static {
    /// The newest readings, at most `n`, oldest first.
    async fn query_last_n(&self, n: usize) -> Result<Vec<FeatureVector>, SourceError>;

    /// Human-readable name for logging (e.g. "InfluxDB", "CSV").
    fn source_name(&self) -> &str;
}

// ============================================================================
// CSV Replay Source
// ============================================================================

/// Replays a recorded sensor dataset as if a simulator were streaming it.
///
/// The first `initial_batch` rows are visible immediately, then one more row
/// becomes visible every `emit_interval`. Past the end of the dataset the
/// replay wraps to the first row. Timestamps are synthesized so that the
/// last row of the initial batch is stamped with the construction time.
pub struct CsvReplaySource {
    rows: Vec<Row>,
    machine_id: String,
    initial_batch: usize,
    emit_interval: Duration,
    started: Instant,
    started_wall: DateTime<Utc>,
}

impl CsvReplaySource {
    pub fn new(
        rows: Vec<Row>,
        machine_id: impl Into<String>,
        initial_batch: usize,
        emit_interval: Duration,
    ) -> Result<Self, SourceError> {
        if rows.is_empty() {
            return Err(SourceError::Parse("dataset has no rows".to_string()));
        }
        Ok(Self {
            initial_batch: initial_batch.min(rows.len()),
            rows,
            machine_id: machine_id.into(),
            emit_interval,
            started: Instant::now(),
            started_wall: Utc::now(),
        })
    }

    /// Load the dataset named in `config`.
    pub fn from_config(config: &CsvReplayConfig, machine_id: &str) -> Result<Self, SourceError> {
        let rows = load_dataset(&config.path)?;
        info!(
            path = %config.path.display(),
            rows = rows.len(),
            initial_batch = config.initial_batch,
            "Loaded replay dataset"
        );
        Self::new(
            rows,
            machine_id,
            config.initial_batch,
            Duration::from_secs(config.emit_interval_secs),
        )
    }

    /// Number of rows emitted so far, counting wrap-arounds.
    pub fn emitted(&self) -> usize {
        if self.emit_interval.is_zero() {
            return self.initial_batch;
        }
        let ticks = self.started.elapsed().as_nanos() / self.emit_interval.as_nanos();
        self.initial_batch + usize::try_from(ticks).unwrap_or(usize::MAX - self.initial_batch)
    }

    fn timestamp_of(&self, k: usize) -> DateTime<Utc> {
        let step = ChronoDuration::from_std(self.emit_interval).unwrap_or_else(|_| ChronoDuration::seconds(1));
        let anchor = i32::try_from(self.initial_batch).unwrap_or(i32::MAX) - 1;
        let offset = i32::try_from(k).unwrap_or(i32::MAX) - anchor;
        self.started_wall + step * offset
    }
}

#[async_trait]
impl TelemetrySource for CsvReplaySource {
    async fn query_last_n(&self, n: usize) -> Result<Vec<FeatureVector>, SourceError> {
        let emitted = self.emitted();
        let first = emitted.saturating_sub(n);
        Ok((first..emitted)
            .map(|k| FeatureVector::from_row(self.timestamp_of(k), &self.machine_id, self.rows[k % self.rows.len()]))
            .collect())
    }

    fn source_name(&self) -> &str {
        "CSV"
    }
}

/// Read a dataset with a header naming the six feature columns.
///
/// Column order is taken from the header; extra columns such as a leading
/// `timestamp` are ignored. Unparsable lines are skipped with a warning.
pub fn load_dataset(path: &Path) -> Result<Vec<Row>, SourceError> {
    let text = std::fs::read_to_string(path).map_err(|e| SourceError::Io(path.to_path_buf(), e))?;
    parse_dataset(&text)
}

pub fn parse_dataset(text: &str) -> Result<Vec<Row>, SourceError> {
    let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
    let (_, header) = lines
        .next()
        .ok_or_else(|| SourceError::Parse("empty dataset".to_string()))?;
    let columns: Vec<&str> = header.split(',').map(str::trim).collect();

    let mut index = [0usize; NUM_FEATURES];
    for (slot, name) in index.iter_mut().zip(FEATURE_NAMES) {
        *slot = columns
            .iter()
            .position(|c| *c == name)
            .ok_or_else(|| SourceError::Parse(format!("missing column '{name}'")))?;
    }

    let mut rows = Vec::new();
    for (line_num, line) in lines {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let parsed: Result<Vec<f64>, String> = index
            .iter()
            .map(|&i| {
                fields
                    .get(i)
                    .ok_or_else(|| format!("missing field {i}"))
                    .and_then(|f| f.parse::<f64>().map_err(|e| format!("'{f}': {e}")))
            })
            .collect();
        match parsed {
            Ok(values) => rows.push(std::array::from_fn(|f| values[f])),
            Err(e) => warn!(line = line_num + 1, error = %e, "Skipping unparsable dataset line"),
        }
    }

    if rows.is_empty() {
        return Err(SourceError::Parse("dataset has no valid rows".to_string()));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn dataset(n: usize) -> Vec<Row> {
        (0..n).map(|i| [i as f64, 40.0, 39.0, -0.5, -0.5, 9.8]).collect()
    }

    #[test]
    fn test_parse_header_order_and_extra_columns() {
        let text = "timestamp,tempA,current,tempB,accX,accY,accZ\n\
                    2024-01-01,41.0,7.5,39.0,-0.4,-0.3,9.9\n\
                    \n\
                    2024-01-01,bad,7.5,39.0,-0.4,-0.3,9.9\n\
                    2024-01-01,42.0,8.5,39.5,-0.1,-0.2,9.7\n";
        let rows = parse_dataset(text).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], [7.5, 41.0, 39.0, -0.4, -0.3, 9.9]);
        assert_eq!(rows[1][0], 8.5);
    }

    #[test]
    fn test_parse_missing_column_is_error() {
        let result = parse_dataset("current,tempA,tempB,accX,accY\n1,2,3,4,5\n");
        assert!(matches!(result, Err(SourceError::Parse(msg)) if msg.contains("accZ")));
    }

    #[test]
    fn test_load_dataset_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "current,tempA,tempB,accX,accY,accZ").unwrap();
        writeln!(file, "1,2,3,4,5,6").unwrap();
        assert_eq!(load_dataset(file.path()).unwrap(), vec![[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]]);
        assert!(matches!(
            load_dataset(Path::new("/nonexistent/data.csv")),
            Err(SourceError::Io(..))
        ));
    }

    #[tokio::test]
    async fn test_initial_batch_visible_immediately() {
        let source = CsvReplaySource::new(dataset(500), "m-1", 230, Duration::from_secs(10)).unwrap();
        let readings = source.query_last_n(240).await.unwrap();
        assert_eq!(readings.len(), 230);
        assert_eq!(readings[0].current, 0.0);
        assert_eq!(readings[229].current, 229.0);
        assert!(readings.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(readings.iter().all(|r| r.machine_id == "m-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rows_stream_in_and_wrap() {
        let source = CsvReplaySource::new(dataset(235), "m-1", 230, Duration::from_secs(10)).unwrap();
        tokio::time::advance(Duration::from_secs(100)).await;
        let readings = source.query_last_n(240).await.unwrap();
        assert_eq!(readings.len(), 240);
        // 240 emitted rows over a 235-row dataset: the tail wraps to rows 0..4
        assert_eq!(readings[239].current, 4.0);
        assert_eq!(readings[234].current, 234.0);
        assert!(readings.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_empty_dataset_rejected() {
        assert!(CsvReplaySource::new(Vec::new(), "m-1", 230, Duration::from_secs(10)).is_err());
    }
}
