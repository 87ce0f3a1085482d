//! Threshold scoring of a physical-unit forecast.
//!
//! For each feature the score is the share of forecast points outside its
//! limits, as a percentage rounded to two decimals. Any feature at or above
//! the critical share makes the whole verdict critical.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{AnomalyConfig, LimitTable};
use crate::types::{AnomalyVerdict, MachineStatus, Row, FEATURE_NAMES, NUM_FEATURES};

/// Inclusive operating envelope for one feature; either bound may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl FeatureLimits {
    pub const fn at_most(max: f64) -> Self {
        Self { min: None, max: Some(max) }
    }

    pub const fn between(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    /// True when `value` is strictly outside the envelope.
    pub fn is_violated(&self, value: f64) -> bool {
        self.min.is_some_and(|m| value < m) || self.max.is_some_and(|m| value > m)
    }
}

/// Deterministic per-feature limit scorer.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyScorer {
    limits: [FeatureLimits; NUM_FEATURES],
    critical_percentage: f64,
}

impl Default for AnomalyScorer {
    fn default() -> Self {
        Self::from_config(&AnomalyConfig::default())
    }
}

impl AnomalyScorer {
    pub const fn new(limits: &LimitTable, critical_percentage: f64) -> Self {
        Self {
            limits: limits.as_array(),
            critical_percentage,
        }
    }

    pub const fn from_config(config: &AnomalyConfig) -> Self {
        Self::new(&config.limits, config.critical_percentage)
    }

    /// Score a forecast already mapped back to sensor units.
    ///
    /// `at` stamps the verdict so the scoring itself stays pure.
    pub fn score(&self, forecast: &[Row], at: DateTime<Utc>) -> AnomalyVerdict {
        let horizon = forecast.len();
        let mut anomaly_scores = BTreeMap::new();
        let mut critical = Vec::new();

        for (feature, name) in FEATURE_NAMES.iter().enumerate() {
            let limits = &self.limits[feature];
            let count = forecast.iter().filter(|row| limits.is_violated(row[feature])).count();
            #[allow(clippy::cast_precision_loss)]
            let percentage = if horizon == 0 {
                0.0
            } else {
                100.0 * count as f64 / horizon as f64
            };
            let rounded = (percentage * 100.0).round() / 100.0;
            anomaly_scores.insert((*name).to_string(), rounded);
            if percentage >= self.critical_percentage {
                critical.push(((*name).to_string(), rounded));
            }
        }

        let (status, message) = if critical.is_empty() {
            (
                MachineStatus::Normal,
                "Machine condition normal. All features within acceptable ranges.".to_string(),
            )
        } else {
            let listed: Vec<String> = critical
                .iter()
                .map(|(name, pct)| format!("{name} ({pct:.2}%)"))
                .collect();
            (
                MachineStatus::Critical,
                format!("Machine condition at risk. Critical features: {}", listed.join(", ")),
            )
        };

        AnomalyVerdict {
            status,
            message,
            anomaly_scores,
            critical_features: critical.into_iter().map(|(name, _)| name).collect(),
            timestamp: at,
        }
    }
}
