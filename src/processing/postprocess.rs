//! Forecast post-processing
//!
//! Two per-column passes over the oracle output:
//!
//! 1. **Outlier suppression**: points with |z| above the threshold are
//!    replaced by linear interpolation over the surviving points (or the
//!    column mean when fewer than two survive). Near-constant columns are
//!    left alone.
//! 2. **Context rescale**: rows after the first `preserve_leading` are
//!    remapped onto the range of the most recent `context_fraction` of the
//!    conditioned context. The leading rows keep their cleaned values.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use super::ProcessingError;
use crate::config::defaults::MIN_SPREAD;
use crate::config::PostprocessConfig;
use crate::types::{column, Row, NUM_FEATURES};

/// How the forecast tail is mapped onto the reference range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RescaleMethod {
    /// 5th-95th percentile of the forecast onto min-max of the reference
    #[default]
    MinMax,
    /// Median/IQR of the forecast onto median/IQR of the reference
    Robust,
    /// Mean/std of the forecast onto mean/std of the reference
    ZScore,
}

impl std::fmt::Display for RescaleMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MinMax => write!(f, "minmax"),
            Self::Robust => write!(f, "robust"),
            Self::ZScore => write!(f, "zscore"),
        }
    }
}

impl RescaleMethod {
    /// Remap `source` onto the statistics of `reference`.
    pub fn remap(self, source: &[f64], reference: &[f64]) -> Vec<f64> {
        match self {
            Self::MinMax => {
                let mut lo = percentile(source, 5.0);
                let mut hi = percentile(source, 95.0);
                if hi - lo < MIN_SPREAD {
                    (lo, hi) = min_max(source);
                }
                let (ctx_lo, ctx_hi) = min_max(reference);
                if !(ctx_lo <= ctx_hi) {
                    // no finite reference values
                    return vec![f64::NAN; source.len()];
                }
                if hi - lo > MIN_SPREAD {
                    source
                        .iter()
                        .map(|v| ((v - lo) / (hi - lo)).mul_add(ctx_hi - ctx_lo, ctx_lo).clamp(ctx_lo, ctx_hi))
                        .collect()
                } else {
                    vec![(ctx_lo + ctx_hi) / 2.0; source.len()]
                }
            }
            Self::Robust => {
                let median = percentile(source, 50.0);
                let iqr = percentile(source, 75.0) - percentile(source, 25.0);
                let ctx_median = percentile(reference, 50.0);
                let ctx_iqr = percentile(reference, 75.0) - percentile(reference, 25.0);
                if iqr > MIN_SPREAD {
                    source
                        .iter()
                        .map(|v| ((v - median) / iqr).mul_add(ctx_iqr, ctx_median))
                        .collect()
                } else {
                    vec![ctx_median; source.len()]
                }
            }
            Self::ZScore => {
                let mean = source.iter().mean();
                let std = source.iter().population_std_dev();
                let ctx_mean = reference.iter().mean();
                let ctx_std = reference.iter().population_std_dev();
                if std > MIN_SPREAD {
                    source
                        .iter()
                        .map(|v| ((v - mean) / std).mul_add(ctx_std, ctx_mean))
                        .collect()
                } else {
                    vec![ctx_mean; source.len()]
                }
            }
        }
    }
}

// ============================================================================
// PostProcessor
// ============================================================================

/// Outlier suppression followed by partial rescale-to-context.
#[derive(Debug, Clone, PartialEq)]
pub struct PostProcessor {
    pub outlier_z_threshold: f64,
    pub preserve_leading: usize,
    pub context_fraction: f64,
    pub method: RescaleMethod,
}

impl Default for PostProcessor {
    fn default() -> Self {
        Self::from_config(&PostprocessConfig::default())
    }
}

impl PostProcessor {
    pub const fn from_config(config: &PostprocessConfig) -> Self {
        Self {
            outlier_z_threshold: config.outlier_z_threshold,
            preserve_leading: config.preserve_leading,
            context_fraction: config.context_fraction,
            method: config.rescale_method,
        }
    }

    /// Clean outliers, then rescale the tail onto the recent context.
    ///
    /// `context` is the conditioned model input, in the same space as
    /// `forecast`.
    pub fn process(&self, forecast: &[Row], context: &[Row]) -> Result<Vec<Row>, ProcessingError> {
        let cleaned = self.remove_outliers(forecast);
        self.rescale_to_context(&cleaned, context)
    }

    /// Replace per-column z-score outliers by interpolation.
    pub fn remove_outliers(&self, forecast: &[Row]) -> Vec<Row> {
        let mut out = forecast.to_vec();
        for feature in 0..NUM_FEATURES {
            let cleaned = clean_column(&column(forecast, feature), self.outlier_z_threshold);
            for (row, v) in out.iter_mut().zip(cleaned) {
                row[feature] = v;
            }
        }
        out
    }

    /// Rows of `context` used as the rescale reference (at least one).
    pub fn reference_len(&self, context_len: usize) -> usize {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let rows = (context_len as f64 * self.context_fraction) as usize;
        rows.clamp(1, context_len.max(1))
    }

    /// Keep the first `preserve_leading` rows, remap the rest onto the
    /// trailing reference slice of `context`.
    pub fn rescale_to_context(&self, cleaned: &[Row], context: &[Row]) -> Result<Vec<Row>, ProcessingError> {
        if context.is_empty() {
            return Err(ProcessingError::InsufficientData {
                needed: 1,
                available: 0,
            });
        }

        let k = self.preserve_leading.min(cleaned.len());
        let reference = &context[context.len() - self.reference_len(context.len())..];
        let mut out = cleaned.to_vec();
        if k == cleaned.len() {
            return Ok(out);
        }

        let tail = &cleaned[k..];
        for feature in 0..NUM_FEATURES {
            let mapped = self
                .method
                .remap(&column(tail, feature), &column(reference, feature));
            for (row, v) in out[k..].iter_mut().zip(mapped) {
                row[feature] = v;
            }
        }
        Ok(out)
    }
}

// ============================================================================
// Column Helpers
// ============================================================================

fn clean_column(col: &[f64], threshold: f64) -> Vec<f64> {
    if col.is_empty() {
        return Vec::new();
    }
    let mean = col.iter().mean();
    let std = col.iter().population_std_dev();
    if !(std > MIN_SPREAD) {
        return col.to_vec();
    }

    let flagged: Vec<bool> = col.iter().map(|v| ((v - mean) / std).abs() > threshold).collect();
    if !flagged.iter().any(|f| *f) {
        return col.to_vec();
    }

    #[allow(clippy::cast_precision_loss)]
    let anchors: Vec<(f64, f64)> = col
        .iter()
        .zip(&flagged)
        .enumerate()
        .filter(|(_, (_, f))| !**f)
        .map(|(i, (v, _))| (i as f64, *v))
        .collect();

    #[allow(clippy::cast_precision_loss)]
    col.iter()
        .zip(&flagged)
        .enumerate()
        .map(|(i, (v, f))| match (*f, anchors.len() >= 2) {
            (false, _) => *v,
            (true, true) => interpolate(i as f64, &anchors),
            (true, false) => mean,
        })
        .collect()
}

/// Piecewise-linear interpolation over sorted `(x, y)` anchors, clamped to
/// the end values outside their span.
fn interpolate(x: f64, anchors: &[(f64, f64)]) -> f64 {
    let (first, last) = (anchors[0], anchors[anchors.len() - 1]);
    if x <= first.0 {
        return first.1;
    }
    if x >= last.0 {
        return last.1;
    }
    let upper = anchors.partition_point(|(ax, _)| *ax < x);
    let (x0, y0) = anchors[upper - 1];
    let (x1, y1) = anchors[upper];
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

/// Percentile with linear interpolation between closest ranks.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    #[allow(clippy::cast_precision_loss)]
    let pos = (q / 100.0) * (sorted.len() - 1) as f64;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    #[allow(clippy::cast_precision_loss)]
    let frac = pos - lo as f64;
    (sorted[hi] - sorted[lo]).mul_add(frac, sorted[lo])
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows_from_column(col: &[f64]) -> Vec<Row> {
        col.iter().map(|v| [*v; NUM_FEATURES]).collect()
    }

    #[test]
    fn test_percentile_linear() {
        assert!((percentile(&[4.0, 1.0, 3.0, 2.0], 50.0) - 2.5).abs() < 1e-12);
        let ramp: Vec<f64> = (0..57).map(f64::from).collect();
        assert!((percentile(&ramp, 5.0) - 2.8).abs() < 1e-12);
        assert!((percentile(&ramp, 95.0) - 53.2).abs() < 1e-12);
        assert!((percentile(&[7.0], 95.0) - 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_interpolate_clamps_and_blends() {
        let anchors = [(1.0, 10.0), (3.0, 30.0)];
        assert!((interpolate(0.0, &anchors) - 10.0).abs() < 1e-12);
        assert!((interpolate(2.0, &anchors) - 20.0).abs() < 1e-12);
        assert!((interpolate(5.0, &anchors) - 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_spike_is_interpolated() {
        let mut col: Vec<f64> = (0..60).map(|i| f64::from(i % 5) * 0.1).collect();
        col[30] = 50.0;
        let out = PostProcessor::default().remove_outliers(&rows_from_column(&col));
        let lo = col[29].min(col[31]);
        let hi = col[29].max(col[31]);
        for row in &out {
            assert!(row[0] < 1.0);
        }
        assert!(out[30][0] >= lo && out[30][0] <= hi);
        assert!((out[29][0] - col[29]).abs() < 1e-12);
    }

    #[test]
    fn test_spike_at_edge_takes_nearest_clean_value() {
        let mut col = vec![1.0; 60];
        col[10] = 1.2;
        col[59] = 40.0;
        let out = PostProcessor::default().remove_outliers(&rows_from_column(&col));
        assert!((out[59][0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_too_few_clean_points_uses_mean() {
        let processor = PostProcessor {
            outlier_z_threshold: 0.5,
            ..PostProcessor::default()
        };
        let out = processor.remove_outliers(&rows_from_column(&[0.0, 0.0, 10.0]));
        for row in &out {
            assert!((row[0] - 10.0 / 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_flat_column_left_alone() {
        let rows = rows_from_column(&[2.0; 60]);
        assert_eq!(PostProcessor::default().remove_outliers(&rows), rows);
    }

    #[test]
    fn test_reference_len_is_fifteen_percent() {
        let p = PostProcessor::default();
        assert_eq!(p.reference_len(240), 36);
        assert_eq!(p.reference_len(3), 1);
    }

    #[test]
    fn test_minmax_preserves_leading_rows_and_stays_in_range() {
        let forecast: Vec<Row> = (0..60)
            .map(|i| [f64::from(i).sin() * 3.0 + f64::from(i) * 0.05; NUM_FEATURES])
            .collect();
        let mut context = vec![[10.0; NUM_FEATURES]; 204];
        context.extend((0..36).map(|i| [f64::from(i % 7) / 6.0 * 2.0 - 1.0; NUM_FEATURES]));

        let p = PostProcessor::default();
        let cleaned = p.remove_outliers(&forecast);
        let out = p.rescale_to_context(&cleaned, &context).unwrap();

        assert_eq!(out.len(), 60);
        assert_eq!(&out[..3], &cleaned[..3]);
        for row in &out[3..] {
            for v in row {
                assert!(*v >= -1.0 - 1e-9 && *v <= 1.0 + 1e-9, "{v} outside reference range");
            }
        }
    }

    #[test]
    fn test_minmax_clamps_points_beyond_p5_p95() {
        // p5 = 1, p95 = 19 over 0..=20
        let source: Vec<f64> = (0..=20).map(f64::from).collect();
        let out = RescaleMethod::MinMax.remap(&source, &[0.0, 4.0, 10.0]);

        assert_eq!(out[0], 0.0);
        assert_eq!(out[20], 10.0);
        assert!(out[1].abs() < 1e-12);
        assert!((out[10] - 5.0).abs() < 1e-12);
        assert!((out[19] - 10.0).abs() < 1e-12);
        assert!(out.iter().all(|v| (0.0..=10.0).contains(v)));
    }

    #[test]
    fn test_constant_tail_maps_to_reference_midpoint() {
        let forecast = rows_from_column(&[4.0; 60]);
        let mut context = vec![[0.0; NUM_FEATURES]; 204];
        context.extend((0..36).map(|i| [if i % 2 == 0 { 2.0 } else { 6.0 }; NUM_FEATURES]));
        let out = PostProcessor::default().process(&forecast, &context).unwrap();
        assert_eq!(out[0][0], 4.0);
        assert!(out[3..].iter().all(|r| (r[0] - 4.0).abs() < 1e-12));

        let forecast = rows_from_column(&[9.0; 60]);
        let out = PostProcessor::default().process(&forecast, &context).unwrap();
        assert!(out[3..].iter().all(|r| (r[2] - 4.0).abs() < 1e-12));
    }

    #[test]
    fn test_zscore_matches_reference_moments() {
        let forecast: Vec<Row> = (0..60).map(|i| [f64::from(i); NUM_FEATURES]).collect();
        let context: Vec<Row> = (0..240).map(|i| [f64::from(i % 4) * 2.0 + 5.0; NUM_FEATURES]).collect();
        let p = PostProcessor {
            method: RescaleMethod::ZScore,
            ..PostProcessor::default()
        };
        let out = p.rescale_to_context(&forecast, &context).unwrap();
        let tail = column(&out[3..], 1);
        let reference = column(&context[204..], 1);
        assert!((tail.iter().mean() - reference.iter().mean()).abs() < 1e-9);
        assert!((tail.iter().population_std_dev() - reference.iter().population_std_dev()).abs() < 1e-9);
    }

    #[test]
    fn test_robust_centers_on_reference_median() {
        let forecast: Vec<Row> = (0..61).map(|i| [f64::from(i); NUM_FEATURES]).collect();
        let context: Vec<Row> = (0..240).map(|i| [f64::from(i); NUM_FEATURES]).collect();
        let p = PostProcessor {
            method: RescaleMethod::Robust,
            preserve_leading: 0,
            ..PostProcessor::default()
        };
        let out = p.rescale_to_context(&forecast, &context).unwrap();
        let reference = column(&context[204..], 0);
        assert!((percentile(&column(&out, 0), 50.0) - percentile(&reference, 50.0)).abs() < 1e-9);
    }

    #[test]
    fn test_empty_context_is_an_error() {
        let forecast = rows_from_column(&[1.0; 60]);
        assert!(PostProcessor::default().rescale_to_context(&forecast, &[]).is_err());
    }

    #[test]
    fn test_rescale_method_serde_names() {
        assert_eq!(serde_json::to_value(RescaleMethod::ZScore).unwrap(), "zscore");
        assert_eq!(
            serde_json::from_value::<RescaleMethod>(serde_json::json!("minmax")).unwrap(),
            RescaleMethod::MinMax
        );
    }
}
