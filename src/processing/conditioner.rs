//! Model-input conditioning: low-pass then standardize.

use super::{LowPassFilter, ProcessingError, ScalingMode};
use crate::config::ConditioningConfig;
use crate::types::Row;

/// Stateless transform from raw context rows to the model's input space.
#[derive(Debug, Clone)]
pub struct SignalConditioner {
    filter: LowPassFilter,
    scaling: ScalingMode,
}

impl SignalConditioner {
    pub const fn new(filter: LowPassFilter, scaling: ScalingMode) -> Self {
        Self { filter, scaling }
    }

    /// Design the filter and resolve the scaling artifact.
    pub fn from_config(config: &ConditioningConfig) -> Result<Self, ProcessingError> {
        let filter = LowPassFilter::butterworth(config.filter_order, config.filter_cutoff)?;
        let scaling = ScalingMode::from_artifact(config.scaler_path.as_deref());
        Ok(Self::new(filter, scaling))
    }

    /// Filter each column, then apply the fitted standardization.
    pub fn condition(&self, raw: &[Row]) -> Vec<Row> {
        let filtered = self.filter.filter_columns(raw);
        self.scaling.transform(&filtered)
    }

    /// Map rows from model space back to sensor units.
    pub fn to_physical(&self, scaled: &[Row]) -> Vec<Row> {
        self.scaling.inverse_transform(scaled)
    }

    pub const fn scaling(&self) -> &ScalingMode {
        &self.scaling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::StandardScaler;
    use crate::types::NUM_FEATURES;

    #[test]
    fn test_unscaled_constant_context_passes_through() {
        let conditioner = SignalConditioner::from_config(&ConditioningConfig::default()).unwrap();
        assert!(!conditioner.scaling().is_scaled());
        let rows = vec![[5.0, 40.0, 39.0, -0.5, -0.6, 9.8]; 240];
        let out = conditioner.condition(&rows);
        for (a, b) in out.iter().zip(&rows) {
            for f in 0..NUM_FEATURES {
                assert!((a[f] - b[f]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_scaled_mode_standardizes_after_filtering() {
        let filter = LowPassFilter::butterworth(2, 0.3).unwrap();
        let scaler = StandardScaler::new([5.0; NUM_FEATURES], [2.0; NUM_FEATURES]).unwrap();
        let conditioner = SignalConditioner::new(filter, ScalingMode::Scaled(scaler));
        let out = conditioner.condition(&vec![[9.0; NUM_FEATURES]; 50]);
        assert!(out.iter().flatten().all(|v| (v - 2.0).abs() < 1e-9));
        let back = conditioner.to_physical(&out);
        assert!(back.iter().flatten().all(|v| (v - 9.0).abs() < 1e-9));
    }
}
