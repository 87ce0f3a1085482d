//! Fitted per-feature standardization.
//!
//! The artifact is a small JSON document holding the mean and scale learned
//! offline for each feature, in feature column order:
//!
//! ```json
//! { "mean": [5.1, 38.2, 37.9, -0.4, -0.6, 9.8], "scale": [1.2, 3.1, 3.0, 0.3, 0.4, 1.1] }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use super::ProcessingError;
use crate::types::{Row, NUM_FEATURES};

/// Mean/scale pair applied as `(x - mean) / scale`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Row,
    pub scale: Row,
}

impl StandardScaler {
    /// Build a scaler, replacing zero scales with 1.0 like a fitted scaler
    /// does for constant features.
    pub fn new(mean: Row, scale: Row) -> Result<Self, ProcessingError> {
        if mean.iter().chain(scale.iter()).any(|v| !v.is_finite()) {
            return Err(ProcessingError::Artifact("non-finite mean or scale".to_string()));
        }
        let mut scale = scale;
        for s in &mut scale {
            if *s == 0.0 {
                *s = 1.0;
            }
        }
        Ok(Self { mean, scale })
    }

    /// Load the JSON artifact from disk.
    pub fn load(path: &Path) -> Result<Self, ProcessingError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProcessingError::Artifact(format!("{}: {e}", path.display())))?;
        let raw: Self = serde_json::from_str(&contents)
            .map_err(|e| ProcessingError::Artifact(format!("{}: {e}", path.display())))?;
        Self::new(raw.mean, raw.scale)
    }

    pub fn transform(&self, rows: &[Row]) -> Vec<Row> {
        rows.iter()
            .map(|r| std::array::from_fn(|f| (r[f] - self.mean[f]) / self.scale[f]))
            .collect()
    }

    pub fn inverse_transform(&self, rows: &[Row]) -> Vec<Row> {
        rows.iter()
            .map(|r| std::array::from_fn(|f| r[f] * self.scale[f] + self.mean[f]))
            .collect()
    }
}

// ============================================================================
// Scaling Mode
// ============================================================================

/// Whether the pipeline runs in standardized space or raw sensor units.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalingMode {
    Scaled(StandardScaler),
    /// No artifact: transforms are identity and downstream stays in sensor units
    Unscaled,
}

impl ScalingMode {
    /// Resolve the mode from an optional artifact path.
    ///
    /// A missing or unreadable artifact is not an error; it selects
    /// [`ScalingMode::Unscaled`] and logs why.
    pub fn from_artifact(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            warn!("No standardization artifact configured, running unscaled");
            return Self::Unscaled;
        };
        match StandardScaler::load(path) {
            Ok(scaler) => {
                info!(path = %path.display(), features = NUM_FEATURES, "Loaded standardization artifact");
                Self::Scaled(scaler)
            }
            Err(e) => {
                warn!(error = %e, "Standardization artifact unavailable, running unscaled");
                Self::Unscaled
            }
        }
    }

    pub const fn is_scaled(&self) -> bool {
        matches!(self, Self::Scaled(_))
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Self::Scaled(_) => "scaled",
            Self::Unscaled => "unscaled",
        }
    }

    pub fn transform(&self, rows: &[Row]) -> Vec<Row> {
        match self {
            Self::Scaled(s) => s.transform(rows),
            Self::Unscaled => rows.to_vec(),
        }
    }

    pub fn inverse_transform(&self, rows: &[Row]) -> Vec<Row> {
        match self {
            Self::Scaled(s) => s.inverse_transform(rows),
            Self::Unscaled => rows.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scaler() -> StandardScaler {
        StandardScaler::new([5.0, 40.0, 40.0, 0.0, 0.0, 10.0], [2.0, 4.0, 4.0, 0.5, 0.5, 1.0]).unwrap()
    }

    #[test]
    fn test_transform_then_inverse_recovers_input() {
        let s = scaler();
        let rows = vec![[7.0, 44.0, 36.0, 0.5, -0.5, 11.0]];
        let scaled = s.transform(&rows);
        assert_eq!(scaled[0], [1.0, 1.0, -1.0, 1.0, -1.0, 1.0]);
        assert_eq!(s.inverse_transform(&scaled), rows);
    }

    #[test]
    fn test_zero_scale_treated_as_unit() {
        let s = StandardScaler::new([1.0; NUM_FEATURES], [0.0; NUM_FEATURES]).unwrap();
        assert_eq!(s.scale, [1.0; NUM_FEATURES]);
        assert_eq!(s.transform(&[[3.0; NUM_FEATURES]])[0], [2.0; NUM_FEATURES]);
    }

    #[test]
    fn test_load_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"mean": [5, 40, 40, 0, 0, 10], "scale": [2, 4, 4, 0.5, 0.5, 1]}}"#
        )
        .unwrap();
        let mode = ScalingMode::from_artifact(Some(file.path()));
        assert_eq!(mode, ScalingMode::Scaled(scaler()));
        assert_eq!(mode.label(), "scaled");
    }

    #[test]
    fn test_wrong_width_artifact_falls_back_to_unscaled() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"mean": [1, 2], "scale": [1, 1]}}"#).unwrap();
        assert_eq!(ScalingMode::from_artifact(Some(file.path())), ScalingMode::Unscaled);
    }

    #[test]
    fn test_missing_artifact_is_unscaled_identity() {
        let mode = ScalingMode::from_artifact(Some(Path::new("/nonexistent/scaler.json")));
        assert!(!mode.is_scaled());
        let rows = vec![[1.5; NUM_FEATURES]];
        assert_eq!(mode.transform(&rows), rows);
        assert_eq!(mode.inverse_transform(&rows), rows);
        assert_eq!(ScalingMode::from_artifact(None), ScalingMode::Unscaled);
    }
}
