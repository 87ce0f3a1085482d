//! Zero-phase Butterworth low-pass filtering
//!
//! Design follows the classic analog-prototype route: Butterworth poles on
//! the unit circle, frequency prewarp, low-pass scaling and a bilinear
//! transform into `b`/`a` coefficients. Application runs the filter forward
//! and backward (filtfilt) with odd-reflection padding and steady-state
//! initial conditions so edges do not ring and the output has no phase lag.
//!
//! # Example
//!
//! ```ignore
//! let lp = LowPassFilter::butterworth(2, 0.3)?;
//! let smoothed = lp.filter_columns(&context_rows);
//! ```

use num_complex::Complex64;
use std::f64::consts::PI;
use tracing::debug;

use super::ProcessingError;
use crate::config::defaults::MAX_FILTER_ORDER;
use crate::types::{column, set_column, Row, FEATURE_NAMES, NUM_FEATURES};

/// Sample rate assumed by the normalized cutoff (Nyquist = 1).
const DESIGN_FS: f64 = 2.0;

/// IIR low-pass filter in transfer-function form.
#[derive(Debug, Clone, PartialEq)]
pub struct LowPassFilter {
    b: Vec<f64>,
    a: Vec<f64>,
    /// Steady-state initial conditions for a unit step
    zi: Vec<f64>,
}

impl LowPassFilter {
    /// Design a digital Butterworth low-pass.
    ///
    /// `cutoff` is normalized to the Nyquist frequency and must lie in (0, 1).
    pub fn butterworth(order: usize, cutoff: f64) -> Result<Self, ProcessingError> {
        if order == 0 || order > MAX_FILTER_ORDER {
            return Err(ProcessingError::InvalidFilter(format!(
                "order {order} outside 1..={MAX_FILTER_ORDER}"
            )));
        }
        if !(cutoff > 0.0 && cutoff < 1.0) {
            return Err(ProcessingError::InvalidFilter(format!(
                "cutoff {cutoff} outside (0, 1)"
            )));
        }

        let fs2 = Complex64::new(2.0 * DESIGN_FS, 0.0);
        let warped = 2.0 * DESIGN_FS * (PI * cutoff / DESIGN_FS).tan();

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
        let analog_poles: Vec<Complex64> = (0..order)
            .map(|i| {
                let m = 2 * i as i64 + 1 - order as i64;
                -Complex64::from_polar(1.0, PI * m as f64 / (2.0 * order as f64)) * warped
            })
            .collect();

        let denom = analog_poles
            .iter()
            .fold(Complex64::new(1.0, 0.0), |acc, p| acc * (fs2 - *p));
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let gain = warped.powi(order as i32) * denom.inv().re;

        let digital_poles: Vec<Complex64> =
            analog_poles.iter().map(|p| (fs2 + *p) / (fs2 - *p)).collect();
        let digital_zeros = vec![Complex64::new(-1.0, 0.0); order];

        let b: Vec<f64> = expand_roots(&digital_zeros).into_iter().map(|c| c * gain).collect();
        let a = expand_roots(&digital_poles);
        let zi = steady_state(&b, &a)?;

        Ok(Self { b, a, zi })
    }

    /// Numerator coefficients.
    pub fn b(&self) -> &[f64] {
        &self.b
    }

    /// Denominator coefficients (`a[0] == 1`).
    pub fn a(&self) -> &[f64] {
        &self.a
    }

    /// Reflection padding applied on each side during filtfilt.
    pub fn pad_len(&self) -> usize {
        3 * self.a.len().max(self.b.len())
    }

    /// Forward-backward filter one signal.
    ///
    /// Returns `None` when the signal is too short for the padding or the
    /// result is not finite; callers keep the input in that case.
    pub fn filtfilt(&self, x: &[f64]) -> Option<Vec<f64>> {
        let pad = self.pad_len();
        let n = x.len();
        if n <= pad {
            return None;
        }

        let (first, last) = (x[0], x[n - 1]);
        let mut ext = Vec::with_capacity(n + 2 * pad);
        ext.extend((1..=pad).rev().map(|i| 2.0 * first - x[i]));
        ext.extend_from_slice(x);
        ext.extend((1..=pad).map(|i| 2.0 * last - x[n - 1 - i]));

        let mut y = self.lfilter(&ext, ext[0]);
        y.reverse();
        let mut y = self.lfilter(&y, y[0]);
        y.reverse();

        let out = y[pad..pad + n].to_vec();
        out.iter().all(|v| v.is_finite()).then_some(out)
    }

    /// Filter every feature column independently.
    ///
    /// Columns that cannot be filtered are passed through unchanged.
    pub fn filter_columns(&self, rows: &[Row]) -> Vec<Row> {
        let mut out = rows.to_vec();
        for feature in 0..NUM_FEATURES {
            match self.filtfilt(&column(rows, feature)) {
                Some(filtered) => set_column(&mut out, feature, &filtered),
                None => debug!(
                    feature = FEATURE_NAMES[feature],
                    rows = rows.len(),
                    "Low-pass skipped, keeping raw column"
                ),
            }
        }
        out
    }

    /// Direct form II transposed pass seeded with `zi * initial`.
    fn lfilter(&self, x: &[f64], initial: f64) -> Vec<f64> {
        let n = self.b.len();
        let mut z: Vec<f64> = self.zi.iter().map(|z| z * initial).collect();
        x.iter()
            .map(|&xi| {
                let y = self.b[0] * xi + z[0];
                for k in 1..n - 1 {
                    z[k - 1] = self.b[k] * xi + z[k] - self.a[k] * y;
                }
                z[n - 2] = self.b[n - 1] * xi - self.a[n - 1] * y;
                y
            })
            .collect()
    }
}

/// Polynomial coefficients (highest power first) with the given roots.
fn expand_roots(roots: &[Complex64]) -> Vec<f64> {
    let mut coeffs = vec![Complex64::new(1.0, 0.0)];
    for r in roots {
        let mut next = coeffs.clone();
        next.push(Complex64::new(0.0, 0.0));
        for i in 1..next.len() {
            next[i] -= *r * coeffs[i - 1];
        }
        coeffs = next;
    }
    coeffs.into_iter().map(|c| c.re).collect()
}

/// Initial state giving a steady-state response to a unit step.
///
/// Solves `(I - Aᵀ) zi = b[1..] - a[1..] * b[0]` where `A` is the companion
/// matrix of `a`.
fn steady_state(b: &[f64], a: &[f64]) -> Result<Vec<f64>, ProcessingError> {
    let m = a.len() - 1;
    let mut lhs = vec![vec![0.0; m]; m];
    for (i, row) in lhs.iter_mut().enumerate() {
        row[i] = 1.0;
        row[0] += a[i + 1];
        if i + 1 < m {
            row[i + 1] -= 1.0;
        }
    }
    let rhs: Vec<f64> = (0..m).map(|i| b[i + 1] - a[i + 1] * b[0]).collect();
    solve_linear(lhs, rhs)
        .ok_or_else(|| ProcessingError::InvalidFilter("singular steady-state system".to_string()))
}

/// Gaussian elimination with partial pivoting.
fn solve_linear(mut m: Vec<Vec<f64>>, mut r: Vec<f64>) -> Option<Vec<f64>> {
    let n = r.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))?;
        if m[pivot][col].abs() < f64::EPSILON {
            return None;
        }
        m.swap(col, pivot);
        r.swap(col, pivot);
        for i in col + 1..n {
            let factor = m[i][col] / m[col][col];
            for j in col..n {
                m[i][j] -= factor * m[col][j];
            }
            r[i] -= factor * r[col];
        }
    }
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let tail: f64 = (i + 1..n).map(|j| m[i][j] * x[j]).sum();
        x[i] = (r[i] - tail) / m[i][i];
    }
    Some(x)
}
