//! The regression primitive: given (x, y) pairs, produce a univariate
//! linear model `y ≈ coef * x + intercept`.
//!
//! Specified only by interface — the engine does not care how the line is
//! fit as long as it is deterministic given the current sample set. The
//! original estimator this crate descends from used `BayesianRidge`; this
//! crate ships ordinary least squares, which is closed-form and therefore
//! trivially deterministic, behind the same seam so a different primitive
//! can be swapped in without touching the engine.

/// A fitted linear model's coefficients.
pub type Fit = (f64, f64);

/// Fits `y ≈ coef * x + intercept` from a set of samples.
pub trait RegressionModel: Send + Sync {
    /// Returns `(coef, intercept)`. `samples` is guaranteed non-empty by
    /// callers, but may contain fewer than two distinct x values.
    fn fit(&self, samples: &[(f64, f64)]) -> Fit;
}

/// Ordinary least squares. Degenerate when every sample shares the same
/// `x` — in that case the fit falls back to a flat line through the mean
/// of `y`, which is finite and deterministic; downstream code never uses
/// such a cell anyway because its observed range has zero width.
#[derive(Debug, Default, Clone, Copy)]
pub struct OlsRegression;

impl RegressionModel for OlsRegression {
    fn fit(&self, samples: &[(f64, f64)]) -> Fit {
        let n = samples.len() as f64;
        let mean_x = samples.iter().map(|(x, _)| x).sum::<f64>() / n;
        let mean_y = samples.iter().map(|(_, y)| y).sum::<f64>() / n;

        let mut cov_xy = 0.0;
        let mut var_x = 0.0;
        for &(x, y) in samples {
            let dx = x - mean_x;
            cov_xy += dx * (y - mean_y);
            var_x += dx * dx;
        }

        if var_x.abs() < f64::EPSILON {
            return (0.0, mean_y);
        }

        let coef = cov_xy / var_x;
        let intercept = mean_y - coef * mean_x;
        (coef, intercept)
    }
}
