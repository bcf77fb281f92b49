//! Parametric fit models and fit results.

use serde::{Deserialize, Serialize};

/// Parametric model family fitted to a statistic's descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitModel {
    /// Single power law: linear model in log-log space,
    /// parameters `[intercept, slope]`.
    PowerLaw,
    /// Two power-law segments meeting at a free break point,
    /// parameters `[intercept, slope1, slope2, break]`.
    SegmentedPowerLaw,
}

impl std::fmt::Display for FitModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitModel::PowerLaw => write!(f, "power_law"),
            FitModel::SegmentedPowerLaw => write!(f, "segmented_power_law"),
        }
    }
}

impl FitModel {
    /// Number of free parameters of the model.
    pub fn n_parameters(&self) -> usize {
        match self {
            FitModel::PowerLaw => 2,
            FitModel::SegmentedPowerLaw => 4,
        }
    }
}

/// Result of fitting a parametric model to a descriptor.
///
/// Produced at most once per statistic instance and never mutated. A failed
/// fit is represented by [`FitResult::invalid`], not by an error: the
/// instance keeps its raw descriptor either way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Fitted model family.
    pub model: FitModel,
    /// Best-fit parameter values (ordering defined by the model).
    pub parameters: Vec<f64>,
    /// Parameter uncertainties (sqrt of covariance diagonal).
    pub uncertainties: Vec<f64>,
    /// Parameter covariance (row-major, N×N). `None` when unavailable.
    pub covariance: Option<Vec<f64>>,
    /// Residual sum of squares in fit space.
    pub rss: f64,
    /// Number of data points used in the fit.
    pub n_points: usize,
    /// Whether the fit converged within tolerance.
    pub converged: bool,
}

impl FitResult {
    /// Create a converged fit result.
    pub fn new(
        model: FitModel,
        parameters: Vec<f64>,
        uncertainties: Vec<f64>,
        rss: f64,
        n_points: usize,
    ) -> Self {
        Self { model, parameters, uncertainties, covariance: None, rss, n_points, converged: true }
    }

    /// Create a converged fit result carrying the full covariance matrix.
    pub fn with_covariance(
        model: FitModel,
        parameters: Vec<f64>,
        uncertainties: Vec<f64>,
        covariance: Vec<f64>,
        rss: f64,
        n_points: usize,
    ) -> Self {
        Self {
            model,
            parameters,
            uncertainties,
            covariance: Some(covariance),
            rss,
            n_points,
            converged: true,
        }
    }

    /// Marker for a fit that failed or was rejected (too few points,
    /// non-finite residual variance, degenerate design).
    pub fn invalid(model: FitModel) -> Self {
        Self {
            model,
            parameters: Vec::new(),
            uncertainties: Vec::new(),
            covariance: None,
            rss: f64::NAN,
            n_points: 0,
            converged: false,
        }
    }

    /// Whether the fit converged and every parameter and uncertainty is
    /// finite. Distance metrics that consume fit parameters require this.
    pub fn is_valid(&self) -> bool {
        self.converged
            && !self.parameters.is_empty()
            && self.parameters.len() == self.uncertainties.len()
            && self.parameters.iter().all(|p| p.is_finite())
            && self.uncertainties.iter().all(|u| u.is_finite() && *u >= 0.0)
    }

    /// Primary slope (index 1 for both model families).
    pub fn slope(&self) -> Option<f64> {
        self.parameters.get(1).copied()
    }

    /// Uncertainty on the primary slope.
    pub fn slope_uncertainty(&self) -> Option<f64> {
        self.uncertainties.get(1).copied()
    }

    /// Second-segment slope (segmented model only).
    pub fn slope2(&self) -> Option<f64> {
        match self.model {
            FitModel::SegmentedPowerLaw => self.parameters.get(2).copied(),
            FitModel::PowerLaw => None,
        }
    }

    /// Uncertainty on the second-segment slope (segmented model only).
    pub fn slope2_uncertainty(&self) -> Option<f64> {
        match self.model {
            FitModel::SegmentedPowerLaw => self.uncertainties.get(2).copied(),
            FitModel::PowerLaw => None,
        }
    }

    /// Break location in log10 of the independent variable (segmented
    /// model only).
    pub fn break_point(&self) -> Option<f64> {
        match self.model {
            FitModel::SegmentedPowerLaw => self.parameters.get(3).copied(),
            FitModel::PowerLaw => None,
        }
    }

    /// Covariance matrix element `(i, j)`. `None` when the covariance is
    /// unavailable or out of range.
    pub fn covariance_at(&self, i: usize, j: usize) -> Option<f64> {
        let cov = self.covariance.as_ref()?;
        let n = self.parameters.len();
        if i >= n || j >= n {
            return None;
        }
        Some(cov[i * n + j])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_fit_result() {
        let r = FitResult::new(FitModel::PowerLaw, vec![1.0, -2.5], vec![0.1, 0.05], 0.3, 20);
        assert!(r.is_valid());
        assert_eq!(r.slope(), Some(-2.5));
        assert_eq!(r.slope2(), None);
        assert_eq!(r.break_point(), None);
    }

    #[test]
    fn test_invalid_marker() {
        let r = FitResult::invalid(FitModel::SegmentedPowerLaw);
        assert!(!r.is_valid());
        assert!(!r.converged);
        assert!(r.rss.is_nan());
    }

    #[test]
    fn test_nonfinite_parameters_are_invalid() {
        let r = FitResult::new(FitModel::PowerLaw, vec![1.0, f64::NAN], vec![0.1, 0.1], 0.0, 10);
        assert!(!r.is_valid());
    }

    #[test]
    fn test_segmented_accessors() {
        let r = FitResult::new(
            FitModel::SegmentedPowerLaw,
            vec![0.5, -1.0, -3.0, -0.7],
            vec![0.1, 0.1, 0.2, 0.05],
            1.0,
            30,
        );
        assert_eq!(r.slope(), Some(-1.0));
        assert_eq!(r.slope2(), Some(-3.0));
        assert_eq!(r.break_point(), Some(-0.7));
    }
}
