//! Model fitting in log-log space.
//!
//! The default parametric model for power-law-shaped descriptors is a
//! straight line in `log10`-`log10` space, solved in closed form by
//! (weighted) least squares. A segmented variant fits two slopes meeting at
//! a free break point via a grid search over candidate breaks.
//!
//! Both fitters are stateless pure functions. They never raise for
//! data-dependent degeneracies: too few usable points, a singular design,
//! or non-finite residual variance yield a [`FitResult`] marked invalid,
//! and the caller's descriptor survives untouched.

use nalgebra::{DMatrix, DVector};

use es_core::{FitModel, FitResult};

/// Keep only samples usable in log-log space, with their weights.
///
/// Samples with non-positive or non-finite `x`/`y` cannot be logged and are
/// dropped (logged at debug level).
fn log_samples(
    x: &[f64],
    y: &[f64],
    weights: Option<&[f64]>,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let w_ok = match weights {
        Some(w) if w.len() == x.len() => Some(w),
        Some(w) => {
            log::warn!(
                "fit weights length {} does not match {} samples; ignoring weights",
                w.len(),
                x.len()
            );
            None
        }
        None => None,
    };

    let mut t = Vec::with_capacity(x.len());
    let mut z = Vec::with_capacity(x.len());
    let mut w = Vec::with_capacity(x.len());
    let mut dropped = 0usize;
    for i in 0..x.len().min(y.len()) {
        let wi = w_ok.map_or(1.0, |ws| ws[i]);
        if x[i] > 0.0
            && y[i] > 0.0
            && x[i].is_finite()
            && y[i].is_finite()
            && wi.is_finite()
            && wi > 0.0
        {
            t.push(x[i].log10());
            z.push(y[i].log10());
            w.push(wi);
        } else {
            dropped += 1;
        }
    }
    if dropped > 0 {
        log::debug!("dropped {dropped} samples not usable in log-log space");
    }
    (t, z, w)
}

/// Inverse-variance weights in log space from per-point scatter on `y`.
///
/// Propagates `sigma_log10 = sigma / (y ln 10)`. Returns `None` (fall back
/// to an unweighted fit) when any point has non-positive value or scatter,
/// since a zero-scatter bin would otherwise dominate the fit unboundedly.
pub fn log_weights_from_scatter(y: &[f64], stddev: &[f64]) -> Option<Vec<f64>> {
    if y.len() != stddev.len() {
        return None;
    }
    let mut w = Vec::with_capacity(y.len());
    for (&yi, &si) in y.iter().zip(stddev.iter()) {
        if yi > 0.0 && si > 0.0 && si.is_finite() {
            let sigma_log = si / (yi * std::f64::consts::LN_10);
            w.push(1.0 / (sigma_log * sigma_log));
        } else {
            return None;
        }
    }
    Some(w)
}

/// Fit a single power law `y = A x^s` by weighted least squares of
/// `log10 y` on `log10 x`.
///
/// `weights`, when given, are inverse variances in log space. Parameters
/// are ordered `[intercept, slope]`; the covariance is the usual
/// `sigma^2 (X^T W X)^-1` with the residual variance estimated from the
/// weighted residual sum of squares.
pub fn fit_power_law(x: &[f64], y: &[f64], weights: Option<&[f64]>) -> FitResult {
    let (t, z, w) = log_samples(x, y, weights);
    let n = t.len();
    if n < 3 {
        return FitResult::invalid(FitModel::PowerLaw);
    }

    let mut s_w = 0.0;
    let mut s_t = 0.0;
    let mut s_tt = 0.0;
    let mut s_z = 0.0;
    let mut s_tz = 0.0;
    for i in 0..n {
        s_w += w[i];
        s_t += w[i] * t[i];
        s_tt += w[i] * t[i] * t[i];
        s_z += w[i] * z[i];
        s_tz += w[i] * t[i] * z[i];
    }

    let det = s_w * s_tt - s_t * s_t;
    if !(det.is_finite() && det > 0.0) {
        return FitResult::invalid(FitModel::PowerLaw);
    }

    let intercept = (s_tt * s_z - s_t * s_tz) / det;
    let slope = (s_w * s_tz - s_t * s_z) / det;

    let mut rss = 0.0;
    for i in 0..n {
        let r = z[i] - (intercept + slope * t[i]);
        rss += w[i] * r * r;
    }
    let dof = (n - 2) as f64;
    let sigma2 = rss / dof;
    if !sigma2.is_finite() {
        return FitResult::invalid(FitModel::PowerLaw);
    }

    // sigma^2 * inv([[s_w, s_t], [s_t, s_tt]])
    let c00 = sigma2 * s_tt / det;
    let c01 = -sigma2 * s_t / det;
    let c11 = sigma2 * s_w / det;

    FitResult::with_covariance(
        FitModel::PowerLaw,
        vec![intercept, slope],
        vec![c00.max(0.0).sqrt(), c11.max(0.0).sqrt()],
        vec![c00, c01, c01, c11],
        rss,
        n,
    )
}

/// Weighted least squares of `z` on the columns of `design`, returning
/// `(coefficients, covariance, rss)`.
fn wls(design: &DMatrix<f64>, z: &DVector<f64>, w: &[f64]) -> Option<(DVector<f64>, DMatrix<f64>, f64)> {
    let n = design.nrows();
    let p = design.ncols();
    if n <= p {
        return None;
    }

    // X^T W X and X^T W z
    let mut xtwx = DMatrix::<f64>::zeros(p, p);
    let mut xtwz = DVector::<f64>::zeros(p);
    for i in 0..n {
        for a in 0..p {
            let xa = design[(i, a)] * w[i];
            xtwz[a] += xa * z[i];
            for b in 0..p {
                xtwx[(a, b)] += xa * design[(i, b)];
            }
        }
    }

    let lu = xtwx.clone().lu();
    let coef = lu.solve(&xtwz)?;
    let inv = xtwx.lu().try_inverse()?;

    let mut rss = 0.0;
    for i in 0..n {
        let mut pred = 0.0;
        for a in 0..p {
            pred += design[(i, a)] * coef[a];
        }
        let r = z[i] - pred;
        rss += w[i] * r * r;
    }
    let sigma2 = rss / (n - p) as f64;
    if !sigma2.is_finite() {
        return None;
    }
    Some((coef, inv * sigma2, rss))
}

/// Fit a continuous two-segment power law with a free break point.
///
/// Model in log space: `z = a + b1*t + (b2 - b1)*max(t - brk, 0)` with
/// `t = log10 x`. The break is located by grid search over midpoints of the
/// sampled `t` values that leave at least `min_seg_points` on each side;
/// at each candidate the remaining parameters are linear and solved by WLS.
///
/// Parameters are ordered `[intercept, slope1, slope2, break]` with the
/// break in `log10 x`. The break uncertainty is estimated from the
/// curvature of the RSS profile around the selected candidate.
pub fn fit_segmented_power_law(
    x: &[f64],
    y: &[f64],
    weights: Option<&[f64]>,
    min_seg_points: usize,
) -> FitResult {
    let min_seg_points = min_seg_points.max(2);
    let (t, z, w) = log_samples(x, y, weights);
    let n = t.len();
    if n < 2 * min_seg_points || n < 5 {
        return FitResult::invalid(FitModel::SegmentedPowerLaw);
    }

    // Sort by t so candidate breaks are midpoints of adjacent samples.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| t[i].total_cmp(&t[j]));
    let ts: Vec<f64> = order.iter().map(|&i| t[i]).collect();
    let zs: Vec<f64> = order.iter().map(|&i| z[i]).collect();
    let ws: Vec<f64> = order.iter().map(|&i| w[i]).collect();

    let candidates: Vec<f64> = (min_seg_points..=n - min_seg_points)
        .filter(|&k| ts[k] > ts[k - 1])
        .map(|k| 0.5 * (ts[k - 1] + ts[k]))
        .collect();
    if candidates.is_empty() {
        return FitResult::invalid(FitModel::SegmentedPowerLaw);
    }

    let zv = DVector::from_vec(zs.clone());
    let mut best: Option<(f64, DVector<f64>, DMatrix<f64>, f64)> = None;
    let mut profile: Vec<(f64, f64)> = Vec::with_capacity(candidates.len());

    for &brk in &candidates {
        let mut design = DMatrix::<f64>::zeros(n, 3);
        for i in 0..n {
            design[(i, 0)] = 1.0;
            design[(i, 1)] = ts[i];
            design[(i, 2)] = (ts[i] - brk).max(0.0);
        }
        let Some((coef, cov, rss)) = wls(&design, &zv, &ws) else {
            continue;
        };
        profile.push((brk, rss));
        let better = best.as_ref().map_or(true, |(_, _, _, best_rss)| rss < *best_rss);
        if better {
            best = Some((brk, coef, cov, rss));
        }
    }

    let Some((brk, coef, cov, rss)) = best else {
        return FitResult::invalid(FitModel::SegmentedPowerLaw);
    };

    let intercept = coef[0];
    let slope1 = coef[1];
    let slope2 = coef[1] + coef[2];

    let var_a = cov[(0, 0)];
    let var_b1 = cov[(1, 1)];
    let var_b2 = cov[(1, 1)] + cov[(2, 2)] + 2.0 * cov[(1, 2)];

    // Break uncertainty from the local curvature of the RSS profile; when
    // the profile is flat or the minimum sits at a profile edge, fall back
    // to the candidate spacing.
    let sigma2 = rss / (n - 4) as f64;
    let idx = profile
        .iter()
        .position(|&(b, _)| b == brk)
        .expect("selected break is in the profile");
    let brk_err = if idx > 0 && idx + 1 < profile.len() {
        let (b0, r0) = profile[idx - 1];
        let (b1, r1) = profile[idx];
        let (b2, r2) = profile[idx + 1];
        let h0 = b1 - b0;
        let h1 = b2 - b1;
        // Second derivative on a possibly non-uniform grid.
        let curv = 2.0 * (h0 * r2 - (h0 + h1) * r1 + h1 * r0) / (h0 * h1 * (h0 + h1));
        if curv > 0.0 {
            (2.0 * sigma2 / curv).sqrt()
        } else {
            0.5 * (h0 + h1)
        }
    } else {
        let span = candidates.last().expect("non-empty") - candidates[0];
        (span / candidates.len() as f64).max(f64::EPSILON)
    };

    let parameters = vec![intercept, slope1, slope2, brk];
    let uncertainties = vec![
        var_a.max(0.0).sqrt(),
        var_b1.max(0.0).sqrt(),
        var_b2.max(0.0).sqrt(),
        brk_err,
    ];
    if parameters.iter().chain(uncertainties.iter()).any(|v| !v.is_finite()) {
        return FitResult::invalid(FitModel::SegmentedPowerLaw);
    }

    // Propagate the linear 3x3 covariance to [a, b1, b2] via b2 = b1 + c;
    // the break is treated as independent of the linear parameters.
    let mut full = vec![0.0; 16];
    let j = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 1.0, 1.0]];
    for a in 0..3 {
        for b in 0..3 {
            let mut acc = 0.0;
            for p in 0..3 {
                for q in 0..3 {
                    acc += j[a][p] * cov[(p, q)] * j[b][q];
                }
            }
            full[a * 4 + b] = acc;
        }
    }
    full[15] = brk_err * brk_err;

    FitResult::with_covariance(
        FitModel::SegmentedPowerLaw,
        parameters,
        uncertainties,
        full,
        rss,
        n,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_power_law_recovers_exact_slope() {
        let x: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&v| 3.0 * v.powf(-2.5)).collect();
        let fit = fit_power_law(&x, &y, None);
        assert!(fit.is_valid());
        assert_relative_eq!(fit.slope().unwrap(), -2.5, epsilon = 1e-10);
        assert_relative_eq!(fit.parameters[0], 3.0_f64.log10(), epsilon = 1e-10);
        // Exact data: residuals vanish.
        assert!(fit.rss < 1e-18);
    }

    #[test]
    fn test_power_law_amplitude_invariance() {
        let x: Vec<f64> = (1..=32).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().enumerate().map(|(i, &v)| v.powf(-1.7) * (1.0 + 0.01 * ((i * 7 % 5) as f64))).collect();
        let y_scaled: Vec<f64> = y.iter().map(|&v| 100.0 * v).collect();
        let a = fit_power_law(&x, &y, None);
        let b = fit_power_law(&x, &y_scaled, None);
        assert_relative_eq!(a.slope().unwrap(), b.slope().unwrap(), epsilon = 1e-12);
        assert_relative_eq!(
            a.slope_uncertainty().unwrap(),
            b.slope_uncertainty().unwrap(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_power_law_too_few_points_is_invalid() {
        let fit = fit_power_law(&[1.0, 2.0], &[1.0, 0.5], None);
        assert!(!fit.is_valid());
    }

    #[test]
    fn test_power_law_drops_nonpositive_samples() {
        let x = vec![1.0, 2.0, 4.0, 8.0, 16.0];
        let y = vec![1.0, 0.5, -1.0, 0.125, 0.0625];
        let fit = fit_power_law(&x, &y, None);
        assert!(fit.is_valid());
        assert_eq!(fit.n_points, 4);
        assert_relative_eq!(fit.slope().unwrap(), -1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_power_law_degenerate_design_is_invalid() {
        // All x equal: slope is unidentifiable.
        let fit = fit_power_law(&[2.0, 2.0, 2.0, 2.0], &[1.0, 2.0, 3.0, 4.0], None);
        assert!(!fit.is_valid());
    }

    #[test]
    fn test_segmented_recovers_break() {
        // Slope -1 below x=10, slope -3 above, continuous at the break.
        let x: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|&v| if v <= 10.0 { v.powf(-1.0) } else { 0.1 * (v / 10.0).powf(-3.0) })
            .collect();
        let fit = fit_segmented_power_law(&x, &y, None, 3);
        assert!(fit.is_valid());
        assert_relative_eq!(fit.slope().unwrap(), -1.0, epsilon = 0.05);
        assert_relative_eq!(fit.slope2().unwrap(), -3.0, epsilon = 0.05);
        assert_relative_eq!(fit.break_point().unwrap(), 1.0, epsilon = 0.05);
    }

    #[test]
    fn test_segmented_too_few_points_is_invalid() {
        let x = vec![1.0, 2.0, 4.0, 8.0];
        let y = vec![1.0, 0.5, 0.25, 0.125];
        let fit = fit_segmented_power_law(&x, &y, None, 3);
        assert!(!fit.is_valid());
    }
}
