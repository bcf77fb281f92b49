//! # es-stats
//!
//! Turbulence-morphology statistics for EddyStat.
//!
//! This crate provides:
//! - the statistic algorithm family (spectral, multi-scale, topological,
//!   moment- and correlation-based descriptors),
//! - the shared model fitter (power law and segmented power law in log-log
//!   space),
//! - the per-statistic distance metrics.
//!
//! ## Architecture
//!
//! Every algorithm implements the same two-phase [`Statistic`] contract:
//! `compute(dataset, config)` builds an immutable instance holding the raw
//! descriptor (and, where the method defines one, a model fit), and
//! `distance(&other)` compares two instances of the same statistic. The
//! numerical utilities (FFT, fitting, curve resampling) are stateless free
//! functions, so concurrent per-statistic execution needs no shared state.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Bicoherence of the two-point Fourier phase coupling.
pub mod bispectrum;
/// Delta-variance: core/annulus filtered variance over lag.
pub mod delta_variance;
/// Hierarchical structure counts over a merge-threshold ladder.
pub mod dendrogram;
/// Model fitting: power law and segmented power law in log-log space.
pub mod fitting;
/// FFT helpers, apodization windows, radial spectrum binning.
pub mod fourier;
/// Genus statistic: topology of superlevel and sublevel sets.
pub mod genus;
/// Local statistical moments (skewness/kurtosis maps).
pub mod moments;
/// Modified velocity centroids power spectrum.
pub mod mvc;
/// Principal component analysis of cube channel covariance.
pub mod pca;
/// One-point intensity distribution.
pub mod pdf;
/// Spatial power spectrum.
pub mod power_spectrum;
/// Curve resampling and the shared distance primitives.
pub mod resample;
/// Spectral correlation function over spatial lags.
pub mod scf;
/// The shared statistic contract and distance value types.
pub mod statistic;
/// Velocity channel analysis.
pub mod vca;
/// Velocity coordinate spectrum.
pub mod vcs;
/// Continuous wavelet response over scale.
pub mod wavelet;

pub use bispectrum::{Bispectrum, BispectrumConfig};
pub use delta_variance::{DeltaVariance, DeltaVarianceConfig};
pub use dendrogram::{Dendrogram, DendrogramConfig};
pub use fitting::{fit_power_law, fit_segmented_power_law};
pub use fourier::{Apodization, RadialBinning};
pub use genus::{Genus, GenusConfig};
pub use moments::{Moments, MomentsConfig};
pub use mvc::{Mvc, MvcConfig};
pub use pca::{Pca, PcaConfig};
pub use pdf::{Pdf, PdfConfig};
pub use power_spectrum::{PowerSpectrum, PowerSpectrumConfig};
pub use scf::{Scf, ScfConfig};
pub use statistic::{DistanceValue, Statistic, StatisticName};
pub use vca::{Vca, VcaConfig};
pub use vcs::{Vcs, VcsConfig};
pub use wavelet::{Wavelet, WaveletConfig};
