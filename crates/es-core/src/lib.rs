//! # es-core
//!
//! Core types for EddyStat.
//!
//! This crate provides:
//! - the [`Dataset`] adapter wrapping intensity maps and spectral cubes,
//! - descriptor containers ([`Curve`], [`Histogram`]),
//! - parametric model fit results ([`FitResult`]),
//! - the shared error taxonomy ([`Error`], [`Result`]).
//!
//! ## Architecture
//!
//! Statistic algorithms (es-stats) and the comparison orchestrator
//! (es-compare) both depend on this crate and nothing here depends on
//! them. Everything in es-core is immutable after construction, so values
//! can be shared freely across concurrent statistic computations.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Dataset adapter: masked N-dimensional intensity data plus scale metadata.
pub mod dataset;
/// Descriptor containers: curves, histograms, empirical CDFs.
pub mod descriptor;
/// Error taxonomy shared by all EddyStat crates.
pub mod error;
/// Parametric fit models and fit results.
pub mod fit;

pub use dataset::{Dataset, DatasetMeta};
pub use descriptor::{ecdf, Curve, Histogram};
pub use error::{Error, Result};
pub use fit::{FitModel, FitResult};
