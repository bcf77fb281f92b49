//! Metric-level properties every statistic must satisfy: symmetry,
//! vanishing self-distance, and determinism of `compute`.

use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

use es_core::Dataset;
use es_stats::{
    Bispectrum, BispectrumConfig, DeltaVariance, DeltaVarianceConfig, Dendrogram,
    DendrogramConfig, Genus, GenusConfig, Moments, MomentsConfig, Mvc, MvcConfig, Pca,
    PcaConfig, Pdf, PdfConfig, PowerSpectrum, PowerSpectrumConfig, Scf, ScfConfig, Statistic,
    Vca, VcaConfig, Vcs, VcsConfig, Wavelet, WaveletConfig,
};

fn noise_image(seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = Array2::from_shape_fn((48, 48), |_| {
        <StandardNormal as Distribution<f64>>::sample(&StandardNormal, &mut rng)
    });
    Dataset::from_image(data, 1.0).unwrap()
}

fn noise_cube(seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = Array3::from_shape_fn((16, 32, 32), |_| {
        <StandardNormal as Distribution<f64>>::sample(&StandardNormal, &mut rng)
    });
    Dataset::from_cube(data, 1.0, 1.0).unwrap()
}

/// Symmetry, self-distance, and recompute-determinism for one statistic.
fn check_metric<S: Statistic>(a: &Dataset, b: &Dataset, cfg: &S::Config) {
    let name = S::name();
    let sa = S::compute(a, cfg).unwrap_or_else(|e| panic!("{name}: compute(A) failed: {e}"));
    let sa2 = S::compute(a, cfg).unwrap_or_else(|e| panic!("{name}: recompute(A) failed: {e}"));
    let sb = S::compute(b, cfg).unwrap_or_else(|e| panic!("{name}: compute(B) failed: {e}"));

    // Self-distance: recomputing from the same dataset and configuration
    // must land at the metric's floor.
    let d_self = sa.distance(&sa2).unwrap_or_else(|e| panic!("{name}: self distance: {e}"));
    assert!(
        d_self.combined < 1e-9,
        "{name}: self-distance should vanish, got {}",
        d_self.combined
    );

    // Symmetry within floating-point tolerance.
    let dab = sa.distance(&sb).unwrap_or_else(|e| panic!("{name}: d(A,B): {e}"));
    let dba = sb.distance(&sa).unwrap_or_else(|e| panic!("{name}: d(B,A): {e}"));
    assert!(
        (dab.combined - dba.combined).abs() < 1e-9,
        "{name}: asymmetric distance: {} vs {}",
        dab.combined,
        dba.combined
    );
    assert!(dab.combined.is_finite() && dab.combined >= 0.0);
}

#[test]
fn image_statistics_satisfy_metric_properties() {
    let a = noise_image(101);
    let b = noise_image(202);

    check_metric::<PowerSpectrum>(&a, &b, &PowerSpectrumConfig::default());
    check_metric::<Bispectrum>(
        &a,
        &b,
        &BispectrumConfig { max_wavenumber: Some(8), n_samples: 50, seed: 7 },
    );
    check_metric::<Wavelet>(&a, &b, &WaveletConfig::default());
    check_metric::<DeltaVariance>(&a, &b, &DeltaVarianceConfig::default());
    check_metric::<Genus>(&a, &b, &GenusConfig::default());
    check_metric::<Dendrogram>(&a, &b, &DendrogramConfig::default());
    check_metric::<Pdf>(&a, &b, &PdfConfig::default());
    check_metric::<Moments>(&a, &b, &MomentsConfig::default());
}

#[test]
fn cube_statistics_satisfy_metric_properties() {
    let a = noise_cube(303);
    let b = noise_cube(404);

    check_metric::<PowerSpectrum>(&a, &b, &PowerSpectrumConfig::default());
    check_metric::<Mvc>(&a, &b, &MvcConfig::default());
    check_metric::<Vca>(&a, &b, &VcaConfig::default());
    check_metric::<Vcs>(&a, &b, &VcsConfig::default());
    check_metric::<Scf>(&a, &b, &ScfConfig { max_lag: 5, fit_range: None });
    check_metric::<Pca>(&a, &b, &PcaConfig::default());
    check_metric::<Pdf>(&a, &b, &PdfConfig::default());
}

#[test]
fn image_statistics_reject_cube_only_methods() {
    let img = noise_image(9);
    assert!(Mvc::compute(&img, &MvcConfig::default()).is_err());
    assert!(Vca::compute(&img, &VcaConfig::default()).is_err());
    assert!(Vcs::compute(&img, &VcsConfig::default()).is_err());
    assert!(Scf::compute(&img, &ScfConfig::default()).is_err());
    assert!(Pca::compute(&img, &PcaConfig::default()).is_err());
}

#[test]
fn configuration_echo_reproduces_descriptor() {
    // Round-trip the configuration through serde and recompute: the raw
    // descriptor must be bit-identical.
    let ds = noise_image(55);
    let cfg = PowerSpectrumConfig {
        fit_range: Some((0.08, 0.42)),
        weighted_fit: true,
        ..PowerSpectrumConfig::default()
    };
    let first = PowerSpectrum::compute(&ds, &cfg).unwrap();

    let echoed: PowerSpectrumConfig =
        serde_json::from_str(&serde_json::to_string(first.config()).unwrap()).unwrap();
    let replay = PowerSpectrum::compute(&ds, &echoed).unwrap();
    assert_eq!(first.spectrum().y, replay.spectrum().y);
    assert_eq!(
        first.fit().unwrap().parameters,
        replay.fit().unwrap().parameters
    );
}

#[test]
fn unknown_config_fields_are_rejected() {
    let err = serde_json::from_str::<PowerSpectrumConfig>(
        r#"{
            "apodization": {"kind": "hanning"},
            "binning": {"n_bins": null, "log_spacing": false, "max_freq": 0.5},
            "fit_range": null,
            "weighted_fit": false,
            "bogus_option": 3
        }"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("bogus_option"), "unexpected error: {err}");
}
