//! Distortion fitting and point correction on synthetic barrel images.

use gridcal_core::{Line2D, Pt2, Real};
use gridcal_optim::distortion::{DistortionDirection, RadialDistortionModel, RationalModel};
use gridcal_pipeline::{CorrectionOptions, DistortionCorrector, ModelKind};

const PIXEL_CENTER: (Real, Real) = (400.0, 300.0);
const PIXEL_SCALE: Real = 350.0;

fn to_pixels(p: &Pt2) -> Pt2 {
    Pt2::new(
        PIXEL_CENTER.0 + PIXEL_SCALE * p.x,
        PIXEL_CENTER.1 + PIXEL_SCALE * p.y,
    )
}

/// Straight reference lines, bent by a barrel lens, in pixel coordinates.
fn barrel_lines() -> Vec<Vec<Pt2>> {
    let lens = RationalModel::new(0.08, 0.0, Pt2::new(0.0, 0.0), 1.0);
    let mut lines = Vec::new();
    for &offset in &[-0.6, -0.35, 0.35, 0.6] {
        let mut horizontal = Vec::new();
        let mut vertical = Vec::new();
        for i in 0..11 {
            let t = -0.75 + 0.15 * i as Real;
            horizontal.push(to_pixels(&lens.distort(&Pt2::new(t, offset))));
            vertical.push(to_pixels(&lens.distort(&Pt2::new(offset, t))));
        }
        lines.push(horizontal);
        lines.push(vertical);
    }
    lines
}

fn max_bow(points: &[Pt2]) -> Real {
    let line = Line2D::fit(points).unwrap();
    points
        .iter()
        .map(|p| line.signed_distance(p).abs())
        .fold(0.0, Real::max)
}

#[test]
fn rational_fit_straightens_the_lines() {
    let lines = barrel_lines();
    let mut corrector = DistortionCorrector::new(CorrectionOptions::default());
    let report = corrector.find_model_parameters(&lines).unwrap();

    assert!(
        report.residual < 0.1 * report.initial_residual,
        "residual {} did not drop from {}",
        report.residual,
        report.initial_residual
    );
    assert!(report
        .directions
        .iter()
        .all(|d| *d != DistortionDirection::AwayFromCenter));

    for line in &lines {
        let before = max_bow(line);
        let corrected = corrector.correct_points(line).unwrap();
        let after = max_bow(&corrected);
        assert!(
            after < 0.2 * before,
            "line still bowed: {} -> {}",
            before,
            after
        );
    }
}

#[test]
fn polynomial_variant_also_reduces_the_bow() {
    let lines = barrel_lines();
    let options = CorrectionOptions {
        model: ModelKind::Polynomial,
        ..CorrectionOptions::default()
    };
    let mut corrector = DistortionCorrector::new(options);
    let report = corrector.find_model_parameters(&lines).unwrap();
    assert!(
        report.residual < 0.5 * report.initial_residual,
        "residual {} vs initial {}",
        report.residual,
        report.initial_residual
    );
}

#[test]
fn correction_requires_a_fitted_model() {
    let corrector = DistortionCorrector::new(CorrectionOptions::default());
    assert!(corrector.correct_points(&[Pt2::origin()]).is_err());
}

#[test]
fn single_point_correction_matches_batch_correction() {
    let lines = barrel_lines();
    let mut corrector = DistortionCorrector::new(CorrectionOptions::default());
    corrector.find_model_parameters(&lines).unwrap();

    let p = lines[0][3];
    let single = corrector.correct_point(&p).unwrap();
    let batch = corrector.correct_points(&[p]).unwrap();
    assert_eq!(single, batch[0]);
}
