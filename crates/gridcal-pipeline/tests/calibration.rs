//! End-to-end calibration pipeline tests on synthetic two-plane scenes.

use nalgebra::Rotation3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use gridcal_core::{CalibrationPoint, Camera, Mat3, Pt3, Real, RealGridData, Vec3};
use gridcal_pipeline::{CalibrationOptions, CameraCalibrator};

fn ground_truth() -> Camera {
    let k = Mat3::new(820.0, 0.0, 512.0, 0.0, 800.0, 384.0, 0.0, 0.0, 1.0);
    let rot = Rotation3::from_euler_angles(0.1, -0.08, 0.04);
    Camera::from_factors(&k, rot.matrix(), &Vec3::new(0.05, -0.1, 1.6))
}

fn scene() -> (Camera, Vec<RealGridData>, Vec<CalibrationPoint>) {
    let cam = ground_truth();
    let mut grids = Vec::new();
    let mut points = Vec::new();
    for g in 0..2 {
        let z = 2.2 + 0.6 * g as Real;
        let grid = RealGridData::new(
            Pt3::new(-0.45, -0.35, z),
            Pt3::new(0.45, -0.35, z + 0.12),
            Pt3::new(-0.45, 0.35, z),
            Pt3::new(0.45, 0.35, z + 0.12),
            6,
            8,
        )
        .unwrap();
        for row in 0..6 {
            for col in 0..8 {
                let world = grid.interpolate(row, col).unwrap();
                let image = cam.project(&world).unwrap();
                points.push(CalibrationPoint::new(image, world, g, row, col));
            }
        }
        grids.push(grid);
    }
    (cam, grids, points)
}

#[test]
fn noise_free_scene_recovers_the_camera() {
    let (truth, mut grids, points) = scene();
    let calibrator = CameraCalibrator::new(CalibrationOptions::default());
    let (cam, report) = calibrator.calibrate(&points, &mut grids).unwrap();

    assert!(
        report.mean_reprojection_error < 1e-6,
        "mean error {}",
        report.mean_reprojection_error
    );
    assert!(
        (cam.k - truth.k).norm() < 1e-3,
        "intrinsics differ: {} vs {}",
        cam.k,
        truth.k
    );
    assert!((cam.r - truth.r).norm() < 1e-6, "rotation differs");
    assert!((cam.center() - truth.center()).norm() < 1e-5, "center differs");
    assert_eq!(report.points_used, points.len());
    assert_eq!(report.outliers_removed, 0);
}

#[test]
fn moderate_noise_degrades_gracefully() {
    let (_, mut grids, mut points) = scene();
    let mut rng = StdRng::seed_from_u64(11);
    for pt in &mut points {
        pt.image.x += rng.gen_range(-0.3..0.3);
        pt.image.y += rng.gen_range(-0.3..0.3);
    }

    let calibrator = CameraCalibrator::new(CalibrationOptions::default());
    let (cam, report) = calibrator.calibrate(&points, &mut grids).unwrap();

    assert!(
        report.mean_reprojection_error < 1.0,
        "mean error {}",
        report.mean_reprojection_error
    );
    // Intrinsics stay within a percent of the truth under sub-pixel noise.
    let truth = ground_truth();
    assert!(
        (cam.k[(0, 0)] - truth.k[(0, 0)]).abs() / truth.k[(0, 0)] < 0.01,
        "fx drifted to {}",
        cam.k[(0, 0)]
    );
}

#[test]
fn gross_outlier_is_eliminated() {
    let (_, mut grids, mut points) = scene();
    points[10].image.x += 300.0;

    let options = CalibrationOptions {
        eliminate_outliers: true,
        ..CalibrationOptions::default()
    };
    let calibrator = CameraCalibrator::new(options);
    let (_, report) = calibrator.calibrate(&points, &mut grids).unwrap();

    assert!(report.outliers_removed >= 1, "outlier was not removed");
    assert_eq!(
        report.points_used + report.outliers_removed,
        points.len(),
        "point bookkeeping is inconsistent"
    );
    assert!(
        report.mean_reprojection_error < 1e-4,
        "mean error {} after elimination",
        report.mean_reprojection_error
    );
}

#[test]
fn update_grids_writes_back_consistent_corners() {
    let (_, mut grids, points) = scene();
    let originals = grids.clone();

    let options = CalibrationOptions {
        update_grids: true,
        ..CalibrationOptions::default()
    };
    let calibrator = CameraCalibrator::new(options);
    calibrator.calibrate(&points, &mut grids).unwrap();

    // Noise-free measurements are already optimal, so the written-back
    // corners survive normalization and denormalization unchanged.
    for (updated, original) in grids.iter().zip(originals.iter()) {
        for (u, o) in updated.corners().iter().zip(original.corners().iter()) {
            assert!((u - o).norm() < 1e-6, "corner moved: {:?} vs {:?}", u, o);
        }
    }
}

#[test]
fn too_few_points_fail_fast() {
    let (_, mut grids, points) = scene();
    let calibrator = CameraCalibrator::new(CalibrationOptions::default());
    assert!(calibrator.calibrate(&points[..5], &mut grids).is_err());
}
