//! Linear estimate → nonlinear joint refinement on a noisy synthetic scene.

use nalgebra::Rotation3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use gridcal_core::camera::project_with;
use gridcal_core::{CalibrationPoint, Camera, Mat3, Pt2, Pt3, Real, RealGridData, Vec3};
use gridcal_linear::dlt::estimate_camera_matrix_normalized;
use gridcal_optim::camera_fit::{CameraFitOptions, CameraFitProblem};
use gridcal_optim::{LevenbergMarquardt, SolveOptions};

const NOISE: Real = 0.3;

fn scene() -> (Camera, Vec<RealGridData>, Vec<CalibrationPoint>) {
    let k = Mat3::new(850.0, 0.0, 512.0, 0.0, 830.0, 384.0, 0.0, 0.0, 1.0);
    let rot = Rotation3::from_euler_angles(0.08, -0.12, 0.05);
    let cam = Camera::from_factors(&k, rot.matrix(), &Vec3::new(0.1, 0.0, 1.4));

    let mut grids = Vec::new();
    let mut points = Vec::new();
    for g in 0..2 {
        let z = 2.0 + 0.5 * g as Real;
        let grid = RealGridData::new(
            Pt3::new(-0.4, -0.3, z),
            Pt3::new(0.4, -0.3, z + 0.1),
            Pt3::new(-0.4, 0.3, z),
            Pt3::new(0.4, 0.3, z + 0.1),
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
fn refinement_improves_on_the_noisy_linear_estimate() {
    let (_, grids, mut points) = scene();

    let mut rng = StdRng::seed_from_u64(42);
    for pt in &mut points {
        pt.image.x += rng.gen_range(-NOISE..NOISE);
        pt.image.y += rng.gen_range(-NOISE..NOISE);
    }

    let world: Vec<Pt3> = points.iter().map(|p| p.world).collect();
    let image: Vec<Pt2> = points.iter().map(|p| p.image).collect();
    let p0 = estimate_camera_matrix_normalized(&world, &image).unwrap();

    let mut problem =
        CameraFitProblem::new(points.clone(), grids, CameraFitOptions::default()).unwrap();
    let start = problem.initial_params(&p0);
    let report = LevenbergMarquardt::new(SolveOptions::default())
        .minimize(&mut problem, &start)
        .unwrap();

    assert!(
        report.residual <= report.initial_residual,
        "refinement must not lose ground: {} > {}",
        report.residual,
        report.initial_residual
    );

    // Mean reprojection error against the noisy measurements stays within a
    // small multiple of the injected noise.
    let p_est = CameraFitProblem::camera_matrix(&report.best);
    let grids_est = problem.grid_estimates(&report.best);
    let mut mean_err = 0.0;
    for pt in &points {
        let world = grids_est[pt.grid].interpolate(pt.row, pt.col).unwrap();
        let proj = project_with(&p_est, &world).unwrap();
        mean_err += (proj - pt.image).norm();
    }
    mean_err /= points.len() as Real;
    assert!(mean_err < 3.0 * NOISE, "mean reprojection error {}", mean_err);

    // The camera still decomposes cleanly after refinement.
    let cam = Camera::from_matrix(p_est).unwrap();
    assert!(cam.k[(0, 0)] > 0.0 && cam.k[(1, 1)] > 0.0);
}
