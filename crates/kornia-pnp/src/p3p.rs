//! Perspective-3-Point minimal solver.
//!
//! Grunert's formulation: the law of cosines on the three viewing rays yields a quartic in the ratio of
//! two depths. Each positive real root gives the three depths, which are polished with Gauss-Newton and
//! turned into a pose by absolute orientation between the object points and the back-projected points.

use nalgebra::{Isometry3, Matrix3, Point2, Point3, Vector3};

use crate::camera::Camera;
use crate::equation::solve_quartic;
use crate::ops::{absolute_orientation, are_collinear};
use crate::pose::cos_half_angle;
use crate::scalar::{eps, lit, weak_eps, Real};

/// Maximal number of poses returned by the solver.
pub const MAX_SOLUTIONS: usize = 4;

const REFINE_ITERATIONS: usize = 5;

/// Determines the IF poses (`flippedCamera_T_world`) for three 2D/3D correspondences.
///
/// Returns between zero and [`MAX_SOLUTIONS`] poses; degenerate configurations yield no pose.
pub fn poses<T: Real, C: Camera<T> + ?Sized>(
    camera: &C,
    object_points: &[Point3<T>; 3],
    image_points: &[Point2<T>; 3],
) -> Vec<Isometry3<T>> {
    let rays = [
        camera.vector_flipped(&image_points[0]),
        camera.vector_flipped(&image_points[1]),
        camera.vector_flipped(&image_points[2]),
    ];
    poses_from_rays(object_points, &rays)
}

/// Determines the IF poses for three object points and their viewing rays in the flipped camera frame.
///
/// The rays do not need to be normalized.
pub fn poses_from_rays<T: Real>(
    object_points: &[Point3<T>; 3],
    rays_if: &[Vector3<T>; 3],
) -> Vec<Isometry3<T>> {
    let [p1, p2, p3] = object_points;

    if object_points
        .iter()
        .any(|p| !p.coords.iter().all(|v| v.is_finite()))
        || are_collinear(p1, p2, p3)
    {
        log::trace!("p3p: degenerate object points");
        return Vec::new();
    }

    let mut rays = [Vector3::zeros(); 3];
    for (ray, input) in rays.iter_mut().zip(rays_if.iter()) {
        let norm = input.norm();
        if !norm.is_finite() || norm <= eps::<T>() {
            log::trace!("p3p: invalid ray");
            return Vec::new();
        }
        *ray = input / norm;
    }
    let [j1, j2, j3] = rays;

    // all three rays in one plane means the image points are collinear
    if Matrix3::from_columns(&rays).determinant().abs() <= eps::<T>() {
        log::trace!("p3p: degenerate rays");
        return Vec::new();
    }

    let a2 = (p2 - p3).norm_squared();
    let b2 = (p1 - p3).norm_squared();
    let c2 = (p1 - p2).norm_squared();

    let cos_alpha = j2.dot(&j3);
    let cos_beta = j1.dot(&j3);
    let cos_gamma = j1.dot(&j2);

    let Some(coefficients) = grunert_coefficients(a2, b2, c2, cos_alpha, cos_beta, cos_gamma)
    else {
        log::trace!("p3p: ill-conditioned distances");
        return Vec::new();
    };

    let [a4, a3, a2_coefficient, a1, a0] = coefficients;
    let amc = (a2 - c2) / b2;
    let one = T::one();
    let two: T = lit(2.0);

    let mut solutions: Vec<Isometry3<T>> = Vec::with_capacity(MAX_SOLUTIONS);

    for v in solve_quartic(a4, a3, a2_coefficient, a1, a0) {
        if v <= T::zero() {
            continue;
        }

        let denominator = two * (cos_gamma - v * cos_alpha);
        if denominator.abs() <= eps::<T>() {
            continue;
        }
        let u = ((amc - one) * v * v - two * amc * cos_beta * v + one + amc) / denominator;
        if u <= T::zero() {
            continue;
        }

        let s1_sqr = b2 / (one + v * v - two * v * cos_beta);
        if !(s1_sqr > T::zero()) || !s1_sqr.is_finite() {
            continue;
        }
        let s1 = s1_sqr.sqrt();
        let depths = refine_depths(
            Vector3::new(s1, u * s1, v * s1),
            [a2, b2, c2],
            [cos_alpha, cos_beta, cos_gamma],
        );
        if depths.iter().any(|d| !(*d > T::zero()) || !d.is_finite()) {
            continue;
        }

        let camera_points = [
            Point3::from(j1 * depths.x),
            Point3::from(j2 * depths.y),
            Point3::from(j3 * depths.z),
        ];
        let Some(pose) = absolute_orientation(object_points.as_slice(), &camera_points) else {
            continue;
        };

        if !is_consistent(&pose, object_points, &rays) {
            log::trace!("p3p: inconsistent solution for root {v}");
            continue;
        }

        if solutions.iter().any(|existing| is_duplicate(existing, &pose)) {
            continue;
        }

        solutions.push(pose);
        if solutions.len() == MAX_SOLUTIONS {
            break;
        }
    }

    solutions
}

/// Coefficients `[A4, A3, A2, A1, A0]` of Grunert's quartic in `v = s3 / s1`.
fn grunert_coefficients<T: Real>(
    a2: T,
    b2: T,
    c2: T,
    cos_alpha: T,
    cos_beta: T,
    cos_gamma: T,
) -> Option<[T; 5]> {
    if b2 <= eps::<T>() {
        return None;
    }
    let one = T::one();
    let two: T = lit(2.0);
    let four: T = lit(4.0);

    let amc = (a2 - c2) / b2;
    let apc = (a2 + c2) / b2;
    let c_b = c2 / b2;
    let a_b = a2 / b2;
    let b_mc = (b2 - c2) / b2;
    let b_ma = (b2 - a2) / b2;

    let cos_alpha2 = cos_alpha * cos_alpha;
    let cos_beta2 = cos_beta * cos_beta;
    let cos_gamma2 = cos_gamma * cos_gamma;

    let a4 = (amc - one) * (amc - one) - four * c_b * cos_alpha2;
    let a3 = four
        * (amc * (one - amc) * cos_beta - (one - apc) * cos_alpha * cos_gamma
            + two * c_b * cos_alpha2 * cos_beta);
    let a2_coefficient = two
        * (amc * amc - one + two * amc * amc * cos_beta2 + two * b_mc * cos_alpha2
            - four * apc * cos_alpha * cos_beta * cos_gamma
            + two * b_ma * cos_gamma2);
    let a1 = four
        * (-amc * (one + amc) * cos_beta + two * a_b * cos_gamma2 * cos_beta
            - (one - apc) * cos_alpha * cos_gamma);
    let a0 = (one + amc) * (one + amc) - four * a_b * cos_gamma2;

    let coefficients = [a4, a3, a2_coefficient, a1, a0];
    coefficients
        .iter()
        .all(|c| c.is_finite())
        .then_some(coefficients)
}

/// Gauss-Newton polishing of the three depths on the law of cosines residuals.
fn refine_depths<T: Real>(depths: Vector3<T>, sqr_distances: [T; 3], cosines: [T; 3]) -> Vector3<T> {
    let [a2, b2, c2] = sqr_distances;
    let [cos_alpha, cos_beta, cos_gamma] = cosines;
    let two: T = lit(2.0);

    let residual = |s: &Vector3<T>| {
        Vector3::new(
            s.x * s.x + s.y * s.y - two * s.x * s.y * cos_gamma - c2,
            s.x * s.x + s.z * s.z - two * s.x * s.z * cos_beta - b2,
            s.y * s.y + s.z * s.z - two * s.y * s.z * cos_alpha - a2,
        )
    };
    let l1_norm = |r: &Vector3<T>| r.x.abs() + r.y.abs() + r.z.abs();

    let mut s = depths;
    let mut r = residual(&s);
    for _ in 0..REFINE_ITERATIONS {
        if l1_norm(&r) <= eps::<T>() {
            break;
        }

        #[rustfmt::skip]
        let jacobian = Matrix3::new(
            two * (s.x - s.y * cos_gamma), two * (s.y - s.x * cos_gamma), T::zero(),
            two * (s.x - s.z * cos_beta), T::zero(), two * (s.z - s.x * cos_beta),
            T::zero(), two * (s.y - s.z * cos_alpha), two * (s.z - s.y * cos_alpha),
        );
        let Some(inverse) = jacobian.try_inverse() else {
            break;
        };

        let candidate = s - inverse * r;
        let candidate_residual = residual(&candidate);
        if !(l1_norm(&candidate_residual) < l1_norm(&r)) {
            break;
        }
        s = candidate;
        r = candidate_residual;
    }
    s
}

/// Every object point must lie in front of the camera and on its viewing ray.
fn is_consistent<T: Real>(
    pose: &Isometry3<T>,
    object_points: &[Point3<T>; 3],
    rays: &[Vector3<T>; 3],
) -> bool {
    let min_cos = T::one() - weak_eps::<T>();
    object_points.iter().zip(rays.iter()).all(|(p, ray)| {
        let q = pose * p;
        let norm = q.coords.norm();
        q.z > T::zero() && norm.is_finite() && q.coords.dot(ray) >= min_cos * norm
    })
}

fn is_duplicate<T: Real>(a: &Isometry3<T>, b: &Isometry3<T>) -> bool {
    let translation_tolerance =
        weak_eps::<T>() * (T::one() + a.translation.vector.norm().max(b.translation.vector.norm()));
    (a.translation.vector - b.translation.vector).norm() <= translation_tolerance
        && cos_half_angle(&a.rotation, &b.rotation) >= T::one() - weak_eps::<T>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraError, PinholeCamera};

    fn max_sqr_reprojection(
        camera: &PinholeCamera<f64>,
        pose_if: &Isometry3<f64>,
        objects: &[Point3<f64>; 3],
        images: &[Point2<f64>; 3],
    ) -> f64 {
        objects
            .iter()
            .zip(images.iter())
            .map(|(o, i)| (camera.project_to_image_if(pose_if, o) - i).norm_squared())
            .fold(0.0, f64::max)
    }

    #[test]
    fn test_p3p_recovers_ground_truth() -> Result<(), CameraError> {
        let camera = PinholeCamera::<f64>::from_fov_x(640, 480, 60f64.to_radians())?;
        let pose_if = Isometry3::new(Vector3::new(0.2, -0.1, 6.0), Vector3::new(0.1, 0.3, -0.2));
        let objects = [
            Point3::new(-0.5, 0.2, 0.1),
            Point3::new(0.4, 0.45, -0.3),
            Point3::new(0.1, -0.5, 0.4),
        ];
        let images = objects.map(|o| camera.project_to_image_if(&pose_if, &o));

        let solutions = poses(&camera, &objects, &images);
        assert!(!solutions.is_empty() && solutions.len() <= MAX_SOLUTIONS);
        for solution in solutions.iter() {
            assert!(max_sqr_reprojection(&camera, solution, &objects, &images) < 1e-6);
        }
        let matches_ground_truth = solutions.iter().any(|solution| {
            (solution.translation.vector - pose_if.translation.vector).norm() < 1e-6
                && cos_half_angle(&solution.rotation, &pose_if.rotation) > 1.0 - 1e-9
        });
        assert!(matches_ground_truth);
        Ok(())
    }

    #[test]
    fn test_p3p_single_precision() -> Result<(), CameraError> {
        let camera = PinholeCamera::<f32>::new(640, 480, 500.0, 500.0, 320.0, 240.0)?;
        let pose_if = Isometry3::new(Vector3::new(0.1f32, 0.2, 4.0), Vector3::new(-0.2, 0.1, 0.05));
        let objects = [
            Point3::new(-0.6f32, -0.3, 0.0),
            Point3::new(0.5, -0.4, 0.2),
            Point3::new(0.0, 0.6, -0.1),
        ];
        let images = objects.map(|o| camera.project_to_image_if(&pose_if, &o));

        let solutions = poses(&camera, &objects, &images);
        let best = solutions
            .iter()
            .map(|solution| {
                objects
                    .iter()
                    .zip(images.iter())
                    .map(|(o, i)| (camera.project_to_image_if(solution, o) - i).norm_squared())
                    .fold(0.0f32, f32::max)
            })
            .fold(f32::MAX, f32::min);
        assert!(best < 1.0, "best squared error {best}");
        Ok(())
    }

    #[test]
    fn test_p3p_degenerate_inputs() {
        let collinear = [
            Point3::new(0.0f64, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(2.0, 2.0, 0.0),
        ];
        let rays = [
            Vector3::new(-0.1f64, 0.0, 1.0),
            Vector3::new(0.1, 0.0, 1.0),
            Vector3::new(0.0, 0.1, 1.0),
        ];
        assert!(poses_from_rays(&collinear, &rays).is_empty());

        let objects = [
            Point3::new(0.0f64, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let same_rays = [Vector3::z(), Vector3::z(), Vector3::new(0.1, 0.0, 1.0)];
        assert!(poses_from_rays(&objects, &same_rays).is_empty());

        let zero_ray = [Vector3::zeros(), rays[1], rays[2]];
        assert!(poses_from_rays(&objects, &zero_ray).is_empty());

        let nan_objects = [Point3::new(f64::NAN, 0.0, 0.0), objects[1], objects[2]];
        assert!(poses_from_rays(&nan_objects, &rays).is_empty());
    }
}
