//! Levenberg–Marquardt pose refinement for PnP solutions.
//!
//! The pose is updated on the left, `pose_if <- exp(delta) * pose_if`, with `delta` holding the
//! translation and the axis-angle rotation. The Jacobian of the reprojection residuals is obtained by
//! central differences so that any [`Camera`] model can be used.

use nalgebra::{Isometry3, Matrix6, Point2, Point3, Vector3, Vector6};
use serde::{Deserialize, Serialize};

use crate::camera::Camera;
use crate::ops::reprojection_errors;
use crate::scalar::{is_single_precision, lit, saturated, Real};
use crate::types::{check_correspondences, PnPError, PnPResult};

/// Parameters controlling the LM pose refinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LMRefineParams {
    /// Maximum number of LM iterations.
    pub max_iterations: usize,
    /// Convergence threshold on the decrease of the summed squared error.
    pub cost_tolerance: f64,
    /// Convergence threshold on the gradient norm.
    pub gradient_tolerance: f64,
    /// Initial damping factor (lambda).
    pub initial_lambda: f64,
    /// Multiplicative factor to increase/decrease lambda.
    pub lambda_factor: f64,
}

impl Default for LMRefineParams {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            cost_tolerance: 1e-6,
            gradient_tolerance: 1e-8,
            initial_lambda: 1e-3,
            lambda_factor: 10.0,
        }
    }
}

impl LMRefineParams {
    /// Create default refinement parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set cost tolerance.
    pub fn with_cost_tolerance(mut self, tolerance: f64) -> Self {
        self.cost_tolerance = tolerance;
        self
    }

    /// Set gradient tolerance.
    pub fn with_gradient_tolerance(mut self, tolerance: f64) -> Self {
        self.gradient_tolerance = tolerance;
        self
    }

    /// Set initial lambda.
    pub fn with_initial_lambda(mut self, lambda: f64) -> Self {
        self.initial_lambda = lambda;
        self
    }
}

fn apply_delta<T: Real>(pose_if: &Isometry3<T>, delta: &Vector6<T>) -> Isometry3<T> {
    let translation = Vector3::new(delta[0], delta[1], delta[2]);
    let rotation = Vector3::new(delta[3], delta[4], delta[5]);
    Isometry3::new(translation, rotation) * pose_if
}

/// Writes the residuals `projected - observed` and returns the summed squared error.
///
/// Points behind the camera make the cost saturate.
fn residuals_in_place<T: Real, C: Camera<T> + ?Sized>(
    camera: &C,
    pose_if: &Isometry3<T>,
    object_points: &[Point3<T>],
    image_points: &[Point2<T>],
    out: &mut [T],
) -> T {
    let mut cost = T::zero();
    let mut valid = true;
    let correspondences = object_points.iter().zip(image_points.iter());
    for (i, (object_point, image_point)) in correspondences.enumerate() {
        valid &= camera.is_object_point_in_front_if(pose_if, object_point);
        let projected = camera.project_to_image_if(pose_if, object_point);
        let du = projected.x - image_point.x;
        let dv = projected.y - image_point.y;
        out[2 * i] = du;
        out[2 * i + 1] = dv;
        cost += du * du + dv * dv;
    }
    if valid && cost.is_finite() {
        cost
    } else {
        saturated()
    }
}

/// Refine an IF pose with Levenberg–Marquardt to minimize the pixel reprojection error.
///
/// - `camera`: Camera model
/// - `initial_if`: Initial `flippedCamera_T_world` pose
/// - `object_points`: World points (N)
/// - `image_points`: Pixel points (N)
///
/// Requires at least three correspondences, all in front of the camera for the initial pose.
pub fn refine_pose_if<T: Real, C: Camera<T> + ?Sized>(
    camera: &C,
    initial_if: &Isometry3<T>,
    object_points: &[Point3<T>],
    image_points: &[Point2<T>],
    params: &LMRefineParams,
) -> Result<PnPResult<T>, PnPError> {
    check_correspondences(object_points, image_points, 3)?;
    let n = object_points.len();

    let mut residuals = vec![T::zero(); 2 * n];
    let mut residuals_p = vec![T::zero(); 2 * n];
    let mut residuals_m = vec![T::zero(); 2 * n];

    let mut pose = *initial_if;
    let mut cost = residuals_in_place(camera, &pose, object_points, image_points, &mut residuals);
    if cost >= saturated() {
        return Err(PnPError::NoAcceptablePose {
            threshold: f64::INFINITY,
            best: f64::INFINITY,
        });
    }

    let cost_tolerance: T = lit(params.cost_tolerance);
    let gradient_tolerance: T = lit(params.gradient_tolerance);
    let lambda_factor: T = lit(params.lambda_factor);
    let mut lambda: T = lit(params.initial_lambda);

    let machine_epsilon: T = if is_single_precision::<T>() {
        lit(f32::EPSILON as f64)
    } else {
        lit(f64::EPSILON)
    };
    let step = machine_epsilon.cbrt();
    let mut jacobian = vec![T::zero(); 2 * n * 6];

    let mut iterations = 0usize;
    let mut converged = false;

    while iterations < params.max_iterations {
        iterations += 1;

        let t = &pose.translation.vector;
        let translation_scale = t.x.abs().max(t.y.abs()).max(t.z.abs()).max(T::one());
        for k in 0..6 {
            let h = if k < 3 { step * translation_scale } else { step };
            let mut delta = Vector6::zeros();
            delta[k] = h;
            residuals_in_place(
                camera,
                &apply_delta(&pose, &delta),
                object_points,
                image_points,
                &mut residuals_p,
            );
            delta[k] = -h;
            residuals_in_place(
                camera,
                &apply_delta(&pose, &delta),
                object_points,
                image_points,
                &mut residuals_m,
            );
            let inv_2h = T::one() / (h + h);
            for i in 0..2 * n {
                jacobian[i * 6 + k] = (residuals_p[i] - residuals_m[i]) * inv_2h;
            }
        }

        // normal equations (J^T J + lambda I) delta = -J^T r
        let mut a = Matrix6::<T>::zeros();
        let mut b = Vector6::<T>::zeros();
        for (i, r) in residuals.iter().enumerate() {
            let row = Vector6::from_column_slice(&jacobian[i * 6..i * 6 + 6]);
            a += row * row.transpose();
            b += row * *r;
        }

        if b.norm() < gradient_tolerance {
            converged = true;
            break;
        }

        let mut damped = a;
        for d in 0..6 {
            damped[(d, d)] += lambda;
        }

        let Some(delta) = damped.cholesky().map(|c| c.solve(&(-b))) else {
            lambda *= lambda_factor;
            continue;
        };

        let candidate = apply_delta(&pose, &delta);
        let candidate_cost =
            residuals_in_place(camera, &candidate, object_points, image_points, &mut residuals_p);

        if candidate_cost < cost {
            pose = candidate;
            std::mem::swap(&mut residuals, &mut residuals_p);
            let decrease = cost - candidate_cost;
            cost = candidate_cost;
            lambda = (lambda / lambda_factor).max(lit(1e-12));
            if decrease < cost_tolerance {
                converged = true;
                break;
            }
        } else {
            lambda *= lambda_factor;
        }
    }

    log::debug!("LM refinement: {iterations} iterations, converged {converged}, cost {cost}");

    let (average_sqr_error, max_sqr_error) =
        reprojection_errors(camera, &pose, object_points, image_points).ok_or(
            PnPError::NoAcceptablePose {
                threshold: f64::INFINITY,
                best: f64::INFINITY,
            },
        )?;

    Ok(PnPResult {
        pose_if: pose,
        average_sqr_error,
        max_sqr_error,
        num_iterations: Some(iterations),
        converged: Some(converged),
    })
}
