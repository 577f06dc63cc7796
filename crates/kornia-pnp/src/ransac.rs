//! RANSAC-based robust wrapper around the P3P solver.

use nalgebra::{Isometry3, Point2, Point3};
use serde::{Deserialize, Serialize};

use crate::camera::Camera;
use crate::ops::{project_sqr_error, reprojection_errors};
use crate::p3p;
use crate::random::RandomGenerator;
use crate::refine::{refine_pose_if, LMRefineParams};
use crate::scalar::{lit, Real};
use crate::types::{check_correspondences, PnPError, PnPResult, PnPSolver};

/// Minimal number of correspondences: one triplet plus one verifying correspondence.
pub const MIN_CORRESPONDENCES: usize = 4;

const SAMPLE_SIZE: usize = 3;

/// Parameters for RANSAC over P3P.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RansacParams {
    /// Maximum number of RANSAC iterations.
    pub max_iterations: usize,
    /// Pixel error threshold to classify an observation as an inlier.
    pub reproj_threshold_px: f64,
    /// Desired probability that at least one sample set is outlier-free.
    pub confidence: f64,
    /// Optional fixed seed for reproducible sampling.
    pub random_seed: Option<u64>,
    /// Whether to refine the best pose on all inliers.
    pub refine: bool,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            reproj_threshold_px: 8.0,
            confidence: 0.99,
            random_seed: None,
            refine: true,
        }
    }
}

/// RANSAC result for PnP.
#[derive(Debug, Clone)]
pub struct PnPRansacResult<T: Real> {
    /// Best pose found by RANSAC, errors measured on the inliers.
    pub pose: PnPResult<T>,
    /// Indices of inlier correspondences.
    pub inliers: Vec<usize>,
}

/// RANSAC over the P3P minimal solver.
pub struct P3PRansac;

impl<T: Real> PnPSolver<T> for P3PRansac {
    type Param = RansacParams;

    fn solve<C: Camera<T> + ?Sized>(
        camera: &C,
        object_points: &[Point3<T>],
        image_points: &[Point2<T>],
        params: &Self::Param,
    ) -> Result<PnPResult<T>, PnPError> {
        solve_p3p_ransac(camera, object_points, image_points, params).map(|result| result.pose)
    }
}

/// Number of iterations needed to draw an outlier-free sample with the given confidence.
fn required_iterations(inlier_ratio: f64, confidence: f64, max_iterations: usize) -> usize {
    if inlier_ratio >= 1.0 {
        return 1;
    }
    let all_inliers = inlier_ratio.powi(SAMPLE_SIZE as i32);
    if all_inliers <= 1e-12 {
        return max_iterations;
    }
    let log_confidence = (1.0 - confidence).max(1e-12).ln();
    let log_denominator = (1.0 - all_inliers).ln();
    if !log_denominator.is_finite() || log_denominator == 0.0 {
        return max_iterations;
    }
    let estimate = (log_confidence / log_denominator).ceil();
    if estimate.is_finite() && estimate > 0.0 {
        (estimate as usize).min(max_iterations)
    } else {
        max_iterations
    }
}

fn classify_inliers<T: Real, C: Camera<T> + ?Sized>(
    camera: &C,
    pose_if: &Isometry3<T>,
    object_points: &[Point3<T>],
    image_points: &[Point2<T>],
    sqr_threshold: T,
) -> Vec<usize> {
    object_points
        .iter()
        .zip(image_points.iter())
        .enumerate()
        .filter_map(|(idx, (object_point, image_point))| {
            project_sqr_error(camera, pose_if, object_point, image_point, true)
                .filter(|sqr_error| *sqr_error < sqr_threshold)
                .map(|_| idx)
        })
        .collect()
}

/// Solve PnP robustly with RANSAC around the P3P minimal solver.
///
/// - Minimal sample size is three correspondences, at least four are required.
/// - Scoring uses the pixel reprojection error against `reproj_threshold_px`.
/// - Iterations adapt from the current inlier ratio and the desired confidence.
pub fn solve_p3p_ransac<T: Real, C: Camera<T> + ?Sized>(
    camera: &C,
    object_points: &[Point3<T>],
    image_points: &[Point2<T>],
    params: &RansacParams,
) -> Result<PnPRansacResult<T>, PnPError> {
    check_correspondences(object_points, image_points, MIN_CORRESPONDENCES)?;
    let n = object_points.len();

    let threshold: T = lit(params.reproj_threshold_px);
    let sqr_threshold = threshold * threshold;

    let mut rng = params
        .random_seed
        .map_or_else(RandomGenerator::new, RandomGenerator::with_seed);

    let mut best_inliers: Vec<usize> = Vec::new();
    let mut best_pose: Option<Isometry3<T>> = None;

    let mut iteration = 0usize;
    let mut required = params.max_iterations;

    while iteration < required {
        iteration += 1;

        let Some(sample) = rng.sample_indices(n, SAMPLE_SIZE) else {
            break;
        };
        let sample_objects = [
            object_points[sample[0]],
            object_points[sample[1]],
            object_points[sample[2]],
        ];
        let sample_images = [
            image_points[sample[0]],
            image_points[sample[1]],
            image_points[sample[2]],
        ];

        for candidate in p3p::poses(camera, &sample_objects, &sample_images) {
            let inliers =
                classify_inliers(camera, &candidate, object_points, image_points, sqr_threshold);
            if inliers.len() > best_inliers.len() {
                let ratio = inliers.len() as f64 / n as f64;
                required = required.min(required_iterations(
                    ratio,
                    params.confidence,
                    params.max_iterations,
                ));
                log::debug!(
                    "RANSAC: iteration {iteration}, {} inliers, {required} iterations required",
                    inliers.len()
                );
                best_inliers = inliers;
                best_pose = Some(candidate);
            }
        }
    }

    let best_pose = match best_pose {
        Some(pose) if best_inliers.len() >= MIN_CORRESPONDENCES => pose,
        _ => {
            return Err(PnPError::InsufficientInliers {
                required: MIN_CORRESPONDENCES,
                actual: best_inliers.len(),
            })
        }
    };

    let inlier_objects: Vec<_> = best_inliers.iter().map(|&i| object_points[i]).collect();
    let inlier_images: Vec<_> = best_inliers.iter().map(|&i| image_points[i]).collect();

    let pose = if params.refine {
        refine_pose_if(
            camera,
            &best_pose,
            &inlier_objects,
            &inlier_images,
            &LMRefineParams::default(),
        )?
    } else {
        let (average_sqr_error, max_sqr_error) =
            reprojection_errors(camera, &best_pose, &inlier_objects, &inlier_images).ok_or(
                PnPError::InsufficientInliers {
                    required: MIN_CORRESPONDENCES,
                    actual: 0,
                },
            )?;
        PnPResult {
            pose_if: best_pose,
            average_sqr_error,
            max_sqr_error,
            num_iterations: Some(iteration),
            converged: None,
        }
    };

    Ok(PnPRansacResult {
        pose,
        inliers: best_inliers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::PinholeCamera;
    use nalgebra::Vector3;

    fn scene(n: usize) -> (PinholeCamera<f64>, Vec<Point3<f64>>, Vec<Point2<f64>>) {
        let camera = PinholeCamera::new(1280, 960, 800.0, 800.0, 640.0, 480.0)
            .unwrap_or_else(|e| panic!("{e}"));
        let pose_if = Isometry3::new(Vector3::new(0.1, 0.05, 4.0), Vector3::new(-0.1, 0.2, 0.05));
        let mut rng = RandomGenerator::with_seed(17);
        let objects: Vec<_> = (0..n)
            .map(|_| {
                Point3::new(
                    rng.scalar(-1.0, 1.0),
                    rng.scalar(-1.0, 1.0),
                    rng.scalar(-1.0, 1.0),
                )
            })
            .collect();
        let images = objects
            .iter()
            .map(|p| camera.project_to_image_if(&pose_if, p))
            .collect();
        (camera, objects, images)
    }

    #[test]
    fn test_ransac_basic_outliers() -> Result<(), PnPError> {
        let (camera, objects, mut images) = scene(12);
        // inject 4 strong outliers
        for (j, image) in images.iter_mut().enumerate().take(4) {
            image.x = 1200.0 - j as f64 * 50.0;
            image.y = 20.0 + j as f64 * 30.0;
        }

        let params = RansacParams {
            max_iterations: 200,
            reproj_threshold_px: 2.0,
            confidence: 0.999,
            random_seed: Some(42),
            refine: false,
        };

        let result = solve_p3p_ransac(&camera, &objects, &images, &params)?;
        assert_eq!(result.inliers, (4..12).collect::<Vec<_>>());
        assert!(result.pose.reproj_rmse() < 1e-3);
        Ok(())
    }

    #[test]
    fn test_ransac_perfect_data() -> Result<(), PnPError> {
        let (camera, objects, images) = scene(8);
        let params = RansacParams {
            random_seed: Some(42),
            ..Default::default()
        };
        let result = solve_p3p_ransac(&camera, &objects, &images, &params)?;
        assert_eq!(result.inliers.len(), 8);
        assert!(result.pose.converged.is_some());
        assert!(result.pose.average_sqr_error < 1e-6);
        Ok(())
    }

    #[test]
    fn test_ransac_minimum_points() -> Result<(), PnPError> {
        let (camera, objects, images) = scene(4);
        let params = RansacParams {
            max_iterations: 20,
            random_seed: Some(42),
            ..Default::default()
        };
        let pose = <P3PRansac as PnPSolver<f64>>::solve(&camera, &objects, &images, &params)?;
        assert!(pose.reproj_rmse() < 1e-2);
        Ok(())
    }

    #[test]
    fn test_ransac_error_cases() {
        let (camera, objects, images) = scene(3);
        let result = solve_p3p_ransac(&camera, &objects, &images, &RansacParams::default());
        assert!(matches!(
            result,
            Err(PnPError::InsufficientCorrespondences { .. })
        ));
    }

    #[test]
    fn test_required_iterations() {
        assert_eq!(required_iterations(1.0, 0.99, 100), 1);
        // 0.5^3 inlier samples: ln(0.01) / ln(0.875) = 34.5
        assert_eq!(required_iterations(0.5, 0.99, 100), 35);
        assert_eq!(required_iterations(0.0, 0.99, 100), 100);
    }
}
