//! General Perspective-n-Point solver built on top of the P3P minimal solver.
//!
//! Candidate poses are computed from triplets of correspondences, scored with the robust error metric
//! over all correspondences and the best one is refined with Levenberg–Marquardt.

use nalgebra::{Isometry3, Point2, Point3};
use serde::{Deserialize, Serialize};

use crate::camera::Camera;
use crate::ops::{are_collinear, reprojection_errors};
use crate::p3p;
use crate::random::RandomGenerator;
use crate::refine::{refine_pose_if, LMRefineParams};
use crate::robust::{averaged_robust_error, ErrorDetermination, Estimator};
use crate::scalar::{lit, Real};
use crate::types::{check_correspondences, PnPError, PnPResult, PnPSolver};

/// Minimal number of correspondences accepted by [`pose`].
pub const MIN_CORRESPONDENCES: usize = 5;

/// Parameters of the general PnP solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnPParams {
    /// Maximal number of correspondence triplets fed into the P3P solver.
    pub max_triplets: usize,
    /// Acceptance threshold on the average squared reprojection error, in squared pixels.
    pub max_average_sqr_error: f64,
    /// Estimator used to score the candidate poses.
    pub estimator: Estimator,
    /// Optional Levenberg–Marquardt refinement of the best candidate.
    pub refine: Option<LMRefineParams>,
    /// Optional fixed seed used when the triplets have to be sampled.
    pub random_seed: Option<u64>,
}

impl Default for PnPParams {
    fn default() -> Self {
        Self {
            max_triplets: 64,
            max_average_sqr_error: 4.0,
            estimator: Estimator::Huber,
            refine: Some(LMRefineParams::default()),
            random_seed: None,
        }
    }
}

impl PnPParams {
    /// Create default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximal number of triplets.
    pub fn with_max_triplets(mut self, max_triplets: usize) -> Self {
        self.max_triplets = max_triplets;
        self
    }

    /// Set the acceptance threshold.
    pub fn with_max_average_sqr_error(mut self, max_average_sqr_error: f64) -> Self {
        self.max_average_sqr_error = max_average_sqr_error;
        self
    }

    /// Set the scoring estimator.
    pub fn with_estimator(mut self, estimator: Estimator) -> Self {
        self.estimator = estimator;
        self
    }

    /// Set or disable the final refinement.
    pub fn with_refine(mut self, refine: Option<LMRefineParams>) -> Self {
        self.refine = refine;
        self
    }

    /// Set the random seed.
    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }
}

/// P3P consensus solver for an arbitrary number of correspondences.
pub struct PnP;

impl<T: Real> PnPSolver<T> for PnP {
    type Param = PnPParams;

    fn solve<C: Camera<T> + ?Sized>(
        camera: &C,
        object_points: &[Point3<T>],
        image_points: &[Point2<T>],
        params: &Self::Param,
    ) -> Result<PnPResult<T>, PnPError> {
        pose(camera, object_points, image_points, params)
    }
}

/// Triplets of correspondence indices: all of them when few enough, otherwise a random selection.
fn triplets(n: usize, max_triplets: usize, seed: Option<u64>) -> Vec<[usize; 3]> {
    // overflow means far more triplets than could ever be enumerated
    let total = n
        .checked_mul(n.saturating_sub(1))
        .and_then(|v| v.checked_mul(n.saturating_sub(2)))
        .map(|v| v / 6);
    if let Some(total) = total.filter(|&total| total <= max_triplets) {
        let mut all = Vec::with_capacity(total);
        for i in 0..n {
            for j in i + 1..n {
                for k in j + 1..n {
                    all.push([i, j, k]);
                }
            }
        }
        return all;
    }

    let mut rng = seed.map_or_else(RandomGenerator::new, RandomGenerator::with_seed);
    (0..max_triplets)
        .filter_map(|_| rng.sample_indices(n, 3))
        .map(|indices| [indices[0], indices[1], indices[2]])
        .collect()
}

/// Robust score of an IF pose over all correspondences, `None` if a point lies behind the camera.
fn score<T: Real, C: Camera<T> + ?Sized>(
    camera: &C,
    pose_if: &Isometry3<T>,
    object_points: &[Point3<T>],
    image_points: &[Point2<T>],
    projected: &mut [Point2<T>],
    estimator: Estimator,
) -> Option<T> {
    if !object_points
        .iter()
        .all(|p| camera.is_object_point_in_front_if(pose_if, p))
    {
        return None;
    }
    camera.project_to_image_if_batch(pose_if, object_points, projected);
    averaged_robust_error(
        projected,
        projected.len(),
        image_points,
        estimator,
        ErrorDetermination::Positional,
        None,
    )
}

/// Determines the IF pose (`flippedCamera_T_world`) from at least [`MIN_CORRESPONDENCES`]
/// correspondences.
///
/// The result is accepted only if its average squared reprojection error does not exceed
/// `params.max_average_sqr_error`.
pub fn pose<T: Real, C: Camera<T> + ?Sized>(
    camera: &C,
    object_points: &[Point3<T>],
    image_points: &[Point2<T>],
    params: &PnPParams,
) -> Result<PnPResult<T>, PnPError> {
    check_correspondences(object_points, image_points, MIN_CORRESPONDENCES)?;

    let n = object_points.len();
    let mut projected = vec![Point2::origin(); n];
    let mut best: Option<(T, Isometry3<T>)> = None;
    let mut evaluated_triplets = 0usize;

    for [i, j, k] in triplets(n, params.max_triplets, params.random_seed) {
        let triplet_objects = [object_points[i], object_points[j], object_points[k]];
        if are_collinear(&triplet_objects[0], &triplet_objects[1], &triplet_objects[2]) {
            continue;
        }
        evaluated_triplets += 1;

        let triplet_images = [image_points[i], image_points[j], image_points[k]];
        for candidate in p3p::poses(camera, &triplet_objects, &triplet_images) {
            let Some(error) = score(
                camera,
                &candidate,
                object_points,
                image_points,
                &mut projected,
                params.estimator,
            ) else {
                continue;
            };
            if best.as_ref().map_or(true, |(best_error, _)| error < *best_error) {
                best = Some((error, candidate));
            }
        }
    }

    if evaluated_triplets == 0 {
        return Err(PnPError::Degenerate);
    }

    let Some((best_error, best_pose)) = best else {
        log::debug!("PnP: no valid candidate out of {evaluated_triplets} triplets");
        return Err(PnPError::NoAcceptablePose {
            threshold: params.max_average_sqr_error,
            best: f64::INFINITY,
        });
    };
    log::debug!("PnP: best candidate robust error {best_error} from {evaluated_triplets} triplets");

    let result = match &params.refine {
        Some(refine_params) => {
            match refine_pose_if(camera, &best_pose, object_points, image_points, refine_params) {
                Ok(refined) => refined,
                Err(error) => {
                    log::debug!("PnP: refinement failed: {error}");
                    unrefined(camera, best_pose, object_points, image_points, params)?
                }
            }
        }
        None => unrefined(camera, best_pose, object_points, image_points, params)?,
    };

    let threshold: T = lit(params.max_average_sqr_error);
    if !(result.average_sqr_error <= threshold) {
        return Err(PnPError::NoAcceptablePose {
            threshold: params.max_average_sqr_error,
            best: nalgebra::try_convert(result.average_sqr_error).unwrap_or(f64::INFINITY),
        });
    }
    Ok(result)
}

fn unrefined<T: Real, C: Camera<T> + ?Sized>(
    camera: &C,
    pose_if: Isometry3<T>,
    object_points: &[Point3<T>],
    image_points: &[Point2<T>],
    params: &PnPParams,
) -> Result<PnPResult<T>, PnPError> {
    let (average_sqr_error, max_sqr_error) =
        reprojection_errors(camera, &pose_if, object_points, image_points).ok_or(
            PnPError::NoAcceptablePose {
                threshold: params.max_average_sqr_error,
                best: f64::INFINITY,
            },
        )?;
    Ok(PnPResult {
        pose_if,
        average_sqr_error,
        max_sqr_error,
        num_iterations: None,
        converged: None,
    })
}
