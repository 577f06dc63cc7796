//! Common data types shared across Perspective-n-Point (PnP) solvers.

use nalgebra::{Isometry3, Point2, Point3};
use thiserror::Error;

use crate::camera::Camera;
use crate::pose::inverted_flipped_to_standard;
use crate::scalar::Real;

/// Error types for PnP solvers.
#[derive(Debug, Error)]
pub enum PnPError {
    /// Invalid input data - insufficient correspondences for the specific solver
    #[error("PnP solver requires at least {required} 2D-3D correspondences, got {actual}")]
    InsufficientCorrespondences {
        /// Minimum number of correspondences required by the solver
        required: usize,
        /// Actual number of correspondences provided
        actual: usize,
    },

    /// Invalid input data - mismatched array lengths with descriptive labels.
    #[error("Mismatched array lengths: {left_name} ({left_len}) != {right_name} ({right_len})")]
    MismatchedArrayLengths {
        /// Label for the left-hand slice
        left_name: &'static str,
        /// Length of the left-hand slice
        left_len: usize,
        /// Label for the right-hand slice
        right_name: &'static str,
        /// Length of the right-hand slice
        right_len: usize,
    },

    /// Every subset of correspondences was degenerate
    #[error("All correspondence triplets are degenerate")]
    Degenerate,

    /// No candidate pose reached the acceptance threshold
    #[error("No pose with an average squared reprojection error below {threshold} (best {best})")]
    NoAcceptablePose {
        /// Acceptance threshold in squared pixels
        threshold: f64,
        /// Best average squared error reached, infinite if no candidate was valid
        best: f64,
    },

    /// RANSAC did not find enough inliers
    #[error("RANSAC requires at least {required} inliers, got {actual}")]
    InsufficientInliers {
        /// Minimum number of inliers required
        required: usize,
        /// Number of inliers found
        actual: usize,
    },
}

/// Validates that both correspondence slices have the same length and hold at least `required`
/// elements.
pub(crate) fn check_correspondences<T: Real>(
    object_points: &[Point3<T>],
    image_points: &[Point2<T>],
    required: usize,
) -> Result<(), PnPError> {
    if object_points.len() != image_points.len() {
        return Err(PnPError::MismatchedArrayLengths {
            left_name: "object points",
            left_len: object_points.len(),
            right_name: "image points",
            right_len: image_points.len(),
        });
    }
    if object_points.len() < required {
        return Err(PnPError::InsufficientCorrespondences {
            required,
            actual: object_points.len(),
        });
    }
    Ok(())
}

/// Result returned by any PnP solver.
///
/// The pose follows the inverted flipped convention: it maps coordinates from the **world** frame to
/// the **flipped camera** frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PnPResult<T: Real> {
    /// Estimated pose, `flippedCamera_T_world`.
    pub pose_if: Isometry3<T>,
    /// Average squared reprojection error in pixels.
    pub average_sqr_error: T,
    /// Maximal squared reprojection error in pixels.
    pub max_sqr_error: T,
    /// Number of iterations taken (if applicable).
    pub num_iterations: Option<usize>,
    /// Whether the solver converged (if applicable).
    pub converged: Option<bool>,
}

impl<T: Real> PnPResult<T> {
    /// The estimated pose in the standard convention, `world_T_camera`.
    pub fn world_t_camera(&self) -> Isometry3<T> {
        inverted_flipped_to_standard(&self.pose_if)
    }

    /// Root-mean-square reprojection error in pixels.
    pub fn reproj_rmse(&self) -> T {
        self.average_sqr_error.sqrt()
    }
}

/// Trait for PnP solvers.
pub trait PnPSolver<T: Real> {
    /// Solver-specific parameters.
    type Param;

    /// Solve for the camera pose given 2D-3D correspondences.
    ///
    /// # Arguments
    /// * `camera` – Camera model used to interpret the image points.
    /// * `object_points` – 3-D coordinates in the world frame.
    /// * `image_points` – Corresponding pixel coordinates.
    /// * `params` – Solver-specific parameters.
    fn solve<C: Camera<T> + ?Sized>(
        camera: &C,
        object_points: &[Point3<T>],
        image_points: &[Point2<T>],
        params: &Self::Param,
    ) -> Result<PnPResult<T>, PnPError>;
}
