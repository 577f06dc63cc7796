use std::time::Duration;

use kornia_pnp::nalgebra::Isometry3;
use kornia_pnp::pose::inverted_flipped_to_standard;
use kornia_pnp::Real;
use thiserror::Error;

use crate::arbitration::BestPose;
use crate::worker::WorkerError;

/// Error types for the Random Model Variation refinement.
///
/// Every variant means that no pose was written; they only differ in the reason.
#[derive(Debug, Error)]
pub enum RmvError {
    /// The number of valid correspondences is below three or exceeds one of the point groups.
    #[error(
        "invalid correspondences: {valid_count} valid of {object_points} object and {image_points} image points"
    )]
    InvalidCorrespondences {
        /// Requested number of valid correspondences
        valid_count: usize,
        /// Number of object points
        object_points: usize,
        /// Number of image points
        image_points: usize,
    },

    /// A search range is not finite in the working precision, or the target error is not a number
    #[error("invalid {name}: {value}")]
    InvalidParameter {
        /// Name of the parameter
        name: &'static str,
        /// Offending value, in the working precision
        value: f64,
    },

    /// No initial pose was provided
    #[error("at least one initial pose is required")]
    NoInitialPose,

    /// The time budget expired before the target error was reached
    #[error("target error not reached within {timeout:?} (best error {best_error})")]
    TimedOut {
        /// Time budget of the search
        timeout: Duration,
        /// Lowest error reached
        best_error: f64,
    },

    /// The search observed the cancellation flag
    #[error("search cancelled")]
    Cancelled,

    /// The search reached the target but a concurrent search committed a better or equal pose first
    #[error("a concurrent search committed a better pose first")]
    Superseded,

    /// The worker pool could not be created
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Result of a successful refinement.
#[derive(Debug, Clone, PartialEq)]
pub struct RmvResult<T: Real> {
    /// The refined IF pose, `flippedCamera_T_world`.
    pub pose_if: Isometry3<T>,
    /// Averaged robust error of the refined pose, in squared pixels.
    pub error: T,
    /// `(object_index, image_index)` pairs whose squared distance is below the target error.
    pub correspondences: Vec<(usize, usize)>,
}

impl<T: Real> RmvResult<T> {
    /// The refined pose in the standard convention, `world_T_camera`.
    pub fn world_t_camera(&self) -> Isometry3<T> {
        inverted_flipped_to_standard(&self.pose_if)
    }
}

impl<T: Real> From<BestPose<T>> for RmvResult<T> {
    fn from(best: BestPose<T>) -> Self {
        Self {
            pose_if: best.pose_if,
            error: best.error,
            correspondences: best.correspondences,
        }
    }
}
