#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Kornia RMV (Random Model Variation)
//!
//! Randomized local refinement of a camera pose. Starting from an initial pose, e.g. from
//! [`kornia_pnp::solve_pnp`], the pose is perturbed within a shrinking translation / rotation range
//! until the robust reprojection error reaches a target, the time budget expires or the search is
//! cancelled.
//!
//! Several searches can run concurrently on a [`Worker`]. They share one cancellation flag and one
//! [`SharedBestPose`], the first search reaching the target stops the others.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use kornia_pnp::nalgebra::{Isometry3, Point3, Vector3};
//! use kornia_pnp::{Camera, PinholeCamera, RandomGenerator};
//! use kornia_rmv::{optimize_pose_if, Correspondences, RmvParams};
//!
//! let camera = PinholeCamera::<f64>::from_fov_x(640, 480, 60f64.to_radians())?;
//! let ground_truth = Isometry3::new(Vector3::new(0.0, 0.0, 5.0), Vector3::zeros());
//!
//! let mut rng = RandomGenerator::with_seed(1);
//! let object_points: Vec<_> = (0..20)
//!     .map(|_| Point3::new(rng.scalar(-0.5, 0.5), rng.scalar(-0.5, 0.5), rng.scalar(-0.5, 0.5)))
//!     .collect();
//! let image_points: Vec<_> = object_points
//!     .iter()
//!     .map(|p| camera.project_to_image_if(&ground_truth, p))
//!     .collect();
//!
//! let initial = Isometry3::new(Vector3::new(0.02, -0.01, 5.03), Vector3::new(0.01, 0.0, -0.01));
//! let params = RmvParams::new().with_timeout(Duration::from_secs(1));
//! let correspondences = Correspondences::object_points_smaller(&object_points, &image_points);
//!
//! let result = optimize_pose_if(&camera, &initial, correspondences, &params, &mut rng, None)?;
//! assert!(result.error <= 1.0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Thread-safe arbitration of the best pose.
pub mod arbitration;

/// Correspondences and the choice of the smaller point group.
pub mod correspondences;

/// Parameters of the refinement.
pub mod params;

/// Refinement entry points.
pub mod rmv;

/// Single search state machine.
pub mod search;

/// Error and result types.
pub mod types;

/// Worker pool executing abortable functions.
pub mod worker;

pub use arbitration::{BestPose, SharedBestPose};
pub use correspondences::{Correspondences, ImagePointsSmaller, ObjectPointsSmaller, PointGroup};
pub use params::RmvParams;
pub use rmv::{optimize_pose, optimize_pose_if, optimize_pose_parallel_if, optimize_poses_if};
pub use search::{PoseSearch, Step};
pub use types::{RmvError, RmvResult};
pub use worker::{Worker, WorkerError};
