#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Kornia PnP (Perspective-n-Point)
//!
//! Camera pose estimation from 2D-3D point correspondences, generic over `f32` and `f64`.
//!
//! ## Key Features
//!
//! - **P3P**: closed-form minimal solver returning up to four poses
//! - **PnP**: P3P consensus over triplets followed by Levenberg–Marquardt refinement
//! - **RANSAC Support**: robust estimation with outlier rejection
//! - **Robust Error Metric**: Huber / Tukey / Cauchy aggregation with positional or nearest matching
//! - **Camera Models**: pinhole with polynomial distortion and equidistant fisheye
//!
//! Every solver works with poses in the inverted flipped (IF) convention, see [`pose`].
//!
//! ## Example: PnP
//!
//! ```rust
//! use kornia_pnp::nalgebra::{Isometry3, Point3, Vector3};
//! use kornia_pnp::{solve_pnp, Camera, PinholeCamera, PnPMethod};
//!
//! let camera = PinholeCamera::<f64>::from_fov_x(640, 480, 60f64.to_radians())?;
//!
//! // ground truth pose used to synthesize the observations
//! let pose_if = Isometry3::new(Vector3::new(0.1, -0.2, 5.0), Vector3::new(0.1, 0.2, -0.1));
//! let object_points = vec![
//!     Point3::new(-0.5, -0.5, 0.0),
//!     Point3::new(0.5, -0.4, 0.2),
//!     Point3::new(0.4, 0.5, -0.3),
//!     Point3::new(-0.4, 0.6, 0.1),
//!     Point3::new(0.0, 0.1, 0.5),
//! ];
//! let image_points: Vec<_> = object_points
//!     .iter()
//!     .map(|p| camera.project_to_image_if(&pose_if, p))
//!     .collect();
//!
//! let result = solve_pnp(&camera, &object_points, &image_points, PnPMethod::P3PDefault)?;
//! assert!(result.average_sqr_error < 1e-6);
//! println!("world_T_camera: {}", result.world_t_camera());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Camera capability trait and camera models.
pub mod camera;

/// Real roots of quadratic, cubic and quartic polynomials.
pub mod equation;

/// Perspective-3-Point minimal solver.
pub mod p3p;

/// Nearest neighbour lookup over image points.
pub mod nearest;

/// General Perspective-n-Point solver.
pub mod pnp;

/// Conversions between the standard and the inverted flipped pose conventions.
pub mod pose;

/// Seedable random generator with copy-to-fork semantics.
pub mod random;

/// RANSAC-based robust pose estimation.
///
/// Handles outliers in point correspondences through random sampling consensus.
pub mod ransac;

/// Levenberg–Marquardt pose refinement.
pub mod refine;

/// Robust error metric between two groups of image points.
pub mod robust;

/// Floating point abstraction and precision dependent epsilons.
pub mod scalar;

/// Common data types and traits for PnP solvers.
pub mod types;

mod ops;

pub use nalgebra;

pub use camera::{
    AnyCamera, Camera, CameraError, FisheyeCamera, Line3, PinholeCamera, PolynomialDistortion,
};
pub use pnp::{PnP, PnPParams};
pub use random::RandomGenerator;
pub use ransac::{solve_p3p_ransac, P3PRansac, PnPRansacResult, RansacParams};
pub use refine::{refine_pose_if, LMRefineParams};
pub use nearest::NearestNeighbors;
pub use robust::{
    averaged_robust_error, averaged_robust_error_indexed, ErrorDetermination, Estimator,
};
pub use scalar::Real;
pub use types::{PnPError, PnPResult, PnPSolver};

use nalgebra::{Point2, Point3};

/// Enumeration of the Perspective-n-Point algorithms available in this crate.
#[derive(Debug, Clone)]
pub enum PnPMethod {
    /// P3P consensus solver with user-supplied parameters.
    P3P(PnPParams),
    /// P3P consensus solver with the crate's default parameters.
    P3PDefault,
    /// RANSAC over P3P with user-supplied parameters.
    Ransac(RansacParams),
}

/// Dispatch function that routes to the chosen PnP solver.
///
/// The returned pose is `flippedCamera_T_world`, see [`PnPResult::world_t_camera`] for the standard
/// convention.
pub fn solve_pnp<T: Real, C: Camera<T> + ?Sized>(
    camera: &C,
    object_points: &[Point3<T>],
    image_points: &[Point2<T>],
    method: PnPMethod,
) -> Result<PnPResult<T>, PnPError> {
    match method {
        PnPMethod::P3P(params) => {
            <PnP as PnPSolver<T>>::solve(camera, object_points, image_points, &params)
        }
        PnPMethod::P3PDefault => <PnP as PnPSolver<T>>::solve(
            camera,
            object_points,
            image_points,
            &PnPParams::default(),
        ),
        PnPMethod::Ransac(params) => {
            <P3PRansac as PnPSolver<T>>::solve(camera, object_points, image_points, &params)
        }
    }
}
