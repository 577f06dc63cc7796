//! Camera models consumed by the pose solvers.
//!
//! The solvers only rely on the [`Camera`] capability trait: projecting points given in the flipped
//! camera frame into the image, and back-projecting image points into viewing rays.

use nalgebra::{Isometry3, Point2, Point3, Unit, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pose::{flip_vector, standard_to_inverted_flipped};
use crate::scalar::{eps, lit, Real};

/// Error types for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Invalid camera intrinsics
    #[error("Invalid camera intrinsics: {0}")]
    InvalidIntrinsics(String),

    /// Invalid image resolution
    #[error("Invalid image resolution {width}x{height}")]
    InvalidResolution {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
    },

    /// Invalid field of view
    #[error("Invalid field of view: {0} radians")]
    InvalidFieldOfView(f64),
}

/// Result type for camera operations.
pub type CameraResult<T> = Result<T, CameraError>;

/// A 3D line given by an origin and a unit direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line3<T: Real> {
    /// Origin of the line.
    pub origin: Point3<T>,
    /// Unit direction of the line.
    pub direction: Unit<Vector3<T>>,
}

impl<T: Real> Line3<T> {
    /// Create a new line, normalizing the direction.
    pub fn new(origin: Point3<T>, direction: Vector3<T>) -> Self {
        Self {
            origin,
            direction: Unit::new_normalize(direction),
        }
    }

    /// Returns the point at the given signed distance from the origin.
    pub fn point(&self, distance: T) -> Point3<T> {
        self.origin + self.direction.into_inner() * distance
    }
}

/// Capability set of a camera model.
///
/// Implementors provide the projection of points in the flipped camera frame (camera looking down +Z,
/// Y pointing downwards) and its inverse; every pose-based operation is provided on top of that.
pub trait Camera<T: Real>: Send + Sync {
    /// Image width in pixels.
    fn width(&self) -> u32;

    /// Image height in pixels.
    fn height(&self) -> u32;

    /// Projects a point given in the flipped camera frame into the image, applying lens distortion.
    fn project_to_image_flipped(&self, point: &Point3<T>) -> Point2<T>;

    /// Returns the unit viewing ray of an image point, expressed in the flipped camera frame.
    fn vector_flipped(&self, image_point: &Point2<T>) -> Vector3<T>;

    /// Projects an object point with an IF pose (`flippedCamera_T_world`).
    fn project_to_image_if(
        &self,
        flipped_camera_t_world: &Isometry3<T>,
        object_point: &Point3<T>,
    ) -> Point2<T> {
        self.project_to_image_flipped(&(flipped_camera_t_world * object_point))
    }

    /// Projects a batch of object points with an IF pose.
    ///
    /// PRECONDITION: `image_points` has the same length as `object_points`.
    fn project_to_image_if_batch(
        &self,
        flipped_camera_t_world: &Isometry3<T>,
        object_points: &[Point3<T>],
        image_points: &mut [Point2<T>],
    ) {
        debug_assert_eq!(object_points.len(), image_points.len());
        for (object_point, image_point) in object_points.iter().zip(image_points.iter_mut()) {
            *image_point = self.project_to_image_if(flipped_camera_t_world, object_point);
        }
    }

    /// Projects an object point with a standard pose (`world_T_camera`).
    fn project_to_image(&self, world_t_camera: &Isometry3<T>, object_point: &Point3<T>) -> Point2<T> {
        self.project_to_image_if(&standard_to_inverted_flipped(world_t_camera), object_point)
    }

    /// Returns the viewing ray of an image point in world coordinates for a standard pose.
    fn ray(&self, image_point: &Point2<T>, world_t_camera: &Isometry3<T>) -> Line3<T> {
        let direction_camera = flip_vector(&self.vector_flipped(image_point));
        Line3::new(
            Point3::from(world_t_camera.translation.vector),
            world_t_camera.rotation * direction_camera,
        )
    }

    /// Returns `true` if the object point lies in front of the camera for an IF pose.
    fn is_object_point_in_front_if(
        &self,
        flipped_camera_t_world: &Isometry3<T>,
        object_point: &Point3<T>,
    ) -> bool {
        (flipped_camera_t_world * object_point).z > eps::<T>()
    }

    /// Returns `true` if the image point lies inside the image, keeping a border in pixels.
    fn is_inside(&self, image_point: &Point2<T>, border: T) -> bool {
        let width: T = lit(self.width() as f64);
        let height: T = lit(self.height() as f64);
        image_point.x >= border
            && image_point.y >= border
            && image_point.x < width - border
            && image_point.y < height - border
    }
}

/// Brown-Conrady polynomial distortion with a rational radial term.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct PolynomialDistortion<T> {
    /// Radial distortion coefficients
    pub k1: T,
    pub k2: T,
    pub k3: T,
    pub k4: T,
    pub k5: T,
    pub k6: T,
    /// Tangential distortion coefficients
    pub p1: T,
    pub p2: T,
}

impl<T: Real> PolynomialDistortion<T> {
    /// Create distortion parameters with only the first two radial coefficients.
    pub fn radial(k1: T, k2: T) -> Self {
        Self::radial_tangential(k1, k2, T::zero(), T::zero())
    }

    /// Create distortion parameters with radial and tangential coefficients.
    pub fn radial_tangential(k1: T, k2: T, p1: T, p2: T) -> Self {
        let zero = T::zero();
        Self {
            k1,
            k2,
            k3: zero,
            k4: zero,
            k5: zero,
            k6: zero,
            p1,
            p2,
        }
    }

    /// Check if there is any distortion.
    pub fn has_distortion(&self) -> bool {
        [
            self.k1, self.k2, self.k3, self.k4, self.k5, self.k6, self.p1, self.p2,
        ]
        .iter()
        .any(|c| *c != T::zero())
    }

    /// Applies the distortion to normalized coordinates.
    pub fn distort(&self, x: T, y: T) -> (T, T) {
        let one = T::one();
        let two = one + one;
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;

        let kr = (one + self.k1 * r2 + self.k2 * r4 + self.k3 * r6)
            / (one + self.k4 * r2 + self.k5 * r4 + self.k6 * r6);

        let xy2 = two * x * y;
        let xd = x * kr + xy2 * self.p1 + self.p2 * (r2 + two * x * x);
        let yd = y * kr + self.p1 * (r2 + two * y * y) + xy2 * self.p2;
        (xd, yd)
    }

    /// Removes the distortion from normalized coordinates by fixed point iteration.
    pub fn undistort(&self, xd: T, yd: T) -> (T, T) {
        const MAX_ITERATIONS: usize = 20;
        let tolerance = eps::<T>();

        let (mut x, mut y) = (xd, yd);
        for _ in 0..MAX_ITERATIONS {
            let (x_pred, y_pred) = self.distort(x, y);
            let dx = xd - x_pred;
            let dy = yd - y_pred;
            x += dx;
            y += dy;
            if dx.abs() < tolerance && dy.abs() < tolerance {
                break;
            }
        }
        (x, y)
    }
}

fn validate_resolution(width: u32, height: u32) -> CameraResult<()> {
    if width == 0 || height == 0 {
        return Err(CameraError::InvalidResolution { width, height });
    }
    Ok(())
}

/// Pinhole camera with optional polynomial lens distortion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinholeCamera<T> {
    width: u32,
    height: u32,
    /// Focal length in x direction
    pub fx: T,
    /// Focal length in y direction
    pub fy: T,
    /// Principal point x coordinate
    pub cx: T,
    /// Principal point y coordinate
    pub cy: T,
    /// Distortion parameters (None for no distortion)
    pub distortion: Option<PolynomialDistortion<T>>,
}

impl<T: Real> PinholeCamera<T> {
    /// Create a pinhole camera without distortion.
    pub fn new(width: u32, height: u32, fx: T, fy: T, cx: T, cy: T) -> CameraResult<Self> {
        validate_resolution(width, height)?;
        if !(fx.is_finite() && fy.is_finite() && cx.is_finite() && cy.is_finite())
            || fx <= eps::<T>()
            || fy <= eps::<T>()
        {
            return Err(CameraError::InvalidIntrinsics(format!(
                "fx={fx}, fy={fy}, cx={cx}, cy={cy}"
            )));
        }
        Ok(Self {
            width,
            height,
            fx,
            fy,
            cx,
            cy,
            distortion: None,
        })
    }

    /// Create a pinhole camera from the horizontal field of view, principal point in the image center.
    pub fn from_fov_x(width: u32, height: u32, fov_x: T) -> CameraResult<Self> {
        validate_resolution(width, height)?;
        if !(fov_x > T::zero() && fov_x < T::pi()) {
            return Err(CameraError::InvalidFieldOfView(
                nalgebra::try_convert(fov_x).unwrap_or(f64::NAN),
            ));
        }
        let half: T = lit(0.5);
        let cx = lit::<T>(width as f64) * half;
        let cy = lit::<T>(height as f64) * half;
        let focal = cx / (fov_x * half).tan();
        Self::new(width, height, focal, focal, cx, cy)
    }

    /// Attach a distortion model to the camera.
    pub fn with_distortion(mut self, distortion: PolynomialDistortion<T>) -> Self {
        self.distortion = Some(distortion);
        self
    }

    /// Check if the camera has distortion.
    pub fn has_distortion(&self) -> bool {
        self.distortion.as_ref().is_some_and(|d| d.has_distortion())
    }

    /// Horizontal field of view in radians.
    pub fn fov_x(&self) -> T {
        let two = T::one() + T::one();
        two * (lit::<T>(self.width as f64) / (two * self.fx)).atan()
    }

    /// Get the 3x3 intrinsics matrix.
    pub fn intrinsics_matrix(&self) -> nalgebra::Matrix3<T> {
        let (zero, one) = (T::zero(), T::one());
        nalgebra::Matrix3::new(
            self.fx, zero, self.cx, //
            zero, self.fy, self.cy, //
            zero, zero, one,
        )
    }
}

impl<T: Real> Camera<T> for PinholeCamera<T> {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn project_to_image_flipped(&self, point: &Point3<T>) -> Point2<T> {
        let inv_z = T::one() / point.z;
        let (mut x, mut y) = (point.x * inv_z, point.y * inv_z);
        if let Some(distortion) = &self.distortion {
            (x, y) = distortion.distort(x, y);
        }
        Point2::new(self.fx * x + self.cx, self.fy * y + self.cy)
    }

    fn vector_flipped(&self, image_point: &Point2<T>) -> Vector3<T> {
        let mut x = (image_point.x - self.cx) / self.fx;
        let mut y = (image_point.y - self.cy) / self.fy;
        if let Some(distortion) = &self.distortion {
            (x, y) = distortion.undistort(x, y);
        }
        Vector3::new(x, y, T::one()).normalize()
    }
}

/// Fisheye camera following the equidistant (Kannala-Brandt) projection model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FisheyeCamera<T> {
    width: u32,
    height: u32,
    /// Focal length in x direction
    pub fx: T,
    /// Focal length in y direction
    pub fy: T,
    /// Principal point x coordinate
    pub cx: T,
    /// Principal point y coordinate
    pub cy: T,
    /// Radial coefficients of the polynomial in the incidence angle.
    pub k: [T; 4],
}

impl<T: Real> FisheyeCamera<T> {
    /// Create a fisheye camera.
    pub fn new(width: u32, height: u32, fx: T, fy: T, cx: T, cy: T, k: [T; 4]) -> CameraResult<Self> {
        validate_resolution(width, height)?;
        if fx <= eps::<T>() || fy <= eps::<T>() || k.iter().any(|c| !c.is_finite()) {
            return Err(CameraError::InvalidIntrinsics(format!(
                "fx={fx}, fy={fy}, k={k:?}"
            )));
        }
        Ok(Self {
            width,
            height,
            fx,
            fy,
            cx,
            cy,
            k,
        })
    }

    fn distorted_angle(&self, theta: T) -> T {
        let theta2 = theta * theta;
        let theta4 = theta2 * theta2;
        let theta6 = theta4 * theta2;
        let theta8 = theta4 * theta4;
        theta
            * (T::one()
                + self.k[0] * theta2
                + self.k[1] * theta4
                + self.k[2] * theta6
                + self.k[3] * theta8)
    }

    fn distorted_angle_derivative(&self, theta: T) -> T {
        let theta2 = theta * theta;
        let theta4 = theta2 * theta2;
        let theta6 = theta4 * theta2;
        let theta8 = theta4 * theta4;
        T::one()
            + lit::<T>(3.0) * self.k[0] * theta2
            + lit::<T>(5.0) * self.k[1] * theta4
            + lit::<T>(7.0) * self.k[2] * theta6
            + lit::<T>(9.0) * self.k[3] * theta8
    }
}

impl<T: Real> Camera<T> for FisheyeCamera<T> {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn project_to_image_flipped(&self, point: &Point3<T>) -> Point2<T> {
        let r = (point.x * point.x + point.y * point.y).sqrt();
        if r <= eps::<T>() {
            return Point2::new(self.cx, self.cy);
        }
        let theta = r.atan2(point.z);
        let scale = self.distorted_angle(theta) / r;
        Point2::new(
            self.fx * point.x * scale + self.cx,
            self.fy * point.y * scale + self.cy,
        )
    }

    fn vector_flipped(&self, image_point: &Point2<T>) -> Vector3<T> {
        const MAX_ITERATIONS: usize = 20;

        let mx = (image_point.x - self.cx) / self.fx;
        let my = (image_point.y - self.cy) / self.fy;
        let theta_d = (mx * mx + my * my).sqrt();
        if theta_d <= eps::<T>() {
            return Vector3::z();
        }

        // newton iterations on theta_d = theta * (1 + k1 theta^2 + ...)
        let mut theta = theta_d;
        for _ in 0..MAX_ITERATIONS {
            let derivative = self.distorted_angle_derivative(theta);
            if derivative.abs() <= eps::<T>() {
                break;
            }
            let step = (self.distorted_angle(theta) - theta_d) / derivative;
            theta -= step;
            if step.abs() <= eps::<T>() {
                break;
            }
        }

        let sin_theta = theta.sin();
        Vector3::new(
            sin_theta * mx / theta_d,
            sin_theta * my / theta_d,
            theta.cos(),
        )
    }
}

/// A camera of any supported model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnyCamera<T> {
    /// Pinhole camera with optional distortion.
    Pinhole(PinholeCamera<T>),
    /// Equidistant fisheye camera.
    Fisheye(FisheyeCamera<T>),
}

impl<T: Real> Camera<T> for AnyCamera<T> {
    fn width(&self) -> u32 {
        match self {
            AnyCamera::Pinhole(camera) => camera.width(),
            AnyCamera::Fisheye(camera) => camera.width(),
        }
    }

    fn height(&self) -> u32 {
        match self {
            AnyCamera::Pinhole(camera) => camera.height(),
            AnyCamera::Fisheye(camera) => camera.height(),
        }
    }

    fn project_to_image_flipped(&self, point: &Point3<T>) -> Point2<T> {
        match self {
            AnyCamera::Pinhole(camera) => camera.project_to_image_flipped(point),
            AnyCamera::Fisheye(camera) => camera.project_to_image_flipped(point),
        }
    }

    fn vector_flipped(&self, image_point: &Point2<T>) -> Vector3<T> {
        match self {
            AnyCamera::Pinhole(camera) => camera.vector_flipped(image_point),
            AnyCamera::Fisheye(camera) => camera.vector_flipped(image_point),
        }
    }
}

impl<T> From<PinholeCamera<T>> for AnyCamera<T> {
    fn from(camera: PinholeCamera<T>) -> Self {
        AnyCamera::Pinhole(camera)
    }
}

impl<T> From<FisheyeCamera<T>> for AnyCamera<T> {
    fn from(camera: FisheyeCamera<T>) -> Self {
        AnyCamera::Fisheye(camera)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pinhole_from_fov() -> Result<(), CameraError> {
        let camera = PinholeCamera::<f64>::from_fov_x(640, 480, 60f64.to_radians())?;
        assert_relative_eq!(camera.fx, 320.0 / 30f64.to_radians().tan(), epsilon = 1e-9);
        assert_relative_eq!(camera.cx, 320.0);
        assert_relative_eq!(camera.cy, 240.0);
        assert_relative_eq!(camera.fov_x(), 60f64.to_radians(), epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_invalid_cameras() {
        assert!(matches!(
            PinholeCamera::<f32>::new(0, 480, 500.0, 500.0, 320.0, 240.0),
            Err(CameraError::InvalidResolution { .. })
        ));
        assert!(matches!(
            PinholeCamera::<f32>::new(640, 480, -1.0, 500.0, 320.0, 240.0),
            Err(CameraError::InvalidIntrinsics(_))
        ));
        assert!(matches!(
            PinholeCamera::<f64>::from_fov_x(640, 480, 4.0),
            Err(CameraError::InvalidFieldOfView(_))
        ));
    }

    #[test]
    fn test_pinhole_projection_and_ray() -> Result<(), CameraError> {
        let camera = PinholeCamera::<f64>::new(640, 480, 500.0, 500.0, 320.0, 240.0)?;
        let point = Point3::new(0.2, -0.1, 2.0);
        let image_point = camera.project_to_image_flipped(&point);
        assert_relative_eq!(image_point, Point2::new(370.0, 215.0), epsilon = 1e-9);

        let ray = camera.vector_flipped(&image_point);
        assert_relative_eq!(ray, point.coords.normalize(), epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_distort_undistort_roundtrip() -> Result<(), CameraError> {
        let camera = PinholeCamera::<f64>::new(640, 480, 500.0, 500.0, 320.0, 240.0)?
            .with_distortion(PolynomialDistortion::radial_tangential(0.1, 0.01, 1e-3, -1e-3));
        assert!(camera.has_distortion());

        let point = Point3::new(-0.3, 0.25, 1.5);
        let image_point = camera.project_to_image_flipped(&point);
        let ray = camera.vector_flipped(&image_point);
        assert_relative_eq!(ray, point.coords.normalize(), epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_fisheye_projection_and_ray() -> Result<(), CameraError> {
        let camera =
            FisheyeCamera::<f64>::new(640, 480, 300.0, 300.0, 320.0, 240.0, [0.02, -0.01, 0.0, 0.0])?;
        let point = Point3::new(1.0, 0.5, 1.2);
        let image_point = camera.project_to_image_flipped(&point);
        let ray = camera.vector_flipped(&image_point);
        assert_relative_eq!(ray, point.coords.normalize(), epsilon = 1e-6);

        let center = camera.project_to_image_flipped(&Point3::new(0.0, 0.0, 1.0));
        assert_relative_eq!(center, Point2::new(320.0, 240.0));
        Ok(())
    }

    #[test]
    fn test_any_camera_ray_in_world() -> Result<(), CameraError> {
        let camera: AnyCamera<f64> = PinholeCamera::from_fov_x(640, 480, 1.0)?.into();
        let world_t_camera = Isometry3::translation(1.0, 2.0, 3.0);

        // the principal point looks down the camera's -Z axis
        let ray = camera.ray(&Point2::new(320.0, 240.0), &world_t_camera);
        assert_relative_eq!(ray.origin, Point3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(ray.direction.into_inner(), -Vector3::z(), epsilon = 1e-12);

        let object_point = ray.point(4.0);
        let pose_if = standard_to_inverted_flipped(&world_t_camera);
        assert!(camera.is_object_point_in_front_if(&pose_if, &object_point));
        let image_point = camera.project_to_image(&world_t_camera, &object_point);
        assert_relative_eq!(image_point, Point2::new(320.0, 240.0), epsilon = 1e-9);
        assert!(camera.is_inside(&image_point, 10.0));
        Ok(())
    }

    #[test]
    fn test_batch_projection_matches_single() -> Result<(), CameraError> {
        let camera = PinholeCamera::<f32>::new(640, 480, 500.0, 500.0, 320.0, 240.0)?;
        let pose_if = Isometry3::translation(0.0f32, 0.0, 4.0);
        let objects = [
            Point3::new(0.0f32, 0.0, 0.0),
            Point3::new(0.5, 0.5, 0.5),
            Point3::new(-0.5, 0.2, -0.3),
        ];
        let mut projected = [Point2::origin(); 3];
        camera.project_to_image_if_batch(&pose_if, &objects, &mut projected);
        for (object, image) in objects.iter().zip(projected.iter()) {
            assert_eq!(*image, camera.project_to_image_if(&pose_if, object));
        }
        Ok(())
    }
}
