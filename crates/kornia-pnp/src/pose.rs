//! Pose conventions.
//!
//! Two conventions are used throughout the crates:
//!
//! - **standard** `world_T_camera`: transforms points from the camera frame into the world frame. The
//!   camera looks down its local −Z axis and the Y axis points upwards.
//! - **inverted flipped (IF)** `flippedCamera_T_world`: transforms points from the world frame into the
//!   flipped camera frame, in which the camera looks down +Z and the Y axis points downwards.
//!
//! The flipped frame is the one pixel projection is expressed in, so all solvers work with IF poses.

use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion, Vector3};

use crate::scalar::Real;

/// The transformation flipping the camera frame: a rotation of 180 degrees around the X axis.
pub fn flip_transform<T: Real>() -> Isometry3<T> {
    Isometry3::from_parts(Translation3::identity(), flip_rotation())
}

/// The rotation flipping the camera frame: 180 degrees around the X axis.
pub fn flip_rotation<T: Real>() -> UnitQuaternion<T> {
    UnitQuaternion::new_unchecked(Quaternion::new(T::zero(), T::one(), T::zero(), T::zero()))
}

/// Flips a direction between the standard and the flipped camera frame.
#[inline]
pub fn flip_vector<T: Real>(v: &Vector3<T>) -> Vector3<T> {
    Vector3::new(v.x, -v.y, -v.z)
}

/// Converts a standard `world_T_camera` pose into an IF `flippedCamera_T_world` pose.
pub fn standard_to_inverted_flipped<T: Real>(world_t_camera: &Isometry3<T>) -> Isometry3<T> {
    (world_t_camera * flip_transform::<T>()).inverse()
}

/// Converts an IF `flippedCamera_T_world` pose into a standard `world_T_camera` pose.
pub fn inverted_flipped_to_standard<T: Real>(flipped_camera_t_world: &Isometry3<T>) -> Isometry3<T> {
    flipped_camera_t_world.inverse() * flip_transform::<T>()
}

/// Cosine of half the angle of the relative rotation between two orientations.
///
/// Equals one for identical orientations and decreases monotonically with the relative angle.
#[inline]
pub fn cos_half_angle<T: Real>(a: &UnitQuaternion<T>, b: &UnitQuaternion<T>) -> T {
    a.coords.dot(&b.coords).abs().min(T::one())
}

/// Angle of the relative rotation between two orientations, in radians within `[0, pi]`.
pub fn angle_between<T: Real>(a: &UnitQuaternion<T>, b: &UnitQuaternion<T>) -> T {
    let two = T::one() + T::one();
    cos_half_angle(a, b).acos() * two
}

/// Checks whether `candidate` deviates from `reference` by at most `max_offset` on every axis.
#[inline]
pub fn translation_within<T: Real>(
    candidate: &Vector3<T>,
    reference: &Vector3<T>,
    max_offset: &Vector3<T>,
) -> bool {
    (candidate.x - reference.x).abs() <= max_offset.x
        && (candidate.y - reference.y).abs() <= max_offset.y
        && (candidate.z - reference.z).abs() <= max_offset.z
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point3;

    #[test]
    fn test_flip_is_involution() {
        let flip = flip_transform::<f64>();
        let point = Point3::new(0.5, -2.0, 3.0);
        assert_relative_eq!(flip * (flip * point), point, epsilon = 1e-12);
        assert_relative_eq!(flip * point, Point3::new(0.5, 2.0, -3.0), epsilon = 1e-12);
    }

    #[test]
    fn test_conversion_roundtrip() {
        let world_t_camera = Isometry3::new(
            Vector3::new(0.3, -1.2, 4.0),
            Vector3::new(0.1, -0.4, 0.25),
        );
        let pose_if = standard_to_inverted_flipped(&world_t_camera);
        let back = inverted_flipped_to_standard(&pose_if);
        assert_relative_eq!(
            back.to_homogeneous(),
            world_t_camera.to_homogeneous(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_point_in_front_has_positive_depth() {
        // default camera at (0, 0, 5) looking down -Z towards the origin
        let world_t_camera = Isometry3::translation(0.0f64, 0.0, 5.0);
        let pose_if = standard_to_inverted_flipped(&world_t_camera);

        let in_front = pose_if * Point3::new(0.0, 1.0, 0.0);
        assert_relative_eq!(in_front.z, 5.0, epsilon = 1e-12);
        // world up maps to image down
        assert_relative_eq!(in_front.y, -1.0, epsilon = 1e-12);

        let behind = pose_if * Point3::new(0.0, 0.0, 10.0);
        assert!(behind.z < 0.0);
    }

    #[test]
    fn test_cos_half_angle() {
        let a = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.2f64);
        let b = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.5f64);
        assert_relative_eq!(cos_half_angle(&a, &b), (0.15f64).cos(), epsilon = 1e-12);
        assert_relative_eq!(angle_between(&a, &b), 0.3, epsilon = 1e-9);
        // q and -q describe the same orientation
        let negated = UnitQuaternion::new_unchecked(-b.into_inner());
        assert_relative_eq!(cos_half_angle(&b, &negated), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_translation_within() {
        let max = Vector3::new(0.1f32, 0.2, 0.3);
        let reference = Vector3::new(1.0f32, 1.0, 1.0);
        assert!(translation_within(&Vector3::new(1.05, 0.85, 1.29), &reference, &max));
        assert!(!translation_within(&Vector3::new(1.05, 0.85, 1.31), &reference, &max));
    }
}
