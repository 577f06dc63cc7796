use nalgebra::{Isometry3, Matrix3, Point2, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};

use crate::camera::Camera;
use crate::scalar::{eps, lit, Real};

/// Compute the centroid of a set of points, `None` for an empty set.
pub(crate) fn centroid<T: Real>(points: &[Point3<T>]) -> Option<Point3<T>> {
    if points.is_empty() {
        return None;
    }
    let sum = points
        .iter()
        .fold(Vector3::zeros(), |acc: Vector3<T>, p| acc + p.coords);
    Some(Point3::from(sum / lit::<T>(points.len() as f64)))
}

/// Kabsch alignment without scale: the rigid transform `T` minimizing `sum |dst_i - T src_i|^2`.
///
/// Returns `None` for mismatched or too small inputs, and when the SVD does not converge.
pub(crate) fn absolute_orientation<T: Real>(
    src: &[Point3<T>],
    dst: &[Point3<T>],
) -> Option<Isometry3<T>> {
    if src.len() != dst.len() || src.len() < 3 {
        return None;
    }
    let mu_src = centroid(src)?;
    let mu_dst = centroid(dst)?;

    // H = sum (dst_i - mu_dst) (src_i - mu_src)^T
    let mut h = Matrix3::<T>::zeros();
    for (s, d) in src.iter().zip(dst.iter()) {
        h += (d - mu_dst) * (s - mu_src).transpose();
    }

    let svd = h.try_svd(true, true, eps::<T>(), 100)?;
    let u = svd.u?;
    let v_t = svd.v_t?;

    let mut correction = Matrix3::<T>::identity();
    if (u * v_t).determinant() < T::zero() {
        // reflection
        correction[(2, 2)] = -T::one();
    }
    let rotation_matrix = u * correction * v_t;
    if !rotation_matrix.iter().all(|v| v.is_finite()) {
        return None;
    }

    let rotation =
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rotation_matrix));
    let translation = mu_dst.coords - rotation * mu_src.coords;
    Some(Isometry3::from_parts(Translation3::from(translation), rotation))
}

/// Squared reprojection error of a single correspondence for an IF pose.
///
/// If `skip_if_behind` is true, returns `None` for points with non-positive depth.
pub(crate) fn project_sqr_error<T: Real, C: Camera<T> + ?Sized>(
    camera: &C,
    flipped_camera_t_world: &Isometry3<T>,
    object_point: &Point3<T>,
    image_point: &Point2<T>,
    skip_if_behind: bool,
) -> Option<T> {
    if skip_if_behind && !camera.is_object_point_in_front_if(flipped_camera_t_world, object_point) {
        return None;
    }
    let projected = camera.project_to_image_if(flipped_camera_t_world, object_point);
    let sqr_error = (projected - image_point).norm_squared();
    sqr_error.is_finite().then_some(sqr_error)
}

/// Average and maximal squared reprojection error of all correspondences.
///
/// Returns `None` if any object point lies behind the camera or the sets are empty.
pub(crate) fn reprojection_errors<T: Real, C: Camera<T> + ?Sized>(
    camera: &C,
    flipped_camera_t_world: &Isometry3<T>,
    object_points: &[Point3<T>],
    image_points: &[Point2<T>],
) -> Option<(T, T)> {
    if object_points.is_empty() || object_points.len() != image_points.len() {
        return None;
    }
    let mut sum = T::zero();
    let mut maximum = T::zero();
    for (object_point, image_point) in object_points.iter().zip(image_points.iter()) {
        let sqr_error =
            project_sqr_error(camera, flipped_camera_t_world, object_point, image_point, true)?;
        sum += sqr_error;
        maximum = maximum.max(sqr_error);
    }
    Some((sum / lit(object_points.len() as f64), maximum))
}

/// Returns `true` if the three points are (nearly) collinear.
pub(crate) fn are_collinear<T: Real>(a: &Point3<T>, b: &Point3<T>, c: &Point3<T>) -> bool {
    let ab = b - a;
    let ac = c - a;
    let scale = ab.norm_squared() * ac.norm_squared();
    if scale <= eps::<T>() * eps::<T>() {
        return true;
    }
    // squared sine of the enclosed angle
    ab.cross(&ac).norm_squared() <= eps::<T>() * scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::PinholeCamera;
    use approx::assert_relative_eq;

    fn points() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.2, -0.3),
            Point3::new(-0.4, 0.9, 0.1),
            Point3::new(0.3, -0.5, 0.8),
            Point3::new(0.7, 0.7, 0.7),
        ]
    }

    #[test]
    fn test_centroid() {
        let c = centroid(&[Point3::new(0.0f32, 0.0, 0.0), Point3::new(2.0, 4.0, -6.0)]);
        assert_eq!(c, Some(Point3::new(1.0, 2.0, -3.0)));
        assert!(centroid::<f32>(&[]).is_none());
    }

    #[test]
    fn test_absolute_orientation_recovers_transform() {
        let expected = Isometry3::new(Vector3::new(0.5, -1.0, 3.0), Vector3::new(0.3, -0.2, 0.9));
        let src = points();
        let dst: Vec<_> = src.iter().map(|p| expected * p).collect();

        let estimated = absolute_orientation(&src, &dst);
        assert!(estimated.is_some());
        if let Some(estimated) = estimated {
            assert_relative_eq!(
                estimated.to_homogeneous(),
                expected.to_homogeneous(),
                epsilon = 1e-9
            );
            let determinant = estimated.rotation.to_rotation_matrix().matrix().determinant();
            assert_relative_eq!(determinant, 1.0, epsilon = 1e-9);
        }
        assert!(absolute_orientation(&src[..2], &dst[..2]).is_none());
    }

    #[test]
    fn test_reprojection_errors() -> Result<(), crate::camera::CameraError> {
        let camera = PinholeCamera::<f64>::new(640, 480, 500.0, 500.0, 320.0, 240.0)?;
        let pose_if = Isometry3::translation(0.0, 0.0, 5.0);
        let objects = points();
        let mut images: Vec<_> = objects
            .iter()
            .map(|p| camera.project_to_image_if(&pose_if, p))
            .collect();
        images[0].x += 2.0;

        let (average, maximum) = reprojection_errors(&camera, &pose_if, &objects, &images)
            .unwrap_or((f64::MAX, f64::MAX));
        assert_relative_eq!(average, 4.0 / 5.0, epsilon = 1e-9);
        assert_relative_eq!(maximum, 4.0, epsilon = 1e-9);

        let behind = Isometry3::translation(0.0, 0.0, -5.0);
        assert!(reprojection_errors(&camera, &behind, &objects, &images).is_none());
        Ok(())
    }

    #[test]
    fn test_collinearity() {
        let a = Point3::new(0.0f64, 0.0, 0.0);
        let b = Point3::new(1.0, 1.0, 1.0);
        assert!(are_collinear(&a, &b, &Point3::new(3.0, 3.0, 3.0)));
        assert!(are_collinear(&a, &a, &b));
        assert!(!are_collinear(&a, &b, &Point3::new(1.0, 0.0, 0.0)));
    }
}
