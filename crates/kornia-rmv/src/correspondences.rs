//! 2D-3D correspondences and the compile-time choice of the smaller point group.

use std::marker::PhantomData;

use kornia_pnp::nalgebra::{Point2, Point3};
use kornia_pnp::{
    averaged_robust_error, averaged_robust_error_indexed, ErrorDetermination, Estimator,
    NearestNeighbors, Real,
};

use crate::types::RmvError;

/// Selects which of the two point groups is guaranteed to be the smaller one.
///
/// The first `valid_count` points of the smaller group are matched against the larger group.
pub trait PointGroup: Copy + Send + Sync + 'static {
    /// `true` if the image points form the larger group, which then stays fixed across poses.
    const IMAGE_POINTS_LARGER: bool;

    /// Number of object points that have to be projected to score a pose.
    fn projected_count(valid_count: usize, object_count: usize) -> usize;

    /// Splits the projected object points and the image points into `(small, large)`.
    fn split<'p, T: Real>(
        projected: &'p [Point2<T>],
        image_points: &'p [Point2<T>],
    ) -> (&'p [Point2<T>], &'p [Point2<T>]);

    /// Maps a `(small_index, large_index)` pair onto `(object_index, image_index)`.
    fn object_image_pair(small_index: usize, large_index: usize) -> (usize, usize);
}

/// The image points form the smaller group, e.g. detected features against a dense model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImagePointsSmaller;

/// The object points form the smaller group, e.g. a sparse model against many detections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectPointsSmaller;

impl PointGroup for ImagePointsSmaller {
    const IMAGE_POINTS_LARGER: bool = false;

    fn projected_count(_valid_count: usize, object_count: usize) -> usize {
        object_count
    }

    fn split<'p, T: Real>(
        projected: &'p [Point2<T>],
        image_points: &'p [Point2<T>],
    ) -> (&'p [Point2<T>], &'p [Point2<T>]) {
        (image_points, projected)
    }

    fn object_image_pair(small_index: usize, large_index: usize) -> (usize, usize) {
        (large_index, small_index)
    }
}

impl PointGroup for ObjectPointsSmaller {
    const IMAGE_POINTS_LARGER: bool = true;

    fn projected_count(valid_count: usize, _object_count: usize) -> usize {
        valid_count
    }

    fn split<'p, T: Real>(
        projected: &'p [Point2<T>],
        image_points: &'p [Point2<T>],
    ) -> (&'p [Point2<T>], &'p [Point2<T>]) {
        (projected, image_points)
    }

    fn object_image_pair(small_index: usize, large_index: usize) -> (usize, usize) {
        (small_index, large_index)
    }
}

/// Minimal number of valid correspondences a pose can be refined with.
pub const MIN_VALID_CORRESPONDENCES: usize = 3;

/// Object points and image points of which the first `valid_count` of the smaller group are scored.
#[derive(Debug, Clone, Copy)]
pub struct Correspondences<'a, T: Real, G> {
    object_points: &'a [Point3<T>],
    image_points: &'a [Point2<T>],
    valid_count: usize,
    _group: PhantomData<G>,
}

impl<'a, T: Real> Correspondences<'a, T, ObjectPointsSmaller> {
    /// Correspondences whose object points are the smaller group.
    pub fn object_points_smaller(
        object_points: &'a [Point3<T>],
        image_points: &'a [Point2<T>],
    ) -> Self {
        Self::with_group(object_points, image_points)
    }
}

impl<'a, T: Real> Correspondences<'a, T, ImagePointsSmaller> {
    /// Correspondences whose image points are the smaller group.
    pub fn image_points_smaller(
        object_points: &'a [Point3<T>],
        image_points: &'a [Point2<T>],
    ) -> Self {
        Self::with_group(object_points, image_points)
    }
}

impl<'a, T: Real, G: PointGroup> Correspondences<'a, T, G> {
    fn with_group(object_points: &'a [Point3<T>], image_points: &'a [Point2<T>]) -> Self {
        Self {
            object_points,
            image_points,
            valid_count: object_points.len().min(image_points.len()),
            _group: PhantomData,
        }
    }

    /// Restrict the scoring to the first `valid_count` points of the smaller group.
    pub fn with_valid_count(mut self, valid_count: usize) -> Self {
        self.valid_count = valid_count;
        self
    }

    /// The object points.
    pub fn object_points(&self) -> &'a [Point3<T>] {
        self.object_points
    }

    /// The image points.
    pub fn image_points(&self) -> &'a [Point2<T>] {
        self.image_points
    }

    /// Number of scored correspondences.
    pub fn valid_count(&self) -> usize {
        self.valid_count
    }

    /// Checks `3 <= valid_count <= min(object points, image points)`.
    pub fn validate(&self) -> Result<(), RmvError> {
        if self.valid_count < MIN_VALID_CORRESPONDENCES
            || self.valid_count > self.object_points.len().min(self.image_points.len())
        {
            return Err(RmvError::InvalidCorrespondences {
                valid_count: self.valid_count,
                object_points: self.object_points.len(),
                image_points: self.image_points.len(),
            });
        }
        Ok(())
    }

    /// Number of object points projected per scored pose.
    pub(crate) fn projected_count(&self) -> usize {
        G::projected_count(self.valid_count, self.object_points.len())
    }

    /// Tree over the image points, built when they form the larger group and `determination` matches
    /// nearest neighbours. It serves every pose scored against these correspondences.
    pub(crate) fn image_index(&self, determination: ErrorDetermination) -> Option<NearestNeighbors> {
        (G::IMAGE_POINTS_LARGER && determination != ErrorDetermination::Positional)
            .then(|| NearestNeighbors::new(self.image_points))
    }

    /// Averaged robust error between the projected object points and the image points.
    ///
    /// `image_index` is the tree returned by [`Self::image_index`]; without it a tree over the larger
    /// group is built for this evaluation.
    pub(crate) fn robust_error(
        &self,
        projected: &[Point2<T>],
        image_index: Option<&NearestNeighbors>,
        estimator: Estimator,
        determination: ErrorDetermination,
        pairs: Option<&mut Vec<(usize, usize)>>,
    ) -> Option<T> {
        let (small, large) = G::split(projected, self.image_points);
        match image_index {
            Some(index) => averaged_robust_error_indexed(
                small,
                self.valid_count,
                large,
                index,
                estimator,
                determination,
                pairs,
            ),
            None => averaged_robust_error(
                small,
                self.valid_count,
                large,
                estimator,
                determination,
                pairs,
            ),
        }
    }

    /// `(object_index, image_index)` pairs closer than `max_sqr_distance` (squared pixels).
    pub(crate) fn inliers(
        &self,
        projected: &[Point2<T>],
        image_index: Option<&NearestNeighbors>,
        determination: ErrorDetermination,
        max_sqr_distance: T,
    ) -> Vec<(usize, usize)> {
        let mut pairs = Vec::with_capacity(self.valid_count);
        if self
            .robust_error(
                projected,
                image_index,
                Estimator::Square,
                determination,
                Some(&mut pairs),
            )
            .is_none()
        {
            return Vec::new();
        }

        let (small, large) = G::split(projected, self.image_points);
        pairs
            .into_iter()
            .filter(|&(i, j)| (small[i] - large[j]).norm_squared() < max_sqr_distance)
            .map(|(i, j)| G::object_image_pair(i, j))
            .collect()
    }
}
