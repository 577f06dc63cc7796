use std::fmt;

use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use nalgebra::Point2;

use crate::scalar::{to_f64, Real};

/// Coordinate substituted for non-finite values, far outside of any image.
const FAR_AWAY: f64 = 1e150;

/// k-d tree over a group of image points answering nearest neighbour queries.
///
/// The tree is built once and can be shared by every query against the same group, e.g. the image
/// points of a refinement that projects its object points for each candidate pose.
pub struct NearestNeighbors {
    tree: Option<ImmutableKdTree<f64, u32, 2, 32>>,
    len: usize,
}

impl NearestNeighbors {
    /// Build the tree over `points`.
    pub fn new<T: Real>(points: &[Point2<T>]) -> Self {
        let coordinates: Vec<[f64; 2]> = points.iter().map(coordinates).collect();
        let tree = if coordinates.is_empty() {
            None
        } else {
            Some(ImmutableKdTree::new_from_slice(&coordinates))
        };
        Self {
            tree,
            len: points.len(),
        }
    }

    /// Number of indexed points.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no point is indexed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Index of the indexed point closest to `query`, `None` for an empty tree.
    pub fn nearest<T: Real>(&self, query: &Point2<T>) -> Option<usize> {
        let tree = self.tree.as_ref()?;
        let nearest = tree.nearest_one::<SquaredEuclidean>(&coordinates(query));
        Some(nearest.item as usize)
    }
}

impl fmt::Debug for NearestNeighbors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NearestNeighbors")
            .field("len", &self.len)
            .finish()
    }
}

fn coordinates<T: Real>(point: &Point2<T>) -> [f64; 2] {
    [finite_or_far(to_f64(point.x)), finite_or_far(to_f64(point.y))]
}

#[inline]
fn finite_or_far(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        FAR_AWAY
    }
}
