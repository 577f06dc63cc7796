//! Seedable random generator with copy-to-fork semantics.

use nalgebra::{Unit, UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::scalar::{eps, Real};

/// Random generator owned by a single search.
///
/// Generators are never shared between threads: each worker receives its own instance created with
/// [`RandomGenerator::fork`], which advances independently of its parent.
#[derive(Debug, Clone)]
pub struct RandomGenerator {
    rng: StdRng,
}

impl RandomGenerator {
    /// Create a generator seeded from the operating system.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Create a generator with a fixed seed for reproducible sequences.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Derive an independent generator seeded from this one.
    pub fn fork(&mut self) -> Self {
        Self::with_seed(self.rng.random())
    }

    /// Uniform scalar within `[low, high]`.
    ///
    /// Empty ranges and ranges whose width is not finite cannot be sampled and yield `low`, or zero when
    /// `low` itself is not finite.
    pub fn scalar<T: Real>(&mut self, low: T, high: T) -> T {
        if high > low && (high - low).is_finite() {
            return self.rng.random_range(low..=high);
        }
        if low.is_finite() {
            low
        } else {
            T::zero()
        }
    }

    /// Uniform vector inside the box `[-half_extents, half_extents]`.
    pub fn vector_in_box<T: Real>(&mut self, half_extents: &Vector3<T>) -> Vector3<T> {
        Vector3::new(
            self.scalar(-half_extents.x, half_extents.x),
            self.scalar(-half_extents.y, half_extents.y),
            self.scalar(-half_extents.z, half_extents.z),
        )
    }

    /// Uniformly distributed unit vector.
    pub fn unit_vector<T: Real>(&mut self) -> Unit<Vector3<T>> {
        const MAX_TRIALS: usize = 64;
        let one = T::one();
        for _ in 0..MAX_TRIALS {
            let candidate = Vector3::new(
                self.scalar(-one, one),
                self.scalar(-one, one),
                self.scalar(-one, one),
            );
            let sqr_norm = candidate.norm_squared();
            if sqr_norm > eps::<T>() && sqr_norm <= one {
                return Unit::new_normalize(candidate);
            }
        }
        Vector3::z_axis()
    }

    /// Rotation around a uniformly distributed axis with an angle within `[-max_angle, max_angle]`.
    pub fn rotation<T: Real>(&mut self, max_angle: T) -> UnitQuaternion<T> {
        let axis = self.unit_vector::<T>();
        let angle = self.scalar(-max_angle, max_angle);
        UnitQuaternion::from_axis_angle(&axis, angle)
    }

    /// Uniform index within `[0, n)`. Returns zero for an empty range.
    pub fn index(&mut self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        self.rng.random_range(0..n)
    }

    /// `k` distinct indices drawn from `[0, n)`, or `None` if `k > n`.
    pub fn sample_indices(&mut self, n: usize, k: usize) -> Option<Vec<usize>> {
        if k > n {
            return None;
        }
        Some(rand::seq::index::sample(&mut self.rng, n, k).into_vec())
    }
}

impl Default for RandomGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::angle_between;

    #[test]
    fn test_seeded_generators_repeat() {
        let mut a = RandomGenerator::with_seed(7);
        let mut b = RandomGenerator::with_seed(7);
        for _ in 0..10 {
            assert_eq!(a.scalar(-1.0f64, 1.0), b.scalar(-1.0f64, 1.0));
        }
    }

    #[test]
    fn test_fork_is_independent() {
        let mut parent = RandomGenerator::with_seed(3);
        let mut first = parent.fork();
        let mut second = parent.fork();
        let a: Vec<f64> = (0..8).map(|_| first.scalar(0.0, 1.0)).collect();
        let b: Vec<f64> = (0..8).map(|_| second.scalar(0.0, 1.0)).collect();
        assert_ne!(a, b);
    }

    #[test]
    fn test_samples_respect_bounds() {
        let mut rng = RandomGenerator::with_seed(11);
        let half = Vector3::new(0.1f32, 0.0, 2.0);
        for _ in 0..1000 {
            let v = rng.vector_in_box(&half);
            assert!(v.x.abs() <= 0.1 && v.y == 0.0 && v.z.abs() <= 2.0);

            let q = rng.rotation(0.05f64);
            assert!(angle_between(&q, &UnitQuaternion::identity()) <= 0.05 + 1e-9);

            assert!(rng.index(5) < 5);
        }
        assert_eq!(rng.scalar(2.0f64, 2.0), 2.0);
    }

    #[test]
    fn test_unbounded_ranges_do_not_panic() {
        let mut rng = RandomGenerator::with_seed(13);
        assert_eq!(rng.scalar(-f64::INFINITY, f64::INFINITY), 0.0);
        assert_eq!(rng.scalar(-f64::MAX, f64::MAX), -f64::MAX);
        assert_eq!(rng.scalar(-3e38f32, 3e38), -3e38);
        assert_eq!(rng.scalar(1.0f64, f64::NAN), 1.0);
        assert_eq!(rng.scalar(f64::NAN, 1.0), 0.0);

        let v = rng.vector_in_box(&Vector3::new(f32::INFINITY, 1.0, 0.0));
        assert!(v.x.is_finite() && v.y.abs() <= 1.0 && v.z == 0.0);
    }

    #[test]
    fn test_sample_indices_are_distinct() {
        let mut rng = RandomGenerator::with_seed(5);
        let mut indices = rng.sample_indices(10, 4).unwrap_or_default();
        assert_eq!(indices.len(), 4);
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), 4);
        assert!(rng.sample_indices(3, 4).is_none());
    }
}
