//! Robust aggregation of squared distances between two groups of image points.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::nearest::NearestNeighbors;
use crate::scalar::{lit, saturated, Real};

/// Robust estimator applied to every squared residual before averaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Estimator {
    /// Plain squared error.
    Square,
    /// Absolute (non-squared) error.
    Linear,
    /// Huber estimator: quadratic for small residuals, linear beyond sigma.
    #[default]
    Huber,
    /// Tukey's biweight: residuals beyond sigma contribute a constant.
    Tukey,
    /// Cauchy (Lorentzian) estimator.
    Cauchy,
}

impl Estimator {
    /// Returns `true` if the estimator depends on a sigma derived from the residuals.
    pub fn needs_sigma(self) -> bool {
        matches!(self, Estimator::Huber | Estimator::Tukey | Estimator::Cauchy)
    }

    fn tuning_constant(self) -> f64 {
        match self {
            Estimator::Huber => 1.345,
            Estimator::Tukey => 4.6851,
            Estimator::Cauchy => 2.3849,
            Estimator::Square | Estimator::Linear => 1.0,
        }
    }

    /// Robust error of a squared residual.
    pub fn robust_error<T: Real>(self, sqr_error: T, sqr_sigma: T) -> T {
        let half: T = lit(0.5);
        match self {
            Estimator::Square => sqr_error,
            Estimator::Linear => sqr_error.sqrt(),
            Estimator::Huber => {
                if sqr_error <= sqr_sigma {
                    sqr_error * half
                } else {
                    let sigma = sqr_sigma.sqrt();
                    sigma * (sqr_error.sqrt() - sigma * half)
                }
            }
            Estimator::Tukey => {
                let sixth = sqr_sigma / lit(6.0);
                if sqr_error > sqr_sigma {
                    sixth
                } else {
                    let ratio = T::one() - sqr_error / sqr_sigma;
                    sixth * (T::one() - ratio * ratio * ratio)
                }
            }
            Estimator::Cauchy => sqr_sigma * half * (T::one() + sqr_error / sqr_sigma).ln(),
        }
    }

    /// Squared sigma derived from the median of the squared residuals.
    ///
    /// `model_parameters` is the number of degrees of freedom of the fitted model. The result is never
    /// below one square pixel.
    pub fn sqr_sigma<T: Real>(self, sqr_errors: &[T], model_parameters: usize) -> T {
        if !self.needs_sigma() || sqr_errors.is_empty() {
            return T::one();
        }

        let mut sorted = sqr_errors.to_vec();
        sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let median = sorted[sorted.len() / 2];

        let correction = if sqr_errors.len() > model_parameters {
            1.0 + 5.0 / (sqr_errors.len() - model_parameters) as f64
        } else {
            1.0
        };
        let sigma = lit::<T>(self.tuning_constant() * 1.4826 * correction) * median.sqrt();
        let sqr_sigma = sigma * sigma;
        if sqr_sigma.is_finite() && sqr_sigma > T::one() {
            sqr_sigma
        } else {
            T::one()
        }
    }
}

/// How the points of the smaller group are associated with the points of the larger group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ErrorDetermination {
    /// The i-th small point corresponds to the i-th large point.
    Positional,
    /// Nearest large point, each large point used at most once (greedy by increasing distance).
    #[default]
    Unique,
    /// Nearest large point, large points may be used several times.
    Approximated,
}

/// Degrees of freedom of the 6-DOF pose the residuals are computed for.
const POSE_PARAMETERS: usize = 6;

#[inline]
fn sqr_distance<T: Real>(a: &Point2<T>, b: &Point2<T>) -> T {
    let d = (a - b).norm_squared();
    if d.is_finite() {
        d
    } else {
        saturated()
    }
}

/// Pending match of a small point in the greedy unique association, ordered by increasing distance.
#[derive(Debug, Clone, Copy)]
struct Candidate<T> {
    sqr_distance: T,
    small: usize,
    large: usize,
}

impl<T: Real> PartialEq for Candidate<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: Real> Eq for Candidate<T> {}

impl<T: Real> PartialOrd for Candidate<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Real> Ord for Candidate<T> {
    // reversed, so that the max-heap pops the closest pair first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .sqr_distance
            .partial_cmp(&self.sqr_distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.small.cmp(&self.small))
            .then_with(|| other.large.cmp(&self.large))
    }
}

/// Closest large point not used yet.
fn nearest_unused<T: Real>(
    point: &Point2<T>,
    large: &[Point2<T>],
    used: &[bool],
) -> Option<(usize, T)> {
    large
        .iter()
        .enumerate()
        .filter(|(j, _)| !used[*j])
        .map(|(j, candidate)| (j, sqr_distance(point, candidate)))
        .fold(None, |best, (j, d)| match best {
            Some((_, best_d)) if best_d <= d => best,
            _ => Some((j, d)),
        })
}

/// Associates the first `valid_count` small points with large points; returns the pairs and their
/// squared distances.
///
/// The nearest modes query `index`, a tree over `large`, and build one when none is given.
fn associate<T: Real>(
    small: &[Point2<T>],
    valid_count: usize,
    large: &[Point2<T>],
    index: Option<&NearestNeighbors>,
    determination: ErrorDetermination,
) -> (Vec<(usize, usize)>, Vec<T>) {
    if determination == ErrorDetermination::Positional {
        return (0..valid_count)
            .map(|i| ((i, i), sqr_distance(&small[i], &large[i])))
            .unzip();
    }

    let owned;
    let index = match index {
        Some(index) => index,
        None => {
            owned = NearestNeighbors::new(large);
            &owned
        }
    };
    let nearest = |i: usize| {
        let j = index.nearest(&small[i]).unwrap_or(0);
        (j, sqr_distance(&small[i], &large[j]))
    };

    if determination == ErrorDetermination::Approximated {
        return (0..valid_count)
            .map(|i| {
                let (j, d) = nearest(i);
                ((i, j), d)
            })
            .unzip();
    }

    // Greedy by increasing distance. Queue entries are lower bounds of the distance to the closest
    // unused large point, so a popped entry whose large point is still free is the closest free pair.
    let mut queue: BinaryHeap<Candidate<T>> = (0..valid_count)
        .map(|i| {
            let (j, d) = nearest(i);
            Candidate {
                sqr_distance: d,
                small: i,
                large: j,
            }
        })
        .collect();
    let mut used_large = vec![false; large.len()];
    let mut pairs = Vec::with_capacity(valid_count);
    let mut errors = Vec::with_capacity(valid_count);
    while let Some(candidate) = queue.pop() {
        if used_large[candidate.large] {
            if let Some((j, d)) = nearest_unused(&small[candidate.small], large, &used_large) {
                queue.push(Candidate {
                    sqr_distance: d,
                    small: candidate.small,
                    large: j,
                });
            }
            continue;
        }
        used_large[candidate.large] = true;
        pairs.push((candidate.small, candidate.large));
        errors.push(candidate.sqr_distance);
    }
    (pairs, errors)
}

/// Averaged robust error between the first `valid_count` points of `small` and the points of `large`.
///
/// Returns `None` if `valid_count` is zero or exceeds the size of either group. When `correspondences`
/// is given it is cleared and filled with the `(small_index, large_index)` pairs that were scored.
///
/// PRECONDITION: `small` and `large` are distinct buffers.
pub fn averaged_robust_error<T: Real>(
    small: &[Point2<T>],
    valid_count: usize,
    large: &[Point2<T>],
    estimator: Estimator,
    determination: ErrorDetermination,
    correspondences: Option<&mut Vec<(usize, usize)>>,
) -> Option<T> {
    robust_average(small, valid_count, large, None, estimator, determination, correspondences)
}

/// [`averaged_robust_error`] with a prebuilt tree over `large`.
///
/// Use it when `large` stays the same across many evaluations. Returns `None` as well when the tree
/// does not index exactly the points of `large`.
pub fn averaged_robust_error_indexed<T: Real>(
    small: &[Point2<T>],
    valid_count: usize,
    large: &[Point2<T>],
    large_index: &NearestNeighbors,
    estimator: Estimator,
    determination: ErrorDetermination,
    correspondences: Option<&mut Vec<(usize, usize)>>,
) -> Option<T> {
    if large_index.len() != large.len() {
        return None;
    }
    robust_average(
        small,
        valid_count,
        large,
        Some(large_index),
        estimator,
        determination,
        correspondences,
    )
}

fn robust_average<T: Real>(
    small: &[Point2<T>],
    valid_count: usize,
    large: &[Point2<T>],
    large_index: Option<&NearestNeighbors>,
    estimator: Estimator,
    determination: ErrorDetermination,
    correspondences: Option<&mut Vec<(usize, usize)>>,
) -> Option<T> {
    debug_assert!(
        small.is_empty() || !std::ptr::eq(small.as_ptr(), large.as_ptr()),
        "point groups must not alias"
    );

    if valid_count == 0 || valid_count > small.len() || valid_count > large.len() {
        return None;
    }

    let (pairs, sqr_errors) = associate(small, valid_count, large, large_index, determination);

    let sqr_sigma = estimator.sqr_sigma(&sqr_errors, POSE_PARAMETERS);
    let mut sum = T::zero();
    for sqr_error in sqr_errors.iter() {
        sum += estimator.robust_error(*sqr_error, sqr_sigma);
    }
    let average = sum / lit(sqr_errors.len() as f64);

    if let Some(correspondences) = correspondences {
        correspondences.clear();
        correspondences.extend(pairs);
    }

    Some(if average.is_finite() { average } else { saturated() })
}

/// Average and maximal squared distance between two equally sized point sets.
///
/// Returns `None` if the sets are empty or differ in size.
pub fn sqr_distance_errors<T: Real>(a: &[Point2<T>], b: &[Point2<T>]) -> Option<(T, T)> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    let mut sum = T::zero();
    let mut maximum = T::zero();
    for (pa, pb) in a.iter().zip(b.iter()) {
        let d = sqr_distance(pa, pb);
        sum += d;
        if d > maximum {
            maximum = d;
        }
    }
    Some((sum / lit(a.len() as f64), maximum))
}
