//! The Random Model Variation state machine of a single search.
//!
//! A search starts by scoring its initial pose. Unless that pose already reaches the target error, it
//! repeatedly perturbs the best pose found so far by a random translation and rotation, scores the
//! candidate and keeps it when the error does not increase. Every improvement shrinks the perturbation
//! range. Candidates never leave the box around the initial pose given by the maximal offsets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use kornia_pnp::nalgebra::{Isometry3, Point2, Translation3, Vector3};
use kornia_pnp::pose::{cos_half_angle, translation_within};
use kornia_pnp::scalar::{lit, saturated, to_f64};
use kornia_pnp::{Camera, NearestNeighbors, RandomGenerator, Real};

use crate::correspondences::{Correspondences, PointGroup};
use crate::params::RmvParams;
use crate::types::{RmvError, RmvResult};

/// Maximal number of perturbations between two checks of the deadline.
pub const BATCH_ITERATIONS: usize = 100;

/// Targeted time between two checks of the deadline. Batches shrink below [`BATCH_ITERATIONS`] when
/// single perturbations are expensive, e.g. for large point clouds.
pub const CHECK_INTERVAL: Duration = Duration::from_millis(1);

/// Factor applied to the perturbation range after each improvement.
pub const SHRINK_FACTOR: f64 = 0.9;

/// Outcome of a single perturbation.
#[derive(Debug, Clone, PartialEq)]
pub enum Step<T: Real> {
    /// The candidate left the admissible region around the initial pose and was not scored.
    OutOfBounds,
    /// The candidate scored worse than the current best pose.
    Worse {
        /// The scored candidate pose, IF.
        candidate_if: Isometry3<T>,
        /// Its averaged robust error.
        error: T,
    },
    /// The candidate became the new best pose without reaching the target.
    Improved {
        /// The scored candidate pose, IF.
        candidate_if: Isometry3<T>,
        /// Its averaged robust error.
        error: T,
    },
    /// The best pose reaches the target error; the search is finished.
    Accepted {
        /// The accepted pose, IF.
        pose_if: Isometry3<T>,
        /// Its averaged robust error.
        error: T,
    },
    /// The cancellation flag was raised.
    Cancelled,
}

/// State of one Random Model Variation search.
pub struct PoseSearch<'a, T: Real, C: ?Sized, G> {
    camera: &'a C,
    correspondences: Correspondences<'a, T, G>,
    params: &'a RmvParams,
    cancel: Option<&'a AtomicBool>,
    rng: RandomGenerator,

    initial_pose_if: Isometry3<T>,
    max_translation_offset: Vector3<T>,
    min_cos_half_angle: T,
    target: T,

    best_pose_if: Isometry3<T>,
    best_error: T,
    translation_offset: Vector3<T>,
    orientation_offset: T,
    iterations: usize,

    projected: Vec<Point2<T>>,
    image_index: Option<NearestNeighbors>,
}

impl<'a, T, C, G> PoseSearch<'a, T, C, G>
where
    T: Real,
    C: Camera<T> + ?Sized,
    G: PointGroup,
{
    /// Create a search and score its initial pose.
    ///
    /// The perturbation range starts at half of the maximal offsets.
    pub fn new(
        camera: &'a C,
        initial_pose_if: &Isometry3<T>,
        correspondences: Correspondences<'a, T, G>,
        params: &'a RmvParams,
        rng: RandomGenerator,
        cancel: Option<&'a AtomicBool>,
    ) -> Result<Self, RmvError> {
        correspondences.validate()?;
        params.validate::<T>()?;

        let half: T = lit(0.5);
        let max_translation_offset = params.translation_offset::<T>();
        let max_orientation_offset = params.orientation_offset::<T>();

        let mut search = Self {
            camera,
            correspondences,
            params,
            cancel,
            rng,
            initial_pose_if: *initial_pose_if,
            max_translation_offset,
            min_cos_half_angle: (max_orientation_offset * half).cos(),
            target: params.target(),
            best_pose_if: *initial_pose_if,
            best_error: saturated(),
            translation_offset: max_translation_offset * half,
            orientation_offset: max_orientation_offset * half,
            iterations: 0,
            projected: vec![Point2::origin(); correspondences.projected_count()],
            image_index: correspondences.image_index(params.determination),
        };
        search.project(initial_pose_if);
        search.best_error = search.projected_error();
        Ok(search)
    }

    /// The pose the search started from.
    pub fn initial_pose_if(&self) -> &Isometry3<T> {
        &self.initial_pose_if
    }

    /// The best pose found so far.
    pub fn best_pose_if(&self) -> &Isometry3<T> {
        &self.best_pose_if
    }

    /// Error of the best pose found so far.
    pub fn best_error(&self) -> T {
        self.best_error
    }

    /// Current per-axis half extents of the random translation.
    pub fn translation_offset(&self) -> &Vector3<T> {
        &self.translation_offset
    }

    /// Current maximal angle of the random rotation.
    pub fn orientation_offset(&self) -> T {
        self.orientation_offset
    }

    /// Number of perturbations drawn so far.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Returns `true` once the best pose reaches the target error.
    pub fn is_accepted(&self) -> bool {
        self.best_error <= self.target
    }

    /// Checks whether a pose lies within the maximal offsets around the initial pose.
    pub fn is_within_bounds(&self, pose_if: &Isometry3<T>) -> bool {
        translation_within(
            &pose_if.translation.vector,
            &self.initial_pose_if.translation.vector,
            &self.max_translation_offset,
        ) && cos_half_angle(&pose_if.rotation, &self.initial_pose_if.rotation)
            >= self.min_cos_half_angle
    }

    /// Draws, checks and scores one candidate.
    pub fn step(&mut self) -> Step<T> {
        if self.is_accepted() {
            return Step::Accepted {
                pose_if: self.best_pose_if,
                error: self.best_error,
            };
        }
        self.iterations += 1;

        let translation = self.rng.vector_in_box(&self.translation_offset);
        let rotation = self.rng.rotation(self.orientation_offset);
        let candidate_if =
            self.best_pose_if * Isometry3::from_parts(Translation3::from(translation), rotation);

        if !self.is_within_bounds(&candidate_if) {
            return Step::OutOfBounds;
        }

        if self.is_cancelled() {
            return Step::Cancelled;
        }
        self.project(&candidate_if);
        if self.is_cancelled() {
            return Step::Cancelled;
        }
        let error = self.projected_error();

        if error > self.best_error {
            return Step::Worse {
                candidate_if,
                error,
            };
        }

        self.best_pose_if = candidate_if;
        self.best_error = error;
        if self.is_accepted() {
            return Step::Accepted {
                pose_if: candidate_if,
                error,
            };
        }

        let shrink: T = lit(SHRINK_FACTOR);
        self.translation_offset *= shrink;
        self.orientation_offset *= shrink;
        Step::Improved {
            candidate_if,
            error,
        }
    }

    /// Perturbs the pose until it reaches the target error, the cancellation flag is raised or
    /// `timeout` expires.
    ///
    /// The deadline is checked after every batch of perturbations. A batch holds up to
    /// [`BATCH_ITERATIONS`] perturbations and is sized from the measured cost of the previous batch so
    /// that checks happen about every [`CHECK_INTERVAL`]; the first batch is a single perturbation.
    pub fn run(&mut self, timeout: Duration) -> Result<(), RmvError> {
        let start = Instant::now();
        if self.is_accepted() {
            log::debug!("RMV: initial pose accepted with error {}", self.best_error);
            return Ok(());
        }

        let mut batch = 1;
        loop {
            let batch_start = Instant::now();
            for _ in 0..batch {
                match self.step() {
                    Step::Accepted { error, .. } => {
                        log::debug!(
                            "RMV: accepted error {error} after {} iterations",
                            self.iterations
                        );
                        return Ok(());
                    }
                    Step::Cancelled => {
                        log::debug!("RMV: cancelled after {} iterations", self.iterations);
                        return Err(RmvError::Cancelled);
                    }
                    _ => {}
                }
            }

            if self.is_cancelled() {
                log::debug!("RMV: cancelled after {} iterations", self.iterations);
                return Err(RmvError::Cancelled);
            }
            if start.elapsed() >= timeout {
                log::debug!(
                    "RMV: timed out after {} iterations with error {}",
                    self.iterations,
                    self.best_error
                );
                return Err(RmvError::TimedOut {
                    timeout,
                    best_error: to_f64(self.best_error),
                });
            }
            batch = batch_size(batch, batch_start.elapsed());
        }
    }

    /// The best pose with its error and the correspondences closer than the target error.
    pub fn into_result(mut self) -> RmvResult<T> {
        let pose_if = self.best_pose_if;
        self.project(&pose_if);
        let correspondences = self.correspondences.inliers(
            &self.projected,
            self.image_index.as_ref(),
            self.params.determination,
            self.target,
        );
        RmvResult {
            pose_if,
            error: self.best_error,
            correspondences,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(|cancel| cancel.load(Ordering::Acquire))
    }

    fn project(&mut self, pose_if: &Isometry3<T>) {
        let count = self.projected.len();
        self.camera.project_to_image_if_batch(
            pose_if,
            &self.correspondences.object_points()[..count],
            &mut self.projected,
        );
    }

    fn projected_error(&self) -> T {
        self.correspondences
            .robust_error(
                &self.projected,
                self.image_index.as_ref(),
                self.params.estimator,
                self.params.determination,
                None,
            )
            .unwrap_or_else(saturated)
    }
}

/// Number of perturbations fitting into [`CHECK_INTERVAL`], given that `iterations` took `elapsed`.
fn batch_size(iterations: usize, elapsed: Duration) -> usize {
    let per_iteration = elapsed.as_nanos() / iterations.max(1) as u128;
    if per_iteration == 0 {
        return BATCH_ITERATIONS;
    }
    (CHECK_INTERVAL.as_nanos() / per_iteration).clamp(1, BATCH_ITERATIONS as u128) as usize
}
