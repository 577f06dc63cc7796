use std::time::Duration;

use kornia_pnp::nalgebra::Vector3;
use kornia_pnp::scalar::{lit, to_f64};
use kornia_pnp::{ErrorDetermination, Estimator, Real};
use serde::{Deserialize, Serialize};

use crate::types::RmvError;

/// Parameters of the Random Model Variation refinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RmvParams {
    /// The search succeeds once the averaged robust error is at or below this value, in squared pixels.
    pub target_average_sqr_error: f64,
    /// Maximal per-axis deviation of the translation from the initial pose.
    pub max_translation_offset: [f64; 3],
    /// Maximal deviation of the orientation from the initial pose, in radians.
    pub max_orientation_offset: f64,
    /// Time budget of the whole refinement call.
    pub timeout: Duration,
    /// Robust estimator of the error metric.
    pub estimator: Estimator,
    /// How projected object points are associated with image points.
    pub determination: ErrorDetermination,
}

impl Default for RmvParams {
    fn default() -> Self {
        Self {
            target_average_sqr_error: 1.0,
            max_translation_offset: [0.1; 3],
            max_orientation_offset: 10f64.to_radians(),
            timeout: Duration::from_secs(1),
            estimator: Estimator::Huber,
            determination: ErrorDetermination::Approximated,
        }
    }
}

impl RmvParams {
    /// Create default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the target error.
    pub fn with_target_average_sqr_error(mut self, target: f64) -> Self {
        self.target_average_sqr_error = target;
        self
    }

    /// Set the maximal per-axis translation offset.
    pub fn with_max_translation_offset(mut self, offset: [f64; 3]) -> Self {
        self.max_translation_offset = offset;
        self
    }

    /// Set the maximal orientation offset in radians.
    pub fn with_max_orientation_offset(mut self, radians: f64) -> Self {
        self.max_orientation_offset = radians;
        self
    }

    /// Set the time budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the robust estimator.
    pub fn with_estimator(mut self, estimator: Estimator) -> Self {
        self.estimator = estimator;
        self
    }

    /// Set the error determination.
    pub fn with_determination(mut self, determination: ErrorDetermination) -> Self {
        self.determination = determination;
        self
    }

    /// Checks that the search ranges can be sampled in precision `T`.
    ///
    /// Offsets, and the full width of the ranges spanning `[-offset, offset]`, must be finite after the
    /// conversion to `T`; the target error must not be NaN.
    pub fn validate<T: Real>(&self) -> Result<(), RmvError> {
        let offsets = self.translation_offset::<T>();
        let ranges = [
            ("max_translation_offset.x", offsets.x),
            ("max_translation_offset.y", offsets.y),
            ("max_translation_offset.z", offsets.z),
            ("max_orientation_offset", self.orientation_offset::<T>()),
        ];
        for (name, offset) in ranges {
            if !(offset + offset).is_finite() {
                return Err(RmvError::InvalidParameter {
                    name,
                    value: to_f64(offset),
                });
            }
        }
        if self.target_average_sqr_error.is_nan() {
            return Err(RmvError::InvalidParameter {
                name: "target_average_sqr_error",
                value: self.target_average_sqr_error,
            });
        }
        Ok(())
    }

    pub(crate) fn target<T: Real>(&self) -> T {
        lit(self.target_average_sqr_error)
    }

    pub(crate) fn translation_offset<T: Real>(&self) -> Vector3<T> {
        let [x, y, z] = self.max_translation_offset;
        Vector3::new(lit(x.abs()), lit(y.abs()), lit(z.abs()))
    }

    pub(crate) fn orientation_offset<T: Real>(&self) -> T {
        lit(self.max_orientation_offset.abs())
    }
}
