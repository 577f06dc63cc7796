//! Thread-safe arbitration of the best pose found by concurrent searches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use kornia_pnp::nalgebra::Isometry3;
use kornia_pnp::Real;

/// A committed search result.
#[derive(Debug, Clone, PartialEq)]
pub struct BestPose<T: Real> {
    /// The IF pose, `flippedCamera_T_world`.
    pub pose_if: Isometry3<T>,
    /// Averaged robust error of the pose.
    pub error: T,
    /// `(object_index, image_index)` pairs with a squared distance below the target error.
    pub correspondences: Vec<(usize, usize)>,
}

/// The single best result shared by all searches of one refinement call.
///
/// [`SharedBestPose::commit_if_better`] is the only writer. Committing raises the cancellation flag
/// before the lock is taken, so siblings may stop even when the commit is finally rejected.
pub struct SharedBestPose<'a, T: Real> {
    cancel: &'a AtomicBool,
    best: Mutex<Option<BestPose<T>>>,
}

impl<'a, T: Real> SharedBestPose<'a, T> {
    /// Create an empty result bound to the given cancellation flag.
    pub fn new(cancel: &'a AtomicBool) -> Self {
        Self {
            cancel,
            best: Mutex::new(None),
        }
    }

    /// The cancellation flag shared by all searches.
    pub fn cancel_flag(&self) -> &'a AtomicBool {
        self.cancel
    }

    /// Returns `true` once any search committed or the caller cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Error of the currently committed result, if any.
    pub fn best_error(&self) -> Option<T> {
        self.lock().as_ref().map(|best| best.error)
    }

    /// Stores the candidate if no result with an error lower or equal has been committed yet.
    ///
    /// Returns `true` if the candidate was stored.
    pub fn commit_if_better(
        &self,
        pose_if: Isometry3<T>,
        error: T,
        correspondences: Vec<(usize, usize)>,
    ) -> bool {
        self.cancel.store(true, Ordering::Release);

        let mut best = self.lock();
        if best.as_ref().is_some_and(|current| current.error <= error) {
            return false;
        }
        *best = Some(BestPose {
            pose_if,
            error,
            correspondences,
        });
        true
    }

    /// Consumes the arbiter and returns the committed result.
    pub fn into_inner(self) -> Option<BestPose<T>> {
        self.best
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock(&self) -> MutexGuard<'_, Option<BestPose<T>>> {
        // the guarded value is replaced atomically, a poisoned lock still holds a consistent result
        self.best
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kornia_pnp::nalgebra::Vector3;

    fn pose(x: f64) -> Isometry3<f64> {
        Isometry3::new(Vector3::new(x, 0.0, 5.0), Vector3::zeros())
    }

    #[test]
    fn test_commit_keeps_lowest_error() {
        let cancel = AtomicBool::new(false);
        let shared = SharedBestPose::new(&cancel);
        assert!(shared.best_error().is_none());

        assert!(shared.commit_if_better(pose(1.0), 2.0, vec![(0, 0)]));
        assert!(shared.is_cancelled());
        assert!(!shared.commit_if_better(pose(2.0), 3.0, vec![]));
        // ties are kept by the first committer
        assert!(!shared.commit_if_better(pose(3.0), 2.0, vec![]));
        assert!(shared.commit_if_better(pose(4.0), 1.0, vec![(1, 2)]));

        let best = shared.into_inner().unwrap();
        assert_eq!(best.error, 1.0);
        assert_eq!(best.pose_if, pose(4.0));
        assert_eq!(best.correspondences, vec![(1, 2)]);
    }

    #[test]
    fn test_rejected_commit_still_cancels() {
        let cancel = AtomicBool::new(false);
        let shared = SharedBestPose::new(&cancel);
        assert!(shared.commit_if_better(pose(0.0), 0.5, vec![]));
        cancel.store(false, Ordering::Release);

        assert!(!shared.commit_if_better(pose(1.0), 0.7, vec![]));
        assert!(cancel.load(Ordering::Acquire));
    }
}
