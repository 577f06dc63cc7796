//! Random Model Variation refinement entry points.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use kornia_pnp::nalgebra::Isometry3;
use kornia_pnp::pose::standard_to_inverted_flipped;
use kornia_pnp::{Camera, RandomGenerator, Real};

use crate::arbitration::SharedBestPose;
use crate::correspondences::{Correspondences, PointGroup};
use crate::params::RmvParams;
use crate::search::PoseSearch;
use crate::types::{RmvError, RmvResult};
use crate::worker::Worker;

/// Refines an IF pose (`flippedCamera_T_world`) with a single Random Model Variation search.
///
/// The search uses a generator forked from `rng`. When the target error is reached the result is
/// committed and `cancel`, if given, is raised to stop sibling searches sharing the flag.
///
/// # Errors
///
/// [`RmvError::InvalidCorrespondences`] and [`RmvError::InvalidParameter`] for unusable input,
/// [`RmvError::TimedOut`] when the target is not reached within `params.timeout` and
/// [`RmvError::Cancelled`] when `cancel` is raised first.
pub fn optimize_pose_if<T, C, G>(
    camera: &C,
    initial_pose_if: &Isometry3<T>,
    correspondences: Correspondences<'_, T, G>,
    params: &RmvParams,
    rng: &mut RandomGenerator,
    cancel: Option<&AtomicBool>,
) -> Result<RmvResult<T>, RmvError>
where
    T: Real,
    C: Camera<T> + ?Sized,
    G: PointGroup,
{
    correspondences.validate()?;
    params.validate::<T>()?;

    let local_cancel = AtomicBool::new(false);
    let shared = SharedBestPose::new(cancel.unwrap_or(&local_cancel));

    search_and_commit(
        camera,
        initial_pose_if,
        correspondences,
        params,
        rng.fork(),
        params.timeout,
        &shared,
    )?;
    shared
        .into_inner()
        .map(RmvResult::from)
        .ok_or(RmvError::Superseded)
}

/// Refines a standard pose (`world_T_camera`); see [`optimize_pose_if`].
///
/// Use [`RmvResult::world_t_camera`] to obtain the refined pose in the standard convention.
pub fn optimize_pose<T, C, G>(
    camera: &C,
    world_t_camera: &Isometry3<T>,
    correspondences: Correspondences<'_, T, G>,
    params: &RmvParams,
    rng: &mut RandomGenerator,
    cancel: Option<&AtomicBool>,
) -> Result<RmvResult<T>, RmvError>
where
    T: Real,
    C: Camera<T> + ?Sized,
    G: PointGroup,
{
    optimize_pose_if(
        camera,
        &standard_to_inverted_flipped(world_t_camera),
        correspondences,
        params,
        rng,
        cancel,
    )
}

/// Refines several initial IF poses and returns the first one reaching the target error.
///
/// The poses are split evenly across the threads of `worker`, or searched on the calling thread when
/// no worker is given. Each pose receives `params.timeout / initial_poses_if.len()`. All searches share
/// one cancellation flag and one result.
pub fn optimize_poses_if<T, C, G>(
    camera: &C,
    initial_poses_if: &[Isometry3<T>],
    correspondences: Correspondences<'_, T, G>,
    params: &RmvParams,
    worker: Option<&Worker>,
    rng: &mut RandomGenerator,
    cancel: Option<&AtomicBool>,
) -> Result<RmvResult<T>, RmvError>
where
    T: Real,
    C: Camera<T> + ?Sized,
    G: PointGroup,
{
    if initial_poses_if.is_empty() {
        return Err(RmvError::NoInitialPose);
    }
    correspondences.validate()?;
    params.validate::<T>()?;

    let local_cancel = AtomicBool::new(false);
    let cancel = cancel.unwrap_or(&local_cancel);
    let shared = SharedBestPose::new(cancel);

    let divisor = u32::try_from(initial_poses_if.len()).unwrap_or(u32::MAX);
    let pose_timeout = params.timeout / divisor;
    let parent_rng = Mutex::new(rng.fork());
    let lowest_error = Mutex::new(f64::INFINITY);

    let search_partition = |first: usize, size: usize, abort: &AtomicBool| -> bool {
        let mut rng = lock(&parent_rng).fork();
        for pose_if in &initial_poses_if[first..first + size] {
            if abort.load(Ordering::Acquire) {
                return false;
            }
            match search_and_commit(
                camera,
                pose_if,
                correspondences,
                params,
                rng.fork(),
                pose_timeout,
                &shared,
            ) {
                Ok(()) => return true,
                Err(RmvError::TimedOut { best_error, .. }) => {
                    let mut lowest = lock(&lowest_error);
                    *lowest = f64::min(*lowest, best_error);
                }
                Err(_) => return false,
            }
        }
        false
    };

    let succeeded = match worker {
        Some(worker) => worker.execute_separable_and_abortable(
            search_partition,
            cancel,
            0,
            initial_poses_if.len(),
            1,
        ),
        None => search_partition(0, initial_poses_if.len(), cancel),
    };
    log::debug!(
        "RMV: {} initial poses, search succeeded: {succeeded}",
        initial_poses_if.len()
    );

    let best_error = *lock(&lowest_error);
    finish(shared, cancel, params.timeout, best_error)
}

/// Runs one independent search per worker thread from the same initial IF pose.
///
/// Every search gets its own generator and the full time budget; the first one reaching the target
/// error stops the others.
pub fn optimize_pose_parallel_if<T, C, G>(
    camera: &C,
    initial_pose_if: &Isometry3<T>,
    correspondences: Correspondences<'_, T, G>,
    params: &RmvParams,
    worker: &Worker,
    rng: &mut RandomGenerator,
    cancel: Option<&AtomicBool>,
) -> Result<RmvResult<T>, RmvError>
where
    T: Real,
    C: Camera<T> + ?Sized,
    G: PointGroup,
{
    correspondences.validate()?;
    params.validate::<T>()?;

    let local_cancel = AtomicBool::new(false);
    let cancel = cancel.unwrap_or(&local_cancel);
    let shared = SharedBestPose::new(cancel);
    let parent_rng = Mutex::new(rng.fork());
    let lowest_error = Mutex::new(f64::INFINITY);

    worker.execute_abortable(
        |_, _| {
            let rng = lock(&parent_rng).fork();
            match search_and_commit(
                camera,
                initial_pose_if,
                correspondences,
                params,
                rng,
                params.timeout,
                &shared,
            ) {
                Ok(()) => true,
                Err(RmvError::TimedOut { best_error, .. }) => {
                    let mut lowest = lock(&lowest_error);
                    *lowest = f64::min(*lowest, best_error);
                    false
                }
                Err(_) => false,
            }
        },
        cancel,
    );

    let best_error = *lock(&lowest_error);
    finish(shared, cancel, params.timeout, best_error)
}

/// Runs a search and commits its result once it reaches the target error.
fn search_and_commit<T, C, G>(
    camera: &C,
    initial_pose_if: &Isometry3<T>,
    correspondences: Correspondences<'_, T, G>,
    params: &RmvParams,
    rng: RandomGenerator,
    timeout: Duration,
    shared: &SharedBestPose<'_, T>,
) -> Result<(), RmvError>
where
    T: Real,
    C: Camera<T> + ?Sized,
    G: PointGroup,
{
    let mut search = PoseSearch::new(
        camera,
        initial_pose_if,
        correspondences,
        params,
        rng,
        Some(shared.cancel_flag()),
    )?;
    search.run(timeout)?;

    let result = search.into_result();
    if shared.commit_if_better(result.pose_if, result.error, result.correspondences) {
        Ok(())
    } else {
        log::debug!("RMV: result superseded by a concurrent search");
        Err(RmvError::Superseded)
    }
}

fn finish<T: Real>(
    shared: SharedBestPose<'_, T>,
    cancel: &AtomicBool,
    timeout: Duration,
    best_error: f64,
) -> Result<RmvResult<T>, RmvError> {
    match shared.into_inner() {
        Some(best) => Ok(best.into()),
        None if cancel.load(Ordering::Acquire) => Err(RmvError::Cancelled),
        None => Err(RmvError::TimedOut {
            timeout,
            best_error,
        }),
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
