pub mod episodes;
pub mod library;
pub mod preview;
pub mod queue;
pub mod settings;
pub mod sources;
pub mod undo;


use crate::error::AppError;
use crate::worker::CancelOutcome;
use crate::Studio;

/// Stop the worker from touching `episode_id` before its rows or files are
/// rewritten. Waits up to the configured release timeout.
pub(crate) async fn release_episode(
    studio: &Studio,
    episode_id: &str,
) -> Result<CancelOutcome, AppError> {
    let outcome = studio.queue.cancel(episode_id).await;
    if outcome == CancelOutcome::Running {
        log::info!("Waiting for worker to release episode {}", episode_id);
        let timeout = studio.config.undo_release_timeout();
        if !studio.queue.wait_for_release(episode_id, timeout).await {
            return Err(AppError::Other(format!(
                "Episode {} is still generating after {:?}",
                episode_id, timeout
            )));
        }
    }
    Ok(outcome)
}

/// Hand an episode back to the queue when a rewrite that followed
/// [`release_episode`] fails part way, so it is not left without an owner.
pub(crate) async fn resume_on_error<T>(
    studio: &Studio,
    episode_id: &str,
    released: CancelOutcome,
    result: Result<T, AppError>,
) -> Result<T, AppError> {
    if let Err(e) = &result {
        if released != CancelOutcome::Idle {
            log::warn!(
                "Rewrite of episode {} failed, returning it to the queue: {}",
                episode_id,
                e
            );
            studio.queue.resume(episode_id).await;
        }
    }
    result
}
