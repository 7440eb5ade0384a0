use crate::database::{timestamp, StatusCounts};
use crate::error::AppError;
use crate::worker::ChunkProgress;
use crate::Studio;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct GenerationStatusResponse {
    pub current_episode_id: Option<String>,
    pub progress: Option<ChunkProgress>,
    pub queue_size: usize,
    /// Episode counts per persisted status.
    pub db_status: StatusCounts,
    pub processed_today: i32,
    pub last_activity: Option<String>,
}

/// Snapshot of the worker plus per-status episode counts
pub async fn generation_status(studio: &Studio) -> Result<GenerationStatusResponse, AppError> {
    let db_status = studio.db.count_episodes_by_status()?;
    let state = studio.queue.state();
    let ws = state.read().await;

    Ok(GenerationStatusResponse {
        current_episode_id: ws.current_episode_id.clone(),
        progress: ws.progress,
        queue_size: ws.queued.len(),
        db_status,
        processed_today: ws.processed_today,
        last_activity: ws.last_activity.map(timestamp),
    })
}

/// Enqueue every `pending` episode that is not already queued or running.
/// Returns how many were enqueued.
pub async fn requeue_pending(studio: &Studio) -> Result<usize, AppError> {
    let pending = studio.db.list_pending_episode_ids()?;
    let (queued, current) = {
        let state = studio.queue.state();
        let ws = state.read().await;
        (ws.queued.clone(), ws.current_episode_id.clone())
    };

    let mut count = 0;
    for id in pending {
        if queued.contains(&id) || current.as_deref() == Some(id.as_str()) {
            continue;
        }
        studio.queue.enqueue(&id).await;
        count += 1;
    }

    log::info!("Re-enqueued {} pending episodes", count);
    Ok(count)
}
