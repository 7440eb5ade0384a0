use super::{release_episode, resume_on_error};
use crate::database::{EpisodeSnapshot, GenerationStatus, UndoRecord};
use crate::error::AppError;
use crate::Studio;
use chrono::Utc;
use std::path::Path;

/// Revert a regeneration while its undo window is open. Restores the audio
/// directory and the chunk rows and settings captured beforehand, then
/// consumes the record.
pub async fn undo_regeneration(studio: &Studio, undo_id: &str) -> Result<(), AppError> {
    let record = studio
        .db
        .get_valid_undo(undo_id, Utc::now())?
        .ok_or_else(|| AppError::NotFound("Undo expired or not found".to_string()))?;
    let episode_id = record.episode_id.clone();

    let released = release_episode(studio, &episode_id).await?;

    let result = restore_record(studio, &record);
    let requeue = resume_on_error(studio, &episode_id, released, result).await?;
    log::info!("Undid regeneration {} of episode {}", undo_id, episode_id);

    if requeue {
        studio.queue.enqueue(&episode_id).await;
    }
    Ok(())
}

/// Consume the record and put the backed-up audio and rows back. Returns whether the restored
/// episode still needs generating.
fn restore_record(studio: &Studio, record: &UndoRecord) -> Result<bool, AppError> {
    // Consume before touching files; a racing second undo gets NotFound.
    if !studio.db.delete_undo_record(&record.id)? {
        return Err(AppError::NotFound("Undo expired or not found".to_string()));
    }

    let episode_id = &record.episode_id;
    match &record.backup_audio_dir {
        Some(dir) => studio.audio.restore_backup(episode_id, Path::new(dir))?,
        None => studio.audio.delete_episode_audio(episode_id)?,
    }

    let Some(json) = &record.snapshot_json else {
        return Ok(false);
    };
    let mut snapshot: EpisodeSnapshot = serde_json::from_str(json)?;
    // Nothing owns the episode any more.
    if snapshot.status == GenerationStatus::Generating {
        snapshot.status = GenerationStatus::Pending;
    }
    for chunk in &mut snapshot.chunks {
        if chunk.status == GenerationStatus::Generating {
            chunk.status = GenerationStatus::Pending;
        }
    }
    studio.db.restore_snapshot(episode_id, &snapshot)?;
    Ok(snapshot.status == GenerationStatus::Pending)
}
