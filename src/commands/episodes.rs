use super::{release_episode, resume_on_error};
use crate::database::{
    timestamp, Chunk, Episode, EpisodeDetail, EpisodeSettings, EpisodeSnapshot, EpisodeSummary,
    GenerationStatus, ListFilter, PlaybackState, SettingsOverride, UndoRecord,
};
use crate::error::AppError;
use crate::text::{chunk_text, TextChunk};
use crate::worker::{sweep_expired_undo, CancelOutcome};
use crate::Studio;
use chrono::{Duration, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// How long a destructive regeneration can be reverted.
pub const UNDO_WINDOW_SECS: i64 = 120;

#[derive(Debug, Serialize)]
pub struct CreatedEpisode {
    pub id: String,
    pub title: String,
    pub chunk_count: usize,
    pub status: GenerationStatus,
}

#[derive(Debug, Serialize)]
pub struct RegenerateResult {
    pub undo_id: String,
    pub chunk_count: usize,
    pub status: GenerationStatus,
}

fn chunk_or_reject(text: &str, settings: &EpisodeSettings) -> Result<Vec<TextChunk>, AppError> {
    let chunks = chunk_text(text, settings.chunk_strategy, settings.chunk_max_length);
    if chunks.is_empty() {
        return Err(AppError::InvalidConfig("Text produced no chunks".to_string()));
    }
    Ok(chunks)
}

fn require_episode(studio: &Studio, id: &str) -> Result<Episode, AppError> {
    studio
        .db
        .get_episode(id)?
        .ok_or_else(|| AppError::NotFound(format!("Episode {}", id)))
}

/// Chunk a source's cleaned text into a new episode and enqueue it
pub async fn create_episode(
    studio: &Studio,
    source_id: &str,
    title: Option<String>,
    settings: SettingsOverride,
) -> Result<CreatedEpisode, AppError> {
    let source = studio
        .db
        .get_source(source_id)?
        .ok_or_else(|| AppError::NotFound(format!("Source {}", source_id)))?;

    let settings = settings.apply_to(&studio.config.default_episode_settings());
    let chunks = chunk_or_reject(&source.cleaned_text, &settings)?;
    let title = title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| source.title.clone());

    let id = studio
        .db
        .create_episode_with_chunks(source_id, &title, &settings, &chunks)?;
    log::info!(
        "Created episode {} with {} chunks ({} strategy)",
        id,
        chunks.len(),
        settings.chunk_strategy
    );

    studio.queue.enqueue(&id).await;

    Ok(CreatedEpisode {
        id,
        title,
        chunk_count: chunks.len(),
        status: GenerationStatus::Pending,
    })
}

/// Episode with its chunks and listening position
pub async fn get_episode(studio: &Studio, id: &str) -> Result<EpisodeDetail, AppError> {
    let episode = require_episode(studio, id)?;
    let chunks = studio.db.get_chunks(id)?;
    let playback = studio
        .db
        .get_playback(id)?
        .unwrap_or_else(|| PlaybackState::start_of(id));

    Ok(EpisodeDetail {
        episode,
        chunks,
        playback,
    })
}

pub async fn list_episodes(
    studio: &Studio,
    filter: ListFilter,
) -> Result<Vec<EpisodeSummary>, AppError> {
    Ok(studio.db.list_episodes(&filter)?)
}

pub async fn update_episode(studio: &Studio, id: &str, title: &str) -> Result<Episode, AppError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::InvalidConfig("Title cannot be empty".to_string()));
    }
    if !studio.db.update_episode_title(id, title)? {
        return Err(AppError::NotFound(format!("Episode {}", id)));
    }
    require_episode(studio, id)
}

/// File one episode under `folder_id`, or back at the library root
pub async fn move_episode(
    studio: &Studio,
    id: &str,
    folder_id: Option<&str>,
) -> Result<Episode, AppError> {
    require_episode(studio, id)?;
    bulk_move_episodes(studio, &[id.to_string()], folder_id).await?;
    require_episode(studio, id)
}

/// Returns how many of `ids` existed and were moved.
pub async fn bulk_move_episodes(
    studio: &Studio,
    ids: &[String],
    folder_id: Option<&str>,
) -> Result<usize, AppError> {
    if ids.is_empty() {
        return Err(AppError::InvalidConfig("No episodes specified".to_string()));
    }
    if let Some(folder_id) = folder_id {
        super::library::get_folder(studio, folder_id).await?;
    }
    let moved = studio.db.move_episodes(ids, folder_id)?;
    log::info!("Moved {} episodes to {}", moved, folder_id.unwrap_or("library root"));
    Ok(moved)
}

/// Delete every episode in `ids` that exists. Returns how many were deleted.
pub async fn bulk_delete_episodes(studio: &Studio, ids: &[String]) -> Result<usize, AppError> {
    if ids.is_empty() {
        return Err(AppError::InvalidConfig("No episodes specified".to_string()));
    }

    let mut deleted = 0;
    for id in ids {
        if studio.db.get_episode(id)?.is_none() {
            log::debug!("Skipping missing episode {}", id);
            continue;
        }
        let released = release_episode(studio, id).await?;
        let result = remove_episode(studio, id);
        resume_on_error(studio, id, released, result).await?;
        deleted += 1;
    }
    log::info!("Deleted {} of {} episodes", deleted, ids.len());
    Ok(deleted)
}

/// Throw away all audio and synthesize every chunk again with the same settings
pub async fn regenerate_episode(studio: &Studio, id: &str) -> Result<(), AppError> {
    require_episode(studio, id)?;
    let released = release_episode(studio, id).await?;

    let result = reset_episode_audio(studio, id);
    let reset = resume_on_error(studio, id, released, result).await?;
    log::info!("Regenerating episode {} ({} chunks reset)", id, reset);

    studio.queue.enqueue(id).await;
    Ok(())
}

fn reset_episode_audio(studio: &Studio, id: &str) -> Result<usize, AppError> {
    studio.audio.delete_episode_audio(id)?;
    let reset = studio.db.reset_all_chunks(id)?;
    studio.db.reset_episode_pending(id, true)?;
    Ok(reset)
}

/// Re-chunk and regenerate with new settings. The previous audio and chunk
/// rows can be restored with [`super::undo::undo_regeneration`] for two minutes.
pub async fn regenerate_with_settings(
    studio: &Studio,
    id: &str,
    overrides: SettingsOverride,
) -> Result<RegenerateResult, AppError> {
    let now = Utc::now();
    if let Err(e) = sweep_expired_undo(&studio.db, &studio.audio, now) {
        log::warn!("Undo sweep failed: {}", e);
    }

    let episode = require_episode(studio, id)?;
    let source = studio
        .db
        .get_source(&episode.source_id)?
        .ok_or_else(|| AppError::NotFound(format!("Source {}", episode.source_id)))?;

    let settings = overrides.apply_to(&episode.settings);
    let chunks = chunk_or_reject(&source.cleaned_text, &settings)?;

    let released = release_episode(studio, id).await?;

    let result = replace_with_backup(studio, id, &settings, &chunks);
    let undo_id = resume_on_error(studio, id, released, result).await?;
    log::info!(
        "Regenerating episode {} with new settings ({} chunks, undo {})",
        id,
        chunks.len(),
        undo_id
    );

    studio.queue.enqueue(id).await;

    Ok(RegenerateResult {
        undo_id,
        chunk_count: chunks.len(),
        status: GenerationStatus::Pending,
    })
}

/// Back up the current audio and rows under a fresh undo record, then swap in
/// the new chunks. Returns the undo id.
fn replace_with_backup(
    studio: &Studio,
    id: &str,
    settings: &EpisodeSettings,
    chunks: &[TextChunk],
) -> Result<String, AppError> {
    let now = Utc::now();
    // Re-read after the worker has let go so the snapshot is final.
    let episode = require_episode(studio, id)?;
    let snapshot = EpisodeSnapshot {
        settings: episode.settings.clone(),
        status: episode.status,
        total_duration_secs: episode.total_duration_secs,
        chunks: studio.db.get_chunks(id)?,
    };

    let undo_id = uuid::Uuid::new_v4().to_string();
    let backup = studio.audio.backup_episode_audio(id, &undo_id)?;
    studio.db.insert_undo_record(&UndoRecord {
        id: undo_id.clone(),
        episode_id: id.to_string(),
        backup_audio_dir: backup.map(|p| p.to_string_lossy().into_owned()),
        snapshot_json: Some(serde_json::to_string(&snapshot)?),
        created_at: now,
        expires_at: now + Duration::seconds(UNDO_WINDOW_SECS),
    })?;

    studio.audio.delete_episode_audio(id)?;
    studio.db.replace_chunks(id, settings, chunks)?;
    Ok(undo_id)
}

/// Reset one chunk and re-enqueue; the worker skips chunks that are still ready
pub async fn regenerate_chunk(
    studio: &Studio,
    id: &str,
    chunk_index: usize,
) -> Result<(), AppError> {
    let chunk = studio
        .db
        .get_chunk_by_index(id, chunk_index)?
        .ok_or_else(|| AppError::NotFound(format!("Chunk {} of episode {}", chunk_index, id)))?;

    let released = release_episode(studio, id).await?;

    let result = reset_chunk_audio(studio, id, &chunk);
    resume_on_error(studio, id, released, result).await?;
    log::info!("Regenerating chunk {} of episode {}", chunk_index, id);

    studio.queue.enqueue(id).await;
    Ok(())
}

fn reset_chunk_audio(studio: &Studio, id: &str, chunk: &Chunk) -> Result<(), AppError> {
    if let Some(path) = &chunk.audio_path {
        studio.audio.delete_file(path)?;
    }
    studio.db.reset_chunk(&chunk.id)?;
    studio.db.reset_episode_pending(id, false)?;
    Ok(())
}

/// Reset every errored chunk and re-enqueue. Returns how many were reset;
/// nothing is enqueued when there were none.
pub async fn retry_errors(studio: &Studio, id: &str) -> Result<usize, AppError> {
    require_episode(studio, id)?;

    let (count, paths) = studio.db.reset_error_chunks(id)?;
    if count == 0 {
        return Ok(0);
    }
    for path in &paths {
        studio.audio.delete_file(path)?;
    }
    studio.db.reset_episode_pending(id, false)?;
    log::info!("Retrying {} error chunks of episode {}", count, id);

    studio.queue.enqueue(id).await;
    Ok(count)
}

/// Stop an episode. A running episode stops before its next chunk and the
/// worker marks it `error`; a queued one is marked `error` here.
pub async fn cancel_episode(studio: &Studio, id: &str) -> Result<CancelOutcome, AppError> {
    require_episode(studio, id)?;

    let outcome = studio.queue.cancel(id).await;
    match outcome {
        CancelOutcome::Running => log::info!("Cancel requested for running episode {}", id),
        CancelOutcome::Dequeued => {
            studio.db.set_episode_status(id, GenerationStatus::Error)?;
            log::info!("Cancelled queued episode {}", id);
        }
        CancelOutcome::Idle => log::debug!("Episode {} is not queued; nothing to cancel", id),
    }
    Ok(outcome)
}

pub async fn delete_episode(studio: &Studio, id: &str) -> Result<(), AppError> {
    require_episode(studio, id)?;
    let released = release_episode(studio, id).await?;

    let result = remove_episode(studio, id);
    resume_on_error(studio, id, released, result).await?;
    log::info!("Deleted episode {}", id);
    Ok(())
}

fn remove_episode(studio: &Studio, id: &str) -> Result<(), AppError> {
    studio.audio.delete_episode_audio(id)?;
    studio.db.delete_episode(id)?;
    Ok(())
}

pub async fn get_playback(studio: &Studio, id: &str) -> Result<PlaybackState, AppError> {
    require_episode(studio, id)?;
    Ok(studio
        .db
        .get_playback(id)?
        .unwrap_or_else(|| PlaybackState::start_of(id)))
}

pub async fn save_playback(studio: &Studio, mut state: PlaybackState) -> Result<(), AppError> {
    require_episode(studio, &state.episode_id)?;
    state.percent_listened = state.percent_listened.clamp(0.0, 100.0);
    if state.last_played_at.is_none() {
        state.last_played_at = Some(timestamp(Utc::now()));
    }
    studio.db.save_playback(&state)?;
    Ok(())
}

/// Merge every ready chunk file, in order, into `<episode>/full.<ext>`
pub async fn export_full_audio(studio: &Studio, id: &str) -> Result<PathBuf, AppError> {
    let episode = require_episode(studio, id)?;
    let paths = studio.db.ready_chunk_audio_paths(id)?;
    if paths.is_empty() {
        return Err(AppError::NotFound(format!("No ready chunks for episode {}", id)));
    }

    let merged = studio
        .audio
        .merge_chunks(id, &paths, episode.settings.output_format)?;
    log::info!("Exported {} chunks of episode {} to {}", paths.len(), id, merged.display());
    Ok(merged)
}
