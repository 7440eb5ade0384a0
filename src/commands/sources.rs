use super::release_episode;
use crate::database::{ListFilter, NewSource, Source, SourceUpdate};
use crate::error::AppError;
use crate::text::{extract_title, normalize, CleaningOptions};
use crate::Studio;

/// Options given by the caller, else the persisted `clean_*` settings.
fn resolve_options(
    studio: &Studio,
    options: Option<CleaningOptions>,
) -> Result<CleaningOptions, AppError> {
    match options {
        Some(options) => Ok(options),
        None => Ok(CleaningOptions::from_settings(&studio.db.get_all_settings()?)),
    }
}

/// Store raw text and its normalized form. A blank title is taken from the
/// text's first heading or line.
pub async fn create_source(
    studio: &Studio,
    mut source: NewSource,
    options: Option<CleaningOptions>,
) -> Result<Source, AppError> {
    if source.raw_text.trim().is_empty() {
        return Err(AppError::InvalidConfig("Source text is empty".to_string()));
    }
    if source.title.trim().is_empty() {
        let fallback = source.original_filename.as_deref().unwrap_or("Pasted Text");
        source.title = extract_title(&source.raw_text, fallback);
    }

    let options = resolve_options(studio, options)?;
    let cleaned = normalize(&source.raw_text, &options);
    let id = studio.db.create_source(&source, &cleaned)?;
    log::info!(
        "Created source {} ({} chars raw, {} chars cleaned)",
        id,
        source.raw_text.len(),
        cleaned.len()
    );

    get_source(studio, &id).await
}

pub async fn get_source(studio: &Studio, id: &str) -> Result<Source, AppError> {
    studio
        .db
        .get_source(id)?
        .ok_or_else(|| AppError::NotFound(format!("Source {}", id)))
}

pub async fn list_sources(studio: &Studio, filter: ListFilter) -> Result<Vec<Source>, AppError> {
    Ok(studio.db.list_sources(&filter)?)
}

/// Edit the title or the cleaned text directly. Episodes keep their chunks.
pub async fn update_source(
    studio: &Studio,
    id: &str,
    update: SourceUpdate,
) -> Result<Source, AppError> {
    if update.is_empty() {
        return Err(AppError::InvalidConfig("No fields to update".to_string()));
    }
    if matches!(&update.title, Some(title) if title.trim().is_empty()) {
        return Err(AppError::InvalidConfig("Title cannot be empty".to_string()));
    }
    if !studio.db.update_source(id, &update)? {
        return Err(AppError::NotFound(format!("Source {}", id)));
    }
    get_source(studio, id).await
}

/// File a source under `folder_id`, or back at the library root
pub async fn move_source(
    studio: &Studio,
    id: &str,
    folder_id: Option<&str>,
) -> Result<Source, AppError> {
    if let Some(folder_id) = folder_id {
        super::library::get_folder(studio, folder_id).await?;
    }
    if !studio.db.move_source(id, folder_id)? {
        return Err(AppError::NotFound(format!("Source {}", id)));
    }
    get_source(studio, id).await
}

/// Re-normalize the stored raw text. Existing episodes keep their chunks.
pub async fn re_clean_source(
    studio: &Studio,
    id: &str,
    options: Option<CleaningOptions>,
) -> Result<Source, AppError> {
    let source = get_source(studio, id).await?;
    let options = resolve_options(studio, options)?;
    let cleaned = normalize(&source.raw_text, &options);
    studio.db.update_cleaned_text(id, &cleaned)?;
    log::info!("Re-cleaned source {}", id);
    get_source(studio, id).await
}

/// Delete a source, its episodes and all of their audio
pub async fn delete_source(studio: &Studio, id: &str) -> Result<(), AppError> {
    if studio.db.get_source(id)?.is_none() {
        return Err(AppError::NotFound(format!("Source {}", id)));
    }

    for episode_id in studio.db.episode_ids_for_source(id)? {
        release_episode(studio, &episode_id).await?;
        studio.audio.delete_episode_audio(&episode_id)?;
    }

    studio.db.delete_source(id)?;
    log::info!("Deleted source {}", id);
    Ok(())
}
