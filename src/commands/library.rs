use super::release_episode;
use crate::database::{
    EpisodeSummary, Folder, FolderUpdate, GenerationStatus, ListFilter, Source, Tag,
};
use crate::error::AppError;
use crate::Studio;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Longest chunk text carried in a playlist entry.
const PLAYLIST_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Serialize)]
pub struct LibraryTree {
    pub folders: Vec<Folder>,
    pub sources: Vec<Source>,
    pub episodes: Vec<EpisodeSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFolder {
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaylistItem {
    pub episode_id: String,
    pub episode_title: String,
    pub chunk_index: usize,
    pub text: String,
    pub audio_path: Option<String>,
    pub duration_secs: Option<f64>,
    pub voice_id: String,
}

#[derive(Debug, Serialize)]
pub struct FolderPlaylist {
    pub folder_id: String,
    pub items: Vec<PlaylistItem>,
    pub total_episodes: usize,
}

// =============================================================================
// Folders
// =============================================================================

pub async fn get_folder(studio: &Studio, id: &str) -> Result<Folder, AppError> {
    studio
        .db
        .get_folder(id)?
        .ok_or_else(|| AppError::NotFound(format!("Folder {}", id)))
}

pub async fn create_folder(studio: &Studio, folder: NewFolder) -> Result<Folder, AppError> {
    let name = folder.name.trim();
    if name.is_empty() {
        return Err(AppError::InvalidConfig("Folder name cannot be empty".to_string()));
    }
    if let Some(parent_id) = &folder.parent_id {
        get_folder(studio, parent_id).await?;
    }

    let id = studio
        .db
        .create_folder(name, folder.parent_id.as_deref(), folder.sort_order)?;
    log::info!("Created folder {} ({})", id, name);
    get_folder(studio, &id).await
}

pub async fn list_folders(studio: &Studio) -> Result<Vec<Folder>, AppError> {
    Ok(studio.db.list_folders()?)
}

/// Rename, reparent or reorder a folder. A folder cannot be moved beneath
/// itself or one of its descendants.
pub async fn update_folder(
    studio: &Studio,
    id: &str,
    update: FolderUpdate,
) -> Result<Folder, AppError> {
    if update.is_empty() {
        return Err(AppError::InvalidConfig("No fields to update".to_string()));
    }
    if matches!(&update.name, Some(name) if name.trim().is_empty()) {
        return Err(AppError::InvalidConfig("Folder name cannot be empty".to_string()));
    }
    get_folder(studio, id).await?;

    if let Some(Some(parent_id)) = &update.parent_id {
        get_folder(studio, parent_id).await?;
        if creates_cycle(&studio.db.list_folders()?, id, parent_id) {
            return Err(AppError::InvalidConfig(
                "A folder cannot be moved inside itself".to_string(),
            ));
        }
    }

    studio.db.update_folder(id, &update)?;
    get_folder(studio, id).await
}

/// Whether `parent_id` is `id` or sits somewhere beneath it.
fn creates_cycle(folders: &[Folder], id: &str, parent_id: &str) -> bool {
    let mut seen = HashSet::new();
    let mut current = Some(parent_id.to_string());
    while let Some(folder_id) = current {
        if folder_id == id {
            return true;
        }
        if !seen.insert(folder_id.clone()) {
            return false;
        }
        current = folders
            .iter()
            .find(|f| f.id == folder_id)
            .and_then(|f| f.parent_id.clone());
    }
    false
}

/// Batch sort-order update; unknown ids are ignored.
pub async fn reorder_folders(studio: &Studio, orders: Vec<(String, i64)>) -> Result<(), AppError> {
    studio.db.reorder_folders(&orders)?;
    Ok(())
}

/// Delete a folder together with the sources and episodes filed in it and
/// their audio. Sub-folders move to the library root.
pub async fn delete_folder(studio: &Studio, id: &str) -> Result<usize, AppError> {
    get_folder(studio, id).await?;

    let episode_ids = studio.db.episode_ids_for_folder(id)?;
    for episode_id in &episode_ids {
        release_episode(studio, episode_id).await?;
        studio.audio.delete_episode_audio(episode_id)?;
    }

    studio.db.delete_folder(id)?;
    log::info!("Deleted folder {} with {} episodes", id, episode_ids.len());
    Ok(episode_ids.len())
}

/// Folders plus the sources and episodes matching `filter`
pub async fn library_tree(studio: &Studio, filter: ListFilter) -> Result<LibraryTree, AppError> {
    Ok(LibraryTree {
        folders: studio.db.list_folders()?,
        sources: studio.db.list_sources(&filter)?,
        episodes: studio.db.list_episodes(&filter)?,
    })
}

/// Every ready chunk of the folder's ready episodes, oldest episode first
pub async fn folder_playlist(studio: &Studio, folder_id: &str) -> Result<FolderPlaylist, AppError> {
    get_folder(studio, folder_id).await?;

    let episodes = studio.db.ready_episodes_in_folder(folder_id)?;
    if episodes.is_empty() {
        return Err(AppError::NotFound("No ready episodes in folder".to_string()));
    }

    let mut items = Vec::new();
    for episode in &episodes {
        for chunk in studio.db.get_chunks(&episode.id)? {
            if chunk.status != GenerationStatus::Ready {
                continue;
            }
            items.push(PlaylistItem {
                episode_id: episode.id.clone(),
                episode_title: episode.title.clone(),
                chunk_index: chunk.chunk_index,
                text: preview(&chunk.text),
                audio_path: chunk.audio_path,
                duration_secs: chunk.duration_secs,
                voice_id: episode.settings.voice_id.clone(),
            });
        }
    }

    Ok(FolderPlaylist {
        folder_id: folder_id.to_string(),
        items,
        total_episodes: episodes.len(),
    })
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PLAYLIST_PREVIEW_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(PLAYLIST_PREVIEW_CHARS).collect();
    format!("{}...", head)
}

// =============================================================================
// Tags
// =============================================================================

pub async fn create_tag(studio: &Studio, name: &str) -> Result<Tag, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::InvalidConfig("Tag name cannot be empty".to_string()));
    }
    if studio.db.get_tag_by_name(name)?.is_some() {
        return Err(AppError::InvalidConfig(format!("Tag \"{}\" already exists", name)));
    }

    let id = studio.db.create_tag(name)?;
    Ok(Tag {
        id,
        name: name.to_string(),
    })
}

pub async fn list_tags(studio: &Studio) -> Result<Vec<Tag>, AppError> {
    Ok(studio.db.list_tags()?)
}

pub async fn delete_tag(studio: &Studio, id: &str) -> Result<(), AppError> {
    if !studio.db.delete_tag(id)? {
        return Err(AppError::NotFound(format!("Tag {}", id)));
    }
    Ok(())
}

/// Replace a source's tags
pub async fn set_source_tags(
    studio: &Studio,
    source_id: &str,
    tag_ids: Vec<String>,
) -> Result<Vec<Tag>, AppError> {
    if studio.db.get_source(source_id)?.is_none() {
        return Err(AppError::NotFound(format!("Source {}", source_id)));
    }
    require_tags(studio, &tag_ids)?;
    studio.db.set_source_tags(source_id, &tag_ids)?;
    Ok(studio.db.source_tags(source_id)?)
}

/// Replace an episode's tags
pub async fn set_episode_tags(
    studio: &Studio,
    episode_id: &str,
    tag_ids: Vec<String>,
) -> Result<Vec<Tag>, AppError> {
    if studio.db.get_episode(episode_id)?.is_none() {
        return Err(AppError::NotFound(format!("Episode {}", episode_id)));
    }
    require_tags(studio, &tag_ids)?;
    studio.db.set_episode_tags(episode_id, &tag_ids)?;
    Ok(studio.db.episode_tags(episode_id)?)
}

fn require_tags(studio: &Studio, tag_ids: &[String]) -> Result<(), AppError> {
    let known: HashSet<String> = studio.db.list_tags()?.into_iter().map(|t| t.id).collect();
    match tag_ids.iter().find(|id| !known.contains(*id)) {
        Some(missing) => Err(AppError::NotFound(format!("Tag {}", missing))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(id: &str, parent_id: Option<&str>) -> Folder {
        Folder {
            id: id.to_string(),
            name: id.to_string(),
            parent_id: parent_id.map(str::to_string),
            sort_order: 0,
            created_at: String::new(),
        }
    }

    #[test]
    fn test_cycle_detection() {
        let folders = vec![folder("a", None), folder("b", Some("a")), folder("c", Some("b"))];
        assert!(creates_cycle(&folders, "a", "a"));
        assert!(creates_cycle(&folders, "a", "c"));
        assert!(!creates_cycle(&folders, "c", "a"));
        assert!(!creates_cycle(&folders, "b", "missing"));
    }

    #[test]
    fn test_preview_cuts_long_text() {
        assert_eq!(preview("short"), "short");
        let long = "é".repeat(PLAYLIST_PREVIEW_CHARS + 5);
        let cut = preview(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), PLAYLIST_PREVIEW_CHARS + 3);
    }
}
