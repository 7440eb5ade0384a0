use crate::audio::AudioFormat;
use crate::text::{BreathingIntensity, ChunkStrategy, CodeBlockRule, WordTiming, DEFAULT_MAX_CHARS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle shared by episodes and chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Pending,
    Generating,
    Ready,
    Error,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }
}

impl Default for GenerationStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for GenerationStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => Self::Pending,
            "generating" => Self::Generating,
            "ready" => Self::Ready,
            "error" => Self::Error,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub title: String,
    pub source_type: String,
    pub original_filename: Option<String>,
    pub original_url: Option<String>,
    pub raw_text: String,
    pub cleaned_text: String,
    pub created_at: String,
    pub updated_at: String,
    pub folder_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSource {
    pub title: String,
    #[serde(default = "default_source_type")]
    pub source_type: String,
    #[serde(default)]
    pub original_filename: Option<String>,
    #[serde(default)]
    pub original_url: Option<String>,
    pub raw_text: String,
}

fn default_source_type() -> String {
    "paste".to_string()
}

impl NewSource {
    pub fn pasted(title: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            source_type: default_source_type(),
            original_filename: None,
            original_url: None,
            raw_text: raw_text.into(),
        }
    }
}

/// Everything that decides how an episode is chunked and voiced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSettings {
    pub voice_id: String,
    pub output_format: AudioFormat,
    pub chunk_strategy: ChunkStrategy,
    pub chunk_max_length: usize,
    pub code_block_rule: CodeBlockRule,
    pub breathing_intensity: BreathingIntensity,
}

impl Default for EpisodeSettings {
    fn default() -> Self {
        Self {
            voice_id: "alba".to_string(),
            output_format: AudioFormat::Wav,
            chunk_strategy: ChunkStrategy::Paragraph,
            chunk_max_length: DEFAULT_MAX_CHARS,
            code_block_rule: CodeBlockRule::Skip,
            breathing_intensity: BreathingIntensity::Normal,
        }
    }
}

/// Partial settings for regeneration; unset fields keep the episode's value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsOverride {
    pub voice_id: Option<String>,
    pub output_format: Option<AudioFormat>,
    pub chunk_strategy: Option<ChunkStrategy>,
    pub chunk_max_length: Option<usize>,
    pub code_block_rule: Option<CodeBlockRule>,
    pub breathing_intensity: Option<BreathingIntensity>,
}

impl SettingsOverride {
    pub fn apply_to(&self, base: &EpisodeSettings) -> EpisodeSettings {
        EpisodeSettings {
            voice_id: self.voice_id.clone().unwrap_or_else(|| base.voice_id.clone()),
            output_format: self.output_format.unwrap_or(base.output_format),
            chunk_strategy: self.chunk_strategy.unwrap_or(base.chunk_strategy),
            chunk_max_length: self.chunk_max_length.unwrap_or(base.chunk_max_length),
            code_block_rule: self.code_block_rule.unwrap_or(base.code_block_rule),
            breathing_intensity: self.breathing_intensity.unwrap_or(base.breathing_intensity),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub source_id: String,
    pub title: String,
    #[serde(flatten)]
    pub settings: EpisodeSettings,
    pub status: GenerationStatus,
    pub total_duration_secs: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
    pub folder_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub id: String,
    pub source_id: String,
    pub title: String,
    pub status: GenerationStatus,
    pub total_duration_secs: Option<f64>,
    pub chunk_count: i64,
    pub ready_chunks: i64,
    pub error_chunks: i64,
    pub created_at: String,
    pub folder_id: Option<String>,
    pub percent_listened: f64,
}

/// Narrows library listings. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListFilter {
    pub source_id: Option<String>,
    pub folder_id: Option<String>,
    pub tag: Option<String>,
}

impl ListFilter {
    pub fn source(source_id: impl Into<String>) -> Self {
        Self {
            source_id: Some(source_id.into()),
            ..Default::default()
        }
    }

    pub fn folder(folder_id: impl Into<String>) -> Self {
        Self {
            folder_id: Some(folder_id.into()),
            ..Default::default()
        }
    }

    pub fn tag(name: impl Into<String>) -> Self {
        Self {
            tag: Some(name.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceUpdate {
    pub title: Option<String>,
    pub cleaned_text: Option<String>,
}

impl SourceUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.cleaned_text.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub sort_order: i64,
    pub created_at: String,
}

/// Partial folder edit. `parent_id: Some(None)` moves the folder to the root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderUpdate {
    pub name: Option<String>,
    #[serde(deserialize_with = "double_option")]
    pub parent_id: Option<Option<String>>,
    pub sort_order: Option<i64>,
}

impl FolderUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.parent_id.is_none() && self.sort_order.is_none()
    }
}

/// Distinguishes an explicit `null` from a missing field.
fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub episode_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub label: Option<String>,
    pub audio_path: Option<String>,
    pub duration_secs: Option<f64>,
    pub status: GenerationStatus,
    pub error_message: Option<String>,
    pub word_timings: Option<Vec<WordTiming>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub episode_id: String,
    pub current_chunk_index: i64,
    pub position_secs: f64,
    pub percent_listened: f64,
    pub last_played_at: Option<String>,
}

impl PlaybackState {
    pub fn start_of(episode_id: &str) -> Self {
        Self {
            episode_id: episode_id.to_string(),
            current_chunk_index: 0,
            position_secs: 0.0,
            percent_listened: 0.0,
            last_played_at: None,
        }
    }
}

/// Episode with its ordered chunks and listening position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeDetail {
    #[serde(flatten)]
    pub episode: Episode,
    pub chunks: Vec<Chunk>,
    pub playback: PlaybackState,
}

/// Row state captured before a destructive regeneration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeSnapshot {
    pub settings: EpisodeSettings,
    pub status: GenerationStatus,
    pub total_duration_secs: Option<f64>,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoRecord {
    pub id: String,
    pub episode_id: String,
    /// `None` when the episode had no audio to back up.
    pub backup_audio_dir: Option<String>,
    pub snapshot_json: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UndoRecord {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub generating: i64,
    pub ready: i64,
    pub error: i64,
}

impl StatusCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.generating + self.ready + self.error
    }
}
