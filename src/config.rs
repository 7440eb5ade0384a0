//! Process-level configuration: defaults, then `config.yaml`, then `.env`
//! and environment overrides.

use crate::audio::AudioFormat;
use crate::database::EpisodeSettings;
use crate::error::AppError;
use crate::text::{BreathingIntensity, ChunkStrategy, CodeBlockRule, DEFAULT_MAX_CHARS};
use crate::worker::WorkerOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    pub data_dir: PathBuf,
    /// Defaults to `<data_dir>/studio.db`.
    pub db_path: Option<PathBuf>,
    /// Defaults to `<data_dir>/audio`.
    pub audio_dir: Option<PathBuf>,
    pub log_level: String,
    pub default_voice: String,
    pub default_output_format: AudioFormat,
    pub default_chunk_strategy: ChunkStrategy,
    pub default_max_chars: usize,
    pub default_breathing: BreathingIntensity,
    /// Re-enqueue episodes found stuck in `generating` at startup.
    pub requeue_recovered: bool,
    pub poll_interval_ms: u64,
    pub undo_release_timeout_secs: u64,
}

impl Default for StudioConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("narration-studio");
        Self {
            data_dir,
            db_path: None,
            audio_dir: None,
            log_level: "info".to_string(),
            default_voice: "alba".to_string(),
            default_output_format: AudioFormat::Wav,
            default_chunk_strategy: ChunkStrategy::Paragraph,
            default_max_chars: DEFAULT_MAX_CHARS,
            default_breathing: BreathingIntensity::Normal,
            requeue_recovered: false,
            poll_interval_ms: 1000,
            undo_release_timeout_secs: 30,
        }
    }
}

impl StudioConfig {
    /// Defaults, then `<project_dir>/config.yaml` if present, then
    /// `STUDIO_*` keys from `<project_dir>/.env`, then the process environment.
    pub fn load(project_dir: &Path) -> Result<Self, AppError> {
        let yaml_path = project_dir.join("config.yaml");
        let mut config = if yaml_path.exists() {
            let content = std::fs::read_to_string(&yaml_path)?;
            Self::from_yaml_str(&content)?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .or_else(|| load_env_value(project_dir, key))
        });

        log::info!(
            "Loaded configuration (data dir {})",
            config.data_dir.display()
        );
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, AppError> {
        serde_yaml::from_str(content)
            .map_err(|e| AppError::InvalidConfig(format!("config.yaml: {}", e)))
    }

    /// Apply `STUDIO_*` overrides from any key/value lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("STUDIO_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("STUDIO_DB_PATH") {
            self.db_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = lookup("STUDIO_AUDIO_DIR") {
            self.audio_dir = Some(PathBuf::from(dir));
        }
        if let Some(level) = lookup("STUDIO_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(voice) = lookup("STUDIO_DEFAULT_VOICE") {
            self.default_voice = voice;
        }
        if let Some(flag) = lookup("STUDIO_REQUEUE_RECOVERED") {
            match flag.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.requeue_recovered = true,
                "0" | "false" | "no" | "off" => self.requeue_recovered = false,
                other => log::warn!("Ignoring STUDIO_REQUEUE_RECOVERED={}", other),
            }
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("studio.db"))
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.audio_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("audio"))
    }

    pub fn default_episode_settings(&self) -> EpisodeSettings {
        EpisodeSettings {
            voice_id: self.default_voice.clone(),
            output_format: self.default_output_format,
            chunk_strategy: self.default_chunk_strategy,
            chunk_max_length: self.default_max_chars,
            code_block_rule: CodeBlockRule::Skip,
            breathing_intensity: self.default_breathing,
        }
    }

    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(10)),
            requeue_recovered: self.requeue_recovered,
        }
    }

    pub fn undo_release_timeout(&self) -> Duration {
        Duration::from_secs(self.undo_release_timeout_secs)
    }
}

/// Read a `KEY=value` line from `<project_dir>/.env`. Quotes are stripped and
/// empty values are treated as absent.
pub fn load_env_value(project_dir: &Path, key: &str) -> Option<String> {
    let content = std::fs::read_to_string(project_dir.join(".env")).ok()?;
    let prefix = format!("{}=", key);
    content.lines().find_map(|line| {
        let value = line
            .trim()
            .strip_prefix(&prefix)?
            .trim()
            .trim_matches('"')
            .trim_matches('\'');
        (!value.is_empty()).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = StudioConfig::default();
        assert_eq!(config.default_voice, "alba");
        assert_eq!(config.default_max_chars, 2000);
        assert!(!config.requeue_recovered);
        assert_eq!(config.db_path(), config.data_dir.join("studio.db"));
        assert_eq!(config.audio_dir(), config.data_dir.join("audio"));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = StudioConfig::from_yaml_str(
            "data_dir: /tmp/studio\ndefault_output_format: pcm\ndefault_chunk_strategy: max_chars\n",
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/studio"));
        assert_eq!(config.default_output_format, AudioFormat::Pcm);
        assert_eq!(config.default_chunk_strategy, ChunkStrategy::MaxChars);
        assert_eq!(config.default_voice, "alba");
    }

    #[test]
    fn test_bad_yaml_is_invalid_config() {
        let err = StudioConfig::from_yaml_str("default_max_chars: lots").unwrap_err();
        assert!(matches!(err, AppError::InvalidConfig(_)));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("STUDIO_DATA_DIR", "/srv/studio"),
            ("STUDIO_DEFAULT_VOICE", "marius"),
            ("STUDIO_REQUEUE_RECOVERED", "yes"),
        ]
        .into_iter()
        .collect();

        let mut config = StudioConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.db_path(), PathBuf::from("/srv/studio/studio.db"));
        assert_eq!(config.default_voice, "marius");
        assert!(config.requeue_recovered);
    }

    #[test]
    fn test_env_file_lookup() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "# local\nSTUDIO_DEFAULT_VOICE=\"jean\"\nSTUDIO_LOG_LEVEL=\n",
        )
        .unwrap();

        assert_eq!(
            load_env_value(dir.path(), "STUDIO_DEFAULT_VOICE"),
            Some("jean".to_string())
        );
        assert_eq!(load_env_value(dir.path(), "STUDIO_LOG_LEVEL"), None);
        assert_eq!(load_env_value(dir.path(), "MISSING"), None);
    }

    #[test]
    fn test_load_reads_yaml_from_project_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.yaml"), "poll_interval_ms: 250\n").unwrap();

        let config = StudioConfig::load(dir.path()).unwrap();
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.worker_options().poll_interval, Duration::from_millis(250));
    }
}
