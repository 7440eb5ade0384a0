pub mod audio;
pub mod commands;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod text;
pub mod tts;
pub mod worker;

use audio::{AudioEncoder, AudioStore};
use config::StudioConfig;
use database::Database;
use error::AppError;
use std::sync::Arc;
use tts::Synthesizer;
use worker::GenerationQueue;

/// Everything an episode-level operation needs: storage, the audio store and
/// the single generation queue.
pub struct Studio {
    pub config: StudioConfig,
    pub db: Arc<Database>,
    pub audio: AudioStore,
    pub queue: GenerationQueue,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl Studio {
    /// Create the data directories, open the database and start the worker.
    /// Must be called from within a Tokio runtime.
    pub fn open(
        config: StudioConfig,
        synthesizer: Arc<dyn Synthesizer>,
        encoder: Arc<dyn AudioEncoder>,
    ) -> Result<Self, AppError> {
        let db_path = config.db_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let audio_dir = config.audio_dir();
        std::fs::create_dir_all(&audio_dir)?;

        let db = Arc::new(Database::new(&db_path)?);
        let audio = AudioStore::new(audio_dir);
        let queue = GenerationQueue::start(
            &db_path,
            synthesizer.clone(),
            encoder,
            audio.clone(),
            config.worker_options(),
        )?;

        log::info!("Studio opened at {}", config.data_dir.display());
        Ok(Self {
            config,
            db,
            audio,
            queue,
            synthesizer,
        })
    }

    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
        log::info!("Studio shut down");
    }
}
