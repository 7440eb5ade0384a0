//! Single-worker generation queue.
//!
//! Any number of callers enqueue episode ids; one background task takes them
//! in FIFO order and synthesizes each episode's chunks one after another.
//! Durable progress lives in the database, so status is observed by polling.

#[cfg(test)]
mod tests;

use crate::audio::{AudioEncoder, AudioStore};
use crate::database::{Chunk, Database, Episode, GenerationStatus};
use crate::error::AppError;
use crate::text::{add_breathing, estimate_timings};
use crate::tts::{Synthesizer, VoiceState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
const RELEASE_POLL: Duration = Duration::from_millis(50);

/// Where the worker is inside the current episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkProgress {
    pub chunk_index: usize,
    pub completed: usize,
    pub total: usize,
}

/// State shared between enqueueing callers and the worker.
#[derive(Debug, Clone)]
pub struct WorkerState {
    pub current_episode_id: Option<String>,
    pub progress: Option<ChunkProgress>,
    /// Mirror of the channel contents, in FIFO order.
    pub queued: VecDeque<String>,
    /// Queued episodes cancelled before the worker reached them.
    pub cancelled: HashSet<String>,
    /// Cooperative flag, checked between chunks.
    pub cancel_requested: bool,
    pub processed_today: i32,
    pub last_activity: Option<DateTime<Utc>>,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self {
            current_episode_id: None,
            progress: None,
            queued: VecDeque::new(),
            cancelled: HashSet::new(),
            cancel_requested: false,
            processed_today: 0,
            last_activity: Some(Utc::now()),
        }
    }
}

impl WorkerState {
    pub fn is_processing(&self) -> bool {
        self.current_episode_id.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub poll_interval: Duration,
    pub requeue_recovered: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            requeue_recovered: false,
        }
    }
}

/// How one episode run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeOutcome {
    Completed,
    NoChunks,
    Cancelled,
    /// Stopped by worker shutdown; the episode goes back to `pending`.
    Interrupted,
    Missing,
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The episode is being generated; the worker stops before its next chunk.
    Running,
    /// The episode was waiting in the queue and will be skipped.
    Dequeued,
    /// The worker is not holding or waiting on this episode.
    Idle,
}

pub struct GenerationWorker {
    db: Arc<Database>,
    state: Arc<RwLock<WorkerState>>,
    synthesizer: Arc<dyn Synthesizer>,
    encoder: Arc<dyn AudioEncoder>,
    store: AudioStore,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl GenerationWorker {
    pub fn new(
        db: Arc<Database>,
        state: Arc<RwLock<WorkerState>>,
        synthesizer: Arc<dyn Synthesizer>,
        encoder: Arc<dyn AudioEncoder>,
        store: AudioStore,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db,
            state,
            synthesizer,
            encoder,
            store,
            poll_interval,
            shutdown,
        }
    }

    /// Consume episode ids until shutdown or until every sender is gone.
    pub async fn run(&self, mut rx: mpsc::UnboundedReceiver<String>) {
        log::info!("Generation worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    log::info!("Shutdown requested, stopping generation worker");
                    break;
                }
                next = rx.recv() => {
                    match next {
                        Some(episode_id) => self.handle(episode_id).await,
                        None => {
                            log::info!("Generation queue closed");
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    // Idle tick
                    if let Err(e) = sweep_expired_undo(&self.db, &self.store, Utc::now()) {
                        log::warn!("Failed to sweep expired undo backups: {}", e);
                    }
                }
            }
        }

        log::info!("Generation worker stopped");
    }

    async fn handle(&self, episode_id: String) {
        {
            let mut ws = self.state.write().await;
            if let Some(pos) = ws.queued.iter().position(|id| *id == episode_id) {
                ws.queued.remove(pos);
            }
            let skip = ws.cancelled.contains(&episode_id);
            if !ws.queued.contains(&episode_id) {
                ws.cancelled.remove(&episode_id);
            }
            if skip {
                log::info!("Skipping episode {} (cancelled while queued)", episode_id);
                return;
            }
            ws.current_episode_id = Some(episode_id.clone());
            ws.progress = None;
            ws.cancel_requested = false;
        }

        let span = tracing::info_span!("generate", episode_id = %episode_id);
        let result = self.process_episode(&episode_id).instrument(span).await;

        match result {
            Ok(outcome) => log::debug!("Episode {} finished: {:?}", episode_id, outcome),
            Err(e) => {
                log::error!("Failed to process episode {}: {}", episode_id, e);
                if let Err(e) = self.db.set_episode_status(&episode_id, GenerationStatus::Error) {
                    log::error!("Failed to mark episode {} as error: {}", episode_id, e);
                }
            }
        }

        let mut ws = self.state.write().await;
        ws.current_episode_id = None;
        ws.progress = None;
        ws.processed_today += 1;
        ws.last_activity = Some(Utc::now());
    }

    /// Generate audio for every chunk of one episode, in index order.
    pub async fn process_episode(&self, episode_id: &str) -> Result<EpisodeOutcome, AppError> {
        let Some(episode) = self.db.get_episode(episode_id)? else {
            log::warn!("Episode {} no longer exists, skipping", episode_id);
            return Ok(EpisodeOutcome::Missing);
        };

        self.db.set_episode_status(episode_id, GenerationStatus::Generating)?;

        let chunks = self.db.get_chunks(episode_id)?;
        if chunks.is_empty() {
            log::warn!("No chunks found for episode {}", episode_id);
            self.db.set_episode_status(episode_id, GenerationStatus::Error)?;
            return Ok(EpisodeOutcome::NoChunks);
        }

        let settings = &episode.settings;
        log::info!("Starting generation: \"{}\"", episode.title);
        log::info!(
            "  Voice: {}, Format: {}, Breathing: {}",
            settings.voice_id,
            settings.output_format,
            settings.breathing_intensity
        );

        let voice = self.resolve_voice(&settings.voice_id).await?;
        self.store.ensure_episode_dir(episode_id)?;

        let total = chunks.len();
        let mut completed = 0;

        for chunk in &chunks {
            if self.shutdown.is_cancelled() {
                log::info!("Generation interrupted by shutdown for episode {}", episode_id);
                self.db.reset_episode_pending(episode_id, false)?;
                return Ok(EpisodeOutcome::Interrupted);
            }
            if self.state.read().await.cancel_requested {
                log::info!("Generation cancelled for episode {}", episode_id);
                self.db.set_episode_status(episode_id, GenerationStatus::Error)?;
                return Ok(EpisodeOutcome::Cancelled);
            }

            if chunk.status == GenerationStatus::Ready {
                completed += 1;
                continue;
            }

            self.state.write().await.progress = Some(ChunkProgress {
                chunk_index: chunk.chunk_index,
                completed,
                total,
            });
            self.generate_chunk(&episode, chunk, &voice, total).await?;
            completed += 1;
        }

        let total_duration = self.db.sum_ready_durations(episode_id)?;
        self.db.mark_episode_ready(episode_id, total_duration)?;
        log::info!(
            "Generation complete: \"{}\" - {} chunks, {:.1}s total audio",
            episode.title,
            total,
            total_duration
        );
        Ok(EpisodeOutcome::Completed)
    }

    async fn resolve_voice(&self, voice_id: &str) -> Result<VoiceState, AppError> {
        let synthesizer = self.synthesizer.clone();
        let voice_id = voice_id.to_string();
        tokio::task::spawn_blocking(move || synthesizer.resolve_voice(&voice_id))
            .await
            .map_err(|e| AppError::Synthesis(format!("voice task failed: {}", e)))?
    }

    /// One chunk. Synthesis or encoding failures are recorded on the chunk;
    /// only persistence failures propagate.
    async fn generate_chunk(
        &self,
        episode: &Episode,
        chunk: &Chunk,
        voice: &VoiceState,
        total: usize,
    ) -> Result<(), AppError> {
        let settings = &episode.settings;
        let position = chunk.chunk_index + 1;
        log::info!("Generating chunk {}/{}", position, total);

        self.db.mark_chunk_generating(&chunk.id)?;

        let spoken = add_breathing(&chunk.text, settings.breathing_intensity);
        let synthesizer = self.synthesizer.clone();
        let encoder = self.encoder.clone();
        let voice = voice.clone();
        let format = settings.output_format;
        let text = spoken.clone();

        let started = Instant::now();
        let produced = tokio::task::spawn_blocking(move || {
            let audio = synthesizer.synthesize(&voice, &text)?;
            let bytes = encoder.encode(&audio, format)?;
            Ok::<_, AppError>((audio.duration_secs(), bytes))
        })
        .await
        .map_err(|e| AppError::Synthesis(format!("synthesis task failed: {}", e)))
        .and_then(|r| r);

        let (duration, bytes) = match produced {
            Ok(output) => output,
            Err(e) => {
                log::error!("Chunk {}/{} failed: {}", position, total, e);
                self.db.mark_chunk_error(&chunk.id, &e.to_string())?;
                return Ok(());
            }
        };

        let audio_path = match self
            .store
            .write_chunk(&episode.id, chunk.chunk_index, format, &bytes)
        {
            Ok(path) => path,
            Err(e) => {
                log::error!("Chunk {}/{} could not be saved: {}", position, total, e);
                self.db.mark_chunk_error(&chunk.id, &e.to_string())?;
                return Ok(());
            }
        };

        let timings = estimate_timings(&spoken, duration);
        self.db
            .mark_chunk_ready(&chunk.id, &audio_path, duration, &timings)?;

        log::info!(
            "Chunk {}/{} done: {} chars in {:.1}s -> {:.1}s audio",
            position,
            total,
            spoken.chars().count(),
            started.elapsed().as_secs_f64(),
            duration
        );
        Ok(())
    }
}

/// Handle to the running worker. Exactly one per [`crate::Studio`].
pub struct GenerationQueue {
    state: Arc<RwLock<WorkerState>>,
    tx: mpsc::UnboundedSender<String>,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl GenerationQueue {
    /// Recover episodes stuck from a previous run, then spawn the worker on
    /// its own database handle. Must be called from within a Tokio runtime.
    pub fn start(
        db_path: &Path,
        synthesizer: Arc<dyn Synthesizer>,
        encoder: Arc<dyn AudioEncoder>,
        store: AudioStore,
        options: WorkerOptions,
    ) -> Result<Self, AppError> {
        let db = Arc::new(Database::new(db_path)?);
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let mut initial = WorkerState::default();

        let recovered = db.reset_stuck_generating()?;
        if !recovered.is_empty() {
            log::info!("Recovered {} episodes left generating", recovered.len());
            if options.requeue_recovered {
                for id in recovered {
                    log::info!("Re-enqueueing recovered episode {}", id);
                    initial.queued.push_back(id.clone());
                    let _ = tx.send(id);
                }
            }
        }

        let state = Arc::new(RwLock::new(initial));
        let shutdown = CancellationToken::new();
        let worker = GenerationWorker::new(
            db,
            state.clone(),
            synthesizer,
            encoder,
            store,
            options.poll_interval,
            shutdown.clone(),
        );
        let handle = tokio::spawn(async move {
            worker.run(rx).await;
        });

        Ok(Self {
            state,
            tx,
            shutdown,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn state(&self) -> Arc<RwLock<WorkerState>> {
        self.state.clone()
    }

    /// Append to the FIFO. Duplicates are not filtered.
    pub async fn enqueue(&self, episode_id: &str) {
        let mut ws = self.state.write().await;
        ws.cancelled.remove(episode_id);
        ws.queued.push_back(episode_id.to_string());
        if self.tx.send(episode_id.to_string()).is_err() {
            ws.queued.pop_back();
            log::warn!("Generation worker is stopped; episode {} not enqueued", episode_id);
            return;
        }
        log::info!("Episode {} enqueued for generation", episode_id);
    }

    /// Ask the worker to stop the current episode before its next chunk.
    pub async fn cancel_current(&self) {
        self.state.write().await.cancel_requested = true;
    }

    pub async fn cancel(&self, episode_id: &str) -> CancelOutcome {
        let mut ws = self.state.write().await;
        if ws.current_episode_id.as_deref() == Some(episode_id) {
            ws.cancel_requested = true;
            if ws.queued.iter().any(|id| id == episode_id) {
                ws.cancelled.insert(episode_id.to_string());
            }
            CancelOutcome::Running
        } else if ws.queued.iter().any(|id| id == episode_id) {
            ws.cancelled.insert(episode_id.to_string());
            CancelOutcome::Dequeued
        } else {
            CancelOutcome::Idle
        }
    }

    /// Withdraw a cancel. A queued episode keeps its place in line; one the
    /// worker has already let go of is enqueued again.
    pub async fn resume(&self, episode_id: &str) {
        {
            let mut ws = self.state.write().await;
            if ws.cancelled.remove(episode_id) && ws.queued.iter().any(|id| id == episode_id) {
                log::debug!("Episode {} keeps its place in the queue", episode_id);
                return;
            }
        }
        self.enqueue(episode_id).await;
    }

    pub async fn current_episode_id(&self) -> Option<String> {
        self.state.read().await.current_episode_id.clone()
    }

    pub async fn queue_size(&self) -> usize {
        self.state.read().await.queued.len()
    }

    /// Wait until the worker is no longer processing `episode_id`.
    /// Returns `false` if it still holds it after `timeout`.
    pub async fn wait_for_release(&self, episode_id: &str, timeout: Duration) -> bool {
        let started = Instant::now();
        loop {
            if self.state.read().await.current_episode_id.as_deref() != Some(episode_id) {
                return true;
            }
            if started.elapsed() >= timeout {
                return false;
            }
            tokio::time::sleep(RELEASE_POLL).await;
        }
    }

    /// Stop the worker. The current chunk finishes first; joining is bounded.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, handle).await.is_err() {
                log::warn!("Generation worker did not stop within {:?}", SHUTDOWN_JOIN_TIMEOUT);
            }
        }
    }
}

/// Delete expired undo records and their backup directories.
pub fn sweep_expired_undo(
    db: &Database,
    store: &AudioStore,
    now: DateTime<Utc>,
) -> Result<usize, AppError> {
    let expired = db.take_expired_undo(now)?;
    let mut removed = 0;
    for record in &expired {
        if let Some(dir) = &record.backup_audio_dir {
            match store.remove_backup(Path::new(dir)) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Failed to remove undo backup {}: {}", dir, e),
            }
        }
    }
    if !expired.is_empty() {
        log::info!(
            "Swept {} expired undo records ({} backups removed)",
            expired.len(),
            removed
        );
    }
    Ok(expired.len())
}
