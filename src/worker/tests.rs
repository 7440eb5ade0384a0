// Generation queue tests with a scripted in-memory synthesizer
// Run with: cargo test --package narration-studio --lib worker::tests

use super::*;
use crate::audio::{AudioBuffer, AudioFormat, WavEncoder};
use crate::database::{EpisodeSettings, NewSource, UndoRecord};
use crate::text::{BreathingIntensity, TextChunk};
use std::sync::Mutex as StdMutex;
use tempfile::TempDir;

const RATE: u32 = 1_000;

type Hook = Box<dyn Fn(&str) + Send + Sync>;

/// 100 samples per character; fails on any text containing "FAIL".
struct ScriptedSynth {
    calls: StdMutex<Vec<String>>,
    on_synthesize: Option<Hook>,
    delay: Duration,
}

impl ScriptedSynth {
    fn new() -> Self {
        Self {
            calls: StdMutex::new(Vec::new()),
            on_synthesize: None,
            delay: Duration::ZERO,
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Synthesizer for ScriptedSynth {
    fn sample_rate(&self) -> u32 {
        RATE
    }

    fn resolve_voice(&self, voice_id: &str) -> Result<VoiceState, AppError> {
        if voice_id == "broken" {
            return Err(AppError::Synthesis(format!("Voice not found: {}", voice_id)));
        }
        Ok(VoiceState::new(voice_id, ()))
    }

    fn synthesize(&self, _voice: &VoiceState, text: &str) -> Result<AudioBuffer, AppError> {
        self.calls.lock().unwrap().push(text.to_string());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if let Some(hook) = &self.on_synthesize {
            hook(text);
        }
        if text.contains("FAIL") {
            return Err(AppError::Synthesis("model rejected input".to_string()));
        }
        Ok(AudioBuffer::new(vec![0.1; text.chars().count() * 100], RATE))
    }
}

struct Fixture {
    db: Arc<Database>,
    store: AudioStore,
    db_path: std::path::PathBuf,
    _temp: TempDir,
}

fn setup() -> Fixture {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("studio.db");
    let db = Arc::new(Database::new(&db_path).unwrap());
    let store = AudioStore::new(temp.path().join("audio"));
    Fixture {
        db,
        store,
        db_path,
        _temp: temp,
    }
}

fn create_episode(db: &Database, texts: &[&str], voice: &str) -> String {
    let source_id = db
        .create_source(&NewSource::pasted("Notes", "raw"), "clean")
        .unwrap();
    let settings = EpisodeSettings {
        voice_id: voice.to_string(),
        output_format: AudioFormat::Wav,
        breathing_intensity: BreathingIntensity::None,
        ..Default::default()
    };
    let chunks: Vec<TextChunk> = texts
        .iter()
        .enumerate()
        .map(|(index, text)| TextChunk {
            index,
            text: text.to_string(),
            label: format!("Chunk {}", index + 1),
        })
        .collect();
    db.create_episode_with_chunks(&source_id, "Episode", &settings, &chunks)
        .unwrap()
}

fn worker_for(fx: &Fixture, synth: Arc<ScriptedSynth>, state: Arc<RwLock<WorkerState>>) -> GenerationWorker {
    GenerationWorker::new(
        fx.db.clone(),
        state,
        synth,
        Arc::new(WavEncoder),
        fx.store.clone(),
        Duration::from_millis(20),
        CancellationToken::new(),
    )
}

async fn wait_for_status(db: &Database, id: &str, status: GenerationStatus) -> bool {
    for _ in 0..250 {
        if db.get_episode_status(id).unwrap() == Some(status) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

// =========================================================================
// Episode protocol
// =========================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_chunk_is_isolated() {
    let fx = setup();
    let id = create_episode(&fx.db, &["alpha", "FAIL beta", "gamma"], "alba");
    let synth = Arc::new(ScriptedSynth::new());
    let worker = worker_for(&fx, synth.clone(), Arc::new(RwLock::new(WorkerState::default())));

    let outcome = worker.process_episode(&id).await.unwrap();
    assert_eq!(outcome, EpisodeOutcome::Completed);

    let chunks = fx.db.get_chunks(&id).unwrap();
    assert_eq!(chunks[0].status, GenerationStatus::Ready);
    assert_eq!(chunks[1].status, GenerationStatus::Error);
    assert!(!chunks[1].error_message.as_deref().unwrap_or("").is_empty());
    assert_eq!(chunks[2].status, GenerationStatus::Ready);

    let episode = fx.db.get_episode(&id).unwrap().unwrap();
    assert_eq!(episode.status, GenerationStatus::Ready);
    let expected = chunks[0].duration_secs.unwrap() + chunks[2].duration_secs.unwrap();
    assert!((episode.total_duration_secs.unwrap() - expected).abs() < 1e-9);
    assert!((expected - 1.0).abs() < 1e-9);

    assert_eq!(chunks[0].audio_path.as_deref(), Some(format!("{}/0.wav", id).as_str()));
    assert!(fx.store.resolve(&format!("{}/2.wav", id)).exists());
    assert!(!fx.store.resolve(&format!("{}/1.wav", id)).exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_between_chunks() {
    let fx = setup();
    let id = create_episode(&fx.db, &["alpha", "beta", "gamma"], "alba");
    let state = Arc::new(RwLock::new(WorkerState::default()));

    let hook_state = state.clone();
    let mut synth = ScriptedSynth::new();
    synth.on_synthesize = Some(Box::new(move |text| {
        if text == "alpha" {
            // Runs on the blocking pool, outside the async context
            hook_state.blocking_write().cancel_requested = true;
        }
    }));
    let synth = Arc::new(synth);
    let worker = worker_for(&fx, synth.clone(), state);

    let outcome = worker.process_episode(&id).await.unwrap();
    assert_eq!(outcome, EpisodeOutcome::Cancelled);

    let chunks = fx.db.get_chunks(&id).unwrap();
    assert_eq!(chunks[0].status, GenerationStatus::Ready);
    assert_eq!(chunks[1].status, GenerationStatus::Pending);
    assert_eq!(chunks[2].status, GenerationStatus::Pending);
    assert_eq!(fx.db.get_episode_status(&id).unwrap(), Some(GenerationStatus::Error));
    assert_eq!(synth.calls(), vec!["alpha".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ready_chunks_are_skipped() {
    let fx = setup();
    let id = create_episode(&fx.db, &["alpha", "beta"], "alba");
    let first = fx.db.get_chunk_by_index(&id, 0).unwrap().unwrap();
    fx.db.mark_chunk_ready(&first.id, "kept/0.wav", 4.0, &[]).unwrap();

    let synth = Arc::new(ScriptedSynth::new());
    let worker = worker_for(&fx, synth.clone(), Arc::new(RwLock::new(WorkerState::default())));
    worker.process_episode(&id).await.unwrap();

    assert_eq!(synth.calls(), vec!["beta".to_string()]);
    let episode = fx.db.get_episode(&id).unwrap().unwrap();
    assert!((episode.total_duration_secs.unwrap() - 4.4).abs() < 1e-9);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_voice_failure_marks_episode_error() {
    let fx = setup();
    let id = create_episode(&fx.db, &["alpha"], "broken");
    let synth = Arc::new(ScriptedSynth::new());
    let worker = worker_for(&fx, synth.clone(), Arc::new(RwLock::new(WorkerState::default())));

    worker.handle(id.clone()).await;

    assert_eq!(fx.db.get_episode_status(&id).unwrap(), Some(GenerationStatus::Error));
    assert_eq!(
        fx.db.get_chunks(&id).unwrap()[0].status,
        GenerationStatus::Pending
    );
    assert!(synth.calls().is_empty());
    assert!(!fx.store.episode_dir(&id).exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_breathing_applied_before_synthesis() {
    let fx = setup();
    let source_id = fx
        .db
        .create_source(&NewSource::pasted("Notes", "raw"), "clean")
        .unwrap();
    let chunks = vec![TextChunk {
        index: 0,
        text: "One. Two.".to_string(),
        label: String::new(),
    }];
    let id = fx
        .db
        .create_episode_with_chunks(&source_id, "Ep", &EpisodeSettings::default(), &chunks)
        .unwrap();

    let synth = Arc::new(ScriptedSynth::new());
    let worker = worker_for(&fx, synth.clone(), Arc::new(RwLock::new(WorkerState::default())));
    worker.process_episode(&id).await.unwrap();

    let spoken = crate::text::add_breathing("One. Two.", BreathingIntensity::Normal);
    assert_eq!(synth.calls(), vec![spoken]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_queued_cancel_is_skipped() {
    let fx = setup();
    let id = create_episode(&fx.db, &["alpha"], "alba");
    let state = Arc::new(RwLock::new(WorkerState::default()));
    {
        let mut ws = state.write().await;
        ws.queued.push_back(id.clone());
        ws.cancelled.insert(id.clone());
    }
    let synth = Arc::new(ScriptedSynth::new());
    let worker = worker_for(&fx, synth.clone(), state.clone());

    worker.handle(id.clone()).await;

    assert!(synth.calls().is_empty());
    let ws = state.read().await;
    assert!(ws.queued.is_empty());
    assert!(ws.cancelled.is_empty());
    assert_eq!(ws.processed_today, 0);
}

// =========================================================================
// Queue lifecycle
// =========================================================================

fn options() -> WorkerOptions {
    WorkerOptions {
        poll_interval: Duration::from_millis(20),
        requeue_recovered: false,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_enqueued_episode_is_generated() {
    let fx = setup();
    let id = create_episode(&fx.db, &["alpha", "beta"], "alba");
    let synth = Arc::new(ScriptedSynth::new());
    let queue = GenerationQueue::start(
        &fx.db_path,
        synth.clone(),
        Arc::new(WavEncoder),
        fx.store.clone(),
        options(),
    )
    .unwrap();

    queue.enqueue(&id).await;
    assert!(wait_for_status(&fx.db, &id, GenerationStatus::Ready).await);
    assert!(queue.wait_for_release(&id, Duration::from_secs(2)).await);
    assert_eq!(queue.queue_size().await, 0);
    assert_eq!(queue.state().read().await.processed_today, 1);

    queue.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_recovery_does_not_enqueue_by_default() {
    let fx = setup();
    let id = create_episode(&fx.db, &["alpha", "beta"], "alba");
    fx.db.set_episode_status(&id, GenerationStatus::Generating).unwrap();
    for chunk in fx.db.get_chunks(&id).unwrap() {
        fx.db.mark_chunk_generating(&chunk.id).unwrap();
    }

    let synth = Arc::new(ScriptedSynth::new());
    let queue = GenerationQueue::start(
        &fx.db_path,
        synth.clone(),
        Arc::new(WavEncoder),
        fx.store.clone(),
        options(),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(fx.db.get_episode_status(&id).unwrap(), Some(GenerationStatus::Pending));
    assert!(fx
        .db
        .get_chunks(&id)
        .unwrap()
        .iter()
        .all(|c| c.status == GenerationStatus::Pending));
    assert!(synth.calls().is_empty());
    assert_eq!(queue.queue_size().await, 0);

    queue.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_recovery_can_requeue() {
    let fx = setup();
    let id = create_episode(&fx.db, &["alpha"], "alba");
    fx.db.set_episode_status(&id, GenerationStatus::Generating).unwrap();

    let queue = GenerationQueue::start(
        &fx.db_path,
        Arc::new(ScriptedSynth::new()),
        Arc::new(WavEncoder),
        fx.store.clone(),
        WorkerOptions {
            requeue_recovered: true,
            ..options()
        },
    )
    .unwrap();

    assert!(wait_for_status(&fx.db, &id, GenerationStatus::Ready).await);
    queue.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_waiting_episode() {
    let fx = setup();
    let first = create_episode(&fx.db, &["alpha", "beta"], "alba");
    let second = create_episode(&fx.db, &["gamma"], "alba");

    let mut synth = ScriptedSynth::new();
    synth.delay = Duration::from_millis(100);
    let synth = Arc::new(synth);
    let queue = GenerationQueue::start(
        &fx.db_path,
        synth.clone(),
        Arc::new(WavEncoder),
        fx.store.clone(),
        options(),
    )
    .unwrap();

    queue.enqueue(&first).await;
    queue.enqueue(&second).await;
    assert_eq!(queue.cancel(&second).await, CancelOutcome::Dequeued);

    assert!(wait_for_status(&fx.db, &first, GenerationStatus::Ready).await);
    assert!(queue.wait_for_release(&first, Duration::from_secs(2)).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(queue.queue_size().await, 0);
    assert!(!synth.calls().contains(&"gamma".to_string()));
    assert_eq!(
        fx.db.get_episode_status(&second).unwrap(),
        Some(GenerationStatus::Pending)
    );
    assert_eq!(queue.cancel(&second).await, CancelOutcome::Idle);

    queue.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resume_withdraws_cancel() {
    let fx = setup();
    let first = create_episode(&fx.db, &["alpha", "beta"], "alba");
    let second = create_episode(&fx.db, &["gamma"], "alba");
    let idle = create_episode(&fx.db, &["delta"], "alba");

    let mut synth = ScriptedSynth::new();
    synth.delay = Duration::from_millis(100);
    let synth = Arc::new(synth);
    let queue = GenerationQueue::start(
        &fx.db_path,
        synth.clone(),
        Arc::new(WavEncoder),
        fx.store.clone(),
        options(),
    )
    .unwrap();

    queue.enqueue(&first).await;
    queue.enqueue(&second).await;
    assert_eq!(queue.cancel(&second).await, CancelOutcome::Dequeued);
    queue.resume(&second).await;
    {
        let state = queue.state();
        let ws = state.read().await;
        assert_eq!(ws.queued.iter().filter(|id| **id == second).count(), 1);
        assert!(ws.cancelled.is_empty());
    }

    // Not queued at all: goes to the back of the line.
    queue.resume(&idle).await;
    assert_eq!(queue.state().read().await.queued.back(), Some(&idle));

    assert!(wait_for_status(&fx.db, &second, GenerationStatus::Ready).await);
    assert!(wait_for_status(&fx.db, &idle, GenerationStatus::Ready).await);
    let calls = synth.calls();
    assert_eq!(calls.iter().filter(|c| c.as_str() == "gamma").count(), 1);
    assert_eq!(calls.last().map(String::as_str), Some("delta"));

    queue.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_mid_episode_leaves_rest_pending() {
    let fx = setup();
    let id = create_episode(&fx.db, &["alpha", "beta", "gamma"], "alba");

    let mut synth = ScriptedSynth::new();
    synth.delay = Duration::from_millis(300);
    let synth = Arc::new(synth);
    let queue = GenerationQueue::start(
        &fx.db_path,
        synth.clone(),
        Arc::new(WavEncoder),
        fx.store.clone(),
        options(),
    )
    .unwrap();

    queue.enqueue(&id).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    queue.shutdown().await;

    // The chunk in flight finishes; nothing after it starts.
    assert_eq!(synth.calls(), vec!["alpha".to_string()]);
    assert_eq!(fx.db.get_episode_status(&id).unwrap(), Some(GenerationStatus::Pending));
    let statuses: Vec<GenerationStatus> = fx
        .db
        .get_chunks(&id)
        .unwrap()
        .iter()
        .map(|c| c.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            GenerationStatus::Ready,
            GenerationStatus::Pending,
            GenerationStatus::Pending
        ]
    );
    assert!(fx.store.resolve(&format!("{}/0.wav", id)).exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_enqueue_after_shutdown_is_dropped() {
    let fx = setup();
    let id = create_episode(&fx.db, &["alpha"], "alba");
    let queue = GenerationQueue::start(
        &fx.db_path,
        Arc::new(ScriptedSynth::new()),
        Arc::new(WavEncoder),
        fx.store.clone(),
        options(),
    )
    .unwrap();

    queue.shutdown().await;
    queue.enqueue(&id).await;
    assert_eq!(queue.queue_size().await, 0);
}

// =========================================================================
// Undo sweep
// =========================================================================

#[tokio::test]
async fn test_sweep_removes_expired_backups() {
    let fx = setup();
    let id = create_episode(&fx.db, &["alpha"], "alba");
    fx.store
        .write_chunk(&id, 0, AudioFormat::Pcm, b"audio")
        .unwrap();

    let backup = fx.store.backup_episode_audio(&id, "u1").unwrap().unwrap();
    let created = Utc::now() - chrono::Duration::minutes(10);
    fx.db
        .insert_undo_record(&UndoRecord {
            id: "u1".to_string(),
            episode_id: id.clone(),
            backup_audio_dir: Some(backup.to_string_lossy().into_owned()),
            snapshot_json: None,
            created_at: created,
            expires_at: created + chrono::Duration::minutes(2),
        })
        .unwrap();

    assert_eq!(sweep_expired_undo(&fx.db, &fx.store, Utc::now()).unwrap(), 1);
    assert!(!backup.exists());
    assert!(fx.store.episode_dir(&id).exists());
    assert_eq!(sweep_expired_undo(&fx.db, &fx.store, Utc::now()).unwrap(), 0);
}
