use crate::audio::{samples_to_pcm_bytes, streaming_wav_header, AudioFormat};
use crate::error::AppError;
use crate::text::{chunk_text, normalize, ChunkStrategy, CleaningOptions, TextChunk};
use crate::Studio;
use serde::Serialize;
use tokio::sync::mpsc;

/// Bounded so a slow reader applies backpressure to synthesis.
const STREAM_BUFFER: usize = 4;

#[derive(Debug, Serialize)]
pub struct ChunkPreview {
    pub chunks: Vec<TextChunk>,
    pub count: usize,
}

/// Live synthesis output. The first item is the WAV header when `format` is wav.
pub struct PreviewStream {
    pub format: AudioFormat,
    pub mime_type: &'static str,
    pub receiver: mpsc::Receiver<Result<Vec<u8>, AppError>>,
}

/// Normalize without saving
pub async fn preview_clean(
    text: &str,
    options: Option<CleaningOptions>,
) -> Result<String, AppError> {
    if text.trim().is_empty() {
        return Err(AppError::InvalidConfig("Provide text".to_string()));
    }
    Ok(normalize(text, &options.unwrap_or_default()))
}

/// Chunk without saving
pub async fn preview_chunks(
    text: &str,
    strategy: ChunkStrategy,
    max_chars: usize,
) -> Result<ChunkPreview, AppError> {
    if text.trim().is_empty() {
        return Err(AppError::InvalidConfig("Provide text".to_string()));
    }
    let chunks = chunk_text(text, strategy, max_chars);
    let count = chunks.len();
    Ok(ChunkPreview { chunks, count })
}

/// Synthesize `text` and hand out 16-bit PCM as the engine produces it.
///
/// Only wav and pcm can be streamed; other formats fall back to raw pcm.
/// Voice errors are returned here, synthesis errors arrive on the receiver.
/// Runs beside the generation worker, not through its queue.
pub async fn stream_preview(
    studio: &Studio,
    voice_id: &str,
    text: &str,
    format: AudioFormat,
) -> Result<PreviewStream, AppError> {
    if text.trim().is_empty() {
        return Err(AppError::InvalidConfig("Provide text".to_string()));
    }

    let format = match format {
        AudioFormat::Wav | AudioFormat::Pcm => format,
        other => {
            log::warn!("Streaming format '{}' is not supported; falling back to pcm", other);
            AudioFormat::Pcm
        }
    };

    let synthesizer = studio.synthesizer.clone();
    let voice = {
        let synthesizer = synthesizer.clone();
        let voice_id = voice_id.to_string();
        tokio::task::spawn_blocking(move || synthesizer.resolve_voice(&voice_id))
            .await
            .map_err(|e| AppError::Other(format!("Voice task failed: {}", e)))??
    };

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let text = text.to_string();
    tokio::task::spawn_blocking(move || {
        if format == AudioFormat::Wav
            && tx
                .blocking_send(Ok(streaming_wav_header(synthesizer.sample_rate())))
                .is_err()
        {
            return;
        }

        let mut sent = 0usize;
        for samples in synthesizer.synthesize_stream(&voice, &text) {
            let item = samples.map(|s| samples_to_pcm_bytes(&s));
            let failed = item.is_err();
            if tx.blocking_send(item).is_err() {
                log::debug!("Preview reader went away after {} chunks", sent);
                return;
            }
            if failed {
                return;
            }
            sent += 1;
        }
        log::info!("Streamed preview of {} chars in {} chunks", text.len(), sent);
    });

    Ok(PreviewStream {
        format,
        mime_type: format.mime_type(),
        receiver: rx,
    })
}
