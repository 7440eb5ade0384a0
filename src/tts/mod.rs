//! Speech synthesis collaborator contract.
//!
//! The model itself lives outside this crate. The generation worker only
//! needs: resolve a voice once per episode, then turn text into samples.
//! Calls are blocking and may be slow; callers run them off the async runtime.

use crate::audio::AudioBuffer;
use crate::error::AppError;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Opaque, reusable synthesis state for one voice.
#[derive(Clone)]
pub struct VoiceState {
    pub voice_id: String,
    state: Arc<dyn Any + Send + Sync>,
}

impl VoiceState {
    pub fn new<T: Any + Send + Sync>(voice_id: impl Into<String>, state: T) -> Self {
        Self {
            voice_id: voice_id.into(),
            state: Arc::new(state),
        }
    }

    /// Borrow the engine-specific state back out.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.state.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for VoiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceState")
            .field("voice_id", &self.voice_id)
            .finish_non_exhaustive()
    }
}

pub type SampleStream<'a> = Box<dyn Iterator<Item = Result<Vec<f32>, AppError>> + Send + 'a>;

pub trait Synthesizer: Send + Sync {
    fn sample_rate(&self) -> u32;

    fn resolve_voice(&self, voice_id: &str) -> Result<VoiceState, AppError>;

    fn synthesize(&self, voice: &VoiceState, text: &str) -> Result<AudioBuffer, AppError>;

    /// Lazily produced sample chunks. Engines without incremental output
    /// yield the whole utterance as one chunk.
    fn synthesize_stream<'a>(
        &'a self,
        voice: &'a VoiceState,
        text: &'a str,
    ) -> SampleStream<'a> {
        Box::new(std::iter::once_with(move || {
            self.synthesize(voice, text).map(|audio| audio.samples)
        }))
    }
}

/// Memoizes `resolve_voice` per voice id in front of another synthesizer.
pub struct CachedVoices<S> {
    inner: S,
    voices: Mutex<HashMap<String, VoiceState>>,
}

impl<S: Synthesizer> CachedVoices<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            voices: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached_count(&self) -> usize {
        self.voices.lock().map(|v| v.len()).unwrap_or(0)
    }
}

impl<S: Synthesizer> Synthesizer for CachedVoices<S> {
    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn resolve_voice(&self, voice_id: &str) -> Result<VoiceState, AppError> {
        if let Ok(voices) = self.voices.lock() {
            if let Some(state) = voices.get(voice_id) {
                return Ok(state.clone());
            }
        }

        let state = self.inner.resolve_voice(voice_id)?;
        if let Ok(mut voices) = self.voices.lock() {
            voices.insert(voice_id.to_string(), state.clone());
        }
        log::info!("Loaded voice '{}'", voice_id);
        Ok(state)
    }

    fn synthesize(&self, voice: &VoiceState, text: &str) -> Result<AudioBuffer, AppError> {
        self.inner.synthesize(voice, text)
    }

    fn synthesize_stream<'a>(
        &'a self,
        voice: &'a VoiceState,
        text: &'a str,
    ) -> SampleStream<'a> {
        self.inner.synthesize_stream(voice, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        resolves: AtomicUsize,
    }

    impl Synthesizer for Counting {
        fn sample_rate(&self) -> u32 {
            1_000
        }

        fn resolve_voice(&self, voice_id: &str) -> Result<VoiceState, AppError> {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            Ok(VoiceState::new(voice_id, 7u8))
        }

        fn synthesize(&self, _voice: &VoiceState, text: &str) -> Result<AudioBuffer, AppError> {
            Ok(AudioBuffer::new(vec![0.0; text.len()], 1_000))
        }
    }

    #[test]
    fn test_voice_state_downcasts() {
        let voice = VoiceState::new("alba", 42u32);
        assert_eq!(voice.downcast_ref::<u32>(), Some(&42));
        assert!(voice.downcast_ref::<String>().is_none());
    }

    #[test]
    fn test_default_stream_is_one_chunk() {
        let synth = Counting { resolves: AtomicUsize::new(0) };
        let voice = synth.resolve_voice("alba").unwrap();
        let chunks: Vec<_> = synth.synthesize_stream(&voice, "hello").collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap().len(), 5);
    }

    #[test]
    fn test_cached_voices_resolve_once() {
        let cached = CachedVoices::new(Counting { resolves: AtomicUsize::new(0) });
        cached.resolve_voice("alba").unwrap();
        cached.resolve_voice("alba").unwrap();
        cached.resolve_voice("marius").unwrap();
        assert_eq!(cached.inner.resolves.load(Ordering::SeqCst), 2);
        assert_eq!(cached.cached_count(), 2);
    }
}
