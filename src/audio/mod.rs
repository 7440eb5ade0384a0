//! Audio encoding collaborator and the on-disk layout of generated chunks.

pub mod store;

pub use store::AudioStore;

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::str::FromStr;

/// Output container for generated audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Wav,
    Pcm,
    Mp3,
    Opus,
    Aac,
    Flac,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Pcm => "pcm",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Opus => "opus",
            AudioFormat::Aac => "aac",
            AudioFormat::Flac => "flac",
        }
    }

    /// File extension used for chunk files, `<index>.<ext>`.
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Pcm => "audio/L16",
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Opus => "audio/opus",
            AudioFormat::Aac => "audio/aac",
            AudioFormat::Flac => "audio/flac",
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "wav" => Ok(AudioFormat::Wav),
            "pcm" => Ok(AudioFormat::Pcm),
            // Some clients send the MIME subtype for mp3
            "mp3" | "mpeg" => Ok(AudioFormat::Mp3),
            "opus" => Ok(AudioFormat::Opus),
            "aac" => Ok(AudioFormat::Aac),
            "flac" => Ok(AudioFormat::Flac),
            other => Err(AppError::InvalidConfig(format!("Unknown audio format: {}", other))),
        }
    }
}

/// Lenient conversion for values read back from the database.
impl From<String> for AudioFormat {
    fn from(s: String) -> Self {
        s.parse().unwrap_or_default()
    }
}

/// Mono float samples in `[-1.0, 1.0]` at a known rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// `encode(samples, sample_rate, format) -> bytes`.
pub trait AudioEncoder: Send + Sync {
    fn encode(&self, audio: &AudioBuffer, format: AudioFormat) -> Result<Vec<u8>, AppError>;
}

/// Built-in 16-bit mono encoder for `wav` and raw `pcm`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavEncoder;

impl AudioEncoder for WavEncoder {
    fn encode(&self, audio: &AudioBuffer, format: AudioFormat) -> Result<Vec<u8>, AppError> {
        match format {
            AudioFormat::Wav => encode_wav(&audio.samples, audio.sample_rate),
            AudioFormat::Pcm => Ok(samples_to_pcm_bytes(&audio.samples)),
            other => Err(AppError::InvalidConfig(format!(
                "{} output needs an external encoder; built-in encoder supports wav and pcm",
                other
            ))),
        }
    }
}

pub(crate) fn wav_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, AppError> {
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, wav_spec(sample_rate))?;
    for &sample in samples {
        writer.write_sample(sample_to_i16(sample))?;
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}

/// Float sample → signed 16-bit, saturating. NaN maps to silence.
pub(crate) fn sample_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Little-endian 16-bit PCM, no header.
pub fn samples_to_pcm_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }
    bytes
}

/// RIFF header for a mono 16-bit stream of unknown length.
pub fn streaming_wav_header(sample_rate: u32) -> Vec<u8> {
    let channels: u16 = 1;
    let bits_per_sample: u16 = 16;
    let block_align = channels * bits_per_sample / 8;
    let byte_rate = sample_rate * block_align as u32;
    let data_size: u32 = u32::MAX - 36;

    let mut header = Vec::with_capacity(44);
    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&(data_size + 36).to_le_bytes());
    header.extend_from_slice(b"WAVE");
    header.extend_from_slice(b"fmt ");
    header.extend_from_slice(&16u32.to_le_bytes());
    header.extend_from_slice(&1u16.to_le_bytes());
    header.extend_from_slice(&channels.to_le_bytes());
    header.extend_from_slice(&sample_rate.to_le_bytes());
    header.extend_from_slice(&byte_rate.to_le_bytes());
    header.extend_from_slice(&block_align.to_le_bytes());
    header.extend_from_slice(&bits_per_sample.to_le_bytes());
    header.extend_from_slice(b"data");
    header.extend_from_slice(&data_size.to_le_bytes());
    header
}
