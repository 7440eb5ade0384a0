use super::AudioFormat;
use crate::error::AppError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Audio files on disk: one directory per episode holding `<index>.<ext>`
/// chunk files. Paths stored in the database are relative to `root`.
#[derive(Debug, Clone)]
pub struct AudioStore {
    root: PathBuf,
}

impl AudioStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn episode_dir(&self, episode_id: &str) -> PathBuf {
        self.root.join(episode_id)
    }

    pub fn ensure_episode_dir(&self, episode_id: &str) -> Result<PathBuf, AppError> {
        let dir = self.episode_dir(episode_id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Write one chunk's encoded audio, returning the episode-scoped relative path.
    pub fn write_chunk(
        &self,
        episode_id: &str,
        chunk_index: usize,
        format: AudioFormat,
        bytes: &[u8],
    ) -> Result<String, AppError> {
        let dir = self.ensure_episode_dir(episode_id)?;
        let filename = format!("{}.{}", chunk_index, format.extension());
        fs::write(dir.join(&filename), bytes)?;
        Ok(format!("{}/{}", episode_id, filename))
    }

    pub fn resolve(&self, relative_path: &str) -> PathBuf {
        self.root.join(relative_path)
    }

    /// Remove a single chunk file. A file that is already gone is not an error.
    pub fn delete_file(&self, relative_path: &str) -> Result<(), AppError> {
        ignore_missing(fs::remove_file(self.resolve(relative_path)))
    }

    pub fn delete_episode_audio(&self, episode_id: &str) -> Result<(), AppError> {
        ignore_missing(fs::remove_dir_all(self.episode_dir(episode_id)))
    }

    pub fn backup_dir(&self, undo_id: &str) -> PathBuf {
        self.root.join(format!(".backup_{}", undo_id))
    }

    /// Copy the episode's audio directory aside. Returns `None` when the
    /// episode has no audio yet.
    pub fn backup_episode_audio(
        &self,
        episode_id: &str,
        undo_id: &str,
    ) -> Result<Option<PathBuf>, AppError> {
        let source = self.episode_dir(episode_id);
        if !source.is_dir() {
            return Ok(None);
        }
        let backup = self.backup_dir(undo_id);
        copy_dir_all(&source, &backup)?;
        Ok(Some(backup))
    }

    /// Replace whatever audio the episode has with the backup, moving it into place.
    pub fn restore_backup(&self, episode_id: &str, backup: &Path) -> Result<(), AppError> {
        self.delete_episode_audio(episode_id)?;
        if backup.is_dir() {
            fs::rename(backup, self.episode_dir(episode_id))?;
        }
        Ok(())
    }

    pub fn remove_backup(&self, backup: &Path) -> Result<(), AppError> {
        ignore_missing(fs::remove_dir_all(backup))
    }

    /// Concatenate chunk files (in the given order) into `<episode>/full.<ext>`.
    pub fn merge_chunks(
        &self,
        episode_id: &str,
        relative_paths: &[String],
        format: AudioFormat,
    ) -> Result<PathBuf, AppError> {
        if relative_paths.is_empty() {
            return Err(AppError::NotFound(format!(
                "No ready chunks for episode {}",
                episode_id
            )));
        }
        let dir = self.ensure_episode_dir(episode_id)?;
        let target = dir.join(format!("full.{}", format.extension()));

        match format {
            AudioFormat::Wav => self.merge_wav(relative_paths, &target)?,
            AudioFormat::Pcm => {
                let mut merged = Vec::new();
                for relative in relative_paths {
                    merged.extend(fs::read(self.resolve(relative))?);
                }
                fs::write(&target, merged)?;
            }
            other => {
                return Err(AppError::InvalidConfig(format!(
                    "Cannot merge {} chunks; only wav and pcm are supported",
                    other
                )))
            }
        }

        log::info!(
            "Merged {} chunks for episode {} into {}",
            relative_paths.len(),
            episode_id,
            target.display()
        );
        Ok(target)
    }

    fn merge_wav(&self, relative_paths: &[String], target: &Path) -> Result<(), AppError> {
        let mut writer: Option<hound::WavWriter<io::BufWriter<fs::File>>> = None;
        let mut spec: Option<hound::WavSpec> = None;

        for relative in relative_paths {
            let mut reader = hound::WavReader::open(self.resolve(relative))?;
            let chunk_spec = reader.spec();
            match spec {
                None => {
                    spec = Some(chunk_spec);
                    writer = Some(hound::WavWriter::create(target, chunk_spec)?);
                }
                Some(first) if first != chunk_spec => {
                    return Err(AppError::Other(format!(
                        "Chunk {} has a different sample format than the first chunk",
                        relative
                    )));
                }
                Some(_) => {}
            }
            if let Some(w) = writer.as_mut() {
                for sample in reader.samples::<i16>() {
                    w.write_sample(sample?)?;
                }
            }
        }

        if let Some(w) = writer {
            w.finalize()?;
        }
        Ok(())
    }
}

fn ignore_missing(result: io::Result<()>) -> Result<(), AppError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn copy_dir_all(source: &Path, target: &Path) -> io::Result<()> {
    fs::create_dir_all(target)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let destination = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &destination)?;
        } else {
            fs::copy(entry.path(), destination)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioBuffer, AudioEncoder, WavEncoder};
    use tempfile::TempDir;

    fn setup_store() -> (AudioStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (AudioStore::new(dir.path()), dir)
    }

    #[test]
    fn test_write_chunk_returns_relative_path() {
        let (store, _dir) = setup_store();
        let path = store.write_chunk("ep1", 3, AudioFormat::Pcm, &[1, 2]).unwrap();
        assert_eq!(path, "ep1/3.pcm");
        assert_eq!(fs::read(store.resolve(&path)).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_delete_missing_is_ok() {
        let (store, _dir) = setup_store();
        store.delete_file("nope/0.wav").unwrap();
        store.delete_episode_audio("nope").unwrap();
    }

    #[test]
    fn test_backup_and_restore() {
        let (store, _dir) = setup_store();
        store.write_chunk("ep1", 0, AudioFormat::Pcm, b"old").unwrap();

        let backup = store.backup_episode_audio("ep1", "u1").unwrap().unwrap();
        store.delete_episode_audio("ep1").unwrap();
        store.write_chunk("ep1", 0, AudioFormat::Pcm, b"new").unwrap();

        store.restore_backup("ep1", &backup).unwrap();
        assert_eq!(fs::read(store.resolve("ep1/0.pcm")).unwrap(), b"old");
        assert!(!backup.exists());
    }

    #[test]
    fn test_backup_without_audio_is_none() {
        let (store, _dir) = setup_store();
        assert!(store.backup_episode_audio("ep1", "u1").unwrap().is_none());
    }

    #[test]
    fn test_merge_wav_chunks() {
        let (store, _dir) = setup_store();
        let a = WavEncoder
            .encode(&AudioBuffer::new(vec![0.1; 100], 8_000), AudioFormat::Wav)
            .unwrap();
        let b = WavEncoder
            .encode(&AudioBuffer::new(vec![0.2; 50], 8_000), AudioFormat::Wav)
            .unwrap();
        let paths = vec![
            store.write_chunk("ep1", 0, AudioFormat::Wav, &a).unwrap(),
            store.write_chunk("ep1", 1, AudioFormat::Wav, &b).unwrap(),
        ];

        let merged = store.merge_chunks("ep1", &paths, AudioFormat::Wav).unwrap();
        let reader = hound::WavReader::open(merged).unwrap();
        assert_eq!(reader.len(), 150);
    }

    #[test]
    fn test_merge_nothing_is_not_found() {
        let (store, _dir) = setup_store();
        let err = store.merge_chunks("ep1", &[], AudioFormat::Wav).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
