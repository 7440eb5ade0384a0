pub mod models;


use crate::text::{TextChunk, WordTiming};
use anyhow::{anyhow, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub use models::*;

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

const EPISODE_COLUMNS: &str = "id, source_id, title, voice_id, output_format, chunk_strategy,
     chunk_max_length, code_block_rule, breathing_intensity, status, total_duration_secs,
     created_at, updated_at, folder_id";

const CHUNK_COLUMNS: &str = "id, episode_id, chunk_index, text, label, audio_path, duration_secs,
     status, error_message, word_timings";

const SOURCE_COLUMNS: &str = "id, title, source_type, original_filename, original_url, raw_text,
     cleaned_text, created_at, updated_at, folder_id";

const UNDO_COLUMNS: &str = "id, episode_id, backup_audio_dir, snapshot_json, created_at, expires_at";

const FOLDER_COLUMNS: &str = "id, name, parent_id, sort_order, created_at";

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // WAL so the worker's handle can write while requests read
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            PRAGMA temp_store=MEMORY;
        ",
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                source_type TEXT NOT NULL,
                original_filename TEXT,
                original_url TEXT,
                raw_text TEXT NOT NULL,
                cleaned_text TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS episodes (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                voice_id TEXT NOT NULL,
                output_format TEXT NOT NULL DEFAULT 'wav',
                chunk_strategy TEXT NOT NULL,
                chunk_max_length INTEGER NOT NULL,
                code_block_rule TEXT NOT NULL DEFAULT 'skip',
                breathing_intensity TEXT NOT NULL DEFAULT 'normal',
                status TEXT NOT NULL DEFAULT 'pending',
                total_duration_secs REAL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_episodes_status ON episodes(status);
            CREATE INDEX IF NOT EXISTS idx_episodes_source ON episodes(source_id);

            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                episode_id TEXT NOT NULL REFERENCES episodes(id) ON DELETE CASCADE,
                chunk_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                audio_path TEXT,
                duration_secs REAL,
                status TEXT NOT NULL DEFAULT 'pending',
                error_message TEXT,
                word_timings TEXT,
                UNIQUE(episode_id, chunk_index)
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_episode ON chunks(episode_id, chunk_index);

            CREATE TABLE IF NOT EXISTS playback_state (
                episode_id TEXT PRIMARY KEY REFERENCES episodes(id) ON DELETE CASCADE,
                current_chunk_index INTEGER NOT NULL DEFAULT 0,
                position_secs REAL NOT NULL DEFAULT 0.0,
                percent_listened REAL NOT NULL DEFAULT 0.0,
                last_played_at TEXT
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT
            );

            -- Regeneration backups, valid for a short grace period
            CREATE TABLE IF NOT EXISTS undo_buffer (
                id TEXT PRIMARY KEY,
                episode_id TEXT NOT NULL,
                backup_audio_dir TEXT,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_undo_expires ON undo_buffer(expires_at);

            CREATE TABLE IF NOT EXISTS folders (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                parent_id TEXT REFERENCES folders(id) ON DELETE CASCADE,
                sort_order INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tags (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS source_tags (
                source_id TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
                tag_id TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                PRIMARY KEY (source_id, tag_id)
            );

            CREATE TABLE IF NOT EXISTS episode_tags (
                episode_id TEXT NOT NULL REFERENCES episodes(id) ON DELETE CASCADE,
                tag_id TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                PRIMARY KEY (episode_id, tag_id)
            );

            INSERT OR IGNORE INTO settings (key, value) VALUES
                ('clean_remove_non_text', 'false'),
                ('clean_handle_tables', 'true'),
                ('clean_speak_urls', 'true'),
                ('clean_expand_abbreviations', 'true'),
                ('clean_preserve_parentheses', 'true'),
                ('code_block_rule', 'skip');
        "#,
        )?;

        // Migration: chunk labels from heading-aware chunking (idempotent)
        let _ = conn.execute("ALTER TABLE chunks ADD COLUMN label TEXT", []);

        // Migration: row snapshot so undo can restore chunks and settings (idempotent)
        let _ = conn.execute("ALTER TABLE undo_buffer ADD COLUMN snapshot_json TEXT", []);

        // Migration: library folders (idempotent)
        let _ = conn.execute(
            "ALTER TABLE sources ADD COLUMN folder_id TEXT REFERENCES folders(id) ON DELETE SET NULL",
            [],
        );
        let _ = conn.execute(
            "ALTER TABLE episodes ADD COLUMN folder_id TEXT REFERENCES folders(id) ON DELETE SET NULL",
            [],
        );
        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_sources_folder ON sources(folder_id);
             CREATE INDEX IF NOT EXISTS idx_episodes_folder ON episodes(folder_id);",
        )?;

        Ok(())
    }

    // =========================================================================
    // Sources
    // =========================================================================

    pub fn create_source(&self, source: &NewSource, cleaned_text: &str) -> Result<String> {
        let conn = self.conn()?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = timestamp(Utc::now());
        conn.execute(
            "INSERT INTO sources (id, title, source_type, original_filename, original_url,
                                  raw_text, cleaned_text, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                id,
                source.title,
                source.source_type,
                source.original_filename,
                source.original_url,
                source.raw_text,
                cleaned_text,
                now,
                now
            ],
        )?;
        Ok(id)
    }

    pub fn get_source(&self, id: &str) -> Result<Option<Source>> {
        let conn = self.conn()?;
        let source = conn
            .query_row(
                &format!("SELECT {} FROM sources WHERE id = ?", SOURCE_COLUMNS),
                params![id],
                source_from_row,
            )
            .optional()?;
        Ok(source)
    }

    /// Newest first. `filter.source_id` does not apply to sources.
    pub fn list_sources(&self, filter: &ListFilter) -> Result<Vec<Source>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sources s
             WHERE (?1 IS NULL OR s.folder_id = ?1)
               AND (?2 IS NULL OR EXISTS (
                    SELECT 1 FROM source_tags st JOIN tags t ON t.id = st.tag_id
                    WHERE st.source_id = s.id AND t.name = ?2))
             ORDER BY s.created_at DESC",
            SOURCE_COLUMNS
        ))?;
        let sources = stmt
            .query_map(params![filter.folder_id, filter.tag], source_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sources)
    }

    /// Set the given fields; returns false if the source does not exist.
    pub fn update_source(&self, id: &str, update: &SourceUpdate) -> Result<bool> {
        let conn = self.conn()?;
        let count = conn.execute(
            "UPDATE sources SET title = COALESCE(?, title),
                                cleaned_text = COALESCE(?, cleaned_text),
                                updated_at = ?
             WHERE id = ?",
            params![update.title, update.cleaned_text, timestamp(Utc::now()), id],
        )?;
        Ok(count > 0)
    }

    pub fn move_source(&self, id: &str, folder_id: Option<&str>) -> Result<bool> {
        let conn = self.conn()?;
        let count = conn.execute(
            "UPDATE sources SET folder_id = ?, updated_at = ? WHERE id = ?",
            params![folder_id, timestamp(Utc::now()), id],
        )?;
        Ok(count > 0)
    }

    pub fn update_cleaned_text(&self, id: &str, cleaned_text: &str) -> Result<bool> {
        let conn = self.conn()?;
        let count = conn.execute(
            "UPDATE sources SET cleaned_text = ?, updated_at = ? WHERE id = ?",
            params![cleaned_text, timestamp(Utc::now()), id],
        )?;
        Ok(count > 0)
    }

    /// Deletes the source; episodes, chunks and playback rows cascade.
    pub fn delete_source(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let count = conn.execute("DELETE FROM sources WHERE id = ?", params![id])?;
        Ok(count > 0)
    }

    pub fn episode_ids_for_source(&self, source_id: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM episodes WHERE source_id = ?")?;
        let ids = stmt
            .query_map(params![source_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    // =========================================================================
    // Episodes
    // =========================================================================

    /// Insert the episode, its chunks and a fresh playback row as one unit.
    pub fn create_episode_with_chunks(
        &self,
        source_id: &str,
        title: &str,
        settings: &EpisodeSettings,
        chunks: &[TextChunk],
    ) -> Result<String> {
        if chunks.is_empty() {
            return Err(anyhow!("episode needs at least one chunk"));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = timestamp(Utc::now());

        tx.execute(
            "INSERT INTO episodes (id, source_id, title, voice_id, output_format, chunk_strategy,
                                   chunk_max_length, code_block_rule, breathing_intensity,
                                   status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)",
            params![
                id,
                source_id,
                title,
                settings.voice_id,
                settings.output_format.as_str(),
                settings.chunk_strategy.as_str(),
                settings.chunk_max_length as i64,
                settings.code_block_rule.as_str(),
                settings.breathing_intensity.as_str(),
                now,
                now
            ],
        )?;
        insert_text_chunks(&tx, &id, chunks)?;
        tx.execute(
            "INSERT INTO playback_state (episode_id) VALUES (?)",
            params![id],
        )?;

        tx.commit()?;
        Ok(id)
    }

    pub fn get_episode(&self, id: &str) -> Result<Option<Episode>> {
        let conn = self.conn()?;
        let episode = conn
            .query_row(
                &format!("SELECT {} FROM episodes WHERE id = ?", EPISODE_COLUMNS),
                params![id],
                episode_from_row,
            )
            .optional()?;
        Ok(episode)
    }

    pub fn list_episodes(&self, filter: &ListFilter) -> Result<Vec<EpisodeSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT e.id, e.source_id, e.title, e.status, e.total_duration_secs,
                    COUNT(c.id),
                    COALESCE(SUM(CASE WHEN c.status = 'ready' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN c.status = 'error' THEN 1 ELSE 0 END), 0),
                    e.created_at, e.folder_id, COALESCE(p.percent_listened, 0.0)
             FROM episodes e
             LEFT JOIN chunks c ON c.episode_id = e.id
             LEFT JOIN playback_state p ON p.episode_id = e.id
             WHERE (?1 IS NULL OR e.source_id = ?1)
               AND (?2 IS NULL OR e.folder_id = ?2)
               AND (?3 IS NULL OR EXISTS (
                    SELECT 1 FROM episode_tags et JOIN tags t ON t.id = et.tag_id
                    WHERE et.episode_id = e.id AND t.name = ?3))
             GROUP BY e.id
             ORDER BY e.created_at DESC",
        )?;
        let episodes = stmt
            .query_map(params![filter.source_id, filter.folder_id, filter.tag], |row| {
                Ok(EpisodeSummary {
                    id: row.get(0)?,
                    source_id: row.get(1)?,
                    title: row.get(2)?,
                    status: row.get::<_, String>(3)?.into(),
                    total_duration_secs: row.get(4)?,
                    chunk_count: row.get(5)?,
                    ready_chunks: row.get(6)?,
                    error_chunks: row.get(7)?,
                    created_at: row.get(8)?,
                    folder_id: row.get(9)?,
                    percent_listened: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(episodes)
    }

    pub fn update_episode_title(&self, id: &str, title: &str) -> Result<bool> {
        let conn = self.conn()?;
        let count = conn.execute(
            "UPDATE episodes SET title = ?, updated_at = ? WHERE id = ?",
            params![title, timestamp(Utc::now()), id],
        )?;
        Ok(count > 0)
    }

    /// Move episodes into `folder_id` (or the library root). Returns how many existed.
    pub fn move_episodes(&self, ids: &[String], folder_id: Option<&str>) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = timestamp(Utc::now());
        let mut moved = 0;
        {
            let mut stmt =
                tx.prepare("UPDATE episodes SET folder_id = ?, updated_at = ? WHERE id = ?")?;
            for id in ids {
                moved += stmt.execute(params![folder_id, now, id])?;
            }
        }
        tx.commit()?;
        Ok(moved)
    }

    /// Ready episodes of a folder, oldest first.
    pub fn ready_episodes_in_folder(&self, folder_id: &str) -> Result<Vec<Episode>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM episodes WHERE folder_id = ? AND status = 'ready'
             ORDER BY created_at ASC",
            EPISODE_COLUMNS
        ))?;
        let episodes = stmt
            .query_map(params![folder_id], episode_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(episodes)
    }

    pub fn get_episode_status(&self, id: &str) -> Result<Option<GenerationStatus>> {
        let conn = self.conn()?;
        let status = conn
            .query_row(
                "SELECT status FROM episodes WHERE id = ?",
                params![id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(status.map(GenerationStatus::from))
    }

    pub fn set_episode_status(&self, id: &str, status: GenerationStatus) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE episodes SET status = ?, updated_at = ? WHERE id = ?",
            params![status.as_str(), timestamp(Utc::now()), id],
        )?;
        Ok(())
    }

    pub fn mark_episode_ready(&self, id: &str, total_duration_secs: f64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE episodes SET status = 'ready', total_duration_secs = ?, updated_at = ?
             WHERE id = ?",
            params![total_duration_secs, timestamp(Utc::now()), id],
        )?;
        Ok(())
    }

    /// Back to `pending` ahead of a re-enqueue. `clear_duration` drops the
    /// total when every chunk will be produced again.
    pub fn reset_episode_pending(&self, id: &str, clear_duration: bool) -> Result<()> {
        let conn = self.conn()?;
        let sql = if clear_duration {
            "UPDATE episodes SET status = 'pending', total_duration_secs = NULL, updated_at = ?
             WHERE id = ?"
        } else {
            "UPDATE episodes SET status = 'pending', updated_at = ? WHERE id = ?"
        };
        conn.execute(sql, params![timestamp(Utc::now()), id])?;
        Ok(())
    }

    /// Swap in a new chunk set and the settings that produced it.
    pub fn replace_chunks(
        &self,
        episode_id: &str,
        settings: &EpisodeSettings,
        chunks: &[TextChunk],
    ) -> Result<()> {
        if chunks.is_empty() {
            return Err(anyhow!("episode needs at least one chunk"));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM chunks WHERE episode_id = ?", params![episode_id])?;
        insert_text_chunks(&tx, episode_id, chunks)?;
        update_episode_settings(&tx, episode_id, settings, GenerationStatus::Pending, None)?;

        tx.commit()?;
        Ok(())
    }

    pub fn delete_episode(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let count = conn.execute("DELETE FROM episodes WHERE id = ?", params![id])?;
        Ok(count > 0)
    }

    pub fn count_episodes_by_status(&self) -> Result<StatusCounts> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM episodes GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, count) = row?;
            match GenerationStatus::from(status) {
                GenerationStatus::Pending => counts.pending += count,
                GenerationStatus::Generating => counts.generating += count,
                GenerationStatus::Ready => counts.ready += count,
                GenerationStatus::Error => counts.error += count,
            }
        }
        Ok(counts)
    }

    /// Reset episodes left in `generating` by a previous process, together
    /// with all of their chunks. Returns the recovered episode ids.
    pub fn reset_stuck_generating(&self) -> Result<Vec<String>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let ids: Vec<String> = {
            let mut stmt =
                tx.prepare("SELECT id FROM episodes WHERE status = 'generating' ORDER BY created_at")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let now = timestamp(Utc::now());
        for id in &ids {
            tx.execute(
                "UPDATE episodes SET status = 'pending', updated_at = ? WHERE id = ?",
                params![now, id],
            )?;
            tx.execute(
                "UPDATE chunks SET status = 'pending' WHERE episode_id = ?",
                params![id],
            )?;
        }

        tx.commit()?;
        if !ids.is_empty() {
            log::info!("Reset {} stuck generating episodes to pending", ids.len());
        }
        Ok(ids)
    }

    pub fn list_pending_episode_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM episodes WHERE status = 'pending' ORDER BY updated_at, created_at",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    // =========================================================================
    // Chunks
    // =========================================================================

    pub fn get_chunks(&self, episode_id: &str) -> Result<Vec<Chunk>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM chunks WHERE episode_id = ? ORDER BY chunk_index",
            CHUNK_COLUMNS
        ))?;
        let chunks = stmt
            .query_map(params![episode_id], chunk_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chunks)
    }

    pub fn get_chunk_by_index(&self, episode_id: &str, chunk_index: usize) -> Result<Option<Chunk>> {
        let conn = self.conn()?;
        let chunk = conn
            .query_row(
                &format!(
                    "SELECT {} FROM chunks WHERE episode_id = ? AND chunk_index = ?",
                    CHUNK_COLUMNS
                ),
                params![episode_id, chunk_index as i64],
                chunk_from_row,
            )
            .optional()?;
        Ok(chunk)
    }

    pub fn mark_chunk_generating(&self, chunk_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE chunks SET status = 'generating', error_message = NULL WHERE id = ?",
            params![chunk_id],
        )?;
        Ok(())
    }

    pub fn mark_chunk_ready(
        &self,
        chunk_id: &str,
        audio_path: &str,
        duration_secs: f64,
        word_timings: &[WordTiming],
    ) -> Result<()> {
        let conn = self.conn()?;
        let timings_json = serde_json::to_string(word_timings)?;
        conn.execute(
            "UPDATE chunks SET status = 'ready', audio_path = ?, duration_secs = ?,
                               word_timings = ?, error_message = NULL
             WHERE id = ?",
            params![audio_path, duration_secs, timings_json, chunk_id],
        )?;
        Ok(())
    }

    pub fn mark_chunk_error(&self, chunk_id: &str, message: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE chunks SET status = 'error', error_message = ? WHERE id = ?",
            params![message, chunk_id],
        )?;
        Ok(())
    }

    /// Clear a chunk's output so the worker produces it again.
    pub fn reset_chunk(&self, chunk_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE chunks SET status = 'pending', audio_path = NULL, duration_secs = NULL,
                               error_message = NULL, word_timings = NULL
             WHERE id = ?",
            params![chunk_id],
        )?;
        Ok(())
    }

    pub fn reset_all_chunks(&self, episode_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let count = conn.execute(
            "UPDATE chunks SET status = 'pending', audio_path = NULL, duration_secs = NULL,
                               error_message = NULL, word_timings = NULL
             WHERE episode_id = ?",
            params![episode_id],
        )?;
        Ok(count)
    }

    /// Reset every `error` chunk of the episode, returning the audio paths
    /// they still referenced so the caller can delete the files.
    pub fn reset_error_chunks(&self, episode_id: &str) -> Result<(usize, Vec<String>)> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let rows: Vec<(String, Option<String>)> = {
            let mut stmt = tx.prepare(
                "SELECT id, audio_path FROM chunks WHERE episode_id = ? AND status = 'error'",
            )?;
            let rows = stmt.query_map(params![episode_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        for (chunk_id, _) in &rows {
            tx.execute(
                "UPDATE chunks SET status = 'pending', audio_path = NULL, duration_secs = NULL,
                                   error_message = NULL, word_timings = NULL
                 WHERE id = ?",
                params![chunk_id],
            )?;
        }

        tx.commit()?;
        let count = rows.len();
        let paths = rows.into_iter().filter_map(|(_, path)| path).collect();
        Ok((count, paths))
    }

    pub fn sum_ready_durations(&self, episode_id: &str) -> Result<f64> {
        let conn = self.conn()?;
        let total: f64 = conn.query_row(
            "SELECT COALESCE(SUM(duration_secs), 0.0) FROM chunks
             WHERE episode_id = ? AND status = 'ready'",
            params![episode_id],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    pub fn ready_chunk_audio_paths(&self, episode_id: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT audio_path FROM chunks
             WHERE episode_id = ? AND status = 'ready' AND audio_path IS NOT NULL
             ORDER BY chunk_index",
        )?;
        let paths = stmt
            .query_map(params![episode_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(paths)
    }

    // =========================================================================
    // Settings
    // =========================================================================

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            "SELECT value FROM settings WHERE key = ?",
            params![key],
            |row| row.get(0),
        );
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?, ?, ?)",
            params![key, value, timestamp(Utc::now())],
        )?;
        Ok(())
    }

    pub fn get_all_settings(&self) -> Result<HashMap<String, String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut settings = HashMap::new();
        for row in rows {
            let (key, value) = row?;
            settings.insert(key, value);
        }
        Ok(settings)
    }

    // =========================================================================
    // Undo buffer
    // =========================================================================

    pub fn insert_undo_record(&self, record: &UndoRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO undo_buffer (id, episode_id, backup_audio_dir, snapshot_json, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                record.id,
                record.episode_id,
                record.backup_audio_dir,
                record.snapshot_json,
                timestamp(record.created_at),
                timestamp(record.expires_at)
            ],
        )?;
        Ok(())
    }

    /// The record, only while `now` is still inside its validity window.
    pub fn get_valid_undo(&self, id: &str, now: DateTime<Utc>) -> Result<Option<UndoRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM undo_buffer WHERE id = ? AND expires_at > ?",
                    UNDO_COLUMNS
                ),
                params![id, timestamp(now)],
                undo_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn delete_undo_record(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let count = conn.execute("DELETE FROM undo_buffer WHERE id = ?", params![id])?;
        Ok(count > 0)
    }

    /// Remove and return every record whose window has closed by `now`.
    pub fn take_expired_undo(&self, now: DateTime<Utc>) -> Result<Vec<UndoRecord>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let cutoff = timestamp(now);

        let records = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM undo_buffer WHERE expires_at <= ?",
                UNDO_COLUMNS
            ))?;
            let rows = stmt.query_map(params![cutoff], undo_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        tx.execute("DELETE FROM undo_buffer WHERE expires_at <= ?", params![cutoff])?;

        tx.commit()?;
        Ok(records)
    }

    /// Put back the episode settings and chunk rows captured before regeneration.
    pub fn restore_snapshot(&self, episode_id: &str, snapshot: &EpisodeSnapshot) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM chunks WHERE episode_id = ?", params![episode_id])?;
        for chunk in &snapshot.chunks {
            let timings = chunk
                .word_timings
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            tx.execute(
                "INSERT INTO chunks (id, episode_id, chunk_index, text, label, audio_path,
                                     duration_secs, status, error_message, word_timings)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    chunk.id,
                    episode_id,
                    chunk.chunk_index as i64,
                    chunk.text,
                    chunk.label,
                    chunk.audio_path,
                    chunk.duration_secs,
                    chunk.status.as_str(),
                    chunk.error_message,
                    timings
                ],
            )?;
        }
        update_episode_settings(
            &tx,
            episode_id,
            &snapshot.settings,
            snapshot.status,
            snapshot.total_duration_secs,
        )?;

        tx.commit()?;
        Ok(())
    }

    // =========================================================================
    // Playback
    // =========================================================================

    pub fn get_playback(&self, episode_id: &str) -> Result<Option<PlaybackState>> {
        let conn = self.conn()?;
        let state = conn
            .query_row(
                "SELECT episode_id, current_chunk_index, position_secs, percent_listened, last_played_at
                 FROM playback_state WHERE episode_id = ?",
                params![episode_id],
                |row| {
                    Ok(PlaybackState {
                        episode_id: row.get(0)?,
                        current_chunk_index: row.get(1)?,
                        position_secs: row.get(2)?,
                        percent_listened: row.get(3)?,
                        last_played_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    pub fn save_playback(&self, state: &PlaybackState) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO playback_state (episode_id, current_chunk_index, position_secs,
                                         percent_listened, last_played_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(episode_id) DO UPDATE SET
                current_chunk_index = excluded.current_chunk_index,
                position_secs = excluded.position_secs,
                percent_listened = excluded.percent_listened,
                last_played_at = excluded.last_played_at",
            params![
                state.episode_id,
                state.current_chunk_index,
                state.position_secs,
                state.percent_listened,
                state.last_played_at
            ],
        )?;
        Ok(())
    }

    // =========================================================================
    // Folders
    // =========================================================================

    pub fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
        sort_order: i64,
    ) -> Result<String> {
        let conn = self.conn()?;
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO folders (id, name, parent_id, sort_order, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![id, name, parent_id, sort_order, timestamp(Utc::now())],
        )?;
        Ok(id)
    }

    pub fn get_folder(&self, id: &str) -> Result<Option<Folder>> {
        let conn = self.conn()?;
        let folder = conn
            .query_row(
                &format!("SELECT {} FROM folders WHERE id = ?", FOLDER_COLUMNS),
                params![id],
                folder_from_row,
            )
            .optional()?;
        Ok(folder)
    }

    pub fn list_folders(&self) -> Result<Vec<Folder>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM folders ORDER BY sort_order, name",
            FOLDER_COLUMNS
        ))?;
        let folders = stmt
            .query_map([], folder_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(folders)
    }

    pub fn update_folder(&self, id: &str, update: &FolderUpdate) -> Result<bool> {
        let conn = self.conn()?;
        let (set_parent, parent_id) = match &update.parent_id {
            Some(parent) => (true, parent.as_deref()),
            None => (false, None),
        };
        let count = conn.execute(
            "UPDATE folders SET name = COALESCE(?1, name),
                                parent_id = CASE WHEN ?2 THEN ?3 ELSE parent_id END,
                                sort_order = COALESCE(?4, sort_order)
             WHERE id = ?5",
            params![update.name, set_parent, parent_id, update.sort_order, id],
        )?;
        Ok(count > 0)
    }

    pub fn reorder_folders(&self, orders: &[(String, i64)]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE folders SET sort_order = ? WHERE id = ?")?;
            for (id, sort_order) in orders {
                stmt.execute(params![sort_order, id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Episodes removed along with a folder: its own and those of its sources.
    pub fn episode_ids_for_folder(&self, folder_id: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM episodes
             WHERE folder_id = ?1
                OR source_id IN (SELECT id FROM sources WHERE folder_id = ?1)",
        )?;
        let ids = stmt
            .query_map(params![folder_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Delete a folder with the sources and episodes filed in it. Sub-folders
    /// move up to the library root.
    pub fn delete_folder(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM episodes WHERE folder_id = ?", params![id])?;
        tx.execute("DELETE FROM sources WHERE folder_id = ?", params![id])?;
        tx.execute("UPDATE folders SET parent_id = NULL WHERE parent_id = ?", params![id])?;
        let count = tx.execute("DELETE FROM folders WHERE id = ?", params![id])?;
        tx.commit()?;
        Ok(count > 0)
    }

    // =========================================================================
    // Tags
    // =========================================================================

    pub fn create_tag(&self, name: &str) -> Result<String> {
        let conn = self.conn()?;
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute("INSERT INTO tags (id, name) VALUES (?, ?)", params![id, name])?;
        Ok(id)
    }

    pub fn get_tag_by_name(&self, name: &str) -> Result<Option<Tag>> {
        let conn = self.conn()?;
        let tag = conn
            .query_row(
                "SELECT id, name FROM tags WHERE name = ?",
                params![name],
                tag_from_row,
            )
            .optional()?;
        Ok(tag)
    }

    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name FROM tags ORDER BY name")?;
        let tags = stmt
            .query_map([], tag_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    pub fn delete_tag(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let count = conn.execute("DELETE FROM tags WHERE id = ?", params![id])?;
        Ok(count > 0)
    }

    /// Replace every tag on a source.
    pub fn set_source_tags(&self, source_id: &str, tag_ids: &[String]) -> Result<()> {
        self.replace_tags("source_tags", "source_id", source_id, tag_ids)
    }

    /// Replace every tag on an episode.
    pub fn set_episode_tags(&self, episode_id: &str, tag_ids: &[String]) -> Result<()> {
        self.replace_tags("episode_tags", "episode_id", episode_id, tag_ids)
    }

    pub fn source_tags(&self, source_id: &str) -> Result<Vec<Tag>> {
        self.tags_of("source_tags", "source_id", source_id)
    }

    pub fn episode_tags(&self, episode_id: &str) -> Result<Vec<Tag>> {
        self.tags_of("episode_tags", "episode_id", episode_id)
    }

    fn replace_tags(
        &self,
        table: &str,
        owner_column: &str,
        owner_id: &str,
        tag_ids: &[String],
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            &format!("DELETE FROM {} WHERE {} = ?", table, owner_column),
            params![owner_id],
        )?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR IGNORE INTO {} ({}, tag_id) VALUES (?, ?)",
                table, owner_column
            ))?;
            for tag_id in tag_ids {
                stmt.execute(params![owner_id, tag_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn tags_of(&self, table: &str, owner_column: &str, owner_id: &str) -> Result<Vec<Tag>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT t.id, t.name FROM tags t JOIN {} x ON x.tag_id = t.id
             WHERE x.{} = ? ORDER BY t.name",
            table, owner_column
        ))?;
        let tags = stmt
            .query_map(params![owner_id], tag_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }
}

// =============================================================================
// Row helpers
// =============================================================================

/// Fixed-width UTC text so stored timestamps compare correctly as strings.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn insert_text_chunks(tx: &Transaction<'_>, episode_id: &str, chunks: &[TextChunk]) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO chunks (id, episode_id, chunk_index, text, label, status)
         VALUES (?, ?, ?, ?, ?, 'pending')",
    )?;
    for chunk in chunks {
        let label = if chunk.label.is_empty() {
            None
        } else {
            Some(chunk.label.as_str())
        };
        stmt.execute(params![
            uuid::Uuid::new_v4().to_string(),
            episode_id,
            chunk.index as i64,
            chunk.text,
            label
        ])?;
    }
    Ok(())
}

fn update_episode_settings(
    tx: &Transaction<'_>,
    episode_id: &str,
    settings: &EpisodeSettings,
    status: GenerationStatus,
    total_duration_secs: Option<f64>,
) -> Result<()> {
    tx.execute(
        "UPDATE episodes SET voice_id = ?, output_format = ?, chunk_strategy = ?,
                             chunk_max_length = ?, code_block_rule = ?, breathing_intensity = ?,
                             status = ?, total_duration_secs = ?, updated_at = ?
         WHERE id = ?",
        params![
            settings.voice_id,
            settings.output_format.as_str(),
            settings.chunk_strategy.as_str(),
            settings.chunk_max_length as i64,
            settings.code_block_rule.as_str(),
            settings.breathing_intensity.as_str(),
            status.as_str(),
            total_duration_secs,
            timestamp(Utc::now()),
            episode_id
        ],
    )?;
    Ok(())
}

fn source_from_row(row: &Row<'_>) -> rusqlite::Result<Source> {
    Ok(Source {
        id: row.get(0)?,
        title: row.get(1)?,
        source_type: row.get(2)?,
        original_filename: row.get(3)?,
        original_url: row.get(4)?,
        raw_text: row.get(5)?,
        cleaned_text: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        folder_id: row.get(9)?,
    })
}

fn episode_from_row(row: &Row<'_>) -> rusqlite::Result<Episode> {
    Ok(Episode {
        id: row.get(0)?,
        source_id: row.get(1)?,
        title: row.get(2)?,
        settings: EpisodeSettings {
            voice_id: row.get(3)?,
            output_format: row.get::<_, String>(4)?.into(),
            chunk_strategy: row.get::<_, String>(5)?.parse().unwrap_or_default(),
            chunk_max_length: row.get::<_, i64>(6)?.max(1) as usize,
            code_block_rule: row.get::<_, String>(7)?.into(),
            breathing_intensity: row.get::<_, String>(8)?.into(),
        },
        status: row.get::<_, String>(9)?.into(),
        total_duration_secs: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
        folder_id: row.get(13)?,
    })
}

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<Chunk> {
    let timings: Option<String> = row.get(9)?;
    Ok(Chunk {
        id: row.get(0)?,
        episode_id: row.get(1)?,
        chunk_index: row.get::<_, i64>(2)?.max(0) as usize,
        text: row.get(3)?,
        label: row.get(4)?,
        audio_path: row.get(5)?,
        duration_secs: row.get(6)?,
        status: row.get::<_, String>(7)?.into(),
        error_message: row.get(8)?,
        word_timings: timings.and_then(|json| serde_json::from_str(&json).ok()),
    })
}

fn undo_from_row(row: &Row<'_>) -> rusqlite::Result<UndoRecord> {
    Ok(UndoRecord {
        id: row.get(0)?,
        episode_id: row.get(1)?,
        backup_audio_dir: row.get(2)?,
        snapshot_json: row.get(3)?,
        created_at: parse_timestamp(&row.get::<_, String>(4)?),
        expires_at: parse_timestamp(&row.get::<_, String>(5)?),
    })
}

fn folder_from_row(row: &Row<'_>) -> rusqlite::Result<Folder> {
    Ok(Folder {
        id: row.get(0)?,
        name: row.get(1)?,
        parent_id: row.get(2)?,
        sort_order: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
    })
}
