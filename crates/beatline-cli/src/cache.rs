//! Optional analysis cache: one SQLite connection in WAL mode
//! (`rusqlite` with the `bundled` feature) backing a single key/value
//! table, per §6's persistence contract.

use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection};

/// Best-effort SQLite-backed cache of analysis JSON, keyed per §6:
/// `lower(name_without_extension) + "_" + size + "_" + floor(duration)`.
/// Reads never block planning on failure; a cache miss or error is
/// treated identically by callers.
pub struct AnalysisCache {
    conn: Connection,
}

impl AnalysisCache {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let cache = Self { conn };
        cache.create_table()?;
        Ok(cache)
    }

    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let cache = Self { conn };
        cache.create_table()?;
        Ok(cache)
    }

    fn create_table(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_cache (
                key TEXT PRIMARY KEY,
                analysis_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
    }

    /// Upsert-on-conflict write, per §6.
    pub fn put(&self, key: &str, analysis_json: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            r#"
            INSERT INTO analysis_cache (key, analysis_json, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                analysis_json = excluded.analysis_json,
                updated_at = excluded.updated_at
            "#,
            params![key, analysis_json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Best-effort read. Any SQLite error is logged and treated as a
    /// miss, never propagated to the caller.
    pub fn get(&self, key: &str) -> Option<String> {
        match self.conn.query_row(
            "SELECT analysis_json FROM analysis_cache WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        ) {
            Ok(json) => Some(json),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => {
                log::warn!("analysis cache read failed for {key}: {e}");
                None
            }
        }
    }
}

/// Cache key per §6: `lower(name_without_extension) + "_" + size + "_" + floor(duration_seconds)`.
pub fn cache_key(name_without_extension: &str, size_bytes: u64, duration_seconds: f64) -> String {
    format!(
        "{}_{}_{}",
        name_without_extension.to_lowercase(),
        size_bytes,
        duration_seconds.floor() as i64
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_matches_spec_scheme() {
        let key = cache_key("Track Name", 12345, 183.9);
        assert_eq!(key, "track name_12345_183");
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = AnalysisCache::open_in_memory().unwrap();
        cache.put("abc", "{\"bpm\":120.0}").unwrap();
        assert_eq!(cache.get("abc"), Some("{\"bpm\":120.0}".to_string()));
    }

    #[test]
    fn get_is_none_on_miss() {
        let cache = AnalysisCache::open_in_memory().unwrap();
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn put_upserts_on_conflict() {
        let cache = AnalysisCache::open_in_memory().unwrap();
        cache.put("abc", "{\"bpm\":120.0}").unwrap();
        cache.put("abc", "{\"bpm\":128.0}").unwrap();
        assert_eq!(cache.get("abc"), Some("{\"bpm\":128.0}".to_string()));
    }

    #[test]
    fn on_disk_cache_persists_across_connections() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cache.sqlite");
        {
            let cache = AnalysisCache::open(&path).unwrap();
            cache.put("k", "v").unwrap();
        }
        let reopened = AnalysisCache::open(&path).unwrap();
        assert_eq!(reopened.get("k"), Some("v".to_string()));
    }
}
