// footprint_store.rs - SQLite history and result cache for the footprint finder
// Purpose: Append every live check to `history`, keep the latest non-error
//          result per (username, platform) in `cache` with a TTL

use crate::footprint::{CheckResult, CheckStatus};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const DEFAULT_DB_FILE: &str = "footprint.db";

/// A cached outcome, as stored
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResult {
    pub status: CheckStatus,
    pub url: String,
    pub http_status: Option<u16>,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub username: String,
    pub platform_key: String,
    pub url: String,
    pub status: CheckStatus,
    pub http_status: Option<u16>,
    pub checked_at: String,
}

/// Thread-safe handle to the footprint database
#[derive(Clone)]
pub struct FootprintStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL,
            platform_key TEXT NOT NULL,
            url TEXT NOT NULL,
            status TEXT NOT NULL,
            http_status INTEGER,
            checked_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_history_username ON history(username);

        CREATE TABLE IF NOT EXISTS cache (
            username TEXT NOT NULL,
            platform_key TEXT NOT NULL,
            status TEXT NOT NULL,
            url TEXT NOT NULL,
            http_status INTEGER,
            cached_at INTEGER NOT NULL,
            PRIMARY KEY (username, platform_key)
        );
        "#,
    )
    .context("Failed to create footprint tables")
}

impl FootprintStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }
        let conn = Connection::open(path).with_context(|| format!("Failed to open database {}", path.display()))?;
        create_tables(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
        })
    }

    /// In-memory database (tests, `--no-cache` runs)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        create_tables(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Footprint database lock poisoned"))
    }

    pub fn record_history(&self, result: &CheckResult) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO history (username, platform_key, url, status, http_status, checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                result.username,
                result.platform_key,
                result.url,
                result.status.as_str(),
                result.http_status,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to insert history row")?;
        Ok(())
    }

    /// Upsert the cache row; errors are never cached
    pub fn cache_put(&self, result: &CheckResult) -> Result<()> {
        self.cache_put_at(result, Utc::now())
    }

    fn cache_put_at(&self, result: &CheckResult, at: DateTime<Utc>) -> Result<()> {
        if result.status == CheckStatus::Error {
            return Ok(());
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO cache (username, platform_key, status, url, http_status, cached_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(username, platform_key) DO UPDATE SET
                status = excluded.status,
                url = excluded.url,
                http_status = excluded.http_status,
                cached_at = excluded.cached_at",
            params![
                result.username,
                result.platform_key,
                result.status.as_str(),
                result.url,
                result.http_status,
                at.timestamp(),
            ],
        )
        .context("Failed to upsert cache row")?;
        Ok(())
    }

    /// Cached result younger than `ttl`, if any
    pub fn cache_get(&self, username: &str, platform_key: &str, ttl: Duration) -> Result<Option<CachedResult>> {
        let cutoff = Utc::now().timestamp() - ttl.as_secs() as i64;
        let conn = self.lock()?;

        let row = conn
            .query_row(
                "SELECT status, url, http_status, cached_at FROM cache
                 WHERE username = ?1 AND platform_key = ?2 AND cached_at >= ?3",
                params![username, platform_key, cutoff],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<u16>>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query cache")?;

        Ok(row.and_then(|(status, url, http_status, cached_at)| {
            Some(CachedResult {
                status: status.parse().ok()?,
                url,
                http_status,
                cached_at: DateTime::from_timestamp(cached_at, 0)?,
            })
        }))
    }

    /// Delete cache rows older than `ttl`; returns the number removed
    pub fn purge_expired(&self, ttl: Duration) -> Result<usize> {
        let cutoff = Utc::now().timestamp() - ttl.as_secs() as i64;
        let conn = self.lock()?;
        conn.execute("DELETE FROM cache WHERE cached_at < ?1", params![cutoff])
            .context("Failed to purge expired cache rows")
    }

    pub fn clear_cache(&self) -> Result<usize> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM cache", []).context("Failed to clear cache")
    }

    /// Every stored check for `username`, newest first
    pub fn history_for(&self, username: &str) -> Result<Vec<HistoryRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, username, platform_key, url, status, http_status, checked_at
             FROM history WHERE username = ?1 ORDER BY id DESC",
        )?;

        let rows = stmt
            .query_map(params![username], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<u16>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read history")?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, username, platform_key, url, status, http_status, checked_at)| {
                Some(HistoryRecord {
                    id,
                    username,
                    platform_key,
                    url,
                    status: status.parse().ok()?,
                    http_status,
                    checked_at,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(platform: &str, status: CheckStatus) -> CheckResult {
        CheckResult {
            username: "alice".into(),
            platform_key: platform.into(),
            platform_name: platform.into(),
            category: "coding".into(),
            url: format!("https://{}.test/alice", platform),
            status,
            http_status: Some(200),
            elapsed_ms: 12,
            from_cache: false,
            error: None,
        }
    }

    #[test]
    fn test_cache_roundtrip_and_upsert() {
        let store = FootprintStore::in_memory().unwrap();
        let ttl = Duration::from_secs(24 * 3600);

        store.cache_put(&result("github", CheckStatus::Found)).unwrap();
        let cached = store.cache_get("alice", "github", ttl).unwrap().unwrap();
        assert_eq!(cached.status, CheckStatus::Found);
        assert_eq!(cached.http_status, Some(200));

        store.cache_put(&result("github", CheckStatus::NotFound)).unwrap();
        let cached = store.cache_get("alice", "github", ttl).unwrap().unwrap();
        assert_eq!(cached.status, CheckStatus::NotFound);

        assert!(store.cache_get("bob", "github", ttl).unwrap().is_none());
    }

    #[test]
    fn test_errors_not_cached() {
        let store = FootprintStore::in_memory().unwrap();
        store.cache_put(&result("gitlab", CheckStatus::Error)).unwrap();
        assert!(store
            .cache_get("alice", "gitlab", Duration::from_secs(3600))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_ttl_and_purge() {
        let store = FootprintStore::in_memory().unwrap();
        let old = Utc::now() - chrono::Duration::hours(30);
        store.cache_put_at(&result("github", CheckStatus::Found), old).unwrap();
        store.cache_put(&result("gitlab", CheckStatus::Found)).unwrap();

        let ttl = Duration::from_secs(24 * 3600);
        assert!(store.cache_get("alice", "github", ttl).unwrap().is_none());
        assert!(store.cache_get("alice", "gitlab", ttl).unwrap().is_some());

        assert_eq!(store.purge_expired(ttl).unwrap(), 1);
        assert_eq!(store.clear_cache().unwrap(), 1);
    }

    #[test]
    fn test_history_newest_first() {
        let store = FootprintStore::in_memory().unwrap();
        store.record_history(&result("github", CheckStatus::Found)).unwrap();
        store.record_history(&result("gitlab", CheckStatus::Error)).unwrap();

        let history = store.history_for("alice").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].platform_key, "gitlab");
        assert_eq!(history[0].status, CheckStatus::Error);
        assert!(store.history_for("bob").unwrap().is_empty());
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("fp.db");
        let store = FootprintStore::open(&path).unwrap();
        store.record_history(&result("github", CheckStatus::Found)).unwrap();
        drop(store);

        let reopened = FootprintStore::open(&path).unwrap();
        assert_eq!(reopened.history_for("alice").unwrap().len(), 1);
    }
}
