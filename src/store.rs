use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::config::FingerprintConfig;
use crate::error::StoreError;

/// Postings returned by a query: `(hash, track_id, offset)`.
pub type PostingRow = (u64, String, u32);

const MAX_RETRIES: u32 = 5;
const BATCH_SIZE: usize = 2000;
const LOOKUP_CHUNK: usize = 500;

/// The persistent `hash -> {(track_id, offset)}` index.
///
/// A single SQLite file, portable between builder and matcher. WAL mode is
/// enabled so concurrent readers are unaffected by a writer's transaction.
/// The crate does not share one `IndexStore` across threads; the ingest
/// pipeline funnels all writes through one writer thread that owns its own
/// `IndexStore`, and each query opens its own read connection. `lookup`
/// itself fans a large hash set out across `std::thread::scope` workers, one
/// per chunk, each opening its own connection to `path`.
pub struct IndexStore {
    conn: Connection,
    path: PathBuf,
}

impl IndexStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn =
            Connection::open(&path).map_err(|e| StoreError::Unavailable(e.to_string()))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tracks (
                track_id TEXT PRIMARY KEY,
                label    TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS fingerprints (
                hash     INTEGER NOT NULL,
                offset   INTEGER NOT NULL,
                track_id TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_fingerprints_hash ON fingerprints(hash);
            CREATE TABLE IF NOT EXISTS build_config (
                id     INTEGER PRIMARY KEY CHECK (id = 0),
                toml   TEXT NOT NULL
            );",
        )
        .map_err(|e| StoreError::Integrity(e.to_string()))?;

        Ok(IndexStore { conn, path })
    }

    /// Open an existing index for matching. Unlike [`open`](Self::open), this
    /// never creates a database: a missing path is an input error to the
    /// caller (e.g. `fpid identify -d <missing>` should exit 2), not a
    /// silently-created empty index that then reports "no match".
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StoreError::Unavailable(format!(
                "database file not found: {}",
                path.display()
            )));
        }
        Self::open(path)
    }

    /// Record (once) the config a corpus was built with, so a later
    /// `identify` run can detect a cross-parameter mismatch.
    pub fn record_build_config(&self, cfg: &FingerprintConfig) -> Result<(), StoreError> {
        let toml = cfg
            .to_toml_string()
            .map_err(|e| StoreError::Integrity(e.to_string()))?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO build_config (id, toml) VALUES (0, ?1)",
                params![toml],
            )
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    pub fn load_build_config(&self) -> Result<Option<FingerprintConfig>, StoreError> {
        let toml: Option<String> = self
            .conn
            .query_row(
                "SELECT toml FROM build_config WHERE id = 0",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        match toml {
            Some(s) => FingerprintConfig::from_toml_str(&s)
                .map(Some)
                .map_err(|e| StoreError::Integrity(e.to_string())),
            None => Ok(None),
        }
    }

    /// Verify a config used for matching agrees with the one the index was
    /// built with.
    pub fn check_config(&self, cfg: &FingerprintConfig) -> Result<(), StoreError> {
        if let Some(built) = self.load_build_config()? {
            if built != *cfg {
                return Err(StoreError::ConfigMismatch {
                    built: format!("{:?}", built),
                    queried: format!("{:?}", cfg),
                });
            }
        }
        Ok(())
    }

    pub fn track_exists(&self, track_id: &str) -> Result<bool, StoreError> {
        self.conn
            .query_row(
                "SELECT 1 FROM tracks WHERE track_id = ?1",
                params![track_id],
                |_| Ok(()),
            )
            .optional()
            .map(|r| r.is_some())
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    /// Atomically add all postings for one track. Rejects a second append
    /// for the same `track_id` (idempotence by id) unless
    /// `replace` is set, in which case the track's existing postings are
    /// dropped first.
    pub fn append_postings(
        &mut self,
        track_id: &str,
        label: &str,
        postings: &[(u64, u32)],
        replace: bool,
    ) -> Result<(), StoreError> {
        let mut attempt = 0u32;
        loop {
            match self.try_append_postings(track_id, label, postings, replace) {
                Ok(()) => return Ok(()),
                Err(StoreError::Unavailable(msg)) if attempt < MAX_RETRIES => {
                    attempt += 1;
                    let backoff = Duration::from_millis(100 * (1u64 << attempt));
                    log::warn!(
                        "store busy ({msg}), retrying in {:?} (attempt {attempt}/{MAX_RETRIES})",
                        backoff
                    );
                    thread::sleep(backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_append_postings(
        &mut self,
        track_id: &str,
        label: &str,
        postings: &[(u64, u32)],
        replace: bool,
    ) -> Result<(), StoreError> {
        let exists = self.track_exists(track_id)?;
        if exists && !replace {
            return Err(StoreError::DuplicateTrack(track_id.to_string()));
        }

        let tx = self
            .conn
            .transaction()
            .map_err(|e| map_sqlite_err(&e))?;

        if exists {
            tx.execute(
                "DELETE FROM fingerprints WHERE track_id = ?1",
                params![track_id],
            )
            .map_err(|e| map_sqlite_err(&e))?;
            tx.execute(
                "UPDATE tracks SET label = ?2 WHERE track_id = ?1",
                params![track_id, label],
            )
            .map_err(|e| map_sqlite_err(&e))?;
        } else {
            tx.execute(
                "INSERT INTO tracks (track_id, label) VALUES (?1, ?2)",
                params![track_id, label],
            )
            .map_err(|e| map_sqlite_err(&e))?;
        }

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO fingerprints (hash, offset, track_id) VALUES (?1, ?2, ?3)",
                )
                .map_err(|e| map_sqlite_err(&e))?;
            for chunk in postings.chunks(BATCH_SIZE) {
                for (hash, offset) in chunk {
                    stmt.execute(params![*hash as i64, *offset, track_id])
                        .map_err(|e| map_sqlite_err(&e))?;
                }
            }
        }

        tx.commit().map_err(|e| map_sqlite_err(&e))?;
        Ok(())
    }

    /// Return every posting whose hash is in `hashes`, chunked to stay well
    /// under SQLite's `IN (...)` parameter limit. A single chunk is probed
    /// on the calling thread; more than one chunk is probed concurrently,
    /// fanning a `std::thread::scope` worker out per chunk, each opening its
    /// own read connection to the same file (safe under WAL: concurrent
    /// readers don't block each other or a writer). Order is unspecified.
    pub fn lookup(&self, hashes: &[u64]) -> Result<Vec<PostingRow>, StoreError> {
        let chunks: Vec<&[u64]> = hashes.chunks(LOOKUP_CHUNK).collect();

        if chunks.len() <= 1 {
            return match chunks.first() {
                Some(chunk) => Self::lookup_chunk(&self.conn, chunk),
                None => Ok(Vec::new()),
            };
        }

        // Clone the path rather than sharing `self`: `Connection` is not
        // `Sync`, so a shared `&IndexStore` can't cross the scoped threads,
        // but a plain `PathBuf` can.
        let db_path = self.path.clone();
        let results: Vec<Result<Vec<PostingRow>, StoreError>> = thread::scope(|scope| {
            chunks
                .iter()
                .copied()
                .map(|chunk| {
                    let db_path = &db_path;
                    scope.spawn(move || {
                        let conn = Connection::open(db_path)
                            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
                        Self::lookup_chunk(&conn, chunk)
                    })
                })
                .collect::<Vec<_>>()
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(StoreError::Unavailable(
                            "lookup worker thread panicked".into(),
                        ))
                    })
                })
                .collect()
        });

        let mut out = Vec::new();
        for r in results {
            out.extend(r?);
        }
        Ok(out)
    }

    fn lookup_chunk(conn: &Connection, chunk: &[u64]) -> Result<Vec<PostingRow>, StoreError> {
        let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT hash, track_id, offset FROM fingerprints WHERE hash IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| map_sqlite_err(&e))?;
        let params: Vec<i64> = chunk.iter().map(|h| *h as i64).collect();
        let rows = stmt
            .query_map(params_from_iter(params), |row| {
                let hash: i64 = row.get(0)?;
                let track_id: String = row.get(1)?;
                let offset: u32 = row.get(2)?;
                Ok((hash as u64, track_id, offset))
            })
            .map_err(|e| map_sqlite_err(&e))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| map_sqlite_err(&e))?);
        }
        Ok(out)
    }

    pub fn track_label(&self, track_id: &str) -> Result<Option<String>, StoreError> {
        self.conn
            .query_row(
                "SELECT label FROM tracks WHERE track_id = ?1",
                params![track_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

fn map_sqlite_err(e: &rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(err, msg) = e {
        if err.code == rusqlite::ErrorCode::DatabaseBusy
            || err.code == rusqlite::ErrorCode::DatabaseLocked
        {
            return StoreError::Unavailable(
                msg.clone().unwrap_or_else(|| "database is locked".into()),
            );
        }
    }
    StoreError::Conflict(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_read_only_rejects_a_missing_database() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("does-not-exist.db");
        let err = IndexStore::open_read_only(&missing).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(!missing.exists(), "open_read_only must not create the file");
    }

    #[test]
    fn append_then_lookup_round_trips() {
        let dir = tempdir().unwrap();
        let mut store = IndexStore::open(dir.path().join("idx.db")).unwrap();
        store
            .append_postings("track_a", "Track A", &[(42, 7), (99, 12)], false)
            .unwrap();

        let rows = store.lookup(&[42, 99, 12345]).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|(h, t, o)| *h == 42 && t == "track_a" && *o == 7));
    }

    #[test]
    fn duplicate_append_is_rejected() {
        let dir = tempdir().unwrap();
        let mut store = IndexStore::open(dir.path().join("idx.db")).unwrap();
        store
            .append_postings("track_a", "Track A", &[(1, 1)], false)
            .unwrap();
        let err = store
            .append_postings("track_a", "Track A", &[(1, 1)], false)
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateTrack(_)));
    }

    #[test]
    fn idempotent_reingest_leaves_index_unchanged_with_replace() {
        let dir = tempdir().unwrap();
        let mut store = IndexStore::open(dir.path().join("idx.db")).unwrap();
        let postings = [(1u64, 1u32), (2, 2)];
        store.append_postings("t", "T", &postings, false).unwrap();
        store.append_postings("t", "T", &postings, true).unwrap();
        let rows = store.lookup(&[1, 2]).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn build_config_mismatch_is_detected() {
        let dir = tempdir().unwrap();
        let store = IndexStore::open(dir.path().join("idx.db")).unwrap();
        let cfg = FingerprintConfig::default();
        store.record_build_config(&cfg).unwrap();

        let mut other = cfg;
        other.n_fft = 1024;
        let err = store.check_config(&other).unwrap_err();
        assert!(matches!(err, StoreError::ConfigMismatch { .. }));
        store.check_config(&cfg).unwrap();
    }

    #[test]
    fn chunked_lookup_handles_more_than_one_chunk() {
        let dir = tempdir().unwrap();
        let mut store = IndexStore::open(dir.path().join("idx.db")).unwrap();
        let postings: Vec<(u64, u32)> = (0..(LOOKUP_CHUNK as u64 + 50))
            .map(|h| (h, h as u32))
            .collect();
        store.append_postings("t", "T", &postings, false).unwrap();
        let hashes: Vec<u64> = (0..(LOOKUP_CHUNK as u64 + 50)).collect();
        let rows = store.lookup(&hashes).unwrap();
        assert_eq!(rows.len(), postings.len());
    }
}
