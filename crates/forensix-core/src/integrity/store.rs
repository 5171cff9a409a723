//! SQLite hash store

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::hashing::{Digests, HashAlgorithm};
use crate::error::{ForensicsError, Result};

/// Where a hashed file came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    FileSystem,
    Carved,
    Evidence,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::FileSystem => "file_system",
            SourceType::Carved => "carved",
            SourceType::Evidence => "evidence",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = ForensicsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file_system" => Ok(SourceType::FileSystem),
            "carved" => Ok(SourceType::Carved),
            "evidence" => Ok(SourceType::Evidence),
            other => Err(ForensicsError::Persistence(format!("unknown source type {other}"))),
        }
    }
}

/// One stored set of digests, unique per (file_path, source_type)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRecord {
    pub file_path: String,
    pub source_type: SourceType,
    pub size: u64,
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub sha256: Option<String>,
    pub sha512: Option<String>,
    pub calculated_at: DateTime<Utc>,
}

impl HashRecord {
    pub fn new(
        file_path: impl Into<String>,
        source_type: SourceType,
        size: u64,
        digests: &Digests,
        calculated_at: DateTime<Utc>,
    ) -> Self {
        let get = |alg| digests.get(&alg).map(|d| d.to_ascii_lowercase());
        Self {
            file_path: file_path.into(),
            source_type,
            size,
            md5: get(HashAlgorithm::Md5),
            sha1: get(HashAlgorithm::Sha1),
            sha256: get(HashAlgorithm::Sha256),
            sha512: get(HashAlgorithm::Sha512),
            calculated_at,
        }
    }

    pub fn digest(&self, algorithm: HashAlgorithm) -> Option<&str> {
        match algorithm {
            HashAlgorithm::Md5 => self.md5.as_deref(),
            HashAlgorithm::Sha1 => self.sha1.as_deref(),
            HashAlgorithm::Sha256 => self.sha256.as_deref(),
            HashAlgorithm::Sha512 => self.sha512.as_deref(),
        }
    }

    /// Digests present on this record
    pub fn digests(&self) -> Digests {
        HashAlgorithm::ALL
            .iter()
            .filter_map(|&alg| self.digest(alg).map(|d| (alg, d.to_string())))
            .collect()
    }
}

/// Persistent table of [`HashRecord`]s
pub struct HashStore {
    conn: Connection,
    db_path: Option<PathBuf>,
}

const SELECT_COLUMNS: &str =
    "file_path, source_type, file_size, md5, sha1, sha256, sha512, calculated_at";

impl HashStore {
    /// Open or create a hash database at the specified path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ForensicsError::Persistence(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(&db_path)?;
        let store = Self {
            conn,
            db_path: Some(db_path),
        };
        store.initialize_schema()?;
        tracing::debug!("Opened hash store at {:?}", store.db_path);
        Ok(store)
    }

    /// Store that lives only as long as this value
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
            db_path: None,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Get the default database path (~/.forensix/hashes.db)
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".forensix").join("hashes.db"))
    }

    fn initialize_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS file_hashes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_path TEXT NOT NULL,
                source_type TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                md5 TEXT,
                sha1 TEXT,
                sha256 TEXT,
                sha512 TEXT,
                calculated_at TEXT NOT NULL,
                UNIQUE(file_path, source_type)
            );

            CREATE INDEX IF NOT EXISTS idx_file_hashes_calculated_at
                ON file_hashes(calculated_at);
            "#,
        )?;
        Ok(())
    }

    /// Insert or replace the record for (file_path, source_type)
    pub fn upsert(&self, record: &HashRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO file_hashes (
                file_path, source_type, file_size,
                md5, sha1, sha256, sha512, calculated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                record.file_path,
                record.source_type.as_str(),
                record.size as i64,
                record.md5,
                record.sha1,
                record.sha256,
                record.sha512,
                // Fixed-width so lexical order matches time order
                record.calculated_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, file_path: &str, source_type: SourceType) -> Result<Option<HashRecord>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM file_hashes WHERE file_path = ?1 AND source_type = ?2"
        );
        let record = self
            .conn
            .query_row(&sql, params![file_path, source_type.as_str()], record_from_row)
            .optional()?;
        Ok(record)
    }

    /// Records with this path under any source type
    pub fn find_by_path(&self, file_path: &str) -> Result<Vec<HashRecord>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM file_hashes WHERE file_path = ?1 ORDER BY source_type"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map([file_path], record_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Every record, oldest calculation first
    pub fn all(&self) -> Result<Vec<HashRecord>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM file_hashes ORDER BY calculated_at, id");
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map([], record_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM file_hashes", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<HashRecord> {
    let source: String = row.get(1)?;
    let source_type = source
        .parse::<SourceType>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
    let size: i64 = row.get(2)?;
    let calculated: String = row.get(7)?;
    let calculated_at = DateTime::parse_from_rfc3339(&calculated)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);

    Ok(HashRecord {
        file_path: row.get(0)?,
        source_type,
        size: size as u64,
        md5: row.get(3)?,
        sha1: row.get(4)?,
        sha256: row.get(5)?,
        sha512: row.get(6)?,
        calculated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::hashing::hash_bytes;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn record(path: &str, data: &[u8], secs: i64) -> HashRecord {
        let digests = hash_bytes(data, &[HashAlgorithm::Md5, HashAlgorithm::Sha256]);
        HashRecord::new(
            path,
            SourceType::FileSystem,
            data.len() as u64,
            &digests,
            Utc.timestamp_opt(secs, 0).unwrap(),
        )
    }

    #[test]
    fn test_store_open() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("hashes.db");

        let store = HashStore::open(&db_path).unwrap();
        assert!(db_path.exists());
        assert_eq!(store.path(), Some(db_path.as_path()));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_upsert_replaces() {
        let store = HashStore::open_in_memory().unwrap();
        store.upsert(&record("/a.txt", b"one", 100)).unwrap();
        store.upsert(&record("/a.txt", b"two", 200)).unwrap();
        assert_eq!(store.count().unwrap(), 1);

        let loaded = store.get("/a.txt", SourceType::FileSystem).unwrap().unwrap();
        assert_eq!(loaded, record("/a.txt", b"two", 200));
        assert!(loaded.sha1.is_none());

        // Same path, different source is a separate row
        let mut carved = record("/a.txt", b"two", 300);
        carved.source_type = SourceType::Carved;
        store.upsert(&carved).unwrap();
        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(store.find_by_path("/a.txt").unwrap().len(), 2);
        assert!(store.get("/b.txt", SourceType::FileSystem).unwrap().is_none());
    }

    #[test]
    fn test_all_sorted_by_calculation_time() {
        let store = HashStore::open_in_memory().unwrap();
        store.upsert(&record("/late", b"x", 2_000_000_000)).unwrap();
        store.upsert(&record("/early", b"y", 10)).unwrap();
        store.upsert(&record("/middle", b"z", 1_000_000)).unwrap();

        let paths: Vec<String> = store.all().unwrap().into_iter().map(|r| r.file_path).collect();
        assert_eq!(paths, vec!["/early", "/middle", "/late"]);
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("hashes.db");
        {
            let store = HashStore::open(&db_path).unwrap();
            store.upsert(&record("/kept", b"data", 42)).unwrap();
        }
        let store = HashStore::open(&db_path).unwrap();
        assert_eq!(store.all().unwrap(), vec![record("/kept", b"data", 42)]);
    }
}
