//! Hashing, verification and persistence of file digests

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::hashing::{self, Digests, HashAlgorithm};
use super::store::{HashRecord, HashStore, SourceType};
use crate::config::HashingConfig;
use crate::error::{ForensicsError, Result};
use crate::export;
use crate::task::{percent_of, TaskContext};

/// What to hash
#[derive(Debug, Clone, Copy)]
pub enum HashInput<'a> {
    Bytes(&'a [u8]),
    File(&'a Path),
}

/// Outcome of one path in a batch
#[derive(Debug)]
pub struct BatchItem {
    pub path: PathBuf,
    pub result: Result<HashRecord>,
    /// False when hashing succeeded but the store write failed
    pub persisted: bool,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub items: Vec<BatchItem>,
    pub cancelled: bool,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    Match,
    Mismatch,
    NotFound,
}

/// One reference record checked against the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comparison {
    pub file_path: String,
    pub source_type: SourceType,
    pub status: ComparisonStatus,
    /// Algorithms present on both sides whose digests differ
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub differing: Vec<HashAlgorithm>,
}

/// Front door for hashing, verification and the hash store
pub struct HashService {
    store: Option<HashStore>,
    default_algorithms: Vec<HashAlgorithm>,
    buffer_size: usize,
}

impl HashService {
    pub fn new(store: HashStore, config: &HashingConfig) -> Self {
        Self {
            store: Some(store),
            default_algorithms: config.default_algorithms.clone(),
            buffer_size: config.buffer_size,
        }
    }

    /// A service that hashes and verifies but never persists
    pub fn without_store(config: &HashingConfig) -> Self {
        Self {
            store: None,
            default_algorithms: config.default_algorithms.clone(),
            buffer_size: config.buffer_size,
        }
    }

    /// Open the store named by the config, or `~/.forensix/hashes.db`
    pub fn open(config: &HashingConfig) -> Result<Self> {
        let path = config
            .database_path
            .clone()
            .or_else(HashStore::default_path)
            .ok_or_else(|| ForensicsError::Persistence("no home directory for hash store".into()))?;
        Ok(Self::new(HashStore::open(path)?, config))
    }

    pub fn store_handle(&self) -> Option<&HashStore> {
        self.store.as_ref()
    }

    fn algorithms<'a>(&'a self, requested: &'a [HashAlgorithm]) -> &'a [HashAlgorithm] {
        if requested.is_empty() {
            &self.default_algorithms
        } else {
            requested
        }
    }

    /// Hash bytes or a file; an empty algorithm list means the configured defaults
    pub fn hash(&self, input: HashInput<'_>, algorithms: &[HashAlgorithm]) -> Result<Digests> {
        let algorithms = self.algorithms(algorithms);
        match input {
            HashInput::Bytes(data) => Ok(hashing::hash_bytes(data, algorithms)),
            HashInput::File(path) => Ok(hashing::hash_file(path, algorithms, self.buffer_size)?.0),
        }
    }

    /// Hash a file, returning digests and size
    pub fn hash_file(&self, path: &Path, algorithms: &[HashAlgorithm]) -> Result<(Digests, u64)> {
        hashing::hash_file(path, self.algorithms(algorithms), self.buffer_size)
    }

    /// Upsert digests for (path, source_type)
    pub fn store(
        &self,
        path: &str,
        source_type: SourceType,
        size: u64,
        digests: &Digests,
    ) -> Result<HashRecord> {
        let record = HashRecord::new(path, source_type, size, digests, Utc::now());
        if let Some(store) = &self.store {
            store.upsert(&record)?;
        }
        Ok(record)
    }

    /// Recompute each expected algorithm and compare case-insensitively.
    /// A missing or unreadable file yields `false` for every entry.
    pub fn verify(
        &self,
        path: &Path,
        expected: &BTreeMap<HashAlgorithm, String>,
    ) -> BTreeMap<HashAlgorithm, bool> {
        let algorithms: Vec<HashAlgorithm> = expected.keys().copied().collect();
        let actual = match hashing::hash_file(path, &algorithms, self.buffer_size) {
            Ok((digests, _)) => digests,
            Err(e) => {
                tracing::warn!("Cannot verify {}: {}", path.display(), e);
                Digests::new()
            }
        };

        expected
            .iter()
            .map(|(alg, want)| {
                let ok = actual
                    .get(alg)
                    .map_or(false, |got| got.eq_ignore_ascii_case(want.trim()));
                (*alg, ok)
            })
            .collect()
    }

    /// Hash and store each path in order. Failures are recorded per path;
    /// cancellation is honored between files.
    pub fn batch(
        &self,
        paths: &[PathBuf],
        algorithms: &[HashAlgorithm],
        source_type: SourceType,
        ctx: &TaskContext,
    ) -> BatchOutcome {
        let algorithms = self.algorithms(algorithms);
        let total = paths.len() as u64;
        let mut outcome = BatchOutcome::default();

        tracing::info!("Hashing {} files with {:?}", total, algorithms);

        for (i, path) in paths.iter().enumerate() {
            if ctx.is_cancelled() {
                tracing::info!("Batch hashing cancelled after {} files", i);
                outcome.cancelled = true;
                break;
            }

            let item = match hashing::hash_file(path, algorithms, self.buffer_size) {
                Ok((digests, size)) => {
                    let display = path.display().to_string();
                    let record = HashRecord::new(display, source_type, size, &digests, Utc::now());
                    let persisted = match &self.store {
                        Some(store) => match store.upsert(&record) {
                            Ok(()) => true,
                            Err(e) => {
                                tracing::warn!("Hash of {} not persisted: {}", path.display(), e);
                                false
                            }
                        },
                        None => false,
                    };
                    BatchItem {
                        path: path.clone(),
                        result: Ok(record),
                        persisted,
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to hash {}: {}", path.display(), e);
                    BatchItem {
                        path: path.clone(),
                        result: Err(e),
                        persisted: false,
                    }
                }
            };
            outcome.items.push(item);

            let done = i as u64 + 1;
            ctx.report(percent_of(done, total), format!("Hashing: {} / {} files", done, total));
        }

        outcome
    }

    pub fn lookup(&self, path: &str, source_type: SourceType) -> Result<Option<HashRecord>> {
        match &self.store {
            Some(store) => store.get(path, source_type),
            None => Ok(None),
        }
    }

    /// All stored records, oldest calculation first
    pub fn records(&self) -> Result<Vec<HashRecord>> {
        match &self.store {
            Some(store) => store.all(),
            None => Ok(Vec::new()),
        }
    }

    /// Check a reference hash set against the store
    pub fn compare(&self, reference: &[HashRecord]) -> Result<Vec<Comparison>> {
        let mut results = Vec::with_capacity(reference.len());
        for other in reference {
            let status_and_diff = match self.lookup(&other.file_path, other.source_type)? {
                None => (ComparisonStatus::NotFound, Vec::new()),
                Some(ours) => {
                    let common: Vec<HashAlgorithm> = HashAlgorithm::ALL
                        .into_iter()
                        .filter(|&alg| ours.digest(alg).is_some() && other.digest(alg).is_some())
                        .collect();
                    let differing: Vec<HashAlgorithm> = common
                        .iter()
                        .copied()
                        .filter(|&alg| {
                            !ours
                                .digest(alg)
                                .zip(other.digest(alg))
                                .map_or(false, |(a, b)| a.eq_ignore_ascii_case(b))
                        })
                        .collect();
                    if common.is_empty() {
                        tracing::debug!("No common algorithm for {}", other.file_path);
                        (ComparisonStatus::Mismatch, Vec::new())
                    } else if differing.is_empty() {
                        (ComparisonStatus::Match, Vec::new())
                    } else {
                        (ComparisonStatus::Mismatch, differing)
                    }
                }
            };
            results.push(Comparison {
                file_path: other.file_path.clone(),
                source_type: other.source_type,
                status: status_and_diff.0,
                differing: status_and_diff.1,
            });
        }
        Ok(results)
    }

    pub fn export_csv<W: Write>(&self, writer: W) -> Result<()> {
        export::write_csv(&self.records()?, writer)?;
        Ok(())
    }

    pub fn export_json<W: Write>(&self, writer: W) -> Result<()> {
        export::write_json(&self.records()?, writer)
    }
}
