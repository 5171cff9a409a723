use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub mod analysis;
pub mod carving;
pub mod config;
pub mod error;
pub mod export;
pub mod fs;
pub mod image;
pub mod integrity;
pub mod task;

pub use analysis::{
    AnalysisSummary, AnomalyKind, AnomalyRecord, FileAnalysis, MassTimestampPattern, Severity,
    TimestampAnalyzer,
};
pub use carving::{carve_path, CarveMode, CarveOutcome, FileCarver, FileSignature};
pub use config::ForensixConfig;
pub use error::{ForensicsError, Result};
pub use fs::{FileSystem, FileSystemKind};
pub use image::{open_image, DiskImage, EvidenceImage, ImageBackend, ImageKind, Partition};
pub use integrity::{HashAlgorithm, HashRecord, HashService, HashStore, SourceType};
pub use task::{CancellationToken, Progress, TaskContext, TaskHandle};

/// One file or directory as seen by the file-system walker.
///
/// Timestamps are `None` when the file system does not record them, which is
/// itself evidence for the timestamp analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub is_directory: bool,
    pub is_deleted: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub accessed_at: Option<DateTime<Utc>>,
    /// File-system record identifier (byte offset of the directory entry on exFAT)
    pub record_id: Option<u64>,
    /// `record_id` of the containing directory; `None` for children of the root
    pub parent_id: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// Only filled by [`fs::build_tree`]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileEntry>,
}

/// A file recovered by signature carving
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarvedFile {
    pub filename: String,
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub file_type: String,
    pub size: u64,
    /// Byte offset of the header within the image
    pub offset: u64,
    pub footer_found: bool,
    /// Hex digest of the full carved content
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}
