//! In-memory image double.
//!
//! `SyntheticImage::new()` is a zero-filled 1 MiB disk with one partition and
//! a fixed file system, so walking and timestamp analysis can run without any
//! evidence on disk. `SyntheticImage::with_bytes` serves arbitrary bytes and
//! leaves partition and file-system parsing to the regular code paths.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use super::partition::Partition;
use super::{DiskImage, ImageKind};
use crate::error::{ForensicsError, Result};
use crate::fs::{self, FileSystem, FileSystemKind};
use crate::FileEntry;

const SYNTHETIC_SIZE: usize = 1024 * 1024;

pub struct SyntheticImage {
    data: Vec<u8>,
    with_file_system: bool,
    closed: AtomicBool,
}

impl SyntheticImage {
    pub fn new() -> Self {
        Self {
            data: vec![0u8; SYNTHETIC_SIZE],
            with_file_system: true,
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            with_file_system: false,
            closed: AtomicBool::new(false),
        }
    }
}

impl Default for SyntheticImage {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskImage for SyntheticImage {
    fn kind(&self) -> ImageKind {
        ImageKind::Synthetic
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        if self.is_closed() {
            return Err(ForensicsError::read(offset, "image is closed"));
        }
        if offset >= self.data.len() as u64 {
            return Ok(Vec::new());
        }
        let start = offset as usize;
        let end = start.saturating_add(length).min(self.data.len());
        Ok(self.data[start..end].to_vec())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("format".to_string(), "synthetic".to_string())])
    }

    fn partitions(&self) -> Result<Vec<Partition>> {
        if !self.with_file_system {
            return super::partition::read_partitions(self);
        }
        Ok(vec![Partition {
            index: 0,
            label: "Synthetic Partition".to_string(),
            name: None,
            start: 0,
            length: self.size(),
            allocated: true,
            bootable: false,
        }])
    }

    fn built_in_file_system(&self, _offset: u64) -> Option<Box<dyn FileSystem>> {
        self.with_file_system
            .then(|| Box::new(SyntheticFileSystem::new()) as Box<dyn FileSystem>)
    }
}

struct SyntheticNode {
    record_id: u64,
    parent_id: Option<u64>,
    path: &'static str,
    is_directory: bool,
    is_deleted: bool,
    content: &'static [u8],
    created: Option<DateTime<Utc>>,
    modified: Option<DateTime<Utc>>,
    accessed: Option<DateTime<Utc>>,
}

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32, ms: u32) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(y, mo, d)
        .and_then(|date| date.and_hms_milli_opt(h, mi, s, ms))
        .map(|naive| naive.and_utc())
}

const HOLIDAY_JPG: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0xFF, 0xD9,
];

/// Fixed file system served by [`SyntheticImage::new`]
pub struct SyntheticFileSystem {
    nodes: Vec<SyntheticNode>,
}

impl SyntheticFileSystem {
    pub fn new() -> Self {
        let nodes = vec![
            SyntheticNode {
                record_id: 1,
                parent_id: None,
                path: "/Documents",
                is_directory: true,
                is_deleted: false,
                content: b"",
                created: at(2023, 1, 10, 9, 0, 0, 250),
                modified: at(2023, 3, 1, 12, 30, 10, 500),
                accessed: at(2023, 3, 2, 8, 15, 0, 125),
            },
            SyntheticNode {
                record_id: 2,
                parent_id: None,
                path: "/Pictures",
                is_directory: true,
                is_deleted: false,
                content: b"",
                created: at(2023, 1, 10, 9, 0, 1, 750),
                modified: at(2023, 2, 14, 18, 45, 3, 20),
                accessed: at(2023, 2, 14, 18, 45, 3, 20),
            },
            SyntheticNode {
                record_id: 3,
                parent_id: None,
                path: "/system.log",
                is_directory: false,
                is_deleted: false,
                content: b"2023-03-01 boot ok\n2023-03-02 shutdown\n",
                created: at(2023, 1, 10, 9, 0, 2, 10),
                modified: at(2023, 3, 2, 17, 59, 59, 990),
                accessed: at(2023, 3, 2, 18, 0, 0, 5),
            },
            SyntheticNode {
                record_id: 4,
                parent_id: Some(1),
                path: "/Documents/report.docx",
                is_directory: false,
                is_deleted: false,
                content: b"PK\x03\x04 quarterly report",
                created: at(2023, 2, 1, 10, 0, 0, 300),
                modified: at(2023, 2, 28, 16, 20, 45, 610),
                accessed: at(2023, 3, 1, 9, 5, 12, 40),
            },
            SyntheticNode {
                record_id: 5,
                parent_id: Some(1),
                path: "/Documents/notes.txt",
                is_directory: false,
                is_deleted: true,
                content: b"meeting notes, do not share\n",
                created: at(2023, 2, 3, 11, 11, 11, 110),
                modified: at(2023, 2, 3, 11, 40, 2, 870),
                accessed: at(2023, 2, 4, 7, 0, 0, 330),
            },
            SyntheticNode {
                record_id: 6,
                parent_id: Some(1),
                path: "/Documents/old_drafts",
                is_directory: true,
                is_deleted: true,
                content: b"",
                created: at(2022, 11, 5, 14, 0, 0, 450),
                modified: at(2022, 12, 1, 9, 30, 0, 200),
                accessed: at(2022, 12, 1, 9, 30, 0, 200),
            },
            SyntheticNode {
                record_id: 7,
                parent_id: Some(6),
                path: "/Documents/old_drafts/draft1.txt",
                is_directory: false,
                is_deleted: true,
                content: b"first draft\n",
                created: at(2022, 11, 5, 14, 1, 0, 900),
                modified: at(2022, 11, 6, 10, 0, 0, 120),
                accessed: at(2022, 11, 6, 10, 0, 0, 120),
            },
            SyntheticNode {
                record_id: 8,
                parent_id: Some(2),
                path: "/Pictures/holiday.jpg",
                is_directory: false,
                is_deleted: false,
                content: HOLIDAY_JPG,
                created: at(2020, 1, 1, 0, 0, 0, 0),
                modified: at(2020, 1, 1, 0, 0, 0, 0),
                accessed: at(2020, 1, 1, 0, 0, 0, 0),
            },
            SyntheticNode {
                record_id: 9,
                parent_id: Some(2),
                path: "/Pictures/backup.zip",
                is_directory: false,
                is_deleted: false,
                content: b"PK\x05\x06",
                created: at(2023, 2, 20, 12, 0, 0, 700),
                modified: at(2023, 2, 10, 8, 30, 0, 150),
                accessed: at(2023, 2, 21, 9, 0, 0, 40),
            },
        ];
        Self { nodes }
    }

    fn find(&self, path: &str) -> Option<&SyntheticNode> {
        let wanted: Vec<&str> = fs::components(path).collect();
        self.nodes
            .iter()
            .find(|n| fs::components(n.path).eq(wanted.iter().copied()))
    }

    fn to_entry(node: &SyntheticNode) -> FileEntry {
        let name = node.path.rsplit('/').next().unwrap_or_default().to_string();
        FileEntry {
            name,
            path: node.path.to_string(),
            size: node.content.len() as u64,
            is_directory: node.is_directory,
            is_deleted: node.is_deleted,
            created_at: node.created,
            modified_at: node.modified,
            accessed_at: node.accessed,
            record_id: Some(node.record_id),
            parent_id: node.parent_id,
            attributes: BTreeMap::from([("fs".to_string(), "synthetic".to_string())]),
            children: Vec::new(),
        }
    }
}

impl Default for SyntheticFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for SyntheticFileSystem {
    fn kind(&self) -> FileSystemKind {
        FileSystemKind::Synthetic
    }

    fn list_directory(&self, path: &str) -> Result<Vec<FileEntry>> {
        let parent_id = if fs::components(path).next().is_none() {
            None
        } else {
            match self.find(path) {
                Some(node) if node.is_directory => Some(node.record_id),
                Some(_) => {
                    return Err(ForensicsError::NotFound(format!("{} is not a directory", path)))
                }
                None => return Err(ForensicsError::NotFound(path.to_string())),
            }
        };

        Ok(self
            .nodes
            .iter()
            .filter(|n| n.parent_id == parent_id)
            .map(Self::to_entry)
            .collect())
    }

    fn read_content(&self, path: &str) -> Option<Vec<u8>> {
        self.find(path)
            .filter(|n| !n.is_directory)
            .map(|n| n.content.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_partition() {
        let image = SyntheticImage::new();
        let parts = image.partitions().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].label, "Synthetic Partition");
        assert_eq!(parts[0].length, 1024 * 1024);
    }

    #[test]
    fn test_root_listing() {
        let fs = SyntheticFileSystem::new();
        let names: Vec<String> =
            fs.list_directory("/").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["Documents", "Pictures", "system.log"]);
    }

    #[test]
    fn test_content_and_errors() {
        let fs = SyntheticFileSystem::new();
        assert_eq!(fs.read_content("/Pictures/holiday.jpg").unwrap(), HOLIDAY_JPG);
        assert!(fs.read_content("/Pictures").is_none());
        assert!(fs.read_content("/nope").is_none());
        assert!(matches!(fs.list_directory("/nope"), Err(ForensicsError::NotFound(_))));
        assert!(fs.list_directory("/system.log").is_err());
    }

    #[test]
    fn test_with_bytes_has_no_file_system() {
        let image = SyntheticImage::with_bytes(vec![0u8; 512]);
        assert!(image.built_in_file_system(0).is_none());
        assert_eq!(image.partitions().unwrap()[0].label, "Whole Disk");
    }
}
