//! File system detection, the walkable file system trait and traversal

use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod exfat;
pub mod walker;

use crate::error::{ForensicsError, Result};
use crate::image::DiskImage;
use crate::FileEntry;

pub use walker::{build_tree, walk, walk_with_progress, Walk, WalkOutcome};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileSystemKind {
    ExFat,
    Ntfs,
    Fat12,
    Fat16,
    Fat32,
    Ext,
    Synthetic,
}

impl std::fmt::Display for FileSystemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileSystemKind::ExFat => write!(f, "exFAT"),
            FileSystemKind::Ntfs => write!(f, "NTFS"),
            FileSystemKind::Fat12 => write!(f, "FAT12"),
            FileSystemKind::Fat16 => write!(f, "FAT16"),
            FileSystemKind::Fat32 => write!(f, "FAT32"),
            FileSystemKind::Ext => write!(f, "ext2/3/4"),
            FileSystemKind::Synthetic => write!(f, "synthetic"),
        }
    }
}

/// A file system that can be listed and read.
///
/// Paths are absolute, `/`-separated and rooted at `/`.
pub trait FileSystem: Send + Sync {
    fn kind(&self) -> FileSystemKind;

    /// Entries directly inside `path`, deleted ones included, without `.`/`..`
    fn list_directory(&self, path: &str) -> Result<Vec<FileEntry>>;

    /// Content of a regular file; `None` for directories, missing paths and
    /// unreadable data
    fn read_content(&self, path: &str) -> Option<Vec<u8>>;
}

/// Identify the file system whose boot sector starts at `offset`
pub fn detect_file_system<I: DiskImage + ?Sized>(
    image: &I,
    offset: u64,
) -> Result<Option<FileSystemKind>> {
    let boot = image.read_at(offset, 512)?;
    if boot.len() < 512 {
        return Ok(None);
    }

    // exFAT (boot sector at sector 0)
    if exfat::is_exfat_boot_sector(&boot) {
        return Ok(Some(FileSystemKind::ExFat));
    }

    if &boot[3..11] == b"NTFS    " {
        return Ok(Some(FileSystemKind::Ntfs));
    }

    if boot[510] == 0x55 && boot[511] == 0xAA {
        if &boot[82..90] == b"FAT32   " {
            return Ok(Some(FileSystemKind::Fat32));
        }
        if &boot[54..62] == b"FAT16   " {
            return Ok(Some(FileSystemKind::Fat16));
        }
        if &boot[54..62] == b"FAT12   " {
            return Ok(Some(FileSystemKind::Fat12));
        }
    }

    // ext2/3/4 (superblock at 1024, magic at +56)
    let magic = image.read_at(offset + 1024 + 56, 2)?;
    if magic == [0x53, 0xEF] {
        return Ok(Some(FileSystemKind::Ext));
    }

    Ok(None)
}

/// Open the file system at `offset` of `image`
pub fn open_file_system(image: Arc<dyn DiskImage>, offset: u64) -> Result<Box<dyn FileSystem>> {
    let kind =
        detect_file_system(image.as_ref(), offset).map_err(|e| ForensicsError::FileSystemOpen {
            offset,
            reason: e.to_string(),
        })?;

    match kind {
        Some(FileSystemKind::ExFat) => {
            let fs = exfat::ExFatFileSystem::open(image, offset).map_err(|e| {
                ForensicsError::FileSystemOpen {
                    offset,
                    reason: format!("{:#}", e),
                }
            })?;
            tracing::info!("Opened exFAT file system at offset {}", offset);
            Ok(Box::new(fs))
        }
        Some(other) => Err(ForensicsError::FileSystemOpen {
            offset,
            reason: format!("{} detected but not supported for walking", other),
        }),
        None => Err(ForensicsError::FileSystemOpen {
            offset,
            reason: "no recognizable file system".to_string(),
        }),
    }
}

/// Join a directory path and an entry name
pub(crate) fn join_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Split a path into its components, ignoring empty ones
pub(crate) fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty() && *c != ".")
}
