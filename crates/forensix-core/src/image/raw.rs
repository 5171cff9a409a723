//! Raw (dd-style) images served from a memory map

use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::{DiskImage, ImageKind};
use crate::error::{ForensicsError, Result};

/// A memory-mapped image file
pub struct RawImage {
    path: PathBuf,
    // None once closed
    mmap: RwLock<Option<Mmap>>,
    size: u64,
}

impl RawImage {
    /// Open a raw image file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| ForensicsError::image_open(&path, e))?;
        let size = file
            .metadata()
            .map_err(|e| ForensicsError::image_open(&path, e))?
            .len();

        if size == 0 {
            return Err(ForensicsError::image_open(&path, "image is empty"));
        }

        // SAFETY: evidence is opened read-only; the map never outlives `self`.
        let mmap = unsafe { MmapOptions::new().map(&file) }
            .map_err(|e| ForensicsError::image_open(&path, e))?;

        Ok(RawImage {
            path,
            mmap: RwLock::new(Some(mmap)),
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DiskImage for RawImage {
    fn kind(&self) -> ImageKind {
        ImageKind::Raw
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let guard = self
            .mmap
            .read()
            .map_err(|_| ForensicsError::read(offset, "image lock poisoned"))?;
        let mmap = guard
            .as_ref()
            .ok_or_else(|| ForensicsError::read(offset, "image is closed"))?;

        if offset >= mmap.len() as u64 {
            return Ok(Vec::new());
        }
        let start = offset as usize;
        let end = start.saturating_add(length).min(mmap.len());
        Ok(mmap[start..end].to_vec())
    }

    fn close(&self) {
        if let Ok(mut guard) = self.mmap.write() {
            guard.take();
        }
    }

    fn is_closed(&self) -> bool {
        self.mmap.read().map(|g| g.is_none()).unwrap_or(true)
    }
}
