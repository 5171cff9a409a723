//! Evidence image access: raw, EWF and synthetic backends behind one trait.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{ForensicsError, Result};
use crate::fs::{self, FileSystem};

pub mod ewf;
pub mod null;
pub mod partition;
pub mod raw;

pub use ewf::EwfImage;
pub use null::SyntheticImage;
pub use partition::Partition;
pub use raw::RawImage;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Raw,
    Ewf,
    Synthetic,
}

impl std::fmt::Display for ImageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageKind::Raw => write!(f, "raw"),
            ImageKind::Ewf => write!(f, "EWF"),
            ImageKind::Synthetic => write!(f, "synthetic"),
        }
    }
}

/// Random-access view of an evidence image.
///
/// Reads take `&self` so one handle can serve the walker and the carver in
/// turn. `read_at` returns fewer bytes than requested at the end of the image
/// and an empty buffer past it; only a closed handle or a backend failure is
/// an error.
pub trait DiskImage: Send + Sync {
    fn kind(&self) -> ImageKind;

    /// Logical media size in bytes
    fn size(&self) -> u64;

    fn read_at(&self, offset: u64, length: usize) -> Result<Vec<u8>>;

    /// Release backing resources. Safe to call more than once.
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Container metadata such as stored acquisition hashes
    fn metadata(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn partitions(&self) -> Result<Vec<Partition>> {
        partition::read_partitions(self)
    }

    /// Backends that carry their own file system (the synthetic double)
    /// return it here instead of having it parsed from bytes.
    fn built_in_file_system(&self, _offset: u64) -> Option<Box<dyn FileSystem>> {
        None
    }
}

/// How [`open_image`] picks a backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImageBackend {
    /// EWF when the file carries the EWF signature, raw otherwise
    #[default]
    Auto,
    Raw,
    Ewf,
    /// In-memory test double; the path is only used as a label
    Synthetic,
}

/// An opened evidence image
#[derive(Clone)]
pub struct EvidenceImage {
    backend: Arc<dyn DiskImage>,
    path: PathBuf,
}

impl std::fmt::Debug for EvidenceImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvidenceImage")
            .field("path", &self.path)
            .field("kind", &self.backend.kind())
            .field("size", &self.backend.size())
            .finish()
    }
}

/// Open an image file with automatic backend detection
pub fn open_image(path: impl AsRef<Path>) -> Result<EvidenceImage> {
    EvidenceImage::open_with(path, ImageBackend::Auto)
}

impl EvidenceImage {
    pub fn open_with(path: impl AsRef<Path>, backend: ImageBackend) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let backend: Arc<dyn DiskImage> = match backend {
            ImageBackend::Synthetic => Arc::new(SyntheticImage::new()),
            ImageBackend::Raw => Arc::new(RawImage::open(&path)?),
            ImageBackend::Ewf => Arc::new(EwfImage::open(&path)?),
            ImageBackend::Auto => {
                if ewf::has_ewf_signature(&path)? {
                    Arc::new(EwfImage::open(&path)?)
                } else {
                    Arc::new(RawImage::open(&path)?)
                }
            }
        };

        tracing::info!(
            "Opened {} image {} ({} bytes)",
            backend.kind(),
            path.display(),
            backend.size()
        );

        Ok(Self { backend, path })
    }

    /// Wrap an already constructed backend
    pub fn from_backend(backend: Arc<dyn DiskImage>, path: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backend(&self) -> Arc<dyn DiskImage> {
        Arc::clone(&self.backend)
    }

    pub fn kind(&self) -> ImageKind {
        self.backend.kind()
    }

    pub fn size(&self) -> u64 {
        self.backend.size()
    }

    pub fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        self.backend.read_at(offset, length)
    }

    pub fn metadata(&self) -> BTreeMap<String, String> {
        self.backend.metadata()
    }

    pub fn partitions(&self) -> Result<Vec<Partition>> {
        self.backend.partitions()
    }

    /// Open the file system starting at byte `offset`
    pub fn open_file_system(&self, offset: u64) -> Result<Box<dyn FileSystem>> {
        if self.backend.is_closed() {
            return Err(ForensicsError::FileSystemOpen {
                offset,
                reason: "image is closed".to_string(),
            });
        }
        if let Some(fs) = self.backend.built_in_file_system(offset) {
            return Ok(fs);
        }
        fs::open_file_system(Arc::clone(&self.backend), offset)
    }

    pub fn close(&self) {
        if !self.backend.is_closed() {
            tracing::debug!("Closing image {}", self.path.display());
        }
        self.backend.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_auto_opens_raw() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0xAB; 4096]).unwrap();

        let image = open_image(file.path()).unwrap();
        assert_eq!(image.kind(), ImageKind::Raw);
        assert_eq!(image.size(), 4096);
        assert_eq!(image.read(4090, 100).unwrap().len(), 6);
        assert!(image.read(5000, 10).unwrap().is_empty());
    }

    #[test]
    fn test_missing_file_is_image_open_error() {
        let err = open_image("/nonexistent/evidence.dd").unwrap_err();
        assert!(matches!(err, ForensicsError::ImageOpen { .. }));
    }

    #[test]
    fn test_close_is_idempotent() {
        let image = EvidenceImage::open_with("synthetic", ImageBackend::Synthetic).unwrap();
        assert_eq!(image.read(0, 16).unwrap(), vec![0u8; 16]);

        image.close();
        image.close();
        assert!(matches!(image.read(0, 16), Err(ForensicsError::Read { .. })));
        assert!(matches!(
            image.open_file_system(0),
            Err(ForensicsError::FileSystemOpen { .. })
        ));
    }

    #[test]
    fn test_whole_disk_fallback() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![0u8; 8192]).unwrap();

        let image = open_image(file.path()).unwrap();
        let parts = image.partitions().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].label, "Whole Disk");
        assert_eq!(parts[0].start, 0);
        assert_eq!(parts[0].length, 8192);
    }
}
