//! Signature-based file carving over raw image bytes

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::signatures::{self, FileSignature};
use super::validate::StructureCheck;
use crate::config::CarvingConfig;
use crate::error::{ForensicsError, Result};
use crate::image::{open_image, DiskImage};
use crate::integrity::hashing::MultiHasher;
use crate::task::{percent_of, TaskContext};
use crate::CarvedFile;

const MIB: u64 = 1024 * 1024;

/// Per-read size while extracting one candidate
const EXTRACT_READ_SIZE: usize = 1024 * 1024;

/// Bytes at the start of a carve that feed the output filename
const NAME_PREFIX_BYTES: usize = 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CarveMode {
    /// Header/footer extraction only
    #[default]
    Basic,
    /// Structural validation before a carve is written
    Smart,
}

/// Result of a carving run; partial when cancelled
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CarveOutcome {
    pub files: Vec<CarvedFile>,
    pub cancelled: bool,
    pub bytes_scanned: u64,
}

struct Candidate {
    signature: &'static FileSignature,
    offset: u64,
}

/// Scans an image for known headers and writes out what it can recover
pub struct FileCarver {
    config: CarvingConfig,
    signatures: Vec<&'static FileSignature>,
}

impl FileCarver {
    /// Carver for every registered type
    pub fn new(config: CarvingConfig) -> Self {
        Self {
            config,
            signatures: signatures::registry().values().collect(),
        }
    }

    /// Restrict carving to these tags. Unknown tags are ignored with a warning;
    /// an empty list keeps every registered type.
    pub fn with_types<S: AsRef<str>>(mut self, tags: &[S]) -> Self {
        if tags.is_empty() {
            return self;
        }

        let mut selected: Vec<&'static FileSignature> = Vec::new();
        for tag in tags {
            let tag = tag.as_ref().trim().to_ascii_lowercase();
            match signatures::signature(&tag) {
                Some(sig) if !selected.contains(&sig) => selected.push(sig),
                Some(_) => {}
                None => tracing::warn!("Unknown file type '{}' ignored", tag),
            }
        }
        self.signatures = selected;
        self
    }

    pub fn types(&self) -> Vec<&'static str> {
        self.signatures.iter().map(|s| s.extension).collect()
    }

    pub fn config(&self) -> &CarvingConfig {
        &self.config
    }

    /// Scan the whole image and write every accepted carve into `output_dir`
    pub fn carve(
        &self,
        image: &dyn DiskImage,
        output_dir: &Path,
        ctx: &TaskContext,
    ) -> Result<CarveOutcome> {
        if image.is_closed() {
            return Err(ForensicsError::read(0, "image is closed"));
        }
        std::fs::create_dir_all(output_dir)?;

        let patterns: Vec<(&'static FileSignature, &'static [u8])> = self
            .signatures
            .iter()
            .flat_map(|sig| signatures::headers_for(sig).into_iter().map(move |h| (*sig, h)))
            .collect();
        let longest_header = patterns.iter().map(|(_, h)| h.len()).max().unwrap_or(0);
        let keep = self.config.tail_size.max(longest_header.saturating_sub(1));
        let chunk_size = self.config.chunk_size.max(1);
        let image_size = image.size();

        tracing::info!(
            "Carving {} bytes for [{}] in {:?} mode",
            image_size,
            self.types().join(", "),
            self.config.mode
        );

        let mut outcome = CarveOutcome::default();
        let mut attempted: HashSet<(&'static str, u64)> = HashSet::new();
        let mut tail: Vec<u8> = Vec::new();
        let mut offset = 0u64;

        while offset < image_size {
            if ctx.is_cancelled() {
                tracing::info!("Carving cancelled at offset {}", offset);
                outcome.cancelled = true;
                break;
            }

            let chunk = match image.read_at(offset, chunk_size) {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!("Skipping chunk at offset {}: {}", offset, e);
                    tail.clear();
                    offset += chunk_size as u64;
                    continue;
                }
            };
            if chunk.is_empty() {
                break;
            }

            let mut buffer = std::mem::take(&mut tail);
            let base = offset - buffer.len() as u64;
            buffer.extend_from_slice(&chunk);

            // Offsets before the retained tail can never be seen again
            attempted.retain(|(_, seen)| *seen >= base);

            let mut candidates = Vec::new();
            for &(sig, header) in &patterns {
                for pos in find_all(&buffer, header) {
                    let abs = base + pos as u64;
                    if attempted.insert((sig.extension, abs)) {
                        candidates.push(Candidate { signature: sig, offset: abs });
                    }
                }
            }
            candidates.sort_by_key(|c| (c.offset, c.signature.extension));

            for candidate in candidates {
                let carved = self.carve_candidate(image, &candidate, image_size, output_dir);
                if let Some(file) = carved {
                    outcome.files.push(file);
                }
            }

            offset += chunk.len() as u64;
            outcome.bytes_scanned = offset;
            ctx.report(
                percent_of(offset, image_size),
                format!("Scanning: {} MB / {} MB", offset / MIB, image_size / MIB),
            );

            let start = buffer.len().saturating_sub(keep);
            tail = buffer.split_off(start);
        }

        tracing::info!("Carved {} files from {} bytes", outcome.files.len(), outcome.bytes_scanned);
        Ok(outcome)
    }

    /// Stream one candidate into a partial file and publish it once it passes
    /// the size and structure checks. Rejected candidates leave nothing behind.
    fn carve_candidate(
        &self,
        image: &dyn DiskImage,
        candidate: &Candidate,
        image_size: u64,
        output_dir: &Path,
    ) -> Option<CarvedFile> {
        let sig = candidate.signature;
        let partial =
            output_dir.join(format!(".carving_{}_{}.part", candidate.offset, sig.extension));
        let mut out = match File::create(&partial) {
            Ok(file) => BufWriter::new(file),
            Err(e) => {
                tracing::warn!("Failed to create {}: {}", partial.display(), e);
                return None;
            }
        };

        let mut hasher = MultiHasher::new(&[self.config.content_hash]);
        let mut structure =
            (self.config.mode == CarveMode::Smart).then(|| StructureCheck::new(sig.extension));
        let mut prefix: Vec<u8> = Vec::with_capacity(NAME_PREFIX_BYTES);

        let streamed = stream_candidate(image, sig, candidate.offset, image_size, |bytes| {
            hasher.update(bytes);
            if let Some(structure) = structure.as_mut() {
                structure.update(bytes);
            }
            let room = NAME_PREFIX_BYTES - prefix.len();
            prefix.extend_from_slice(&bytes[..bytes.len().min(room)]);
            out.write_all(bytes)
        })
        .and_then(|extent| {
            out.flush()?;
            Ok(extent)
        });
        drop(out);

        let (size, footer_found) = match streamed {
            Ok(extent) => extent,
            Err(e) => {
                tracing::warn!(
                    "Skipping {} candidate at {}: {}",
                    sig.extension,
                    candidate.offset,
                    e
                );
                discard(&partial);
                return None;
            }
        };

        if size < self.config.min_file_size {
            tracing::trace!(
                "{} candidate at {} too small ({} bytes)",
                sig.extension,
                candidate.offset,
                size
            );
            discard(&partial);
            return None;
        }

        if let Some(Err(failure)) = structure.as_ref().map(StructureCheck::finish) {
            tracing::debug!("Discarding candidate at {}: {}", candidate.offset, failure);
            discard(&partial);
            return None;
        }

        let created_at = Utc::now();
        let name_hash = format!("{:x}", md5::compute(&prefix));
        let stem = format!("carved_{}_{}", created_at.format("%Y%m%d_%H%M%S"), &name_hash[..8]);
        let (filename, path) = unique_output_path(output_dir, &stem, sig.extension);

        if let Err(e) = std::fs::rename(&partial, &path) {
            tracing::warn!("Failed to move carve into {}: {}", path.display(), e);
            discard(&partial);
            return None;
        }

        let content_hash = hasher
            .finalize()
            .remove(&self.config.content_hash)
            .unwrap_or_default();

        tracing::debug!(
            "Carved {} ({} bytes, footer: {}) from offset {}",
            filename,
            size,
            footer_found,
            candidate.offset
        );

        Some(CarvedFile {
            filename,
            path,
            file_type: sig.extension.to_string(),
            size,
            offset: candidate.offset,
            footer_found,
            content_hash,
            created_at,
        })
    }
}

fn discard(partial: &Path) {
    if let Err(e) = std::fs::remove_file(partial) {
        tracing::warn!("Failed to remove {}: {}", partial.display(), e);
    }
}

/// Open the image at `image_path` and carve it. An unopenable image is fatal.
pub fn carve_path(
    image_path: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    config: &CarvingConfig,
    types: &[String],
    ctx: &TaskContext,
) -> Result<CarveOutcome> {
    let image = open_image(image_path)?;
    let carver = FileCarver::new(config.clone()).with_types(types);
    let result = carver.carve(image.backend().as_ref(), output_dir.as_ref(), ctx);
    image.close();
    result
}

/// Feed the bytes from `offset` to `sink` until the footer, the size cap or the
/// image end. Returns the carve length and whether the footer ended it.
///
/// Only the last `footer.len() - 1` bytes are held between reads.
fn stream_candidate<F>(
    image: &dyn DiskImage,
    sig: &FileSignature,
    offset: u64,
    image_size: u64,
    mut sink: F,
) -> Result<(u64, bool)>
where
    F: FnMut(&[u8]) -> io::Result<()>,
{
    let limit = sig.max_size.min(image_size.saturating_sub(offset));
    let header_len = sig.header.map_or(0, <[u8]>::len) as u64;
    let mut written = 0u64;
    let mut carry: Vec<u8> = Vec::new();

    while written < limit {
        let want = (limit - written).min(EXTRACT_READ_SIZE as u64) as usize;
        let chunk = image.read_at(offset + written, want)?;
        if chunk.is_empty() {
            break;
        }

        if let Some(footer) = sig.footer {
            // Footer may straddle the previous read, but never overlaps the header
            let window_start = written - carry.len() as u64;
            let mut window = std::mem::take(&mut carry);
            window.extend_from_slice(&chunk);

            let skip = header_len.saturating_sub(window_start) as usize;
            let hit = window.get(skip..).and_then(|rest| find_all(rest, footer).next());
            if let Some(pos) = hit {
                let end = window_start + (skip + pos + footer.len()) as u64;
                sink(&chunk[..(end - written) as usize])?;
                return Ok((end, true));
            }

            let keep = footer.len().saturating_sub(1).min(window.len());
            carry = window.split_off(window.len() - keep);
        }

        sink(&chunk)?;
        written += chunk.len() as u64;
    }

    Ok((written, false))
}

/// `stem.ext`, or `stem_<n>.ext` for the first n that is free
fn unique_output_path(dir: &Path, stem: &str, ext: &str) -> (String, PathBuf) {
    let mut filename = format!("{}.{}", stem, ext);
    let mut n = 1;
    while dir.join(&filename).exists() {
        filename = format!("{}_{}.{}", stem, n, ext);
        n += 1;
    }
    let path = dir.join(&filename);
    (filename, path)
}

/// Every start position of `needle` in `haystack`, overlapping matches included
fn find_all<'a>(haystack: &'a [u8], needle: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
    let mut pos = 0usize;
    std::iter::from_fn(move || {
        if needle.is_empty() {
            return None;
        }
        while pos + needle.len() <= haystack.len() {
            let start = pos + haystack[pos..].iter().position(|&b| b == needle[0])?;
            pos = start + 1;
            if haystack[start..].starts_with(needle) {
                return Some(start);
            }
        }
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::null::SyntheticImage;

    fn config(min: u64) -> CarvingConfig {
        CarvingConfig {
            chunk_size: 4096,
            tail_size: 64,
            min_file_size: min,
            ..Default::default()
        }
    }

    #[test]
    fn test_find_all_overlapping() {
        let hits: Vec<usize> = find_all(b"aaaa", b"aa").collect();
        assert_eq!(hits, vec![0, 1, 2]);
        assert_eq!(find_all(b"xyz", b"q").count(), 0);
        assert_eq!(find_all(b"ab", b"abc").count(), 0);
    }

    fn streamed(image: &SyntheticImage, tag: &str, offset: u64) -> (Vec<u8>, bool) {
        let sig = signatures::signature(tag).unwrap();
        let mut data = Vec::new();
        let (len, found) = stream_candidate(image, sig, offset, image.size(), |bytes| {
            data.extend_from_slice(bytes);
            Ok(())
        })
        .unwrap();
        assert_eq!(len, data.len() as u64);
        (data, found)
    }

    #[test]
    fn test_stream_ignores_footer_inside_header() {
        let mut bytes = vec![0x41u8; 100];
        bytes.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xD9, 0x00]);
        bytes.extend(std::iter::repeat(0x41).take(50));
        let image = SyntheticImage::with_bytes(bytes);

        // FF D9 overlapping the header's last byte is not a footer
        let (data, found) = streamed(&image, "jpg", 100);
        assert!(!found);
        assert_eq!(data.len(), 55);
    }

    #[test]
    fn test_stream_footer_across_reads() {
        // Footer split over the boundary between the first and second read
        let mut bytes = vec![0xFF, 0xD8, 0xFF];
        bytes.resize(EXTRACT_READ_SIZE - 1, 0x00);
        bytes.extend_from_slice(&[0xFF, 0xD9]);
        bytes.extend(std::iter::repeat(0x41).take(100));
        let image = SyntheticImage::with_bytes(bytes);

        let (data, found) = streamed(&image, "jpg", 0);
        assert!(found);
        assert_eq!(data.len(), EXTRACT_READ_SIZE + 1);
        assert!(data.ends_with(&[0xFF, 0xD9]));
    }

    #[test]
    fn test_rejected_candidates_leave_no_partial_files() {
        let mut bytes = vec![0xFF, 0xD8, 0xFF];
        bytes.resize(5000, 0x00);
        let image = SyntheticImage::with_bytes(bytes);
        let dir = tempfile::tempdir().unwrap();

        let mut cfg = config(512);
        cfg.mode = CarveMode::Smart;
        let outcome = FileCarver::new(cfg)
            .with_types(&["jpg"])
            .carve(&image, dir.path(), &TaskContext::detached())
            .unwrap();
        assert!(outcome.files.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let outcome = FileCarver::new(config(512))
            .with_types(&["jpg"])
            .carve(&image, dir.path(), &TaskContext::detached())
            .unwrap();
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![outcome.files[0].filename.clone()]);
        assert_eq!(std::fs::metadata(&outcome.files[0].path).unwrap().len(), 5000);
    }

    #[test]
    fn test_unique_output_path() {
        let dir = tempfile::tempdir().unwrap();
        let (name, path) = unique_output_path(dir.path(), "carved_x", "jpg");
        assert_eq!(name, "carved_x.jpg");
        std::fs::write(&path, b"1").unwrap();
        let (name, _) = unique_output_path(dir.path(), "carved_x", "jpg");
        assert_eq!(name, "carved_x_1.jpg");
    }

    #[test]
    fn test_with_types_filters_unknown() {
        let carver = FileCarver::new(config(512)).with_types(&["JPG", "bogus", "jpg", "pdf"]);
        assert_eq!(carver.types(), vec!["jpg", "pdf"]);
        let all = FileCarver::new(config(512)).with_types::<&str>(&[]);
        assert_eq!(all.types().len(), 10);
    }

    #[test]
    fn test_closed_image_rejected() {
        let image = SyntheticImage::with_bytes(vec![0u8; 1024]);
        image.close();
        let dir = tempfile::tempdir().unwrap();
        let err = FileCarver::new(config(512))
            .carve(&image, dir.path(), &TaskContext::detached())
            .unwrap_err();
        assert!(matches!(err, ForensicsError::Read { .. }));
    }

    #[test]
    fn test_smart_mode_discards_invalid() {
        // PNG header without IEND
        let mut bytes = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend(std::iter::repeat(0x41).take(2000));
        let image = SyntheticImage::with_bytes(bytes);
        let dir = tempfile::tempdir().unwrap();

        let mut cfg = config(512);
        cfg.mode = CarveMode::Smart;
        let outcome = FileCarver::new(cfg)
            .with_types(&["png"])
            .carve(&image, dir.path(), &TaskContext::detached())
            .unwrap();
        assert!(outcome.files.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let outcome = FileCarver::new(config(512))
            .with_types(&["png"])
            .carve(&image, dir.path(), &TaskContext::detached())
            .unwrap();
        assert_eq!(outcome.files.len(), 1);
        assert!(!outcome.files[0].footer_found);
    }

    #[test]
    fn test_progress_messages() {
        let image = SyntheticImage::with_bytes(vec![0u8; 3 * 4096]);
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let ctx = TaskContext::new(Default::default(), tx);

        let outcome = FileCarver::new(config(512)).carve(&image, dir.path(), &ctx).unwrap();
        assert_eq!(outcome.bytes_scanned, 3 * 4096);
        drop(ctx);

        let events: Vec<_> = rx.iter().collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].percent, 33);
        assert_eq!(events[2].percent, 100);
        assert_eq!(events[2].message, "Scanning: 0 MB / 0 MB");
    }
}
