//! Expert Witness Format (E01) images
//!
//! Segment files `name.E01`, `name.E02`, ... each start with a 13-byte file
//! header followed by a chain of 76-byte section descriptors. Media data lives
//! in chunks referenced by `table` sections; chunks are either zlib streams or
//! stored verbatim.

use anyhow::{bail, Context};
use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;
use memmap2::{Mmap, MmapOptions};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::trace;

use super::{DiskImage, ImageKind};
use crate::error::{ForensicsError, Result};

pub const EVF_SIGNATURE: [u8; 8] = [0x45, 0x56, 0x46, 0x09, 0x0D, 0x0A, 0xFF, 0x00];
const FILE_HEADER_SIZE: u64 = 13;
const SECTION_DESCRIPTOR_SIZE: u64 = 76;
const TABLE_HEADER_SIZE: u64 = 24;
const MAX_SECTIONS: usize = 10_000;
const MAX_SEGMENTS: u32 = 99;
const CACHE_ENTRIES: usize = 64;
const COMPRESSED_FLAG: u32 = 0x8000_0000;

/// Check the first bytes of `path` for the EWF signature
pub fn has_ewf_signature(path: &Path) -> Result<bool> {
    let mut file = File::open(path).map_err(|e| ForensicsError::image_open(path, e))?;
    let mut magic = [0u8; 8];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == EVF_SIGNATURE),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(ForensicsError::image_open(path, e)),
    }
}

/// `image.E01` -> [`image.E01`, `image.E02`, ...] for every segment present on disk
pub fn discover_segments(first: &Path) -> Vec<PathBuf> {
    let mut segments = vec![first.to_path_buf()];

    let Some(ext) = first.extension().and_then(|e| e.to_str()) else {
        return segments;
    };
    let mut chars = ext.chars();
    let Some(prefix) = chars.next() else {
        return segments;
    };
    if ext.len() != 3 || chars.as_str().parse::<u32>().ok() != Some(1) {
        return segments;
    }

    for number in 2..=MAX_SEGMENTS {
        let candidate = first.with_extension(format!("{}{:02}", prefix, number));
        if !candidate.exists() {
            break;
        }
        segments.push(candidate);
    }
    segments
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeInfo {
    pub chunk_count: u32,
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub sector_count: u64,
}

impl VolumeInfo {
    pub fn chunk_size(&self) -> usize {
        self.sectors_per_chunk as usize * self.bytes_per_sector as usize
    }

    pub fn media_size(&self) -> u64 {
        self.sector_count * self.bytes_per_sector as u64
    }
}

#[derive(Debug, Clone, Copy)]
struct ChunkLocation {
    segment: usize,
    offset: u64,
    compressed: bool,
}

#[derive(Debug)]
struct SectionDescriptor {
    kind: String,
    next: u64,
    size: u64,
}

#[derive(Default)]
struct SectionWalk {
    volume: Option<VolumeInfo>,
    chunks: Vec<ChunkLocation>,
    stored_md5: Option<String>,
    header: BTreeMap<String, String>,
}

/// Least-recently-used cache of decoded chunks
struct ChunkCache {
    entries: HashMap<usize, Arc<Vec<u8>>>,
    order: VecDeque<usize>,
    capacity: usize,
}

impl ChunkCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn get(&mut self, index: usize) -> Option<Arc<Vec<u8>>> {
        let data = self.entries.get(&index).cloned()?;
        self.order.retain(|&i| i != index);
        self.order.push_front(index);
        Some(data)
    }

    fn insert(&mut self, index: usize, data: Arc<Vec<u8>>) {
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_back() {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(index, data);
        self.order.push_front(index);
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// An opened EWF segment set
pub struct EwfImage {
    path: PathBuf,
    // None once closed
    segments: RwLock<Option<Vec<Mmap>>>,
    volume: VolumeInfo,
    chunks: Vec<ChunkLocation>,
    cache: Mutex<ChunkCache>,
    stored_md5: Option<String>,
    header: BTreeMap<String, String>,
}

impl EwfImage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let segment_paths = discover_segments(&path);

        let mut maps = Vec::with_capacity(segment_paths.len());
        for segment in &segment_paths {
            let file = File::open(segment).map_err(|e| ForensicsError::image_open(segment, e))?;
            // SAFETY: segments are opened read-only and the maps live as long as the image.
            let map = unsafe { MmapOptions::new().map(&file) }
                .map_err(|e| ForensicsError::image_open(segment, e))?;
            maps.push(map);
        }

        let mut walk = SectionWalk::default();
        for (index, map) in maps.iter().enumerate() {
            walk_sections(index, map, &mut walk)
                .map_err(|e| {
                    ForensicsError::image_open(&segment_paths[index], format!("{:#}", e))
                })?;
        }

        let volume = walk
            .volume
            .ok_or_else(|| ForensicsError::image_open(&path, "no volume section found"))?;
        if volume.chunk_size() == 0 {
            return Err(ForensicsError::image_open(&path, "volume declares zero chunk size"));
        }

        let needed = volume.media_size().div_ceil(volume.chunk_size() as u64) as usize;
        if walk.chunks.len() < needed {
            tracing::warn!(
                "EWF table lists {} chunks, media needs {}; missing chunks will fail to read",
                walk.chunks.len(),
                needed
            );
        }

        tracing::debug!(
            "EWF {}: {} segment(s), {} chunks of {} bytes, {} bytes of media",
            path.display(),
            maps.len(),
            walk.chunks.len(),
            volume.chunk_size(),
            volume.media_size()
        );

        Ok(Self {
            path,
            segments: RwLock::new(Some(maps)),
            volume,
            chunks: walk.chunks,
            cache: Mutex::new(ChunkCache::new(CACHE_ENTRIES)),
            stored_md5: walk.stored_md5,
            header: walk.header,
        })
    }

    pub fn volume(&self) -> &VolumeInfo {
        &self.volume
    }

    /// MD5 recorded by the acquisition tool, if any
    pub fn stored_md5(&self) -> Option<&str> {
        self.stored_md5.as_deref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn chunk(&self, index: usize) -> Result<Arc<Vec<u8>>> {
        let chunk_start = index as u64 * self.volume.chunk_size() as u64;

        if let Ok(mut cache) = self.cache.lock() {
            if let Some(data) = cache.get(index) {
                return Ok(data);
            }
        }

        let guard = self
            .segments
            .read()
            .map_err(|_| ForensicsError::read(chunk_start, "image lock poisoned"))?;
        let segments = guard
            .as_ref()
            .ok_or_else(|| ForensicsError::read(chunk_start, "image is closed"))?;

        let location = self
            .chunks
            .get(index)
            .ok_or_else(|| {
                ForensicsError::read(chunk_start, format!("chunk {} not in any table", index))
            })?;
        let segment = segments
            .get(location.segment)
            .ok_or_else(|| ForensicsError::read(chunk_start, "chunk points at a missing segment"))?;

        let expected = (self.volume.media_size() - chunk_start)
            .min(self.volume.chunk_size() as u64) as usize;
        let mut data = self
            .decode_chunk(segment, location, self.next_offset(index))
            .map_err(|e| ForensicsError::read(chunk_start, format!("chunk {}: {:#}", index, e)))?;

        // Last chunk may be padded past the end of the media
        data.truncate(expected);
        if data.len() < expected {
            return Err(ForensicsError::read(
                chunk_start,
                format!("chunk {} decoded to {} of {} bytes", index, data.len(), expected),
            ));
        }

        let data = Arc::new(data);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(index, Arc::clone(&data));
        }
        Ok(data)
    }

    /// Start of the following chunk when it lives in the same segment
    fn next_offset(&self, index: usize) -> Option<u64> {
        let current = self.chunks.get(index)?;
        self.chunks
            .get(index + 1)
            .filter(|next| next.segment == current.segment && next.offset > current.offset)
            .map(|next| next.offset)
    }

    fn decode_chunk(
        &self,
        segment: &[u8],
        location: &ChunkLocation,
        next_offset: Option<u64>,
    ) -> anyhow::Result<Vec<u8>> {
        let chunk_size = self.volume.chunk_size();
        let start = location.offset as usize;
        if start >= segment.len() {
            bail!("offset {} beyond segment end {}", start, segment.len());
        }

        if location.compressed {
            let limit = next_offset
                .map(|n| n as usize)
                .unwrap_or_else(|| start.saturating_add(chunk_size * 2 + 64))
                .min(segment.len());
            let mut decoder = ZlibDecoder::new(&segment[start..limit]);
            let mut out = Vec::with_capacity(chunk_size);
            decoder
                .read_to_end(&mut out)
                .context("zlib decompression failed")?;
            Ok(out)
        } else {
            let end = start.saturating_add(chunk_size).min(segment.len());
            Ok(segment[start..end].to_vec())
        }
    }
}

impl DiskImage for EwfImage {
    fn kind(&self) -> ImageKind {
        ImageKind::Ewf
    }

    fn size(&self) -> u64 {
        self.volume.media_size()
    }

    fn read_at(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        if self.is_closed() {
            return Err(ForensicsError::read(offset, "image is closed"));
        }
        let size = self.size();
        if offset >= size {
            return Ok(Vec::new());
        }

        let end = offset.saturating_add(length as u64).min(size);
        let chunk_size = self.volume.chunk_size() as u64;
        let mut out = Vec::with_capacity((end - offset) as usize);
        let mut position = offset;

        while position < end {
            let index = (position / chunk_size) as usize;
            let within = (position % chunk_size) as usize;
            let chunk = self.chunk(index)?;
            let take = (chunk.len() - within).min((end - position) as usize);
            out.extend_from_slice(&chunk[within..within + take]);
            position += take as u64;
        }

        Ok(out)
    }

    fn close(&self) {
        if let Ok(mut guard) = self.segments.write() {
            guard.take();
        }
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    fn is_closed(&self) -> bool {
        self.segments.read().map(|g| g.is_none()).unwrap_or(true)
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        let mut meta = self.header.clone();
        meta.insert("format".into(), "EWF".into());
        meta.insert("chunk_size".into(), self.volume.chunk_size().to_string());
        meta.insert("bytes_per_sector".into(), self.volume.bytes_per_sector.to_string());
        meta.insert("sector_count".into(), self.volume.sector_count.to_string());
        if let Some(md5) = &self.stored_md5 {
            meta.insert("stored_md5".into(), md5.clone());
        }
        meta
    }
}

fn read_descriptor(data: &[u8], offset: u64) -> anyhow::Result<SectionDescriptor> {
    let start = offset as usize;
    if start + SECTION_DESCRIPTOR_SIZE as usize > data.len() {
        bail!("section descriptor at {} runs past end of segment", offset);
    }

    let raw = &data[start..start + SECTION_DESCRIPTOR_SIZE as usize];
    let kind = String::from_utf8_lossy(&raw[..16])
        .trim_end_matches('\0')
        .to_string();

    let mut cursor = Cursor::new(&raw[16..32]);
    let next = cursor.read_u64::<LittleEndian>()?;
    let size = cursor.read_u64::<LittleEndian>()?;

    Ok(SectionDescriptor { kind, next, size })
}

fn walk_sections(segment: usize, data: &[u8], walk: &mut SectionWalk) -> anyhow::Result<()> {
    if data.len() < FILE_HEADER_SIZE as usize || data[..8] != EVF_SIGNATURE {
        bail!("missing EWF signature");
    }

    let mut offset = FILE_HEADER_SIZE;
    for _ in 0..MAX_SECTIONS {
        let section = read_descriptor(data, offset)?;
        let body = offset + SECTION_DESCRIPTOR_SIZE;
        trace!(
            "EWF segment {} section '{}' at {} (next {}, size {})",
            segment,
            section.kind,
            offset,
            section.next,
            section.size
        );

        match section.kind.as_str() {
            "header" => match parse_header(data, body, &section) {
                Ok(fields) => walk.header.extend(fields),
                Err(e) => trace!("Ignoring unreadable header section: {:#}", e),
            },
            "volume" | "disk" if walk.volume.is_none() => {
                walk.volume = Some(parse_volume(data, body)?);
            }
            "table" => {
                let entries = parse_table(data, body)?;
                walk.chunks.extend(entries.into_iter().map(|(offset, compressed)| ChunkLocation {
                    segment,
                    offset,
                    compressed,
                }));
            }
            "hash" => {
                walk.stored_md5 = parse_hash(data, body);
            }
            "done" | "next" => return Ok(()),
            _ => {}
        }

        if section.next == 0 || section.next == offset {
            return Ok(());
        }
        if section.next < offset {
            bail!("section chain points backwards ({} -> {})", offset, section.next);
        }
        offset = section.next;
    }

    bail!("more than {} sections in segment {}", MAX_SECTIONS, segment)
}

fn parse_volume(data: &[u8], body: u64) -> anyhow::Result<VolumeInfo> {
    let start = body as usize;
    let raw = data
        .get(start..start + 24)
        .context("truncated volume section")?;
    let mut cursor = Cursor::new(raw);

    let _media_type = cursor.read_u32::<LittleEndian>()?;
    let chunk_count = cursor.read_u32::<LittleEndian>()?;
    let sectors_per_chunk = cursor.read_u32::<LittleEndian>()?;
    let bytes_per_sector = cursor.read_u32::<LittleEndian>()?;
    let sector_count = cursor.read_u64::<LittleEndian>()?;

    if sector_count.checked_mul(bytes_per_sector as u64).is_none() {
        bail!(
            "volume of {} sectors of {} bytes overflows the media size",
            sector_count,
            bytes_per_sector
        );
    }

    Ok(VolumeInfo {
        chunk_count,
        sectors_per_chunk,
        bytes_per_sector,
        sector_count,
    })
}

/// (segment-local data offset, compressed) per table entry
fn parse_table(data: &[u8], body: u64) -> anyhow::Result<Vec<(u64, bool)>> {
    let start = body as usize;
    let header = data
        .get(start..start + TABLE_HEADER_SIZE as usize)
        .context("truncated table header")?;

    let mut cursor = Cursor::new(header);
    let entry_count = cursor.read_u32::<LittleEndian>()? as usize;
    cursor.set_position(8);
    let base_offset = cursor.read_u64::<LittleEndian>()?;

    let entries_start = start + TABLE_HEADER_SIZE as usize;
    let raw = data
        .get(entries_start..entries_start + entry_count * 4)
        .context("truncated table entries")?;

    Ok(raw
        .chunks_exact(4)
        .map(|e| {
            let value = u32::from_le_bytes([e[0], e[1], e[2], e[3]]);
            (
                base_offset + (value & !COMPRESSED_FLAG) as u64,
                value & COMPRESSED_FLAG != 0,
            )
        })
        .collect())
}

fn parse_hash(data: &[u8], body: u64) -> Option<String> {
    let start = body as usize;
    let md5 = data.get(start..start + 16)?;
    if md5.iter().all(|&b| b == 0) {
        return None;
    }
    Some(md5.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Acquisition details from the zlib-compressed `header` section
fn parse_header(
    data: &[u8],
    body: u64,
    section: &SectionDescriptor,
) -> anyhow::Result<BTreeMap<String, String>> {
    let start = body as usize;
    let end = (start as u64 + section.size.saturating_sub(SECTION_DESCRIPTOR_SIZE)) as usize;
    let raw = data.get(start..end.min(data.len())).context("truncated header")?;

    let mut text = String::new();
    ZlibDecoder::new(raw).read_to_string(&mut text)?;

    let lines: Vec<&str> = text.lines().map(|l| l.trim_end_matches('\r')).collect();
    let mut fields = BTreeMap::new();
    let Some(main) = lines.iter().position(|l| *l == "main") else {
        return Ok(fields);
    };
    let (Some(keys), Some(values)) = (lines.get(main + 1), lines.get(main + 2)) else {
        return Ok(fields);
    };

    for (key, value) in keys.split('\t').zip(values.split('\t')) {
        let name = match key {
            "c" => "case_number",
            "n" => "evidence_number",
            "a" => "description",
            "e" => "examiner",
            "t" => "notes",
            "av" => "acquisition_version",
            "ov" => "acquisition_os",
            _ => continue,
        };
        if !value.is_empty() {
            fields.insert(name.to_string(), value.to_string());
        }
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn descriptor(kind: &str, next: u64, size: u64) -> Vec<u8> {
        let mut out = vec![0u8; SECTION_DESCRIPTOR_SIZE as usize];
        out[..kind.len()].copy_from_slice(kind.as_bytes());
        out[16..24].copy_from_slice(&next.to_le_bytes());
        out[24..32].copy_from_slice(&size.to_le_bytes());
        out
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    /// Build segment files for `media`, one chunk per sector, with the given
    /// chunk indices stored in each segment. Odd chunks are stored uncompressed.
    fn build_segments(media: &[u8], layout: &[Vec<usize>], md5: Option<[u8; 16]>) -> Vec<Vec<u8>> {
        let bytes_per_sector = 512u32;
        let sector_count = media.len().div_ceil(512) as u64;
        let mut files = Vec::new();

        for (segment_index, chunk_indices) in layout.iter().enumerate() {
            let mut out = EVF_SIGNATURE.to_vec();
            out.push(1);
            out.extend_from_slice(&((segment_index + 1) as u16).to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());

            if segment_index == 0 {
                let next = out.len() as u64 + SECTION_DESCRIPTOR_SIZE + 24;
                out.extend(descriptor("volume", next, SECTION_DESCRIPTOR_SIZE + 24));
                out.extend_from_slice(&1u32.to_le_bytes());
                out.extend_from_slice(&(sector_count as u32).to_le_bytes());
                out.extend_from_slice(&1u32.to_le_bytes());
                out.extend_from_slice(&bytes_per_sector.to_le_bytes());
                out.extend_from_slice(&sector_count.to_le_bytes());
            }

            let mut body = Vec::new();
            let mut entries = Vec::new();
            let sectors_at = out.len() as u64;
            for &chunk in chunk_indices {
                let start = chunk * 512;
                let mut raw = media[start..(start + 512).min(media.len())].to_vec();
                raw.resize(512, 0);
                let offset = sectors_at + SECTION_DESCRIPTOR_SIZE + body.len() as u64;
                if chunk % 2 == 0 {
                    entries.push(offset as u32 | COMPRESSED_FLAG);
                    body.extend(zlib(&raw));
                } else {
                    entries.push(offset as u32);
                    body.extend(&raw);
                    body.extend_from_slice(&[0u8; 4]);
                }
            }
            let sectors_size = SECTION_DESCRIPTOR_SIZE + body.len() as u64;
            out.extend(descriptor("sectors", sectors_at + sectors_size, sectors_size));
            out.extend(body);

            let table_at = out.len() as u64;
            let table_size = SECTION_DESCRIPTOR_SIZE + TABLE_HEADER_SIZE + entries.len() as u64 * 4;
            out.extend(descriptor("table", table_at + table_size, table_size));
            let mut header = vec![0u8; TABLE_HEADER_SIZE as usize];
            header[..4].copy_from_slice(&(entries.len() as u32).to_le_bytes());
            out.extend(header);
            for entry in entries {
                out.extend_from_slice(&entry.to_le_bytes());
            }

            let last = segment_index + 1 == layout.len();
            if last {
                if let Some(md5) = md5 {
                    let hash_at = out.len() as u64;
                    let next = hash_at + SECTION_DESCRIPTOR_SIZE + 16;
                    out.extend(descriptor("hash", next, SECTION_DESCRIPTOR_SIZE + 16));
                    out.extend_from_slice(&md5);
                }
            }
            let end_at = out.len() as u64;
            let kind = if last { "done" } else { "next" };
            out.extend(descriptor(kind, end_at, SECTION_DESCRIPTOR_SIZE));
            files.push(out);
        }
        files
    }

    fn sample_media() -> Vec<u8> {
        (0..1500u32).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_single_segment_reads() {
        let dir = tempfile::tempdir().unwrap();
        let media = sample_media();
        let files = build_segments(&media, &[vec![0, 1, 2]], Some([0xAB; 16]));
        let path = dir.path().join("evidence.E01");
        std::fs::write(&path, &files[0]).unwrap();

        assert!(has_ewf_signature(&path).unwrap());
        let image = EwfImage::open(&path).unwrap();
        // 3 sectors of 512 bytes; the tail of the last chunk is zero padding
        assert_eq!(image.size(), 1536);

        let all = image.read_at(0, 1536).unwrap();
        assert_eq!(&all[..1500], &media[..]);
        assert!(all[1500..].iter().all(|&b| b == 0));

        // Spans a compressed and an uncompressed chunk
        assert_eq!(image.read_at(500, 40).unwrap(), &media[500..540]);
        assert_eq!(image.read_at(1530, 100).unwrap().len(), 6);
        assert!(image.read_at(1536, 1).unwrap().is_empty());

        assert_eq!(image.stored_md5(), Some("abababababababababababababababab"));
        assert_eq!(image.metadata().get("format").map(String::as_str), Some("EWF"));
    }

    #[test]
    fn test_multi_segment_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let media = sample_media();
        let files = build_segments(&media, &[vec![0, 1], vec![2]], None);
        std::fs::write(dir.path().join("disk.E01"), &files[0]).unwrap();
        std::fs::write(dir.path().join("disk.E02"), &files[1]).unwrap();

        let segments = discover_segments(&dir.path().join("disk.E01"));
        assert_eq!(segments.len(), 2);

        let image = EwfImage::open(dir.path().join("disk.E01")).unwrap();
        assert_eq!(image.read_at(1024, 476).unwrap(), &media[1024..1500]);
        assert_eq!(image.stored_md5(), None);
    }

    #[test]
    fn test_close_then_read_fails() {
        let dir = tempfile::tempdir().unwrap();
        let files = build_segments(&sample_media(), &[vec![0, 1, 2]], None);
        let path = dir.path().join("c.E01");
        std::fs::write(&path, &files[0]).unwrap();

        let image = EwfImage::open(&path).unwrap();
        assert!(image.read_at(0, 10).is_ok());
        image.close();
        image.close();
        assert!(matches!(image.read_at(0, 10), Err(ForensicsError::Read { .. })));
    }

    #[test]
    fn test_volume_media_size_overflow_rejected() {
        let mut body = vec![0u8; 24];
        body[4..8].copy_from_slice(&1u32.to_le_bytes());
        body[8..12].copy_from_slice(&64u32.to_le_bytes());
        body[12..16].copy_from_slice(&512u32.to_le_bytes());
        body[16..24].copy_from_slice(&(u64::MAX / 256).to_le_bytes());
        assert!(parse_volume(&body, 0).is_err());

        body[16..24].copy_from_slice(&2048u64.to_le_bytes());
        let volume = parse_volume(&body, 0).unwrap();
        assert_eq!(volume.media_size(), 2048 * 512);
        assert_eq!(volume.chunk_size(), 64 * 512);
    }

    #[test]
    fn test_garbage_is_not_ewf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.E01");
        std::fs::write(&path, b"definitely not an evidence file").unwrap();
        assert!(!has_ewf_signature(&path).unwrap());
        assert!(matches!(EwfImage::open(&path), Err(ForensicsError::ImageOpen { .. })));
    }

    #[test]
    fn test_header_fields() {
        let text = "1\nmain\nc\tn\ta\te\tt\nCASE-7\tEV1\tLaptop\tJ. Doe\t\n\n";
        let compressed = zlib(text.as_bytes());
        let mut data = vec![0u8; 13];
        data.extend(descriptor("header", 0, SECTION_DESCRIPTOR_SIZE + compressed.len() as u64));
        data.extend(&compressed);

        let section = read_descriptor(&data, 13).unwrap();
        let fields = parse_header(&data, 13 + SECTION_DESCRIPTOR_SIZE, &section).unwrap();
        assert_eq!(fields.get("case_number").map(String::as_str), Some("CASE-7"));
        assert_eq!(fields.get("examiner").map(String::as_str), Some("J. Doe"));
        assert!(!fields.contains_key("notes"));
    }
}
