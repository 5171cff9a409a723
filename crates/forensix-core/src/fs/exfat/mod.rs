//! Read-only exFAT volumes, including deleted entry sets.
use anyhow::{Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use encoding_rs::UTF_16LE;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{components, join_path, FileSystem, FileSystemKind};
use crate::error::{ForensicsError, Result as ForensicsResult};
use crate::image::DiskImage;
use crate::FileEntry;

pub mod directory;
pub mod fat;

use directory::{EntrySet, END_OF_DIRECTORY, ENTRY_SIZE};
use fat::AllocationTable;

/// OEM name at offset 3 of the boot sector
const OEM_NAME: &[u8; 8] = b"EXFAT   ";

const BOOT_SECTOR_SIZE: usize = 512;

/// Upper bound for a single directory read
const MAX_DIRECTORY_BYTES: u64 = 256 * 1024 * 1024;

/// Volume geometry from the main boot sector. Offsets and lengths are in sectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExFatBootSector {
    pub volume_length: u64,
    pub fat_offset: u32,
    pub fat_length: u32,
    pub cluster_heap_offset: u32,
    pub cluster_count: u32,
    pub root_directory_cluster: u32,
    pub serial_number: u32,
    pub sector_shift: u8,
    pub cluster_shift: u8,
}

impl ExFatBootSector {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < BOOT_SECTOR_SIZE {
            anyhow::bail!("boot sector needs {} bytes, got {}", BOOT_SECTOR_SIZE, data.len());
        }
        if !is_exfat_boot_sector(data) {
            anyhow::bail!("OEM name is not EXFAT");
        }

        let boot = Self {
            volume_length: LittleEndian::read_u64(&data[72..80]),
            fat_offset: LittleEndian::read_u32(&data[80..84]),
            fat_length: LittleEndian::read_u32(&data[84..88]),
            cluster_heap_offset: LittleEndian::read_u32(&data[88..92]),
            cluster_count: LittleEndian::read_u32(&data[92..96]),
            root_directory_cluster: LittleEndian::read_u32(&data[96..100]),
            serial_number: LittleEndian::read_u32(&data[100..104]),
            sector_shift: data[108],
            cluster_shift: data[109],
        };

        // 512 B to 4 KiB sectors, clusters at most 32 MiB
        if !(9..=12).contains(&boot.sector_shift) {
            anyhow::bail!("sector shift {} out of range", boot.sector_shift);
        }
        if boot.sector_shift as u32 + boot.cluster_shift as u32 > 25 {
            anyhow::bail!("cluster shift {} too large", boot.cluster_shift);
        }
        Ok(boot)
    }

    pub fn bytes_per_sector(&self) -> u32 {
        1 << self.sector_shift
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        1 << (self.sector_shift + self.cluster_shift)
    }
}

pub fn is_exfat_boot_sector(data: &[u8]) -> bool {
    data.get(3..11) == Some(OEM_NAME.as_slice())
}

/// Decode a UTF-16LE name fragment, stopping at the first NUL
pub fn decode_utf16_filename(raw: &[u8]) -> Result<String> {
    let end = raw
        .chunks_exact(2)
        .position(|unit| unit == [0, 0])
        .map_or(raw.len() & !1, |units| units * 2);

    let (decoded, had_errors) = UTF_16LE.decode_without_bom_handling(&raw[..end]);
    if had_errors {
        anyhow::bail!("name is not valid UTF-16");
    }
    Ok(decoded.into_owned())
}

/// Where a directory's entries live
#[derive(Debug, Clone, Copy)]
struct DirectoryLocation {
    first_cluster: u32,
    /// `None` follows the FAT chain to its end (root directory)
    length: Option<u64>,
    contiguous: bool,
    /// Record id of the directory's own entry; `None` for the root
    record_id: Option<u64>,
}

/// One parsed entry set with its position on the volume
#[derive(Debug, Clone)]
struct LocatedEntry {
    set: EntrySet,
    /// Byte offset of the primary directory entry within the volume
    record_offset: u64,
}

/// Read-only exFAT volume
pub struct ExFatFileSystem {
    image: Arc<dyn DiskImage>,
    base: u64,
    boot: ExFatBootSector,
    fat: AllocationTable,
}

impl ExFatFileSystem {
    /// Open the exFAT volume whose boot sector is at byte `base` of `image`
    pub fn open(image: Arc<dyn DiskImage>, base: u64) -> Result<Self> {
        let sector0 = image.read_at(base, BOOT_SECTOR_SIZE)?;
        let boot = ExFatBootSector::parse(&sector0)?;
        let fat = AllocationTable::from_image(image.as_ref(), base, &boot).context("reading FAT")?;

        tracing::debug!(
            "exFAT volume: {} bytes/cluster, {} clusters, root at cluster {}",
            boot.bytes_per_cluster(),
            boot.cluster_count,
            boot.root_directory_cluster
        );

        Ok(Self {
            image,
            base,
            boot,
            fat,
        })
    }

    pub fn boot_sector(&self) -> &ExFatBootSector {
        &self.boot
    }

    /// Clusters holding `length` bytes starting at `first_cluster`
    fn cluster_run(&self, first_cluster: u32, length: Option<u64>, contiguous: bool) -> Vec<u32> {
        let cluster_size = self.fat.cluster_size() as u64;
        if !self.fat.is_valid_cluster(first_cluster) {
            return Vec::new();
        }

        let wanted = length.map(|l| l.div_ceil(cluster_size) as usize);
        if contiguous {
            let count = wanted.unwrap_or(1) as u64;
            (first_cluster as u64..first_cluster as u64 + count)
                .map(|c| c as u32)
                .take_while(|&c| self.fat.is_valid_cluster(c))
                .collect()
        } else {
            let mut chain = self.fat.chain(first_cluster);
            if let Some(wanted) = wanted {
                chain.truncate(wanted);
            }
            chain
        }
    }

    /// Read the clusters in `run`, returning the data and each cluster's volume offset
    fn read_run(&self, run: &[u32]) -> Result<(Vec<u8>, Vec<u64>)> {
        let cluster_size = self.fat.cluster_size() as usize;
        let mut data = Vec::with_capacity(run.len() * cluster_size);
        let mut offsets = Vec::with_capacity(run.len());

        for &cluster in run {
            let offset = self.fat.cluster_offset(cluster);
            let bytes = self.image.read_at(self.base + offset, cluster_size)?;
            if bytes.len() < cluster_size {
                anyhow::bail!("cluster {} truncated at volume offset {}", cluster, offset);
            }
            data.extend_from_slice(&bytes);
            offsets.push(offset);
        }
        Ok((data, offsets))
    }

    fn read_directory(&self, location: &DirectoryLocation) -> Result<Vec<LocatedEntry>> {
        if location.length.is_some_and(|l| l > MAX_DIRECTORY_BYTES) {
            let length = location.length.unwrap_or_default();
            anyhow::bail!("directory length {} is implausible", length);
        }

        let run = self.cluster_run(location.first_cluster, location.length, location.contiguous);
        let (data, offsets) = self.read_run(&run)?;
        let cluster_size = self.fat.cluster_size() as usize;
        let record_offset =
            |index: usize| offsets[index / cluster_size] + (index % cluster_size) as u64;

        let mut found = Vec::new();
        let mut index = 0;
        while index + ENTRY_SIZE <= data.len() {
            if data[index] == END_OF_DIRECTORY {
                break;
            }

            let set_len = directory::set_length(&data[index..])
                .filter(|len| index + len <= data.len());
            if let Some(set_len) = set_len {
                if let Some(set) = EntrySet::parse(&data[index..index + set_len]) {
                    found.push(LocatedEntry {
                        set,
                        record_offset: record_offset(index),
                    });
                    index += set_len;
                    continue;
                }
                tracing::trace!("Unparseable entry set at volume offset {}", record_offset(index));
            }
            index += ENTRY_SIZE;
        }

        Ok(found)
    }

    fn root_location(&self) -> DirectoryLocation {
        DirectoryLocation {
            first_cluster: self.boot.root_directory_cluster,
            length: None,
            contiguous: false,
            record_id: None,
        }
    }

    fn location_of(entry: &LocatedEntry) -> DirectoryLocation {
        let stream = &entry.set.stream;
        DirectoryLocation {
            first_cluster: stream.first_cluster,
            length: Some(stream.data_length),
            // FAT chains of deleted entries are freed; only contiguous reads remain
            contiguous: stream.is_contiguous() || entry.set.is_deleted,
            record_id: Some(entry.record_offset),
        }
    }

    /// Find `name` in a listing, preferring live entries and exact case
    fn find_child<'a>(entries: &'a [LocatedEntry], name: &str) -> Option<&'a LocatedEntry> {
        let live_first = |exact: bool| {
            let matches = move |e: &&LocatedEntry| {
                if exact {
                    e.set.name == name
                } else {
                    e.set.name.eq_ignore_ascii_case(name)
                }
            };
            entries
                .iter()
                .filter(matches)
                .min_by_key(|e| e.set.is_deleted)
        };
        live_first(true).or_else(|| live_first(false))
    }

    /// Resolve a path to the directory entry naming it; `None` for the root
    fn resolve(&self, path: &str) -> Result<Option<LocatedEntry>> {
        let mut location = self.root_location();
        let mut current: Option<LocatedEntry> = None;

        for name in components(path) {
            if let Some(entry) = &current {
                if !entry.set.file.is_directory() {
                    anyhow::bail!("{} is not a directory", entry.set.name);
                }
            }
            let entries = self.read_directory(&location)?;
            let child = Self::find_child(&entries, name)
                .cloned()
                .with_context(|| format!("{} not found", name))?;
            location = Self::location_of(&child);
            current = Some(child);
        }
        Ok(current)
    }

    fn to_file_entry(
        &self,
        dir_path: &str,
        parent_id: Option<u64>,
        entry: &LocatedEntry,
    ) -> FileEntry {
        let set = &entry.set;
        let primary = &set.file;
        let stream = &set.stream;

        let mut attributes = BTreeMap::new();
        attributes.insert("fs".to_string(), "exfat".to_string());
        attributes.insert("attributes".to_string(), format!("0x{:04x}", primary.attributes));
        attributes.insert("first_cluster".to_string(), stream.first_cluster.to_string());
        attributes.insert("contiguous".to_string(), stream.is_contiguous().to_string());
        attributes.insert("valid_data_length".to_string(), stream.valid_data_length.to_string());

        FileEntry {
            name: set.name.clone(),
            path: join_path(dir_path, &set.name),
            size: stream.data_length,
            is_directory: primary.is_directory(),
            is_deleted: set.is_deleted,
            created_at: primary.created(),
            modified_at: primary.modified(),
            accessed_at: primary.accessed(),
            record_id: Some(entry.record_offset),
            parent_id,
            attributes,
            children: Vec::new(),
        }
    }
}

impl FileSystem for ExFatFileSystem {
    fn kind(&self) -> FileSystemKind {
        FileSystemKind::ExFat
    }

    fn list_directory(&self, path: &str) -> ForensicsResult<Vec<FileEntry>> {
        let not_found = |e: anyhow::Error| ForensicsError::NotFound(format!("{}: {:#}", path, e));

        let location = match self.resolve(path).map_err(not_found)? {
            None => self.root_location(),
            Some(entry) if entry.set.file.is_directory() => Self::location_of(&entry),
            Some(_) => return Err(ForensicsError::NotFound(format!("{} is not a directory", path))),
        };

        let entries = self
            .read_directory(&location)
            .map_err(|e| ForensicsError::read(self.base, format!("listing {}: {:#}", path, e)))?;

        let dir_path = if components(path).next().is_none() {
            "/"
        } else {
            path.trim_end_matches('/')
        };
        Ok(entries
            .iter()
            .map(|e| self.to_file_entry(dir_path, location.record_id, e))
            .collect())
    }

    fn read_content(&self, path: &str) -> Option<Vec<u8>> {
        let entry = match self.resolve(path) {
            Ok(Some(entry)) if !entry.set.file.is_directory() => entry,
            Ok(_) => return None,
            Err(e) => {
                tracing::debug!("Cannot resolve {}: {:#}", path, e);
                return None;
            }
        };

        let stream = &entry.set.stream;
        if stream.data_length == 0 {
            return Some(Vec::new());
        }

        let location = Self::location_of(&entry);
        let run = self.cluster_run(location.first_cluster, location.length, location.contiguous);
        match self.read_run(&run) {
            Ok((mut data, _)) if data.len() as u64 >= stream.data_length => {
                data.truncate(stream.data_length as usize);
                Some(data)
            }
            Ok((data, _)) => {
                tracing::warn!(
                    "{}: only {} of {} bytes recoverable",
                    path,
                    data.len(),
                    stream.data_length
                );
                None
            }
            Err(e) => {
                tracing::warn!("Failed to read {}: {:#}", path, e);
                None
            }
        }
    }
}
