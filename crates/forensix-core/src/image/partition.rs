//! Partition table parsing (MBR with extended/logical chains, GPT)

use anyhow::anyhow;
use nom::bytes::complete::{tag, take};
use nom::multi::count;
use nom::number::complete::{le_u32, le_u64, le_u8};
use nom::sequence::tuple;
use nom::IResult;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use super::DiskImage;
use crate::error::Result;

const SECTOR_SIZE: u64 = 512;
const MBR_TABLE_OFFSET: usize = 0x1BE;
const MAX_LOGICAL_PARTITIONS: usize = 128;
const GPT_SIGNATURE: &[u8] = b"EFI PART";

/// One partition (or unallocated region) of an image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub index: usize,
    /// Type description, e.g. "NTFS / exFAT" or "Linux filesystem"
    pub label: String,
    /// GPT partition name, when present
    pub name: Option<String>,
    /// Start offset in bytes
    pub start: u64,
    /// Length in bytes
    pub length: u64,
    pub allocated: bool,
    pub bootable: bool,
}

#[derive(Debug, Clone, Copy)]
struct MbrEntry {
    status: u8,
    part_type: u8,
    lba_start: u32,
    sectors: u32,
}

impl MbrEntry {
    fn is_empty(&self) -> bool {
        self.part_type == 0 || self.sectors == 0
    }

    fn is_extended(&self) -> bool {
        matches!(self.part_type, 0x05 | 0x0F | 0x85)
    }
}

fn mbr_entry(input: &[u8]) -> IResult<&[u8], MbrEntry> {
    let (input, (status, _chs_first, part_type, _chs_last, lba_start, sectors)) =
        tuple((le_u8, take(3usize), le_u8, take(3usize), le_u32, le_u32))(input)?;
    Ok((
        input,
        MbrEntry {
            status,
            part_type,
            lba_start,
            sectors,
        },
    ))
}

/// Four table entries followed by the 0x55AA boot signature
fn mbr_table(input: &[u8]) -> IResult<&[u8], Vec<MbrEntry>> {
    let (input, entries) = count(mbr_entry, 4)(input)?;
    let (input, _) = tag(&[0x55u8, 0xAA][..])(input)?;
    Ok((input, entries))
}

fn parse_mbr(sector: &[u8]) -> Option<Vec<MbrEntry>> {
    let table = sector.get(MBR_TABLE_OFFSET..512)?;
    mbr_table(table).ok().map(|(_, entries)| entries)
}

#[derive(Debug)]
struct GptHeader {
    header_size: u32,
    header_crc: u32,
    entries_lba: u64,
    entry_count: u32,
    entry_size: u32,
}

fn gpt_header(input: &[u8]) -> IResult<&[u8], GptHeader> {
    let (input, _) = tag(GPT_SIGNATURE)(input)?;
    let (input, (_revision, header_size, header_crc, _reserved)) =
        tuple((le_u32, le_u32, le_u32, le_u32))(input)?;
    let (input, (_current, _backup, _first_usable, _last_usable)) =
        tuple((le_u64, le_u64, le_u64, le_u64))(input)?;
    let (input, _disk_guid) = take(16usize)(input)?;
    let (input, (entries_lba, entry_count, entry_size, _entries_crc)) =
        tuple((le_u64, le_u32, le_u32, le_u32))(input)?;
    Ok((
        input,
        GptHeader {
            header_size,
            header_crc,
            entries_lba,
            entry_count,
            entry_size,
        },
    ))
}

#[derive(Debug)]
struct GptEntry {
    type_guid: Uuid,
    first_lba: u64,
    last_lba: u64,
    attributes: u64,
    name: String,
}

fn gpt_entry(input: &[u8]) -> IResult<&[u8], GptEntry> {
    let (input, (type_raw, _unique, first_lba, last_lba, attributes, name_raw)) =
        tuple((take(16usize), take(16usize), le_u64, le_u64, le_u64, take(72usize)))(input)?;

    let mut type_bytes = [0u8; 16];
    type_bytes.copy_from_slice(type_raw);
    let units: Vec<u16> = name_raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&c| c != 0)
        .collect();

    Ok((
        input,
        GptEntry {
            type_guid: Uuid::from_bytes_le(type_bytes),
            first_lba,
            last_lba,
            attributes,
            name: String::from_utf16_lossy(&units),
        },
    ))
}

/// Label for an MBR partition type byte
pub fn mbr_type_label(part_type: u8) -> String {
    match part_type {
        0x01 => "FAT12".to_string(),
        0x04 | 0x06 | 0x0E => "FAT16".to_string(),
        0x05 | 0x0F | 0x85 => "Extended".to_string(),
        0x07 => "NTFS / exFAT".to_string(),
        0x0B | 0x0C => "FAT32".to_string(),
        0x82 => "Linux swap".to_string(),
        0x83 => "Linux".to_string(),
        0x8E => "Linux LVM".to_string(),
        0xEE => "GPT protective".to_string(),
        0xEF => "EFI System".to_string(),
        other => format!("Unknown (0x{:02X})", other),
    }
}

/// Label for a GPT partition type GUID
pub fn gpt_type_label(guid: &Uuid) -> String {
    let label = match guid.to_string().to_ascii_uppercase().as_str() {
        "C12A7328-F81F-11D2-BA4B-00A0C93EC93B" => "EFI System",
        "E3C9E316-0B5C-4DB8-817D-F92DF00215AE" => "Microsoft reserved",
        "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7" => "Microsoft basic data",
        "DE94BBA4-06D1-4D40-A16A-BFD50179D6AC" => "Windows recovery",
        "0FC63DAF-8483-4772-8E79-3D69D8477DE4" => "Linux filesystem",
        "0657FD6D-A4AB-43C4-84E5-0933C84B4F4F" => "Linux swap",
        "E6D6D379-F507-44C2-A23C-238F2A3DF928" => "Linux LVM",
        "48465300-0000-11AA-AA11-00306543ECAC" => "Apple HFS+",
        "7C3457EF-0000-11AA-AA11-00306543ECAC" => "Apple APFS",
        _ => return format!("GPT {}", guid),
    };
    label.to_string()
}

/// Enumerate partitions, falling back to a single "Whole Disk" entry
pub fn read_partitions<I: DiskImage + ?Sized>(image: &I) -> Result<Vec<Partition>> {
    let size = image.size();
    let sector0 = image.read_at(0, SECTOR_SIZE as usize)?;

    let mut found = match parse_mbr(&sector0) {
        Some(entries) if entries.iter().any(|e| e.part_type == 0xEE) => read_gpt(image)
            .unwrap_or_else(|e| {
                tracing::warn!("Protective MBR present but GPT unreadable: {:#}", e);
                Vec::new()
            }),
        Some(entries) => read_mbr(image, &entries),
        None => Vec::new(),
    };

    // Drop entries that start past the end of the image; clamp the rest
    found.retain(|p| p.start < size);
    for part in &mut found {
        part.length = part.length.min(size - part.start);
    }

    if found.is_empty() {
        tracing::debug!("No partition table found, using whole disk");
        return Ok(vec![Partition {
            index: 0,
            label: "Whole Disk".to_string(),
            name: None,
            start: 0,
            length: size,
            allocated: true,
            bootable: false,
        }]);
    }

    Ok(with_unallocated(found, size))
}

fn read_mbr<I: DiskImage + ?Sized>(image: &I, entries: &[MbrEntry]) -> Vec<Partition> {
    let mut parts = Vec::new();

    for entry in entries.iter().filter(|e| !e.is_empty()) {
        let start = entry.lba_start as u64 * SECTOR_SIZE;
        if entry.is_extended() {
            parts.extend(read_logical_chain(image, start));
            continue;
        }
        parts.push(Partition {
            index: 0,
            label: mbr_type_label(entry.part_type),
            name: None,
            start,
            length: entry.sectors as u64 * SECTOR_SIZE,
            allocated: true,
            bootable: entry.status == 0x80,
        });
    }
    parts
}

/// Follow the EBR chain of an extended partition starting at byte `extended_start`
fn read_logical_chain<I: DiskImage + ?Sized>(image: &I, extended_start: u64) -> Vec<Partition> {
    let mut parts = Vec::new();
    let mut visited = HashSet::new();
    let mut ebr = extended_start;

    while parts.len() < MAX_LOGICAL_PARTITIONS {
        if !visited.insert(ebr) {
            tracing::warn!("EBR chain loop detected at offset {}", ebr);
            break;
        }

        let sector = match image.read_at(ebr, SECTOR_SIZE as usize) {
            Ok(sector) => sector,
            Err(e) => {
                tracing::warn!("Unreadable EBR at offset {}: {}", ebr, e);
                break;
            }
        };
        let Some(entries) = parse_mbr(&sector) else {
            tracing::debug!("No EBR signature at offset {}", ebr);
            break;
        };

        let logical = entries[0];
        if !logical.is_empty() {
            parts.push(Partition {
                index: 0,
                label: mbr_type_label(logical.part_type),
                name: None,
                start: ebr + logical.lba_start as u64 * SECTOR_SIZE,
                length: logical.sectors as u64 * SECTOR_SIZE,
                allocated: true,
                bootable: logical.status == 0x80,
            });
        }

        let link = entries[1];
        if link.is_empty() || !link.is_extended() {
            break;
        }
        ebr = extended_start + link.lba_start as u64 * SECTOR_SIZE;
    }
    parts
}

fn read_gpt<I: DiskImage + ?Sized>(image: &I) -> anyhow::Result<Vec<Partition>> {
    let raw = image.read_at(SECTOR_SIZE, SECTOR_SIZE as usize)?;
    let (_, header) = gpt_header(&raw).map_err(|_| anyhow!("invalid GPT header"))?;

    let header_len = (header.header_size as usize).clamp(92, raw.len());
    let mut zeroed = raw[..header_len].to_vec();
    zeroed[16..20].fill(0);
    let computed = crc32fast::hash(&zeroed);
    if computed != header.header_crc {
        tracing::warn!(
            "GPT header CRC mismatch (stored {:08x}, computed {:08x}); continuing",
            header.header_crc,
            computed
        );
    }

    if header.entry_size < 128 {
        return Err(anyhow!("GPT entry size {} too small", header.entry_size));
    }
    let entry_count = header.entry_count.min(1024) as usize;
    let table_offset = header
        .entries_lba
        .checked_mul(SECTOR_SIZE)
        .ok_or_else(|| anyhow!("GPT entry table LBA {} out of range", header.entries_lba))?;
    let table_len = entry_count
        .checked_mul(header.entry_size as usize)
        .ok_or_else(|| anyhow!("GPT entry table too large"))?;
    let table = image.read_at(table_offset, table_len)?;

    let mut parts = Vec::new();
    for (slot, raw_entry) in table.chunks_exact(header.entry_size as usize).enumerate() {
        let (_, entry) = gpt_entry(raw_entry).map_err(|_| anyhow!("truncated GPT entry"))?;
        if entry.type_guid.is_nil() {
            continue;
        }
        let Some((start, length)) = lba_extent(entry.first_lba, entry.last_lba) else {
            tracing::warn!(
                "Skipping GPT entry {} with LBA range {}..={}",
                slot,
                entry.first_lba,
                entry.last_lba
            );
            continue;
        };
        parts.push(Partition {
            index: 0,
            label: gpt_type_label(&entry.type_guid),
            name: (!entry.name.is_empty()).then_some(entry.name),
            start,
            length,
            allocated: true,
            // Legacy BIOS bootable attribute
            bootable: entry.attributes & 0x4 != 0,
        });
    }
    Ok(parts)
}

/// Byte start and length of an inclusive LBA range, `None` when reversed or unrepresentable
fn lba_extent(first_lba: u64, last_lba: u64) -> Option<(u64, u64)> {
    let start = first_lba.checked_mul(SECTOR_SIZE)?;
    let sectors = last_lba.checked_sub(first_lba)?.checked_add(1)?;
    Some((start, sectors.checked_mul(SECTOR_SIZE)?))
}

/// Sort by start, insert unallocated gaps and renumber
fn with_unallocated(mut parts: Vec<Partition>, size: u64) -> Vec<Partition> {
    parts.sort_by_key(|p| p.start);

    let mut out = Vec::with_capacity(parts.len() * 2 + 1);
    let mut cursor = 0u64;
    for part in parts {
        if part.start > cursor {
            out.push(unallocated(cursor, part.start - cursor));
        }
        cursor = cursor.max(part.start + part.length);
        out.push(part);
    }
    if cursor < size {
        out.push(unallocated(cursor, size - cursor));
    }

    for (index, part) in out.iter_mut().enumerate() {
        part.index = index;
    }
    out
}

fn unallocated(start: u64, length: u64) -> Partition {
    Partition {
        index: 0,
        label: "Unallocated".to_string(),
        name: None,
        start,
        length,
        allocated: false,
        bootable: false,
    }
}
