//! exFAT directory entry sets.
//!
//! A file or directory is one primary File entry followed by a Stream
//! Extension and one or more File Name entries, 32 bytes each. Deleting a
//! file only clears bit 7 of each type byte, so deleted sets decode exactly
//! like live ones.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Duration, NaiveDate, Utc};

pub const ENTRY_SIZE: usize = 32;

/// Type byte that terminates a directory
pub const END_OF_DIRECTORY: u8 = 0x00;

const IN_USE: u8 = 0x80;

// Type codes with the in-use bit cleared
const FILE: u8 = 0x05;
const STREAM_EXTENSION: u8 = 0x40;
const FILE_NAME: u8 = 0x41;

pub const ATTR_DIRECTORY: u16 = 0x10;
const NO_FAT_CHAIN: u8 = 0x02;

/// Bytes taken by the set whose primary entry starts `data`, if it starts one
pub fn set_length(data: &[u8]) -> Option<usize> {
    let (&entry_type, rest) = data.split_first()?;
    let secondary_count = *rest.first()? as usize;
    (entry_type & !IN_USE == FILE).then_some((secondary_count + 1) * ENTRY_SIZE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PackedTime {
    packed: u32,
    centis: u8,
    utc_offset: u8,
}

impl PackedTime {
    fn decode(&self) -> Option<DateTime<Utc>> {
        decode_timestamp(self.packed, self.centis, self.utc_offset)
    }
}

/// Fields of the primary File entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub attributes: u16,
    created: PackedTime,
    modified: PackedTime,
    accessed: PackedTime,
}

impl FileInfo {
    fn parse(raw: &[u8]) -> Self {
        let time = |at: usize, centis: Option<usize>, offset: usize| PackedTime {
            packed: LittleEndian::read_u32(&raw[at..at + 4]),
            centis: centis.map_or(0, |c| raw[c]),
            utc_offset: raw[offset],
        };
        Self {
            attributes: LittleEndian::read_u16(&raw[4..6]),
            created: time(8, Some(20), 22),
            modified: time(12, Some(21), 23),
            // Access times carry no 10 ms field
            accessed: time(16, None, 24),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.attributes & ATTR_DIRECTORY != 0
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created.decode()
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.modified.decode()
    }

    pub fn accessed(&self) -> Option<DateTime<Utc>> {
        self.accessed.decode()
    }
}

/// Fields of the Stream Extension entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub flags: u8,
    /// Name length in UTF-16 code units
    pub name_length: u8,
    pub valid_data_length: u64,
    pub first_cluster: u32,
    pub data_length: u64,
}

impl StreamInfo {
    fn parse(raw: &[u8]) -> Self {
        Self {
            flags: raw[1],
            name_length: raw[3],
            valid_data_length: LittleEndian::read_u64(&raw[8..16]),
            first_cluster: LittleEndian::read_u32(&raw[20..24]),
            data_length: LittleEndian::read_u64(&raw[24..32]),
        }
    }

    /// Data occupies consecutive clusters and the FAT is not consulted
    pub fn is_contiguous(&self) -> bool {
        self.flags & NO_FAT_CHAIN != 0
    }
}

/// A decoded File + Stream Extension + File Name set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySet {
    pub file: FileInfo,
    pub stream: StreamInfo,
    pub name: String,
    pub is_deleted: bool,
}

impl EntrySet {
    /// Decode the set laid out in `raw`, primary entry first.
    /// Malformed sets and sets without a usable name yield `None`.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let entries: Vec<&[u8]> = raw.chunks_exact(ENTRY_SIZE).collect();
        let (primary, secondaries) = entries.split_first()?;
        if primary[0] & !IN_USE != FILE {
            return None;
        }

        let secondary_count = primary[1] as usize;
        if secondary_count < 2 || secondaries.len() < secondary_count {
            return None;
        }
        let stream_raw = secondaries[0];
        if stream_raw[0] & !IN_USE != STREAM_EXTENSION {
            return None;
        }
        let stream = StreamInfo::parse(stream_raw);

        let mut name_bytes: Vec<u8> = secondaries[1..secondary_count]
            .iter()
            .filter(|entry| entry[0] & !IN_USE == FILE_NAME)
            .flat_map(|entry| entry[2..ENTRY_SIZE].iter().copied())
            .collect();
        name_bytes.truncate(stream.name_length as usize * 2);
        let name = super::decode_utf16_filename(&name_bytes).ok()?;
        if name.is_empty() {
            return None;
        }

        Some(Self {
            file: FileInfo::parse(primary),
            stream,
            name,
            is_deleted: primary[0] & IN_USE == 0 || stream_raw[0] & IN_USE == 0,
        })
    }
}

/// Decode an exFAT timestamp.
///
/// Layout: bits 0-4 double seconds, 5-10 minute, 11-15 hour, 16-20 day,
/// 21-24 month, 25-31 years since 1980. The UTC offset byte is valid when
/// bit 7 is set and holds a signed count of 15-minute intervals.
pub fn decode_timestamp(raw: u32, increment_10ms: u8, utc_offset: u8) -> Option<DateTime<Utc>> {
    if raw == 0 {
        return None;
    }

    let seconds = (raw & 0x1F) * 2;
    let minute = (raw >> 5) & 0x3F;
    let hour = (raw >> 11) & 0x1F;
    let day = (raw >> 16) & 0x1F;
    let month = (raw >> 21) & 0x0F;
    let year = 1980 + (raw >> 25) as i32;

    let local = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, seconds)?
        + Duration::milliseconds(increment_10ms.min(199) as i64 * 10);

    if utc_offset & 0x80 != 0 {
        let quarters = (((utc_offset << 1) as i8) >> 1) as i64;
        Some((local - Duration::minutes(quarters * 15)).and_utc())
    } else {
        Some(local.and_utc())
    }
}
