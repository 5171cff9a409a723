//! Structural checks applied to candidates in smart carving mode.
//!
//! Candidates are checked incrementally while they stream to disk, so only
//! the first bytes, the last bytes and a short search window are held.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

/// Prefix kept for header checks; covers the DOS header up to e_lfanew
const HEAD_BYTES: usize = 0x40;
const TAIL_BYTES: usize = 2;
const PE_SIGNATURE: &[u8; 4] = b"PE\0\0";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid {tag} candidate: {reason}")]
pub struct ValidationFailure {
    pub tag: String,
    pub reason: &'static str,
}

fn fail(tag: &str, reason: &'static str) -> Result<(), ValidationFailure> {
    Err(ValidationFailure {
        tag: tag.to_string(),
        reason,
    })
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Marker that must appear somewhere in the content
fn required_marker(tag: &str) -> Option<&'static [u8]> {
    match tag {
        "png" => Some(b"IEND"),
        "docx" => Some(b"word/"),
        "xlsx" => Some(b"xl/"),
        _ => None,
    }
}

/// Incremental validator for one candidate. Types without a rule always pass.
#[derive(Debug)]
pub struct StructureCheck {
    tag: String,
    len: u64,
    head: Vec<u8>,
    tail: Vec<u8>,
    marker: Option<&'static [u8]>,
    marker_found: bool,
    /// Last `marker.len() - 1` bytes seen
    carry: Vec<u8>,
    /// e_lfanew, once the DOS header is complete
    pe_offset: Option<u64>,
    /// PE signature bytes at or past `HEAD_BYTES`
    pe_bytes: [Option<u8>; 4],
}

impl StructureCheck {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            len: 0,
            head: Vec::with_capacity(HEAD_BYTES),
            tail: Vec::with_capacity(TAIL_BYTES * 2),
            marker: required_marker(tag),
            marker_found: false,
            carry: Vec::new(),
            pe_offset: None,
            pe_bytes: [None; 4],
        }
    }

    /// Feed the next bytes of the candidate
    pub fn update(&mut self, bytes: &[u8]) {
        let start = self.len;
        self.len += bytes.len() as u64;

        let room = HEAD_BYTES - self.head.len();
        self.head.extend_from_slice(&bytes[..bytes.len().min(room)]);

        self.tail.extend_from_slice(&bytes[bytes.len().saturating_sub(TAIL_BYTES)..]);
        let excess = self.tail.len().saturating_sub(TAIL_BYTES);
        self.tail.drain(..excess);

        if let Some(marker) = self.marker.filter(|_| !self.marker_found) {
            self.scan_marker(marker, bytes);
        }

        if self.tag == "exe" {
            self.track_pe_signature(start, bytes);
        }
    }

    fn scan_marker(&mut self, marker: &[u8], bytes: &[u8]) {
        let keep = marker.len() - 1;
        let mut joined = std::mem::take(&mut self.carry);
        joined.extend_from_slice(&bytes[..bytes.len().min(keep)]);
        self.marker_found = contains(&joined, marker) || contains(bytes, marker);

        self.carry = if bytes.len() >= keep {
            bytes[bytes.len() - keep..].to_vec()
        } else {
            joined.split_off(joined.len().saturating_sub(keep))
        };
    }

    fn track_pe_signature(&mut self, start: u64, bytes: &[u8]) {
        if self.pe_offset.is_none() && self.head.len() == HEAD_BYTES {
            self.pe_offset = Some(LittleEndian::read_u32(&self.head[0x3C..0x40]) as u64);
        }
        let Some(pe) = self.pe_offset else {
            return;
        };

        let end = start + bytes.len() as u64;
        for (i, slot) in self.pe_bytes.iter_mut().enumerate() {
            let pos = pe + i as u64;
            if pos >= HEAD_BYTES as u64 && (start..end).contains(&pos) {
                *slot = Some(bytes[(pos - start) as usize]);
            }
        }
    }

    fn pe_signature_present(&self) -> bool {
        let Some(pe) = self.pe_offset else {
            return false;
        };
        (0..4).all(|i| {
            let pos = pe + i as u64;
            let byte = if pos < HEAD_BYTES as u64 {
                self.head.get(pos as usize).copied()
            } else {
                self.pe_bytes[i]
            };
            byte == Some(PE_SIGNATURE[i])
        })
    }

    /// Verdict over everything fed so far
    pub fn finish(&self) -> Result<(), ValidationFailure> {
        let tag = self.tag.as_str();
        let head = self.head.as_slice();
        match tag {
            "jpg" => {
                if !head.starts_with(&[0xFF, 0xD8]) {
                    return fail(tag, "missing SOI marker");
                }
                if !self.tail.ends_with(&[0xFF, 0xD9]) {
                    return fail(tag, "missing EOI marker");
                }
                Ok(())
            }
            "png" => {
                if !head.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
                    return fail(tag, "bad PNG signature");
                }
                if !self.marker_found {
                    return fail(tag, "no IEND chunk");
                }
                Ok(())
            }
            "gif" => {
                if !head.starts_with(b"GIF8") {
                    return fail(tag, "bad GIF signature");
                }
                if self.tail.last() != Some(&0x3B) {
                    return fail(tag, "missing trailer");
                }
                Ok(())
            }
            "pdf" => {
                if !head.starts_with(b"%PDF") {
                    return fail(tag, "missing %PDF header");
                }
                Ok(())
            }
            "zip" | "docx" | "xlsx" => {
                if !head.starts_with(&[0x50, 0x4B, 0x03, 0x04]) {
                    return fail(tag, "missing local file header");
                }
                match tag {
                    "docx" if !self.marker_found => fail(tag, "no word/ part"),
                    "xlsx" if !self.marker_found => fail(tag, "no xl/ part"),
                    _ => Ok(()),
                }
            }
            "exe" => {
                if !head.starts_with(b"MZ") {
                    return fail(tag, "missing MZ header");
                }
                if head.len() < HEAD_BYTES {
                    return fail(tag, "truncated DOS header");
                }
                if !self.pe_signature_present() {
                    return fail(tag, "no PE signature at e_lfanew");
                }
                Ok(())
            }
            "mp4" => {
                if head.get(4..8) != Some(b"ftyp".as_slice()) {
                    return fail(tag, "no ftyp box");
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(tag: &str, data: &[u8]) -> Result<(), ValidationFailure> {
        let mut validator = StructureCheck::new(tag);
        validator.update(data);
        validator.finish()
    }

    /// Same verdict when `data` arrives `step` bytes at a time
    fn check_in_steps(tag: &str, data: &[u8], step: usize) -> Result<(), ValidationFailure> {
        let mut validator = StructureCheck::new(tag);
        for piece in data.chunks(step) {
            validator.update(piece);
        }
        validator.finish()
    }

    #[test]
    fn test_jpeg_markers() {
        assert!(check("jpg", &[0xFF, 0xD8, 0xFF, 0x00, 0xFF, 0xD9]).is_ok());
        let err = check("jpg", &[0xFF, 0xD8, 0xFF, 0x00]).unwrap_err();
        assert_eq!(err.reason, "missing EOI marker");
        assert_eq!(err.to_string(), "invalid jpg candidate: missing EOI marker");
        assert!(check_in_steps("jpg", &[0xFF, 0xD8, 0xFF, 0x00, 0xFF, 0xD9], 1).is_ok());
    }

    #[test]
    fn test_office_parts() {
        let mut docx = vec![0x50, 0x4B, 0x03, 0x04];
        docx.extend_from_slice(b"....word/document.xml");
        assert!(check("docx", &docx).is_ok());
        assert!(check("xlsx", &docx).is_err());
        assert!(check("zip", &docx).is_ok());
    }

    #[test]
    fn test_markers_found_across_updates() {
        let mut docx = vec![0x50, 0x4B, 0x03, 0x04];
        docx.extend_from_slice(b"....word/document.xml");
        for step in 1..docx.len() {
            assert!(check_in_steps("docx", &docx, step).is_ok(), "step {}", step);
        }

        let mut png = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        png.extend_from_slice(b"xxIEND\xAE\x42\x60\x82");
        for step in 1..png.len() {
            assert!(check_in_steps("png", &png, step).is_ok(), "step {}", step);
        }
        assert!(check_in_steps("png", &png[..10], 3).is_err());
    }

    #[test]
    fn test_pe_header() {
        let mut exe = vec![0u8; 0x100];
        exe[..2].copy_from_slice(b"MZ");
        exe[0x3C..0x40].copy_from_slice(&0x80u32.to_le_bytes());
        assert!(check("exe", &exe).is_err());
        exe[0x80..0x84].copy_from_slice(PE_SIGNATURE);
        assert!(check("exe", &exe).is_ok());
        assert!(check_in_steps("exe", &exe, 7).is_ok());
        assert!(check_in_steps("exe", &exe, 0x41).is_ok());

        // e_lfanew pointing past the end
        exe[0x3C..0x40].copy_from_slice(&0xFFFF_FFF0u32.to_le_bytes());
        assert!(check("exe", &exe).is_err());

        assert_eq!(check("exe", b"MZ\x90\x00").unwrap_err().reason, "truncated DOS header");
    }

    #[test]
    fn test_pe_signature_inside_dos_header() {
        // e_lfanew of 0x30 overlaps the prefix kept for header checks
        let mut exe = vec![0u8; 0x80];
        exe[..2].copy_from_slice(b"MZ");
        exe[0x30..0x34].copy_from_slice(PE_SIGNATURE);
        exe[0x3C..0x40].copy_from_slice(&0x30u32.to_le_bytes());
        assert!(check_in_steps("exe", &exe, 5).is_ok());
    }

    #[test]
    fn test_other_types() {
        assert!(check("gif", b"GIF89a\x00\x3B").is_ok());
        assert!(check_in_steps("gif", b"GIF89a\x00\x3B", 1).is_ok());
        assert!(check("gif", b"GIF89a\x00").is_err());
        assert!(check("pdf", b"%PDF-1.4 ... %%EOF").is_ok());
        assert!(check("mp4", &[0, 0, 0, 0x20, b'f', b't', b'y', b'p']).is_ok());
        assert!(check("mp4", &[0, 0, 0, 0x20]).is_err());
        assert!(check("txt", b"anything").is_ok());
    }
}
