//! File signature registry used for carving and content identification

use std::collections::BTreeMap;
use std::sync::OnceLock;

const MIB: u64 = 1024 * 1024;

/// Header/footer description of one carvable type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSignature {
    /// Extension tag, also used as the carved file extension
    pub extension: &'static str,
    pub description: &'static str,
    /// `None` disables header scanning (free text)
    pub header: Option<&'static [u8]>,
    pub footer: Option<&'static [u8]>,
    /// Carves never extend beyond this many bytes
    pub max_size: u64,
}

static REGISTRY: OnceLock<BTreeMap<&'static str, FileSignature>> = OnceLock::new();
static ALTERNATIVE_HEADERS: OnceLock<BTreeMap<&'static str, Vec<&'static [u8]>>> = OnceLock::new();

fn build_registry() -> BTreeMap<&'static str, FileSignature> {
    let signatures = [
        FileSignature {
            extension: "jpg",
            description: "JPEG Image",
            header: Some(&[0xFF, 0xD8, 0xFF]),
            footer: Some(&[0xFF, 0xD9]),
            max_size: 50 * MIB,
        },
        FileSignature {
            extension: "png",
            description: "PNG Image",
            header: Some(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]),
            footer: Some(&[0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82]),
            max_size: 50 * MIB,
        },
        FileSignature {
            extension: "gif",
            description: "GIF Image",
            header: Some(b"GIF87a"),
            footer: Some(&[0x00, 0x3B]),
            max_size: 20 * MIB,
        },
        FileSignature {
            extension: "pdf",
            description: "PDF Document",
            header: Some(b"%PDF"),
            footer: Some(b"%%EOF"),
            max_size: 500 * MIB,
        },
        FileSignature {
            extension: "docx",
            description: "Microsoft Word Document",
            header: Some(&[0x50, 0x4B, 0x03, 0x04]),
            footer: None,
            max_size: 100 * MIB,
        },
        FileSignature {
            extension: "xlsx",
            description: "Microsoft Excel Spreadsheet",
            header: Some(&[0x50, 0x4B, 0x03, 0x04]),
            footer: None,
            max_size: 100 * MIB,
        },
        FileSignature {
            extension: "zip",
            description: "ZIP Archive",
            header: Some(&[0x50, 0x4B, 0x03, 0x04]),
            footer: Some(&[0x50, 0x4B, 0x05, 0x06]),
            max_size: 1024 * MIB,
        },
        FileSignature {
            extension: "mp4",
            description: "MPEG-4 Video",
            header: Some(&[0x00, 0x00, 0x00, 0x20, 0x66, 0x74, 0x79, 0x70]),
            footer: None,
            max_size: 4096 * MIB,
        },
        FileSignature {
            extension: "exe",
            description: "Windows Executable",
            header: Some(b"MZ"),
            footer: None,
            max_size: 500 * MIB,
        },
        FileSignature {
            extension: "txt",
            description: "Text File",
            header: None,
            footer: None,
            max_size: 10 * MIB,
        },
    ];

    signatures.into_iter().map(|s| (s.extension, s)).collect()
}

fn build_alternative_headers() -> BTreeMap<&'static str, Vec<&'static [u8]>> {
    let ooxml: &'static [u8] = &[0x50, 0x4B, 0x03, 0x04, 0x14, 0x00, 0x06, 0x00];
    BTreeMap::from([
        ("gif", vec![b"GIF87a".as_slice(), b"GIF89a".as_slice()]),
        (
            "jpg",
            vec![
                [0xFF, 0xD8, 0xFF, 0xE0].as_slice(),
                [0xFF, 0xD8, 0xFF, 0xE1].as_slice(),
                [0xFF, 0xD8, 0xFF, 0xE8].as_slice(),
            ],
        ),
        ("docx", vec![ooxml]),
        ("xlsx", vec![ooxml]),
    ])
}

/// The process-wide signature registry, keyed by extension tag
pub fn registry() -> &'static BTreeMap<&'static str, FileSignature> {
    REGISTRY.get_or_init(build_registry)
}

pub fn signature(tag: &str) -> Option<&'static FileSignature> {
    registry().get(tag)
}

/// Extra header variants for a tag (may be empty)
pub fn alternative_headers(tag: &str) -> &'static [&'static [u8]] {
    ALTERNATIVE_HEADERS
        .get_or_init(build_alternative_headers)
        .get(tag)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Primary header followed by distinct alternatives
pub fn headers_for(sig: &FileSignature) -> Vec<&'static [u8]> {
    let mut headers: Vec<&'static [u8]> = sig.header.into_iter().collect();
    for alt in alternative_headers(sig.extension) {
        if !headers.contains(alt) {
            headers.push(alt);
        }
    }
    headers
}

/// All registered extension tags
pub fn supported_types() -> Vec<&'static str> {
    registry().keys().copied().collect()
}

/// Identify content by header, falling back to a printable-text heuristic
pub fn identify(data: &[u8]) -> Option<&'static str> {
    let by_header = registry()
        .values()
        .filter(|sig| headers_for(sig).iter().any(|h| data.starts_with(h)))
        // Most specific match wins, e.g. an OOXML header over plain zip
        .max_by_key(|sig| {
            headers_for(sig)
                .iter()
                .filter(|h| data.starts_with(h))
                .map(|h| h.len())
                .max()
                .unwrap_or(0)
        });

    if let Some(sig) = by_header {
        return Some(sig.extension);
    }
    is_text(data).then_some("txt")
}

/// Check if data looks like text
pub fn is_text(data: &[u8]) -> bool {
    if data.is_empty() {
        return false;
    }

    // Most of the first KiB must be printable ASCII or whitespace
    let sample = &data[..data.len().min(1024)];
    let printable_count = sample
        .iter()
        .filter(|&&b| (0x20..=0x7E).contains(&b) || b == 0x09 || b == 0x0A || b == 0x0D)
        .count();

    (printable_count as f32 / sample.len() as f32) > 0.8
}
