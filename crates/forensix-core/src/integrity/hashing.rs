//! Multi-algorithm hashing of byte slices and files

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use crate::error::{ForensicsError, Result};

/// Supported hash algorithms
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

/// Hex digests keyed by algorithm
pub type Digests = BTreeMap<HashAlgorithm, String>;

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 4] = [Self::Md5, Self::Sha1, Self::Sha256, Self::Sha512];

    /// Get algorithm name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Parse a list of algorithm names, dropping unknown ones with a warning.
    /// Duplicates collapse, first occurrence wins.
    pub fn parse_list<I, S>(names: I) -> Vec<HashAlgorithm>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut algorithms = Vec::new();
        for name in names {
            match name.as_ref().parse::<HashAlgorithm>() {
                Ok(alg) if !algorithms.contains(&alg) => algorithms.push(alg),
                Ok(_) => {}
                Err(e) => tracing::warn!("{}", e),
            }
        }
        algorithms
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = ForensicsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            _ => Err(ForensicsError::HashAlgorithmUnsupported(s.to_string())),
        }
    }
}

/// Feeds the same bytes to several digests at once
pub struct MultiHasher {
    md5: Option<md5::Context>,
    sha1: Option<Sha1>,
    sha256: Option<Sha256>,
    sha512: Option<Sha512>,
}

impl MultiHasher {
    pub fn new(algorithms: &[HashAlgorithm]) -> Self {
        let wants = |alg| algorithms.contains(&alg);
        Self {
            md5: wants(HashAlgorithm::Md5).then(md5::Context::new),
            sha1: wants(HashAlgorithm::Sha1).then(Sha1::new),
            sha256: wants(HashAlgorithm::Sha256).then(Sha256::new),
            sha512: wants(HashAlgorithm::Sha512).then(Sha512::new),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        if let Some(h) = &mut self.md5 {
            h.consume(data);
        }
        if let Some(h) = &mut self.sha1 {
            h.update(data);
        }
        if let Some(h) = &mut self.sha256 {
            h.update(data);
        }
        if let Some(h) = &mut self.sha512 {
            h.update(data);
        }
    }

    pub fn finalize(self) -> Digests {
        let mut digests = Digests::new();
        if let Some(h) = self.md5 {
            digests.insert(HashAlgorithm::Md5, format!("{:x}", h.compute()));
        }
        if let Some(h) = self.sha1 {
            digests.insert(HashAlgorithm::Sha1, format!("{:x}", h.finalize()));
        }
        if let Some(h) = self.sha256 {
            digests.insert(HashAlgorithm::Sha256, format!("{:x}", h.finalize()));
        }
        if let Some(h) = self.sha512 {
            digests.insert(HashAlgorithm::Sha512, format!("{:x}", h.finalize()));
        }
        digests
    }
}

/// Calculate hashes from byte slice
pub fn hash_bytes(data: &[u8], algorithms: &[HashAlgorithm]) -> Digests {
    let mut hasher = MultiHasher::new(algorithms);
    hasher.update(data);
    hasher.finalize()
}

/// Stream a reader through the hashers; returns digests and byte count
pub fn hash_reader<R: Read>(
    mut reader: R,
    algorithms: &[HashAlgorithm],
    buffer_size: usize,
) -> Result<(Digests, u64)> {
    let mut hasher = MultiHasher::new(algorithms);
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        total += n as u64;
    }
    Ok((hasher.finalize(), total))
}

/// Calculate hashes for a file without loading it whole
pub fn hash_file(
    path: impl AsRef<Path>,
    algorithms: &[HashAlgorithm],
    buffer_size: usize,
) -> Result<(Digests, u64)> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ForensicsError::NotFound(path.display().to_string()),
        _ => ForensicsError::Io(e),
    })?;
    hash_reader(file, algorithms, buffer_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        let digests = hash_bytes(b"abc", &HashAlgorithm::ALL);
        assert_eq!(digests[&HashAlgorithm::Md5], "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(digests[&HashAlgorithm::Sha1], "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(
            digests[&HashAlgorithm::Sha256],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(digests[&HashAlgorithm::Sha512].len(), 128);
    }

    #[test]
    fn test_subset_only() {
        let digests = hash_bytes(b"", &[HashAlgorithm::Md5]);
        assert_eq!(digests.len(), 1);
        assert_eq!(digests[&HashAlgorithm::Md5], "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_parse_list_drops_unknown() {
        let algs = HashAlgorithm::parse_list(["MD5", "crc32", "sha-256", "md5"]);
        assert_eq!(algs, vec![HashAlgorithm::Md5, HashAlgorithm::Sha256]);
        assert!(matches!(
            "whirlpool".parse::<HashAlgorithm>(),
            Err(ForensicsError::HashAlgorithmUnsupported(_))
        ));
    }

    #[test]
    fn test_streaming_matches_in_memory() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, &data).unwrap();

        let (streamed, size) = hash_file(&path, &HashAlgorithm::ALL, 4096).unwrap();
        assert_eq!(size, data.len() as u64);
        assert_eq!(streamed, hash_bytes(&data, &HashAlgorithm::ALL));

        assert!(matches!(
            hash_file(dir.path().join("missing"), &[HashAlgorithm::Md5], 4096),
            Err(ForensicsError::NotFound(_))
        ));
    }
}
