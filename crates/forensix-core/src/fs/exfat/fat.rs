//! exFAT allocation table and cluster geometry.
//!
//! Cluster numbering starts at 2; entries 0 and 1 are media descriptors.

use anyhow::Result;
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashSet;

use super::ExFatBootSector;
use crate::image::DiskImage;

const FREE: u32 = 0x0000_0000;
const BAD: u32 = 0xFFFF_FFF7;
const FIRST_DATA_CLUSTER: u32 = 2;

/// Meaning of one table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Next(u32),
    EndOfChain,
    Free,
    Bad,
    /// Values 1 and anything pointing outside the table
    Invalid,
}

/// First FAT of a volume plus the geometry needed to locate clusters
#[derive(Debug)]
pub struct AllocationTable {
    links: Vec<u32>,
    cluster_size: u32,
    /// Volume-relative byte offset of cluster 2
    heap_offset: u64,
    cluster_count: u32,
}

impl AllocationTable {
    /// Read the first FAT of the volume whose boot sector is at `base`
    pub fn from_image(image: &dyn DiskImage, base: u64, boot: &ExFatBootSector) -> Result<Self> {
        let sector = boot.bytes_per_sector() as u64;
        let start = base + boot.fat_offset as u64 * sector;
        // Entries past the last cluster are padding
        let wanted = (boot.fat_length as u64 * sector).min((boot.cluster_count as u64 + 2) * 4);

        let raw = image.read_at(start, wanted as usize)?;
        if (raw.len() as u64) < wanted {
            anyhow::bail!("FAT truncated: {} of {} bytes readable", raw.len(), wanted);
        }
        tracing::trace!("FAT at 0x{:x}: {} entries", start, raw.len() / 4);

        Ok(Self {
            links: raw.chunks_exact(4).map(LittleEndian::read_u32).collect(),
            cluster_size: boot.bytes_per_cluster(),
            heap_offset: boot.cluster_heap_offset as u64 * sector,
            cluster_count: boot.cluster_count,
        })
    }

    pub fn cluster_size(&self) -> u32 {
        self.cluster_size
    }

    pub fn is_valid_cluster(&self, cluster: u32) -> bool {
        (FIRST_DATA_CLUSTER as u64..self.cluster_count as u64 + 2).contains(&(cluster as u64))
    }

    pub fn link(&self, cluster: u32) -> Link {
        let raw = self.links.get(cluster as usize).filter(|_| cluster >= FIRST_DATA_CLUSTER);
        let Some(&raw) = raw else {
            return Link::Invalid;
        };
        match raw {
            FREE => Link::Free,
            BAD => Link::Bad,
            r if r > BAD => Link::EndOfChain,
            r if self.is_valid_cluster(r) => Link::Next(r),
            _ => Link::Invalid,
        }
    }

    /// Clusters reachable from `first`, stopping at the end marker, a free or
    /// bad entry, or the first revisited cluster
    pub fn chain(&self, first: u32) -> Vec<u32> {
        let mut seen = HashSet::new();
        let mut chain = Vec::new();
        let mut current = Some(first).filter(|&c| self.is_valid_cluster(c));

        while let Some(cluster) = current {
            if !seen.insert(cluster) {
                tracing::warn!("FAT chain from cluster {} loops back to {}", first, cluster);
                break;
            }
            chain.push(cluster);
            current = match self.link(cluster) {
                Link::Next(next) => Some(next),
                _ => None,
            };
        }
        chain
    }

    /// Volume-relative byte offset of `cluster`
    pub fn cluster_offset(&self, cluster: u32) -> u64 {
        let index = cluster.saturating_sub(FIRST_DATA_CLUSTER) as u64;
        self.heap_offset + index * self.cluster_size as u64
    }

    #[cfg(test)]
    pub(crate) fn from_links(links: Vec<u32>, cluster_size: u32) -> Self {
        let cluster_count = links.len().saturating_sub(2) as u32;
        Self {
            links,
            cluster_size,
            heap_offset: 0,
            cluster_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_classification() {
        let links = vec![0xFFFF_FFF8, 0xFFFF_FFFF, 3, 0xFFFF_FFFF, 0, BAD, 1, 99];
        let fat = AllocationTable::from_links(links, 4096);
        assert_eq!(fat.link(0), Link::Invalid);
        assert_eq!(fat.link(2), Link::Next(3));
        assert_eq!(fat.link(3), Link::EndOfChain);
        assert_eq!(fat.link(4), Link::Free);
        assert_eq!(fat.link(5), Link::Bad);
        assert_eq!(fat.link(6), Link::Invalid);
        // Points past the last cluster
        assert_eq!(fat.link(7), Link::Invalid);
        assert_eq!(fat.link(100), Link::Invalid);
    }

    #[test]
    fn test_chain() {
        let mut links = vec![0u32; 10];
        links[2] = 3;
        links[3] = 4;
        links[4] = 0xFFFF_FFFF;
        let fat = AllocationTable::from_links(links, 4096);
        assert_eq!(fat.chain(2), vec![2, 3, 4]);
        assert_eq!(fat.chain(5), vec![5]);
        assert!(fat.chain(0).is_empty());
    }

    #[test]
    fn test_chain_loop_is_cut() {
        let mut links = vec![0u32; 8];
        links[2] = 3;
        links[3] = 2;
        let fat = AllocationTable::from_links(links, 512);
        assert_eq!(fat.chain(2), vec![2, 3]);
    }

    #[test]
    fn test_cluster_offset() {
        let fat = AllocationTable::from_links(vec![0; 10], 4096);
        assert_eq!(fat.cluster_offset(2), 0);
        assert_eq!(fat.cluster_offset(5), 3 * 4096);
        assert!(fat.is_valid_cluster(9));
        assert!(!fat.is_valid_cluster(10));
        assert!(!fat.is_valid_cluster(1));
    }
}
