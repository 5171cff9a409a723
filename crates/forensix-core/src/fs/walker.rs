//! Depth-first traversal of a [`FileSystem`].
//!
//! Deleted entries are yielded with `is_deleted` set, but deleted directories
//! are never descended into. Directories are tracked by record id so a
//! corrupted structure that links back to an ancestor cannot loop forever,
//! and a depth limit bounds traversal when record ids are unavailable.

use std::collections::HashSet;

use super::{components, FileSystem};
use crate::config::WalkConfig;
use crate::error::{ForensicsError, Result};
use crate::task::{percent_of, TaskContext};
use crate::FileEntry;

/// Lazy pre-order iterator over every entry below the root
pub struct Walk<'a> {
    fs: &'a dyn FileSystem,
    stack: Vec<(FileEntry, usize)>,
    visited: HashSet<u64>,
    max_depth: usize,
    started: bool,
    directories_listed: u64,
    directories_discovered: u64,
    failed_directories: Vec<String>,
}

impl<'a> Walk<'a> {
    pub fn new(fs: &'a dyn FileSystem, max_depth: usize) -> Self {
        Self {
            fs,
            stack: Vec::new(),
            visited: HashSet::new(),
            max_depth,
            started: false,
            directories_listed: 0,
            directories_discovered: 1,
            failed_directories: Vec::new(),
        }
    }

    pub fn directories_listed(&self) -> u64 {
        self.directories_listed
    }

    /// Directories known so far, listed or still queued
    pub fn directories_discovered(&self) -> u64 {
        self.directories_discovered
    }

    /// Paths whose listing failed and whose subtree was skipped
    pub fn failed_directories(&self) -> &[String] {
        &self.failed_directories
    }

    fn expand(&mut self, path: &str, depth: usize) {
        match self.fs.list_directory(path) {
            Ok(entries) => {
                self.directories_listed += 1;
                self.directories_discovered += entries
                    .iter()
                    .filter(|e| e.is_directory && !e.is_deleted)
                    .count() as u64;
                self.stack.extend(entries.into_iter().rev().map(|e| (e, depth)));
            }
            Err(e) => {
                tracing::warn!("Skipping subtree {}: {}", path, e);
                self.directories_listed += 1;
                self.failed_directories.push(path.to_string());
            }
        }
    }
}

impl Iterator for Walk<'_> {
    type Item = FileEntry;

    fn next(&mut self) -> Option<FileEntry> {
        if !self.started {
            self.started = true;
            self.expand("/", 1);
        }

        let (entry, depth) = self.stack.pop()?;

        if entry.is_directory && !entry.is_deleted {
            let first_visit = entry.record_id.map_or(true, |id| self.visited.insert(id));
            if !first_visit {
                tracing::warn!(
                    "Directory cycle at {} (record {:?}), not descending",
                    entry.path,
                    entry.record_id
                );
                self.directories_listed += 1;
            } else if depth >= self.max_depth {
                tracing::warn!("Maximum depth {} reached at {}", self.max_depth, entry.path);
                self.directories_listed += 1;
            } else {
                self.expand(&entry.path, depth + 1);
            }
        }

        Some(entry)
    }
}

/// Walk the whole file system with the default depth limit
pub fn walk(fs: &dyn FileSystem) -> Walk<'_> {
    Walk::new(fs, WalkConfig::default().max_depth)
}

/// Result of a cancellable walk
#[derive(Debug, Clone, Default)]
pub struct WalkOutcome {
    pub entries: Vec<FileEntry>,
    pub cancelled: bool,
    pub failed_directories: Vec<String>,
}

/// Collect a full walk, reporting progress as directories complete and
/// stopping between entries when cancelled
pub fn walk_with_progress(fs: &dyn FileSystem, max_depth: usize, ctx: &TaskContext) -> WalkOutcome {
    let mut walker = Walk::new(fs, max_depth);
    let mut outcome = WalkOutcome::default();

    loop {
        if ctx.is_cancelled() {
            tracing::info!("Walk cancelled after {} entries", outcome.entries.len());
            outcome.cancelled = true;
            break;
        }
        let Some(entry) = walker.next() else {
            break;
        };
        if entry.is_directory {
            ctx.report(
                percent_of(walker.directories_listed(), walker.directories_discovered()),
                format!(
                    "Walking: {} / {} directories",
                    walker.directories_listed(),
                    walker.directories_discovered()
                ),
            );
        }
        outcome.entries.push(entry);
    }

    outcome.failed_directories = walker.failed_directories().to_vec();
    if !outcome.cancelled {
        ctx.report(100, format!("Walk complete: {} entries", outcome.entries.len()));
    }
    outcome
}

/// Build the subtree rooted at `path` with `children` populated
pub fn build_tree(fs: &dyn FileSystem, path: &str, max_depth: usize) -> Result<FileEntry> {
    let mut root = lookup(fs, path)?;
    if !root.is_directory {
        return Ok(root);
    }

    let mut visited = HashSet::new();
    if let Some(id) = root.record_id {
        visited.insert(id);
    }
    root.children = fs.list_directory(&root.path)?;
    for child in &mut root.children {
        fill_children(fs, child, 2, max_depth, &mut visited);
    }
    Ok(root)
}

fn fill_children(
    fs: &dyn FileSystem,
    node: &mut FileEntry,
    depth: usize,
    max_depth: usize,
    visited: &mut HashSet<u64>,
) {
    if !node.is_directory || node.is_deleted || depth > max_depth {
        return;
    }
    if let Some(id) = node.record_id {
        if !visited.insert(id) {
            tracing::warn!("Directory cycle at {}, not descending", node.path);
            return;
        }
    }

    match fs.list_directory(&node.path) {
        Ok(children) => node.children = children,
        Err(e) => {
            tracing::warn!("Skipping subtree {}: {}", node.path, e);
            return;
        }
    }
    for child in &mut node.children {
        fill_children(fs, child, depth + 1, max_depth, visited);
    }
}

/// The entry naming `path`; the root is represented by a synthetic directory entry
fn lookup(fs: &dyn FileSystem, path: &str) -> Result<FileEntry> {
    let parts: Vec<&str> = components(path).collect();
    let Some((name, parents)) = parts.split_last() else {
        return Ok(FileEntry {
            name: "/".to_string(),
            path: "/".to_string(),
            size: 0,
            is_directory: true,
            is_deleted: false,
            created_at: None,
            modified_at: None,
            accessed_at: None,
            record_id: None,
            parent_id: None,
            attributes: Default::default(),
            children: Vec::new(),
        });
    };

    let parent = format!("/{}", parents.join("/"));
    fs.list_directory(&parent)?
        .into_iter()
        .find(|e| e.name == *name)
        .ok_or_else(|| ForensicsError::NotFound(path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FileSystemKind;
    use crate::image::null::SyntheticFileSystem;
    use std::collections::BTreeMap;

    #[test]
    fn test_preorder_and_deleted_directories() {
        let fs = SyntheticFileSystem::new();
        let paths: Vec<String> = walk(&fs).map(|e| e.path).collect();
        assert_eq!(
            paths,
            vec![
                "/Documents",
                "/Documents/report.docx",
                "/Documents/notes.txt",
                "/Documents/old_drafts",
                "/Pictures",
                "/Pictures/holiday.jpg",
                "/Pictures/backup.zip",
                "/system.log",
            ]
        );
    }

    /// Every directory lists itself as its only child
    struct CyclicFs;

    impl FileSystem for CyclicFs {
        fn kind(&self) -> FileSystemKind {
            FileSystemKind::Synthetic
        }

        fn list_directory(&self, path: &str) -> Result<Vec<FileEntry>> {
            Ok(vec![FileEntry {
                name: "loop".into(),
                path: format!("{}/loop", path.trim_end_matches('/')),
                size: 0,
                is_directory: true,
                is_deleted: false,
                created_at: None,
                modified_at: None,
                accessed_at: None,
                record_id: Some(7),
                parent_id: Some(7),
                attributes: BTreeMap::new(),
                children: Vec::new(),
            }])
        }

        fn read_content(&self, _path: &str) -> Option<Vec<u8>> {
            None
        }
    }

    #[test]
    fn test_cycle_terminates() {
        let fs = CyclicFs;
        let entries: Vec<FileEntry> = walk(&fs).collect();
        // root -> loop (descended) -> loop (already visited)
        assert_eq!(entries.len(), 2);

        let tree = build_tree(&fs, "/", 64).unwrap();
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].children.len(), 1);
        assert!(tree.children[0].children[0].children.is_empty());
    }

    #[test]
    fn test_depth_limit_without_record_ids() {
        struct Deep;
        impl FileSystem for Deep {
            fn kind(&self) -> FileSystemKind {
                FileSystemKind::Synthetic
            }
            fn list_directory(&self, path: &str) -> Result<Vec<FileEntry>> {
                let mut entry = CyclicFs.list_directory(path)?;
                entry[0].record_id = None;
                Ok(entry)
            }
            fn read_content(&self, _path: &str) -> Option<Vec<u8>> {
                None
            }
        }

        assert_eq!(Walk::new(&Deep, 5).count(), 5);
    }

    #[test]
    fn test_cancelled_walk_returns_partial() {
        let fs = SyntheticFileSystem::new();
        let ctx = TaskContext::detached();
        ctx.token().cancel();
        let outcome = walk_with_progress(&fs, 64, &ctx);
        assert!(outcome.cancelled);
        assert!(outcome.entries.is_empty());

        let outcome = walk_with_progress(&fs, 64, &TaskContext::detached());
        assert!(!outcome.cancelled);
        assert_eq!(outcome.entries.len(), 8);
    }

    #[test]
    fn test_build_tree_subdirectory() {
        let fs = SyntheticFileSystem::new();
        let tree = build_tree(&fs, "/Documents", 64).unwrap();
        assert_eq!(tree.name, "Documents");
        let names: Vec<&str> = tree.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["report.docx", "notes.txt", "old_drafts"]);
        // Deleted directory is listed but not expanded
        assert!(tree.children[2].children.is_empty());

        assert!(matches!(build_tree(&fs, "/missing", 64), Err(ForensicsError::NotFound(_))));
    }
}
