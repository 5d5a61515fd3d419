//! FindFirst/FindNext enumeration across the mount list

use crate::filesystem::{FileSystem, IdFilter};
use crate::mount::{MountKind, SearchPath, StoreId};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use stratum_pack::path::file_name;
use stratum_pack::{Wildcard, WildcardMatch};

/// One enumerated name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundEntry {
    /// Unqualified name (last path component)
    pub name: String,
    /// Whether the name is a directory
    pub is_directory: bool,
}

/// Enumeration in progress
///
/// The first call to `next` behaves as FindFirst, later calls as FindNext.
/// Each mount contributes its files before its directories; a name already
/// returned by an earlier mount is not returned again.
#[derive(Debug)]
pub struct Find<'a> {
    fs: &'a FileSystem,
    mounts: Arc<Vec<SearchPath>>,
    raw: String,
    wildcard: Wildcard,
    ids: IdFilter,
    next_mount: usize,
    pending: VecDeque<FoundEntry>,
    returned: HashSet<String>,
    visited: HashSet<StoreId>,
}

impl<'a> Find<'a> {
    pub(crate) fn new(
        fs: &'a FileSystem,
        mounts: Arc<Vec<SearchPath>>,
        wildcard: &str,
        ids: IdFilter,
    ) -> Self {
        Self {
            fs,
            mounts,
            raw: wildcard.to_string(),
            wildcard: Wildcard::parse(wildcard),
            ids,
            next_mount: 0,
            pending: VecDeque::new(),
            returned: HashSet::new(),
            visited: HashSet::new(),
        }
    }

    fn collect(&mut self, index: usize) {
        let mounts = Arc::clone(&self.mounts);
        let mount = &mounts[index];
        if !self.fs.admits(self.ids, mount) || !self.visited.insert(mount.store_id) {
            return;
        }

        let (directories, files) = match &mount.kind {
            MountKind::Loose => self.list_directory(mount),
            // archives only answer enumeration of the level pack
            MountKind::Archive(archive) if matches!(self.ids, IdFilter::MapPack(_)) => {
                archive.file_and_dir_lists(&self.raw)
            }
            MountKind::Archive(_) => return,
            MountKind::PackedStore(store) => store.file_and_dir_lists(&self.raw),
        };

        let files = files.into_iter().map(|name| (name, false));
        let directories = directories.into_iter().map(|name| (name, true));
        for (name, is_directory) in files.chain(directories) {
            let short = file_name(name.trim_end_matches('/')).to_string();
            let mut key = short.to_ascii_lowercase();
            if is_directory {
                key.push('/');
            }
            if self.returned.insert(key) {
                self.pending.push_back(FoundEntry {
                    name: short,
                    is_directory,
                });
            }
        }
    }

    fn list_directory(&self, mount: &SearchPath) -> (Vec<String>, Vec<String>) {
        let mut directories = Vec::new();
        let mut files = Vec::new();
        let Some(base) = self.fs.path_name(mount.path) else {
            return (directories, files);
        };
        let Ok(listing) = std::fs::read_dir(format!("{base}{}", self.wildcard.directory())) else {
            return (directories, files);
        };

        for entry in listing.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let candidate = format!(
                "{}{}",
                self.wildcard.directory(),
                entry.file_name().to_string_lossy()
            );
            // a directory's own name is matched as if it were a file
            if !matches!(self.wildcard.matches(&candidate), Some(WildcardMatch::File(_))) {
                continue;
            }
            if file_type.is_dir() {
                directories.push(candidate);
            } else {
                files.push(candidate);
            }
        }

        directories.sort();
        files.sort();
        (directories, files)
    }
}

impl Iterator for Find<'_> {
    type Item = FoundEntry;

    fn next(&mut self) -> Option<FoundEntry> {
        loop {
            if let Some(found) = self.pending.pop_front() {
                return Some(found);
            }
            if self.next_mount >= self.mounts.len() {
                return None;
            }
            let index = self.next_mount;
            self.next_mount += 1;
            self.collect(index);
        }
    }
}
