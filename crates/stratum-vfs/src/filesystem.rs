//! The layered filesystem: search-path list, lookups and map access
//!
//! Mutators serialize on an edit lock, build a new mount list and publish it
//! as a fresh `Arc`. Lookups clone the current `Arc` and never block on a
//! mount in progress.

use crate::config::FsConfig;
use crate::error::{Result, VfsError};
use crate::find::Find;
use crate::handle::FileHandle;
use crate::mount::{MountKind, PathFilter, PathType, SearchPath, SearchPathAdd, StoreId};
use crate::store::{PackedStore, PackedStoreOpener, TrustPolicy};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use stratum_pack::path::{extension, fix_slashes, normalize_name};
use stratum_pack::{Archive, NameRegistry, OpenGuard, Symbol, read_pack_lump};
use tracing::{debug, info, trace, warn};

/// Separators marking a name that addresses a file inside a mounted archive
const ARCHIVE_MARKERS: [&str; 3] = [".zip/", ".bsp/", ".vpk/"];

#[derive(Debug)]
struct ArchiveSlot {
    archive: Weak<Archive>,
    store_id: StoreId,
}

#[derive(Debug)]
struct StoreSlot {
    store: Weak<dyn PackedStore>,
    store_id: StoreId,
}

#[derive(Debug, Default)]
struct MapAccess {
    depth: usize,
    guards: Vec<OpenGuard>,
}

/// Path-ID restriction of one lookup or enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IdFilter {
    /// Any path ID not marked by-request-only
    Any,
    /// Exactly this path ID
    Only(Symbol),
    /// Map-pack mounts under the game path ID
    MapPack(Symbol),
    /// A path ID nothing was ever mounted under
    Nothing,
}

#[derive(Debug, Clone)]
enum Source {
    Loose(PathBuf),
    Archive(Arc<Archive>),
    PackedStore(Arc<dyn PackedStore>),
}

/// A name resolved against the search-path list
#[derive(Debug, Clone)]
pub struct Resolved {
    full_path: String,
    name: String,
    store_id: StoreId,
    path_type: PathType,
    source: Source,
}

impl Resolved {
    /// Full path of the hit; `archive_path/name` for pack entries
    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    /// Name relative to the mount that satisfied the lookup
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store that satisfied the lookup
    pub const fn store_id(&self) -> StoreId {
        self.store_id
    }

    /// Kind of mount that satisfied the lookup
    pub const fn path_type(&self) -> PathType {
        self.path_type
    }

    /// Archive holding the file, for pack hits
    pub fn archive(&self) -> Option<&Arc<Archive>> {
        match &self.source {
            Source::Archive(archive) => Some(archive),
            _ => None,
        }
    }

    /// Open the resolved file
    pub fn open(&self) -> Result<FileHandle> {
        match &self.source {
            Source::Loose(path) => File::open(path)
                .map(FileHandle::Loose)
                .map_err(|e| not_found_or_io(&self.full_path, e)),
            Source::Archive(archive) => Ok(FileHandle::Pack(archive.open_file(&self.name)?)),
            Source::PackedStore(store) => store
                .open(&self.name)
                .map(FileHandle::Packed)
                .ok_or_else(|| VfsError::NotFound(self.full_path.clone())),
        }
    }

    /// Size of the resolved file in bytes
    pub fn size(&self) -> Result<u64> {
        match &self.source {
            Source::Loose(path) => std::fs::metadata(path)
                .map(|meta| meta.len())
                .map_err(|e| not_found_or_io(&self.full_path, e)),
            Source::Archive(archive) => archive
                .find(&self.name)
                .map(|entry| entry.original_size)
                .ok_or_else(|| VfsError::NotFound(self.full_path.clone())),
            Source::PackedStore(store) => store
                .size(&self.name)
                .ok_or_else(|| VfsError::NotFound(self.full_path.clone())),
        }
    }
}

/// Layered virtual filesystem
pub struct FileSystem {
    config: FsConfig,
    names: Arc<NameRegistry>,
    paths: NameRegistry,
    path_ids: NameRegistry,
    edit: Mutex<()>,
    mounts: RwLock<Arc<Vec<SearchPath>>>,
    request_only: DashMap<Symbol, bool>,
    archives: Mutex<HashMap<(String, u64), ArchiveSlot>>,
    packed_stores: Mutex<HashMap<String, StoreSlot>>,
    next_store_id: AtomicU32,
    opener: Option<Arc<dyn PackedStoreOpener>>,
    trust_policy: Option<Arc<dyn TrustPolicy>>,
    map_access: Mutex<MapAccess>,
}

impl fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSystem")
            .field("config", &self.config)
            .field("mounts", &self.mounts.read().len())
            .field("has_opener", &self.opener.is_some())
            .field("has_trust_policy", &self.trust_policy.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for FileSystem {
    fn default() -> Self {
        Self::new(FsConfig::default())
    }
}

impl FileSystem {
    /// Create an empty filesystem
    pub fn new(config: FsConfig) -> Self {
        Self {
            config,
            names: Arc::new(NameRegistry::new()),
            paths: NameRegistry::caseless(),
            path_ids: NameRegistry::caseless(),
            edit: Mutex::new(()),
            mounts: RwLock::new(Arc::new(Vec::new())),
            request_only: DashMap::new(),
            archives: Mutex::new(HashMap::new()),
            packed_stores: Mutex::new(HashMap::new()),
            next_store_id: AtomicU32::new(1),
            opener: None,
            trust_policy: None,
            map_access: Mutex::new(MapAccess::default()),
        }
    }

    /// Install the opener used for `.vpk` search paths
    #[must_use]
    pub fn with_packed_store_opener(mut self, opener: Arc<dyn PackedStoreOpener>) -> Self {
        self.opener = Some(opener);
        self
    }

    /// Install a policy restricting some files to trusted mounts
    #[must_use]
    pub fn with_trust_policy(mut self, policy: Arc<dyn TrustPolicy>) -> Self {
        self.trust_policy = Some(policy);
        self
    }

    /// Filesystem configuration
    pub const fn config(&self) -> &FsConfig {
        &self.config
    }

    /// Registry of entry names shared by every archive this filesystem opens
    pub const fn names(&self) -> &Arc<NameRegistry> {
        &self.names
    }

    /// Current mount list
    pub fn search_paths(&self) -> Arc<Vec<SearchPath>> {
        Arc::clone(&self.mounts.read())
    }

    /// Spelling of an interned mount path
    pub fn path_name(&self, symbol: Symbol) -> Option<Arc<str>> {
        self.paths.resolve(symbol)
    }

    /// Spelling of an interned path ID
    pub fn path_id_name(&self, symbol: Symbol) -> Option<Arc<str>> {
        self.path_ids.resolve(symbol)
    }

    /// Mount a directory, pack, level pack or packed store under `path_id`
    ///
    /// The kind is chosen by extension: `.bsp` mounts the pack embedded in a
    /// level file, `.vpk` goes through the packed-store opener, `.zip` mounts
    /// one pack, anything else is a loose directory together with the
    /// `zip0.zip, zip1.zip, ...` packs inside it.
    pub fn add_search_path(
        &self,
        path: impl AsRef<Path>,
        path_id: &str,
        add: SearchPathAdd,
    ) -> Result<()> {
        let full = normalize_mount_path(path.as_ref())?;
        let path_id = self.path_ids.intern(path_id);
        let _edit = self.edit.lock();

        match extension(&full).map(str::to_ascii_lowercase).as_deref() {
            Some("bsp") => self.add_map_pack(&full, path_id, add),
            Some("vpk") => self.add_packed_store(&full, path_id, add),
            Some("zip") => self.add_pack(&full, path_id, add),
            _ => self.add_directory(&full, path_id, add),
        }
    }

    fn add_directory(&self, full: &str, path_id: Symbol, add: SearchPathAdd) -> Result<()> {
        let path = self.paths.intern(&mount_key(full));
        let mut list = self.current();
        if already_mounted(&mut list, path, path_id, add) {
            return Ok(());
        }

        let store_id = list
            .iter()
            .find(|mount| mount.path == path && matches!(mount.kind, MountKind::Loose))
            .map_or_else(|| self.fresh_store_id(), |mount| mount.store_id);

        let mut group = Vec::new();
        let directory = Path::new(full);
        for index in 0..self.config.max_auto_packs {
            let pack = directory.join(self.config.auto_pack_name(index));
            if !pack.is_file() {
                break;
            }
            match self.shared_archive(&fix_slashes(&pack.to_string_lossy()), 0, None) {
                Ok((archive, pack_store)) => group.push(SearchPath {
                    path,
                    path_id,
                    store_id: pack_store,
                    trusted: false,
                    map_pack: false,
                    kind: MountKind::Archive(archive),
                }),
                Err(e) => warn!("Skipping pack {}: {e}", pack.display()),
            }
        }
        // zipN shadows zipN-1
        group.reverse();
        group.push(SearchPath {
            path,
            path_id,
            store_id,
            trusted: false,
            map_pack: false,
            kind: MountKind::Loose,
        });

        debug!(
            "Mounted {full} with {} packs (store {store_id})",
            group.len() - 1
        );
        insert_group(&mut list, group, add);
        self.publish(list);
        Ok(())
    }

    fn add_pack(&self, full: &str, path_id: Symbol, add: SearchPathAdd) -> Result<()> {
        let path = self.paths.intern(&mount_key(full));
        let mut list = self.current();
        if already_mounted(&mut list, path, path_id, add) {
            return Ok(());
        }

        let (archive, store_id) = match self.shared_archive(full, 0, None) {
            Ok(shared) => shared,
            Err(e) if e.is_not_found() => {
                debug!("Pack {full} does not exist, nothing mounted");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        debug!("Mounted pack {full} ({} entries, store {store_id})", archive.len());
        let mount = SearchPath {
            path,
            path_id,
            store_id,
            trusted: false,
            map_pack: false,
            kind: MountKind::Archive(archive),
        };
        insert_group(&mut list, vec![mount], add);
        self.publish(list);
        Ok(())
    }

    fn add_map_pack(&self, full: &str, path_id: Symbol, add: SearchPathAdd) -> Result<()> {
        let path = self.paths.intern(&mount_key(full));
        let mut list = self.current();
        if list.iter().any(|mount| mount.map_pack && mount.path == path) {
            return Ok(());
        }

        if !Path::new(full).is_file() {
            return Err(VfsError::NotFound(full.to_string()));
        }
        let lump = read_pack_lump(Path::new(full))?;

        // only one level pack is mounted at a time
        list.retain(|mount| !mount.map_pack);

        let Some((offset, length)) = lump else {
            debug!("{full} has no embedded pack");
            self.publish(list);
            return Ok(());
        };

        let (archive, _) = self.shared_archive(full, offset, Some(length))?;
        let store_id = StoreId::for_map_pack(full);
        debug!(
            "Mounted level pack {full} at {offset} ({} entries, store {store_id})",
            archive.len()
        );
        self.hold_while_mapping(&archive);

        let mount = SearchPath {
            path,
            path_id,
            store_id,
            trusted: true,
            map_pack: true,
            kind: MountKind::Archive(archive),
        };
        insert_group(&mut list, vec![mount], add);
        self.publish(list);
        Ok(())
    }

    fn add_packed_store(&self, full: &str, path_id: Symbol, add: SearchPathAdd) -> Result<()> {
        let Some(opener) = &self.opener else {
            debug!("No packed-store opener installed, skipping {full}");
            return Ok(());
        };

        let path = self.paths.intern(&mount_key(full));
        let mut list = self.current();
        if already_mounted(&mut list, path, path_id, add) {
            return Ok(());
        }

        let shared = {
            let mut stores = self.packed_stores.lock();
            let key = full.to_ascii_lowercase();
            let existing = stores
                .get(&key)
                .and_then(|slot| slot.store.upgrade().map(|store| (store, slot.store_id)));
            existing.or_else(|| {
                let store = opener.open(Path::new(full))?;
                let store_id = stores
                    .get(&key)
                    .map_or_else(|| self.fresh_store_id(), |slot| slot.store_id);
                stores.retain(|_, slot| slot.store.strong_count() > 0);
                stores.insert(
                    key,
                    StoreSlot {
                        store: Arc::downgrade(&store),
                        store_id,
                    },
                );
                Some((store, store_id))
            })
        };
        let Some((store, store_id)) = shared else {
            debug!("Packed store {full} could not be opened, nothing mounted");
            return Ok(());
        };

        debug!("Mounted packed store {full} (store {store_id})");
        let mount = SearchPath {
            path,
            path_id,
            store_id,
            trusted: store.is_trusted(),
            map_pack: false,
            kind: MountKind::PackedStore(store),
        };
        insert_group(&mut list, vec![mount], add);
        self.publish(list);
        Ok(())
    }

    /// Open an archive or reuse the one already opened for the same file
    fn shared_archive(
        &self,
        full: &str,
        base_offset: u64,
        length: Option<u64>,
    ) -> Result<(Arc<Archive>, StoreId)> {
        let key = (full.to_ascii_lowercase(), base_offset);
        let mut archives = self.archives.lock();
        if let Some(slot) = archives.get(&key)
            && let Some(archive) = slot.archive.upgrade()
        {
            return Ok((archive, slot.store_id));
        }

        let names = Arc::clone(&self.names);
        let config = self.config.pack.clone();
        let archive = match length {
            Some(length) => Archive::open_embedded(full, base_offset, length, names, config)?,
            None => Archive::open(full, names, config)?,
        };
        let store_id = archives
            .get(&key)
            .map_or_else(|| self.fresh_store_id(), |slot| slot.store_id);
        // slots of archives nobody mounts any more
        archives.retain(|_, slot| slot.archive.strong_count() > 0);
        archives.insert(
            key,
            ArchiveSlot {
                archive: Arc::downgrade(&archive),
                store_id,
            },
        );
        Ok((archive, store_id))
    }

    fn fresh_store_id(&self) -> StoreId {
        StoreId::new(self.next_store_id.fetch_add(1, Ordering::Relaxed))
    }

    fn current(&self) -> Vec<SearchPath> {
        self.mounts.read().as_ref().clone()
    }

    fn publish(&self, list: Vec<SearchPath>) {
        *self.mounts.write() = Arc::new(list);
    }

    /// Remove the mounts of `path` under `path_id`
    ///
    /// Returns whether anything was removed. Removing a directory also
    /// removes the packs discovered inside it.
    pub fn remove_search_path(&self, path: impl AsRef<Path>, path_id: &str) -> bool {
        let Ok(full) = normalize_mount_path(path.as_ref()) else {
            return false;
        };
        let (Some(path), Some(path_id)) = (
            self.paths.find(&mount_key(&full)),
            self.path_ids.find(path_id),
        ) else {
            return false;
        };

        let _edit = self.edit.lock();
        let mut list = self.current();
        let before = list.len();
        list.retain(|mount| !(mount.path == path && mount.path_id == path_id));
        let removed = before != list.len();
        if removed {
            debug!("Unmounted {full}");
            self.publish(list);
        }
        removed
    }

    /// Remove every mount under `path_id`, returning how many went away
    pub fn remove_search_paths(&self, path_id: &str) -> usize {
        let Some(path_id) = self.path_ids.find(path_id) else {
            return 0;
        };
        let _edit = self.edit.lock();
        let mut list = self.current();
        let before = list.len();
        list.retain(|mount| mount.path_id != path_id);
        let removed = before - list.len();
        if removed > 0 {
            self.publish(list);
        }
        removed
    }

    /// Remove every mount
    pub fn remove_all_search_paths(&self) {
        let _edit = self.edit.lock();
        self.publish(Vec::new());
    }

    /// `;`-joined list of the paths searched for `path_id`
    pub fn search_path(&self, path_id: Option<&str>, include_packs: bool) -> String {
        let ids = self.id_filter(path_id);
        self.search_paths()
            .iter()
            .filter(|mount| self.admits(ids, mount))
            .filter(|mount| include_packs || !mount.is_pack())
            .map(|mount| self.display_path(mount))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Log the mount list, highest priority first
    pub fn log_search_paths(&self) {
        let mounts = self.search_paths();
        info!("{} search paths mounted", mounts.len());
        for (index, mount) in mounts.iter().enumerate() {
            let path_id = self.path_id_name(mount.path_id).unwrap_or_default();
            info!(
                "  {index}: {} [{path_id}] {:?} store {}{}",
                self.display_path(mount),
                mount.path_type(),
                mount.store_id,
                if mount.trusted { " trusted" } else { "" }
            );
        }
    }

    fn display_path(&self, mount: &SearchPath) -> String {
        match &mount.kind {
            MountKind::Loose => self
                .path_name(mount.path)
                .map(|path| path.to_string())
                .unwrap_or_default(),
            MountKind::Archive(archive) => archive_path(archive),
            MountKind::PackedStore(store) => store.full_path().to_string(),
        }
    }

    /// Exclude `path_id` from lookups that do not name a path ID
    pub fn mark_path_id_by_request_only(&self, path_id: &str, request_only: bool) {
        self.request_only
            .insert(self.path_ids.intern(path_id), request_only);
    }

    pub(crate) fn id_filter(&self, path_id: Option<&str>) -> IdFilter {
        let Some(path_id) = path_id else {
            return IdFilter::Any;
        };
        if path_id.eq_ignore_ascii_case(&self.config.bsp_path_id) {
            return self
                .path_ids
                .find(&self.config.game_path_id)
                .map_or(IdFilter::Nothing, IdFilter::MapPack);
        }
        self.path_ids
            .find(path_id)
            .map_or(IdFilter::Nothing, IdFilter::Only)
    }

    pub(crate) fn admits(&self, ids: IdFilter, mount: &SearchPath) -> bool {
        match ids {
            IdFilter::Any => !self
                .request_only
                .get(&mount.path_id)
                .is_some_and(|flag| *flag),
            IdFilter::Only(path_id) => mount.path_id == path_id,
            IdFilter::MapPack(game) => mount.path_id == game && mount.map_pack,
            IdFilter::Nothing => false,
        }
    }

    /// Find the mount that provides `name`
    ///
    /// Relative names are looked up mount by mount in list order; each
    /// physical store is consulted once. Absolute names are stat'ed directly,
    /// except names of the form `.../pak.zip/inner` which resolve inside that
    /// archive when it is mounted.
    pub fn resolve(&self, name: &str, path_id: Option<&str>, filter: PathFilter) -> Result<Resolved> {
        let fixed = fix_slashes(name);
        if is_absolute_name(&fixed) {
            return self.resolve_absolute(&fixed, filter);
        }

        let relative = normalize_name(&fixed)
            .filter(|relative| !relative.is_empty())
            .ok_or_else(|| VfsError::NotFound(name.to_string()))?;
        let ids = self.id_filter(path_id);
        let requires_trust = self
            .trust_policy
            .as_ref()
            .is_some_and(|policy| policy.requires_trust(&relative));

        let mounts = self.search_paths();
        let mut visited = HashSet::new();
        for mount in mounts.iter() {
            if !mount.passes(filter) || !self.admits(ids, mount) {
                continue;
            }
            if !visited.insert(mount.store_id) {
                continue;
            }
            let Some(hit) = self.lookup(mount, &relative) else {
                continue;
            };
            if requires_trust && !mount.trusted {
                debug!("Skipping untrusted copy of {relative} at {}", hit.full_path);
                continue;
            }
            trace!("Resolved {name} to {}", hit.full_path);
            return Ok(hit);
        }

        Err(VfsError::NotFound(name.to_string()))
    }

    fn lookup(&self, mount: &SearchPath, relative: &str) -> Option<Resolved> {
        let hit = |full_path: String, source: Source| Resolved {
            full_path,
            name: relative.to_string(),
            store_id: mount.store_id,
            path_type: mount.path_type(),
            source,
        };

        match &mount.kind {
            MountKind::Loose => {
                let base = self.paths.resolve(mount.path)?;
                let lowered = format!("{base}{}", relative.to_ascii_lowercase());
                let candidate = if Path::new(&lowered).is_file() {
                    lowered
                } else {
                    let exact = format!("{base}{relative}");
                    Path::new(&exact).is_file().then_some(exact)?
                };
                let path = PathBuf::from(&candidate);
                Some(hit(candidate, Source::Loose(path)))
            }
            MountKind::Archive(archive) => archive.find(relative).map(|_| {
                hit(
                    format!("{}/{relative}", archive_path(archive)),
                    Source::Archive(Arc::clone(archive)),
                )
            }),
            MountKind::PackedStore(store) => store.contains(relative).then(|| {
                hit(
                    format!("{}/{relative}", store.full_path()),
                    Source::PackedStore(Arc::clone(store)),
                )
            }),
        }
    }

    fn resolve_absolute(&self, fixed: &str, filter: PathFilter) -> Result<Resolved> {
        let lowered = fixed.to_ascii_lowercase();
        for marker in ARCHIVE_MARKERS {
            if let Some(at) = lowered.find(marker) {
                let split = at + marker.len() - 1;
                return self.resolve_in_archive(&fixed[..split], &fixed[split + 1..]);
            }
        }

        let path = PathBuf::from(fixed);
        if filter == PathFilter::CullNonPack || !path.is_file() {
            return Err(VfsError::NotFound(fixed.to_string()));
        }
        Ok(Resolved {
            full_path: fixed.to_string(),
            name: fixed.to_string(),
            store_id: StoreId::UNMOUNTED,
            path_type: PathType::Loose,
            source: Source::Loose(path),
        })
    }

    fn resolve_in_archive(&self, container: &str, inner: &str) -> Result<Resolved> {
        let not_found = || VfsError::NotFound(format!("{container}/{inner}"));
        let inner = normalize_name(inner).ok_or_else(not_found)?;

        self.search_paths()
            .iter()
            .find_map(|mount| {
                let matches = match &mount.kind {
                    MountKind::Archive(archive) => {
                        archive_path(archive).eq_ignore_ascii_case(container)
                    }
                    MountKind::PackedStore(store) => {
                        store.full_path().eq_ignore_ascii_case(container)
                    }
                    MountKind::Loose => false,
                };
                if matches {
                    self.lookup(mount, &inner)
                } else {
                    None
                }
            })
            .ok_or_else(not_found)
    }

    /// Resolve and open `name`
    pub fn open(&self, name: &str, path_id: Option<&str>) -> Result<FileHandle> {
        self.resolve(name, path_id, PathFilter::None)?.open()
    }

    /// Read the whole of `name`
    pub fn read_file(&self, name: &str, path_id: Option<&str>) -> Result<Vec<u8>> {
        Ok(self.open(name, path_id)?.read_remaining()?)
    }

    /// Check whether any mount provides `name`
    pub fn exists(&self, name: &str, path_id: Option<&str>) -> bool {
        self.resolve(name, path_id, PathFilter::None).is_ok()
    }

    /// Size of `name` in bytes
    pub fn size(&self, name: &str, path_id: Option<&str>) -> Result<u64> {
        self.resolve(name, path_id, PathFilter::None)?.size()
    }

    /// Enumerate names matching `wildcard`, FindFirst/FindNext style
    pub fn find(&self, wildcard: &str, path_id: Option<&str>) -> Find<'_> {
        Find::new(self, self.search_paths(), wildcard, self.id_filter(path_id))
    }

    /// Keep level-pack handles open until the matching [`Self::end_map_access`]
    ///
    /// Calls nest. Level packs mounted while access is held are kept open too.
    pub fn begin_map_access(&self) {
        let mut access = self.map_access.lock();
        access.depth += 1;
        if access.depth > 1 {
            return;
        }
        for mount in self.search_paths().iter().filter(|mount| mount.map_pack) {
            if let MountKind::Archive(archive) = &mount.kind {
                match archive.acquire() {
                    Ok(guard) => access.guards.push(guard),
                    Err(e) => warn!("Could not hold {} open: {e}", archive_path(archive)),
                }
            }
        }
    }

    /// Release one level of map access
    pub fn end_map_access(&self) {
        let mut access = self.map_access.lock();
        match access.depth {
            0 => warn!("end_map_access called without begin_map_access"),
            1 => {
                access.depth = 0;
                access.guards.clear();
            }
            _ => access.depth -= 1,
        }
    }

    /// Current map access nesting depth
    pub fn map_access_depth(&self) -> usize {
        self.map_access.lock().depth
    }

    fn hold_while_mapping(&self, archive: &Arc<Archive>) {
        let mut access = self.map_access.lock();
        if access.depth == 0 {
            return;
        }
        match archive.acquire() {
            Ok(guard) => access.guards.push(guard),
            Err(e) => warn!("Could not hold {} open: {e}", archive_path(archive)),
        }
    }
}

impl Drop for FileSystem {
    fn drop(&mut self) {
        let depth = self.map_access.get_mut().depth;
        if depth > 0 {
            warn!("Filesystem dropped with map access still held ({depth} levels)");
        }
    }
}

/// Apply the add/dedup rule; returns `true` when the add is a no-op
fn already_mounted(
    list: &mut Vec<SearchPath>,
    path: Symbol,
    path_id: Symbol,
    add: SearchPathAdd,
) -> bool {
    let same = |mount: &SearchPath| mount.path == path && mount.path_id == path_id;
    let Some(first) = list.iter().position(same) else {
        return false;
    };
    match add {
        SearchPathAdd::Tail => true,
        SearchPathAdd::Head if first == 0 => true,
        SearchPathAdd::Head => {
            list.retain(|mount| !same(mount));
            false
        }
    }
}

fn insert_group(list: &mut Vec<SearchPath>, group: Vec<SearchPath>, add: SearchPathAdd) {
    match add {
        SearchPathAdd::Head => {
            list.splice(0..0, group);
        }
        SearchPathAdd::Tail => list.extend(group),
    }
}

/// Absolute path with `/` separators, `.` and `..` folded, no trailing `/`
fn normalize_mount_path(path: &Path) -> Result<String> {
    let absolute = std::path::absolute(path)?;
    let fixed = fix_slashes(&absolute.to_string_lossy());
    let (root, rest) = match fixed.find('/') {
        Some(slash) => fixed.split_at(slash + 1),
        None => (fixed.as_str(), ""),
    };
    let rest = normalize_name(rest).ok_or_else(|| {
        VfsError::InvalidFormat(format!("{} climbs above its root", path.display()))
    })?;
    Ok(format!("{root}{rest}"))
}

fn mount_key(full: &str) -> String {
    if full.ends_with('/') {
        full.to_string()
    } else {
        format!("{full}/")
    }
}

fn archive_path(archive: &Archive) -> String {
    fix_slashes(&archive.path().to_string_lossy())
}

fn is_absolute_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    name.starts_with('/') || (bytes.len() > 1 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
}

fn not_found_or_io(name: &str, err: std::io::Error) -> VfsError {
    if err.kind() == ErrorKind::NotFound {
        VfsError::NotFound(name.to_string())
    } else {
        VfsError::Io(err)
    }
}
