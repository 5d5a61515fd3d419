//! Search-path resolution against real directories, packs and level files

#![allow(clippy::expect_used, clippy::unwrap_used)]

use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stratum_pack::{PackBuilder, Wildcard, WildcardMatch, write_level_file};
use stratum_vfs::{
    FileSystem, FsConfig, PackedStore, PackedStoreOpener, PathFilter, PathType, ReadSeek,
    SearchPathAdd, StoreId, TrustPolicy, VfsError,
};
use tempfile::TempDir;

fn write(root: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = root.join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, data).unwrap();
    path
}

fn read_string(fs: &FileSystem, name: &str, path_id: Option<&str>) -> String {
    String::from_utf8(fs.read_file(name, path_id).unwrap()).unwrap()
}

fn level_with(root: &Path, name: &str, builder: PackBuilder) -> PathBuf {
    let path = root.join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    write_level_file(&path, 20, &builder.to_bytes().unwrap()).unwrap();
    path
}

#[test]
fn test_head_mount_shadows_tail_mount() {
    let temp = TempDir::new().unwrap();
    let base = temp.path().join("base");
    let custom = temp.path().join("custom");
    write(&base, "a.txt", b"hello");
    write(&custom, "a.txt", b"world");

    let fs = FileSystem::default();
    fs.add_search_path(&base, "GAME", SearchPathAdd::Tail).unwrap();
    assert_eq!(read_string(&fs, "a.txt", Some("GAME")), "hello");

    fs.add_search_path(&custom, "GAME", SearchPathAdd::Head).unwrap();
    assert_eq!(read_string(&fs, "a.txt", Some("GAME")), "world");
    assert_eq!(read_string(&fs, "A.TXT", None), "world");

    assert!(fs.remove_search_path(&custom, "GAME"));
    assert_eq!(read_string(&fs, "a.txt", Some("GAME")), "hello");
    assert!(!fs.remove_search_path(&custom, "GAME"));
}

#[test]
fn test_head_pack_shadows_loose_directory_until_removed() {
    let temp = TempDir::new().unwrap();
    let base = temp.path().join("base");
    write(&base, "a.txt", b"hello");
    let pack = temp.path().join("override.zip");
    PackBuilder::new()
        .stored("a.txt", b"world".to_vec())
        .write_to_path(&pack)
        .unwrap();

    let fs = FileSystem::default();
    fs.add_search_path(&base, "GAME", SearchPathAdd::Tail).unwrap();
    fs.add_search_path(&pack, "GAME", SearchPathAdd::Head).unwrap();
    let hit = fs.resolve("a.txt", Some("GAME"), PathFilter::None).unwrap();
    assert_eq!(hit.path_type(), PathType::Pack);
    assert_eq!(read_string(&fs, "a.txt", Some("GAME")), "world");

    assert!(fs.remove_search_path(&pack, "GAME"));
    let hit = fs.resolve("a.txt", Some("GAME"), PathFilter::None).unwrap();
    assert_eq!(hit.path_type(), PathType::Loose);
    assert_eq!(read_string(&fs, "a.txt", Some("GAME")), "hello");
    assert_eq!(fs.search_paths().len(), 1);
}

#[test]
fn test_repeated_add_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let base = temp.path().join("base");
    let other = temp.path().join("other");
    std::fs::create_dir_all(&base).unwrap();
    std::fs::create_dir_all(&other).unwrap();

    let fs = FileSystem::default();
    fs.add_search_path(&base, "GAME", SearchPathAdd::Tail).unwrap();
    fs.add_search_path(&base, "GAME", SearchPathAdd::Tail).unwrap();
    fs.add_search_path(&base, "GAME", SearchPathAdd::Head).unwrap();
    assert_eq!(fs.search_paths().len(), 1);

    // a head add of a path further down moves it to the front
    fs.add_search_path(&other, "GAME", SearchPathAdd::Head).unwrap();
    fs.add_search_path(&base, "GAME", SearchPathAdd::Head).unwrap();
    let listing = fs.search_path(Some("GAME"), true);
    let order: Vec<&str> = listing.split(';').collect();
    assert_eq!(order.len(), 2);
    assert!(order[0].ends_with("/base/"));
    assert!(order[1].ends_with("/other/"));
}

#[test]
fn test_shared_store_is_visited_once() {
    let temp = TempDir::new().unwrap();
    let pack = temp.path().join("pak01.zip");
    PackBuilder::new()
        .stored("shared.txt", b"from pack".to_vec())
        .write_to_path(&pack)
        .unwrap();

    let fs = FileSystem::default();
    fs.add_search_path(&pack, "GAME", SearchPathAdd::Tail).unwrap();
    fs.add_search_path(&pack, "MOD", SearchPathAdd::Tail).unwrap();

    let mounts = fs.search_paths();
    assert_eq!(mounts.len(), 2);
    assert_eq!(mounts[0].store_id(), mounts[1].store_id());

    let game = fs.resolve("shared.txt", Some("GAME"), PathFilter::None).unwrap();
    let modded = fs.resolve("shared.txt", Some("MOD"), PathFilter::None).unwrap();
    assert!(Arc::ptr_eq(game.archive().unwrap(), modded.archive().unwrap()));
    assert_eq!(game.path_type(), PathType::Pack);
    assert!(game.full_path().ends_with("pak01.zip/shared.txt"));

    assert!(fs.resolve("missing.txt", None, PathFilter::None).unwrap_err().is_not_found());
}

#[test]
fn test_directory_packs_shadow_in_descending_order() {
    let temp = TempDir::new().unwrap();
    let game = temp.path().join("game");
    write(&game, "a.txt", b"loose");
    write(&game, "only_loose.txt", b"loose only");
    PackBuilder::new()
        .stored("a.txt", b"zip0".to_vec())
        .stored("b.txt", b"zip0".to_vec())
        .write_to_path(&game.join("zip0.zip"))
        .unwrap();
    PackBuilder::new()
        .stored("a.txt", b"zip1".to_vec())
        .write_to_path(&game.join("zip1.zip"))
        .unwrap();
    // zip3 is never reached because zip2 is missing
    PackBuilder::new()
        .stored("c.txt", b"zip3".to_vec())
        .write_to_path(&game.join("zip3.zip"))
        .unwrap();

    let fs = FileSystem::default();
    fs.add_search_path(&game, "GAME", SearchPathAdd::Tail).unwrap();

    let mounts = fs.search_paths();
    assert_eq!(mounts.len(), 3);
    assert!(mounts[0].is_pack() && mounts[1].is_pack() && !mounts[2].is_pack());

    assert_eq!(read_string(&fs, "a.txt", None), "zip1");
    assert_eq!(read_string(&fs, "b.txt", None), "zip0");
    assert_eq!(read_string(&fs, "only_loose.txt", None), "loose only");
    assert!(!fs.exists("c.txt", None));

    assert_eq!(
        read_string(
            &fs,
            &fs.resolve("a.txt", None, PathFilter::CullPack).unwrap().full_path().to_string(),
            None
        ),
        "loose"
    );
    assert!(
        fs.resolve("only_loose.txt", None, PathFilter::CullNonPack)
            .unwrap_err()
            .is_not_found()
    );

    // removing the directory takes its packs with it
    assert!(fs.remove_search_path(&game, "GAME"));
    assert!(fs.search_paths().is_empty());
}

#[test]
fn test_broken_directory_pack_is_skipped() {
    let temp = TempDir::new().unwrap();
    let game = temp.path().join("game");
    write(&game, "zip0.zip", b"definitely not a zip file, far too short");
    write(&game, "a.txt", b"loose");

    let fs = FileSystem::default();
    fs.add_search_path(&game, "GAME", SearchPathAdd::Tail).unwrap();
    assert_eq!(fs.search_paths().len(), 1);
    assert_eq!(read_string(&fs, "a.txt", None), "loose");
}

#[test]
fn test_level_pack_mount() {
    let temp = TempDir::new().unwrap();
    let game = temp.path().join("game");
    write(&game, "materials/wall.vmt", b"loose wall");
    let first = level_with(
        &game,
        "maps/first.bsp",
        PackBuilder::new()
            .stored("materials/wall.vmt", b"level wall".to_vec())
            .lzma("materials/floor.vmt", b"level floor".repeat(50)),
    );
    let second = level_with(
        &game,
        "maps/second.bsp",
        PackBuilder::new().stored("materials/sky.vmt", b"sky".to_vec()),
    );

    let fs = FileSystem::default();
    fs.add_search_path(&game, "GAME", SearchPathAdd::Tail).unwrap();
    fs.add_search_path(&first, "GAME", SearchPathAdd::Head).unwrap();

    let hit = fs.resolve("materials/wall.vmt", None, PathFilter::None).unwrap();
    assert_eq!(hit.path_type(), PathType::MapPack);
    assert_ne!(hit.store_id().get() & StoreId::MAP_PACK_FLAG, 0);
    assert_eq!(read_string(&fs, "materials/wall.vmt", None), "level wall");
    assert_eq!(
        fs.read_file("materials/floor.vmt", Some("BSP")).unwrap(),
        b"level floor".repeat(50)
    );
    assert_eq!(fs.size("materials/floor.vmt", Some("BSP")).unwrap(), 550);

    // BSP only consults the level pack
    assert!(fs.exists("maps/first.bsp", Some("GAME")));
    assert!(!fs.exists("maps/first.bsp", Some("BSP")));

    // a second level replaces the first
    fs.add_search_path(&second, "GAME", SearchPathAdd::Head).unwrap();
    let map_packs = fs.search_paths().iter().filter(|m| m.is_map_pack()).count();
    assert_eq!(map_packs, 1);
    assert!(fs.exists("materials/sky.vmt", Some("BSP")));
    assert_eq!(read_string(&fs, "materials/wall.vmt", None), "loose wall");
}

#[test]
fn test_level_without_pack_mounts_nothing() {
    let temp = TempDir::new().unwrap();
    let level = temp.path().join("empty.bsp");
    write_level_file(&level, 19, &[]).unwrap();

    let fs = FileSystem::default();
    fs.add_search_path(&level, "GAME", SearchPathAdd::Head).unwrap();
    assert!(fs.search_paths().is_empty());
}

#[test]
fn test_malformed_level_is_rejected() {
    let temp = TempDir::new().unwrap();
    let level = write(temp.path(), "bad.bsp", &[0u8; 2048]);

    let fs = FileSystem::default();
    let err = fs
        .add_search_path(&level, "GAME", SearchPathAdd::Head)
        .unwrap_err();
    assert!(matches!(err, VfsError::InvalidFormat(_)));
    assert!(fs.search_paths().is_empty());

    let missing = fs
        .add_search_path(temp.path().join("missing.bsp"), "GAME", SearchPathAdd::Head)
        .unwrap_err();
    assert!(missing.is_not_found());
}

struct ConfigFilesNeedTrust;

impl TrustPolicy for ConfigFilesNeedTrust {
    fn requires_trust(&self, name: &str) -> bool {
        name.ends_with(".cfg")
    }
}

#[test]
fn test_untrusted_hit_is_skipped_when_trust_required() {
    let temp = TempDir::new().unwrap();
    let custom = temp.path().join("custom");
    write(&custom, "server.cfg", b"untrusted");
    write(&custom, "notes.txt", b"plain");
    let level = level_with(
        temp.path(),
        "maps/level.bsp",
        PackBuilder::new().stored("server.cfg", b"trusted".to_vec()),
    );

    let fs = FileSystem::default().with_trust_policy(Arc::new(ConfigFilesNeedTrust));
    fs.add_search_path(&level, "GAME", SearchPathAdd::Tail).unwrap();
    fs.add_search_path(&custom, "GAME", SearchPathAdd::Head).unwrap();

    assert_eq!(read_string(&fs, "server.cfg", None), "trusted");
    assert_eq!(read_string(&fs, "notes.txt", None), "plain");
}

#[test]
fn test_absolute_name_inside_mounted_pack() {
    let temp = TempDir::new().unwrap();
    let pack = temp.path().join("Content.zip");
    PackBuilder::new()
        .stored("scripts/items.txt", b"items".to_vec())
        .write_to_path(&pack)
        .unwrap();
    let loose = write(temp.path(), "plain.txt", b"plain");

    let fs = FileSystem::default();
    fs.add_search_path(&pack, "GAME", SearchPathAdd::Tail).unwrap();

    let inner = format!("{}/scripts/items.txt", pack.to_string_lossy());
    assert_eq!(read_string(&fs, &inner, None), "items");
    assert_eq!(read_string(&fs, &inner.replace("Content.zip", "content.ZIP"), None), "items");

    let absolute = fs
        .resolve(&loose.to_string_lossy(), None, PathFilter::None)
        .unwrap();
    assert_eq!(absolute.store_id(), StoreId::UNMOUNTED);
    assert_eq!(read_string(&fs, &loose.to_string_lossy(), None), "plain");
}

#[test]
fn test_request_only_path_ids() {
    let temp = TempDir::new().unwrap();
    let downloads = temp.path().join("download");
    write(&downloads, "custom.txt", b"downloaded");

    let fs = FileSystem::default();
    fs.add_search_path(&downloads, "DOWNLOAD", SearchPathAdd::Tail).unwrap();
    assert!(fs.exists("custom.txt", None));

    fs.mark_path_id_by_request_only("DOWNLOAD", true);
    assert!(!fs.exists("custom.txt", None));
    assert!(fs.exists("custom.txt", Some("download")));
    assert_eq!(fs.search_path(None, true), "");
}

#[test]
fn test_find_merges_mounts() {
    let temp = TempDir::new().unwrap();
    let base = temp.path().join("base");
    let custom = temp.path().join("custom");
    write(&base, "cfg/a.txt", b"");
    write(&base, "cfg/b.txt", b"");
    write(&base, "cfg/skip.bin", b"");
    write(&base, "cfg/nested/c.txt", b"");
    write(&custom, "cfg/b.txt", b"");
    write(&custom, "cfg/d.txt", b"");
    let pack = temp.path().join("pak.zip");
    PackBuilder::new()
        .stored("cfg/packed.txt", b"".to_vec())
        .write_to_path(&pack)
        .unwrap();

    let fs = FileSystem::default();
    fs.add_search_path(&base, "GAME", SearchPathAdd::Tail).unwrap();
    fs.add_search_path(&custom, "GAME", SearchPathAdd::Head).unwrap();
    fs.add_search_path(&pack, "GAME", SearchPathAdd::Tail).unwrap();

    let found: Vec<(String, bool)> = fs
        .find("cfg/*.txt", None)
        .map(|entry| (entry.name, entry.is_directory))
        .collect();
    assert_eq!(
        found,
        vec![
            ("b.txt".to_string(), false),
            ("d.txt".to_string(), false),
            ("a.txt".to_string(), false),
        ]
    );

    let everything: Vec<String> = fs.find("cfg/*", None).map(|entry| entry.name).collect();
    assert!(everything.contains(&"nested".to_string()));
    assert!(everything.contains(&"skip.bin".to_string()));
    assert!(!everything.contains(&"packed.txt".to_string()));
}

#[test]
fn test_find_in_level_pack() {
    let temp = TempDir::new().unwrap();
    let level = level_with(
        temp.path(),
        "maps/level.bsp",
        PackBuilder::new()
            .stored("materials/maps/level/c0.vmt", b"".to_vec())
            .stored("materials/maps/level/c1.vmt", b"".to_vec())
            .stored("materials/maps/level/sub/x.vtf", b"".to_vec()),
    );

    let fs = FileSystem::default();
    fs.add_search_path(&level, "GAME", SearchPathAdd::Head).unwrap();

    let found: Vec<(String, bool)> = fs
        .find("materials/maps/level/*", Some("BSP"))
        .map(|entry| (entry.name, entry.is_directory))
        .collect();
    assert_eq!(
        found,
        vec![
            ("c0.vmt".to_string(), false),
            ("c1.vmt".to_string(), false),
            ("sub".to_string(), true),
        ]
    );
}

#[test]
fn test_map_access_keeps_level_open() {
    let temp = TempDir::new().unwrap();
    let level = level_with(
        temp.path(),
        "maps/level.bsp",
        PackBuilder::new().stored("a.txt", b"a".to_vec()),
    );

    let fs = FileSystem::default();
    fs.begin_map_access();
    fs.add_search_path(&level, "GAME", SearchPathAdd::Head).unwrap();
    let archive = Arc::clone(
        fs.resolve("a.txt", None, PathFilter::None)
            .unwrap()
            .archive()
            .unwrap(),
    );
    assert_eq!(archive.open_count(), 1);

    fs.begin_map_access();
    fs.end_map_access();
    assert_eq!(archive.open_count(), 1);
    fs.end_map_access();
    assert_eq!(archive.open_count(), 0);
    assert_eq!(fs.map_access_depth(), 0);
}

#[derive(Debug)]
struct MemoryStore {
    path: String,
    files: HashMap<String, Vec<u8>>,
}

impl PackedStore for MemoryStore {
    fn full_path(&self) -> &str {
        &self.path
    }

    fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    fn open(&self, name: &str) -> Option<Box<dyn ReadSeek>> {
        let data = self.files.get(name)?.clone();
        Some(Box::new(Cursor::new(data)))
    }

    fn size(&self, name: &str) -> Option<u64> {
        self.files.get(name).map(|data| data.len() as u64)
    }

    fn file_and_dir_lists(&self, wildcard: &str) -> (Vec<String>, Vec<String>) {
        let wildcard = Wildcard::parse(wildcard);
        let mut files: Vec<String> = self
            .files
            .keys()
            .filter_map(|name| match wildcard.matches(name) {
                Some(WildcardMatch::File(file)) => Some(file),
                _ => None,
            })
            .collect();
        files.sort();
        (Vec::new(), files)
    }

    fn is_trusted(&self) -> bool {
        true
    }
}

struct MemoryOpener;

impl PackedStoreOpener for MemoryOpener {
    fn open(&self, path: &Path) -> Option<Arc<dyn PackedStore>> {
        if !path.to_string_lossy().ends_with("pak01_dir.vpk") {
            return None;
        }
        let files = HashMap::from([("sound/a.wav".to_string(), b"RIFF".to_vec())]);
        Some(Arc::new(MemoryStore {
            path: path.to_string_lossy().replace('\\', "/"),
            files,
        }))
    }
}

#[test]
fn test_packed_store_mount() {
    let temp = TempDir::new().unwrap();
    let vpk = temp.path().join("pak01_dir.vpk");

    // without an opener a packed store mounts as empty
    let plain = FileSystem::default();
    plain.add_search_path(&vpk, "GAME", SearchPathAdd::Tail).unwrap();
    assert!(plain.search_paths().is_empty());

    let fs = FileSystem::new(FsConfig::default()).with_packed_store_opener(Arc::new(MemoryOpener));
    fs.add_search_path(&vpk, "GAME", SearchPathAdd::Tail).unwrap();
    fs.add_search_path(temp.path().join("other_dir.vpk"), "GAME", SearchPathAdd::Tail)
        .unwrap();
    assert_eq!(fs.search_paths().len(), 1);

    let hit = fs.resolve("sound/a.wav", None, PathFilter::None).unwrap();
    assert_eq!(hit.path_type(), PathType::PackedStore);
    assert_eq!(fs.read_file("sound/a.wav", None).unwrap(), b"RIFF");
    assert_eq!(fs.size("sound/a.wav", None).unwrap(), 4);

    let found: Vec<String> = fs.find("sound/*.wav", None).map(|entry| entry.name).collect();
    assert_eq!(found, vec!["a.wav".to_string()]);
}

#[test]
fn test_remove_by_path_id_and_all() {
    let temp = TempDir::new().unwrap();
    let base = temp.path().join("base");
    let mods = temp.path().join("mods");
    write(&base, "a.txt", b"base");
    write(&mods, "b.txt", b"mods");

    let fs = FileSystem::default();
    fs.add_search_path(&base, "GAME", SearchPathAdd::Tail).unwrap();
    fs.add_search_path(&mods, "MOD", SearchPathAdd::Tail).unwrap();
    assert!(fs.exists("b.txt", None));

    assert_eq!(fs.remove_search_paths("MOD"), 1);
    assert_eq!(fs.remove_search_paths("MOD"), 0);
    assert!(!fs.exists("b.txt", None));
    assert!(fs.exists("a.txt", Some("GAME")));

    fs.remove_all_search_paths();
    assert!(fs.search_paths().is_empty());
    assert!(fs.resolve("a.txt", None, PathFilter::None).unwrap_err().is_not_found());
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    fn mangle(name: &str, upper: &[bool], backslash: bool) -> String {
        name.chars()
            .zip(upper.iter().cycle())
            .map(|(c, &up)| match c {
                '/' if backslash => '\\',
                c if up => c.to_ascii_uppercase(),
                c => c,
            })
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn pack_lookup_ignores_case_and_separators(
            dir in "[a-z]{1,8}",
            stem in "[a-z0-9_]{1,12}",
            upper in proptest::collection::vec(any::<bool>(), 1..16),
            backslash in any::<bool>(),
        ) {
            let temp = TempDir::new().unwrap();
            let name = format!("{dir}/{stem}.txt");
            let pack = temp.path().join("content.zip");
            PackBuilder::new()
                .stored(&name, stem.as_bytes().to_vec())
                .write_to_path(&pack)
                .unwrap();

            let fs = FileSystem::default();
            fs.add_search_path(&pack, "GAME", SearchPathAdd::Tail).unwrap();

            let lookup = mangle(&name, &upper, backslash);
            let resolved = fs.resolve(&lookup, Some("GAME"), PathFilter::None).unwrap();
            prop_assert_eq!(resolved.path_type(), PathType::Pack);
            prop_assert_eq!(fs.read_file(&lookup, None).unwrap(), stem.as_bytes().to_vec());
        }
    }
}
