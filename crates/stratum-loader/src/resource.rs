//! Manifest classification and the resource plugin interface

use crate::error::Result;
use crate::job::LoaderJob;
use crate::queue::JobQueue;
use std::collections::{HashMap, HashSet};
use stratum_pack::path::{extension, fix_slashes};

/// Resource buckets a manifest entry can fall into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// `.wav`
    Sound,
    /// `.vmt`
    Material,
    /// `.mdl`
    Model,
    /// `.vtf` under `maps/`
    Cubemap,
    /// `.vhv` of a static prop
    StaticPropLighting,
    /// Extensions registered as anonymous
    Anonymous,
}

impl ResourceKind {
    /// Every kind
    pub const ALL: [Self; 6] = [
        Self::Sound,
        Self::Material,
        Self::Model,
        Self::Cubemap,
        Self::StaticPropLighting,
        Self::Anonymous,
    ];

    /// Order in which plugins create resources; cubemap textures precede
    /// the materials that reference them
    pub const BUILD_ORDER: [Self; 6] = [
        Self::Cubemap,
        Self::Sound,
        Self::Material,
        Self::StaticPropLighting,
        Self::Model,
        Self::Anonymous,
    ];

    /// Order in which plugins purge; models and cubemaps before materials
    pub const PURGE_ORDER: [Self; 5] = [
        Self::Sound,
        Self::StaticPropLighting,
        Self::Model,
        Self::Cubemap,
        Self::Material,
    ];

    /// Display name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sound => "Sounds",
            Self::Material => "Materials",
            Self::Model => "Models",
            Self::Cubemap => "Cubemaps",
            Self::StaticPropLighting => "PropLighting",
            Self::Anonymous => "Anonymous",
        }
    }
}

/// Manifest classification rules
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    /// Load HDR variants instead of LDR ones
    pub hdr: bool,
    /// Lowercase extensions routed to [`ResourceKind::Anonymous`]
    pub anonymous_extensions: Vec<String>,
}

impl Classifier {
    /// Create a classifier
    pub fn new(hdr: bool, anonymous_extensions: &[String]) -> Self {
        Self {
            hdr,
            anonymous_extensions: anonymous_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// Bucket and object name of a manifest entry
    ///
    /// Type directories (`sound/`, `materials/`, `models/`) and anything
    /// before them are stripped. Unknown extensions and entries for the other
    /// dynamic range return `None`.
    pub fn classify(&self, entry: &str) -> Option<(ResourceKind, String)> {
        let name = fix_slashes(entry);
        let lowered = name.to_ascii_lowercase();
        let ext = extension(&lowered)?;

        let (kind, start, type_dir) = match ext {
            "wav" => (ResourceKind::Sound, 0, Some("sound/")),
            "vmt" => (ResourceKind::Material, 0, Some("materials/")),
            "mdl" => (ResourceKind::Model, 0, Some("models/")),
            "vtf" => {
                // only cubemap textures are preloaded
                if !lowered.contains("maps/") || lowered.contains(".hdr.") != self.hdr {
                    return None;
                }
                (ResourceKind::Cubemap, 0, Some("materials/"))
            }
            "vhv" => {
                // static props only
                let start = lowered.find("sp_")?;
                if lowered.contains("_hdr_") != self.hdr {
                    return None;
                }
                (ResourceKind::StaticPropLighting, start, None)
            }
            other if self.anonymous_extensions.iter().any(|ext| ext == other) => {
                (ResourceKind::Anonymous, 0, None)
            }
            _ => return None,
        };

        let start = match type_dir {
            Some(dir) => lowered[start..]
                .find(dir)
                .map_or(start, |at| start + at + dir.len()),
            None => start,
        };
        Some((kind, name[start..].to_string()))
    }
}

/// Manifest entries grouped by bucket
#[derive(Debug, Default)]
pub struct ResourceTable {
    lists: HashMap<ResourceKind, Vec<String>>,
    seen: HashSet<(ResourceKind, String)>,
}

impl ResourceTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify every whitespace-separated token of a manifest
    pub fn parse(&mut self, manifest: &str, classifier: &Classifier) {
        for token in manifest.split_whitespace() {
            self.add(token, classifier);
        }
    }

    /// Classify and add one entry; returns whether it was kept
    pub fn add(&mut self, entry: &str, classifier: &Classifier) -> bool {
        let Some((kind, name)) = classifier.classify(entry) else {
            return false;
        };
        if self.seen.insert((kind, name.to_ascii_lowercase())) {
            self.lists.entry(kind).or_default().push(name);
        }
        true
    }

    /// Number of entries in a bucket
    pub fn count(&self, kind: ResourceKind) -> usize {
        self.lists.get(&kind).map_or(0, Vec::len)
    }

    /// Remove and return a bucket, ready for its plugin
    ///
    /// Materials come back with cubemap-patched materials first and without
    /// the base materials those patches replace.
    pub fn take(&mut self, kind: ResourceKind) -> Vec<String> {
        let mut list = self.lists.remove(&kind).unwrap_or_default();
        if kind == ResourceKind::Material {
            cull_patched_materials(&mut list);
        }
        list
    }
}

fn is_cubemap_patch(name: &str) -> bool {
    name.to_ascii_lowercase().contains("maps/")
}

/// Sort cubemap patches first and drop the base materials they patch
///
/// A patch is named `maps/<level>/<base>_<x>_<y>_<z>.vmt`; its base material
/// is `<base>.vmt`.
fn cull_patched_materials(list: &mut Vec<String>) {
    list.sort_by(|a, b| {
        is_cubemap_patch(b)
            .cmp(&is_cubemap_patch(a))
            .then_with(|| a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()))
    });

    let mut culled = HashSet::new();
    for name in list.iter().take_while(|name| is_cubemap_patch(name)) {
        if let Some(base) = patched_base(name) {
            culled.insert(format!("{}.vmt", base.to_ascii_lowercase()));
        }
    }
    list.retain(|name| !culled.contains(&name.to_ascii_lowercase()));
}

fn patched_base(name: &str) -> Option<&str> {
    let lowered = name.to_ascii_lowercase();
    let after_maps = lowered.find("maps/")? + "maps/".len();
    // skip the level directory
    let start = after_maps + lowered[after_maps..].find('/')? + 1;
    let end = lowered[start..]
        .find(".vmt")
        .map_or(name.len(), |at| start + at);

    let stem = &name[start..end];
    let mut cut = stem.len();
    for _ in 0..3 {
        cut = stem[..cut].rfind('_')?;
    }
    Some(&stem[..cut])
}

/// A subsystem that turns manifest entries into resources
///
/// Plugins submit the reads they need to the [`JobQueue`] while the loader
/// is batching.
pub trait ResourcePreload: Send + Sync {
    /// Create the resource `name`, submitting its reads
    fn create_resource(&self, name: &str, queue: &JobQueue) -> Result<()>;

    /// Drop resources the new level does not reference
    fn purge_unreferenced(&self) {}

    /// Drop every resource
    fn purge_all(&self) {}

    /// Called once the load has ended
    fn on_end_load(&self, _abort: bool) {}
}

/// Default plugin for [`ResourceKind::Anonymous`]: reads each entry into
/// memory as an anonymous job, to be claimed by name or freed at load end
#[derive(Debug, Clone)]
pub struct AnonymousPreload {
    path_id: String,
}

impl AnonymousPreload {
    /// Create the plugin, resolving names under `path_id`
    pub fn new(path_id: impl Into<String>) -> Self {
        Self {
            path_id: path_id.into(),
        }
    }
}

impl ResourcePreload for AnonymousPreload {
    fn create_resource(&self, name: &str, queue: &JobQueue) -> Result<()> {
        queue.submit(LoaderJob::new(name).with_path_id(self.path_id.clone()))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn classify(entry: &str, hdr: bool) -> Option<(ResourceKind, String)> {
        Classifier::new(hdr, &["dat".to_string()]).classify(entry)
    }

    #[test]
    fn test_classification_table() {
        assert_eq!(
            classify("game/sound/ambient/wind.wav", false),
            Some((ResourceKind::Sound, "ambient/wind.wav".to_string()))
        );
        assert_eq!(
            classify("materials\\brick\\wall.vmt", false),
            Some((ResourceKind::Material, "brick/wall.vmt".to_string()))
        );
        assert_eq!(
            classify("models/props/crate.mdl", false),
            Some((ResourceKind::Model, "props/crate.mdl".to_string()))
        );
        assert_eq!(
            classify("scripts/level.dat", false),
            Some((ResourceKind::Anonymous, "scripts/level.dat".to_string()))
        );
        assert_eq!(classify("materials/brick/wall.vtf", false), None);
        assert_eq!(classify("readme", false), None);
        assert_eq!(classify("maps/level.bsp", false), None);
    }

    #[test]
    fn test_dynamic_range_filters() {
        let ldr = "materials/maps/level/c0_0_0.vtf";
        let hdr = "materials/maps/level/c0_0_0.hdr.vtf";
        assert_eq!(
            classify(ldr, false),
            Some((ResourceKind::Cubemap, "maps/level/c0_0_0.vtf".to_string()))
        );
        assert_eq!(classify(hdr, false), None);
        assert_eq!(classify(ldr, true), None);
        assert!(classify(hdr, true).is_some());

        let vhv = "maps/level/sp_12.vhv";
        assert_eq!(
            classify(vhv, false),
            Some((ResourceKind::StaticPropLighting, "sp_12.vhv".to_string()))
        );
        assert_eq!(classify("maps/level/sp_hdr_12.vhv", false), None);
        assert!(classify("maps/level/sp_hdr_12.vhv", true).is_some());
        assert_eq!(classify("maps/level/other.vhv", false), None);
    }

    #[test]
    fn test_patched_materials_are_culled() {
        let classifier = Classifier::default();
        let mut table = ResourceTable::new();
        table.parse(
            "materials/brick/wall.vmt materials/maps/level/brick/wall_10_20_30.vmt \
             materials/maps/level/brick/wall_40_50_60.vmt materials/metal/floor.vmt \
             materials/brick/wall.vmt",
            &classifier,
        );
        assert_eq!(table.count(ResourceKind::Material), 4);

        let materials = table.take(ResourceKind::Material);
        assert_eq!(
            materials,
            vec![
                "maps/level/brick/wall_10_20_30.vmt".to_string(),
                "maps/level/brick/wall_40_50_60.vmt".to_string(),
                "metal/floor.vmt".to_string(),
            ]
        );
        assert_eq!(table.count(ResourceKind::Material), 0);
    }

    #[test]
    fn test_patched_base() {
        assert_eq!(patched_base("maps/level/brick/wall_1_2_3.vmt"), Some("brick/wall"));
        assert_eq!(patched_base("maps/level/a_b_1_2_3.vmt"), Some("a_b"));
        assert_eq!(patched_base("maps/level/wall_1_2.vmt"), None);
    }
}
