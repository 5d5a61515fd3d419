//! Load progress reporting

/// Fractions reported at each stage of `begin_load`
pub mod stage {
    /// Load started
    pub const START: f32 = 0.10;
    /// Manifest read
    pub const GOT_RESLIST: f32 = 0.12;
    /// Manifest classified
    pub const PARSED_RESLIST: f32 = 0.15;
    /// Plugins created their resources
    pub const CREATED_RESOURCES: f32 = 0.20;
    /// Unreferenced resources purged
    pub const PRE_PURGE: f32 = 0.22;
    /// Blocking reads started; the rest of the range tracks them
    pub const IO: f32 = 0.25;
}

/// Receives progress of a level load
pub trait LoaderProgress: Send + Sync {
    /// A load started
    fn begin(&self) {}

    /// Fraction of the load done, in `0.0..=1.0`
    fn update(&self, _fraction: f32) {}

    /// The load finished or failed
    fn end(&self) {}
}

/// Progress sink that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl LoaderProgress for NullProgress {}

/// Fraction for `done` of `total` blocking reads
pub(crate) fn io_fraction(done: usize, total: usize) -> f32 {
    if total == 0 {
        return 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = done.min(total) as f32 / total as f32;
    stage::IO + (1.0 - stage::IO) * ratio
}
