use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::debug;

use super::{check_region, ImageSource, SourceOpener};
use crate::error::{IoError, SourceError};

/// Image source backed by decoded pixels held in memory.
///
/// Used for plain raster files (PNG, JPEG) and for building small synthetic
/// slides. Levels are stored explicitly; [`MemorySource::with_pyramid`]
/// derives them by halving.
#[derive(Debug, Clone)]
pub struct MemorySource {
    identifier: String,
    levels: Vec<RgbImage>,
    mpp: Option<f64>,
    no_region_reads: HashSet<usize>,
}

impl MemorySource {
    /// Single-level source.
    pub fn new(identifier: impl Into<String>, image: RgbImage) -> Self {
        Self::from_levels(identifier, vec![image])
    }

    /// Source with `level_count` levels, each half the size of the previous
    /// one (never below 1 pixel).
    pub fn with_pyramid(identifier: impl Into<String>, image: RgbImage, level_count: usize) -> Self {
        let mut levels = Vec::with_capacity(level_count.max(1));
        levels.push(image);
        while levels.len() < level_count {
            let Some(previous) = levels.last() else {
                break;
            };
            let width = (previous.width() / 2).max(1);
            let height = (previous.height() / 2).max(1);
            let next = imageops::resize(previous, width, height, FilterType::Triangle);
            levels.push(next);
        }

        Self::from_levels(identifier, levels)
    }

    /// Source with caller-provided levels, largest first.
    pub fn from_levels(identifier: impl Into<String>, levels: Vec<RgbImage>) -> Self {
        Self {
            identifier: identifier.into(),
            levels,
            mpp: None,
            no_region_reads: HashSet::new(),
        }
    }

    pub fn with_mpp(mut self, mpp: f64) -> Self {
        self.mpp = Some(mpp);
        self
    }

    /// Declare that `level` cannot serve region reads.
    pub fn without_region_reads(mut self, level: usize) -> Self {
        self.no_region_reads.insert(level);
        self
    }

    pub fn level_image(&self, level: usize) -> Option<&RgbImage> {
        self.levels.get(level)
    }
}

#[async_trait]
impl ImageSource for MemorySource {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        self.levels.get(level).map(|img| img.dimensions())
    }

    fn level_downsample(&self, level: usize) -> Option<f64> {
        let base = self.levels.first()?;
        let img = self.levels.get(level)?;
        let dx = base.width() as f64 / img.width() as f64;
        let dy = base.height() as f64 / img.height() as f64;
        Some((dx + dy) / 2.0)
    }

    fn supports_region_reads(&self, level: usize) -> bool {
        level < self.levels.len() && !self.no_region_reads.contains(&level)
    }

    fn microns_per_pixel(&self) -> Option<f64> {
        self.mpp
    }

    async fn read_region(
        &self,
        x: u32,
        y: u32,
        level: usize,
        width: u32,
        height: u32,
    ) -> Result<RgbImage, SourceError> {
        check_region(self, x, y, level, width, height)?;
        let img = self.levels.get(level).ok_or(SourceError::LevelOutOfRange {
            level,
            level_count: self.levels.len(),
        })?;
        Ok(imageops::crop_imm(img, x, y, width, height).to_image())
    }
}

/// Opener resolving paths against a table of in-memory sources.
///
/// Entries can be replaced while handles are live, and every open is
/// counted, which makes it the natural opener for exercising handle
/// reacquisition.
#[derive(Debug, Default)]
pub struct MemoryOpener {
    sources: RwLock<HashMap<String, Arc<MemorySource>>>,
    opens: AtomicUsize,
}

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the source served for `path`.
    pub fn insert(&self, path: impl Into<String>, source: MemorySource) {
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), Arc::new(source));
    }

    /// Remove the source for `path`; later opens fail with not-found.
    pub fn remove(&self, path: &str) {
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }

    /// Number of successful opens so far.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceOpener for MemoryOpener {
    async fn open(&self, path: &str) -> Result<Arc<dyn ImageSource>, SourceError> {
        let source = self
            .sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| IoError::NotFound(path.to_string()))?;

        self.opens.fetch_add(1, Ordering::SeqCst);
        debug!(path, levels = source.level_count(), "Opened in-memory source");
        Ok(source)
    }
}
