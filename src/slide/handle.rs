use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{BaseImage, WindowedImage};
use crate::error::TilingError;
use crate::source::{level_dimensions, ImageSource, SourceOpener};
use crate::tile::{TileBuilder, TileTopology};

/// Everything needed to rebuild an [`ImageHandle`] elsewhere.
///
/// Descriptors are plain data: they can be cloned into worker tasks or
/// serialized to another process. The level dimensions let the far side
/// answer geometry queries before touching the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandleDescriptor {
    pub path: String,
    pub level: usize,
    pub resolution: Option<f64>,
    pub level_dimensions: Vec<(u32, u32)>,
}

enum SourceSlot {
    Open(Arc<dyn ImageSource>),
    /// Released for a boundary crossing; reopened on next read
    Detached,
    /// Released on request; reads fail until `reacquire`
    Closed,
}

struct HandleState {
    level: usize,
    resolution: Option<f64>,
    slot: SourceSlot,
}

/// A whole-slide image identified by path and bound to one resolution level.
///
/// The handle owns the live source. Geometry (level count and dimensions)
/// is captured when the image is first opened and never changes; any later
/// reopen must find the same geometry. Level, resolution and the source
/// slot sit behind a lock so one handle can be shared by many tiles.
pub struct ImageHandle {
    path: String,
    opener: Arc<dyn SourceOpener>,
    level_dims: Vec<(u32, u32)>,
    state: RwLock<HandleState>,
}

impl ImageHandle {
    /// Open `path` and bind it to `level`.
    ///
    /// `resolution` is stored exactly as given; the microns-per-pixel the
    /// file declares is never substituted for it (see
    /// [`ImageSource::microns_per_pixel`]).
    /// Fails with [`TilingError::InvalidLevel`] when `level` is not below the
    /// source's level count; the source is released in that case.
    pub async fn open(
        path: impl Into<String>,
        opener: Arc<dyn SourceOpener>,
        resolution: Option<f64>,
        level: usize,
    ) -> Result<Self, TilingError> {
        let path = path.into();
        let source = opener.open(&path).await?;

        let level_dims = level_dimensions(source.as_ref());
        if level_dims.is_empty() {
            return Err(TilingError::config(format!(
                "image '{}' has no resolution levels",
                path
            )));
        }
        if level >= level_dims.len() {
            return Err(TilingError::InvalidLevel {
                path,
                level,
                level_count: level_dims.len(),
            });
        }

        debug!(
            path = %path,
            level,
            levels = level_dims.len(),
            "Opened image handle"
        );

        Ok(Self {
            state: RwLock::new(HandleState {
                level,
                resolution,
                slot: SourceSlot::Open(source),
            }),
            path,
            opener,
            level_dims,
        })
    }

    /// Rebuild a handle from a descriptor without opening anything.
    ///
    /// The handle starts detached; its first pixel read reopens the source.
    pub fn from_descriptor(
        descriptor: HandleDescriptor,
        opener: Arc<dyn SourceOpener>,
    ) -> Result<Self, TilingError> {
        let HandleDescriptor {
            path,
            level,
            resolution,
            level_dimensions,
        } = descriptor;

        if level >= level_dimensions.len() {
            return Err(TilingError::InvalidLevel {
                path,
                level,
                level_count: level_dimensions.len(),
            });
        }

        Ok(Self {
            path,
            opener,
            level_dims: level_dimensions,
            state: RwLock::new(HandleState {
                level,
                resolution,
                slot: SourceSlot::Detached,
            }),
        })
    }

    fn state(&self) -> RwLockReadGuard<'_, HandleState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, HandleState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn level(&self) -> usize {
        self.state().level
    }

    /// Rebind to another level. On error the handle is unchanged.
    pub fn set_level(&self, level: usize) -> Result<(), TilingError> {
        self.check_level(level)?;
        self.state_mut().level = level;
        Ok(())
    }

    fn check_level(&self, level: usize) -> Result<(), TilingError> {
        if level >= self.level_dims.len() {
            return Err(TilingError::InvalidLevel {
                path: self.path.clone(),
                level,
                level_count: self.level_dims.len(),
            });
        }
        Ok(())
    }

    pub fn level_count(&self) -> usize {
        self.level_dims.len()
    }

    /// Dimensions of every level, captured at first open.
    pub fn all_level_dimensions(&self) -> &[(u32, u32)] {
        &self.level_dims
    }

    pub fn width(&self) -> u32 {
        BaseImage::width(self)
    }

    pub fn height(&self) -> u32 {
        BaseImage::height(self)
    }

    pub fn channels(&self) -> u32 {
        BaseImage::channels(self)
    }

    /// Caller-supplied resolution, if any.
    pub fn resolution(&self) -> Option<f64> {
        self.state().resolution
    }

    pub fn set_resolution(&self, resolution: Option<f64>) {
        self.state_mut().resolution = resolution;
    }

    pub fn has_resolution(&self) -> bool {
        self.resolution().is_some()
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state().slot, SourceSlot::Open(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state().slot, SourceSlot::Closed)
    }

    /// Release the source. Idempotent; metadata stays queryable.
    ///
    /// Width and height keep answering after close, from the level
    /// dimensions captured at first open. Pixel reads fail with
    /// [`TilingError::Closed`] until [`ImageHandle::reacquire`].
    pub fn close(&self) {
        let mut state = self.state_mut();
        if !matches!(state.slot, SourceSlot::Closed) {
            debug!(path = %self.path, "Closing image handle");
        }
        state.slot = SourceSlot::Closed;
    }

    /// Release the source ahead of a boundary crossing. The next read
    /// reopens it.
    pub fn detach(&self) {
        let mut state = self.state_mut();
        if !matches!(state.slot, SourceSlot::Closed) {
            state.slot = SourceSlot::Detached;
        }
    }

    /// Reopen the source by path, replacing any live one.
    ///
    /// Fails with [`TilingError::SourceChanged`] if the file no longer has
    /// the geometry captured at first open; the handle is left as it was.
    pub async fn reacquire(&self) -> Result<(), TilingError> {
        let source = self.open_verified().await?;
        info!(path = %self.path, level = self.level(), "Reacquired image source");
        self.state_mut().slot = SourceSlot::Open(source);
        Ok(())
    }

    /// The live source, reopening a detached handle on demand.
    pub async fn source(&self) -> Result<Arc<dyn ImageSource>, TilingError> {
        {
            let state = self.state();
            match &state.slot {
                SourceSlot::Open(source) => return Ok(source.clone()),
                SourceSlot::Closed => {
                    return Err(TilingError::Closed {
                        path: self.path.clone(),
                    })
                }
                SourceSlot::Detached => {}
            }
        }

        debug!(path = %self.path, "Reopening detached image source");
        let source = self.open_verified().await?;

        let mut state = self.state_mut();
        if let SourceSlot::Open(existing) = &state.slot {
            // Another reader won the race
            return Ok(existing.clone());
        }
        if matches!(state.slot, SourceSlot::Closed) {
            return Err(TilingError::Closed {
                path: self.path.clone(),
            });
        }
        state.slot = SourceSlot::Open(source.clone());
        Ok(source)
    }

    async fn open_verified(&self) -> Result<Arc<dyn ImageSource>, TilingError> {
        let source = self.opener.open(&self.path).await?;
        if level_dimensions(source.as_ref()) != self.level_dims {
            return Err(TilingError::SourceChanged {
                path: self.path.clone(),
            });
        }
        Ok(source)
    }

    /// Snapshot for rebuilding this handle elsewhere.
    pub fn descriptor(&self) -> HandleDescriptor {
        let state = self.state();
        HandleDescriptor {
            path: self.path.clone(),
            level: state.level,
            resolution: state.resolution,
            level_dimensions: self.level_dims.clone(),
        }
    }

    /// Read a rectangle at the bound level.
    pub async fn read_region(
        &self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<RgbImage, TilingError> {
        self.read_window(self.level(), x, y, width, height).await
    }

    /// Loading a whole slide into memory is refused; read it tile by tile.
    pub fn read_full_image(&self) -> Result<RgbImage, TilingError> {
        Err(TilingError::FullImageUnsupported {
            path: self.path.clone(),
        })
    }

    /// Lay a tile grid over this image at its bound level.
    pub fn tile_topology(
        self: &Arc<Self>,
        builder: Arc<dyn TileBuilder>,
        max_tile_width: u32,
        max_tile_height: u32,
        overlap: u32,
    ) -> Result<TileTopology, TilingError> {
        let image: Arc<dyn BaseImage> = self.clone();
        TileTopology::new(image, builder, max_tile_width, max_tile_height, overlap)
    }
}

impl BaseImage for ImageHandle {
    fn identifier(&self) -> &str {
        &self.path
    }

    fn level(&self) -> usize {
        ImageHandle::level(self)
    }

    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        self.level_dims.get(level).copied()
    }

    fn as_windowed(&self) -> Option<&dyn WindowedImage> {
        Some(self)
    }
}

#[async_trait]
impl WindowedImage for ImageHandle {
    async fn supports_region_reads(&self, level: usize) -> Result<bool, TilingError> {
        if level >= self.level_dims.len() {
            return Ok(false);
        }
        Ok(self.source().await?.supports_region_reads(level))
    }

    async fn read_window(
        &self,
        level: usize,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<RgbImage, TilingError> {
        self.check_level(level)?;
        let source = self.source().await?;
        Ok(source.read_region(x, y, level, width, height).await?)
    }
}

impl fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        let slot = match state.slot {
            SourceSlot::Open(_) => "open",
            SourceSlot::Detached => "detached",
            SourceSlot::Closed => "closed",
        };
        f.debug_struct("ImageHandle")
            .field("path", &self.path)
            .field("level", &state.level)
            .field("resolution", &state.resolution)
            .field("level_dimensions", &self.level_dims)
            .field("source", &slot)
            .finish()
    }
}
