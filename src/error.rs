use thiserror::Error;

/// I/O errors raised while reading bytes from a slide file
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// File does not exist or cannot be opened
    #[error("File not found: {0}")]
    NotFound(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Underlying read failed (permissions, truncated file, device error)
    #[error("Read error on {path}: {message}")]
    Read { path: String, message: String },
}

/// Errors that can occur when parsing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is absent from an IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unsupported compression scheme
    #[error("Unsupported compression: {0} (only uncompressed and JPEG tiles are supported)")]
    UnsupportedCompression(String),

    /// No tiled pyramid level could be identified
    #[error("No tiled pyramid levels found")]
    NoPyramidLevels,

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),
}

/// Errors raised by an image source while opening or reading pixels
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// TIFF structure error
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// File format is not supported
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },

    /// Stored pixel data could not be decoded
    #[error("Failed to decode image data: {message}")]
    Decode { message: String },

    /// Level index does not exist in the source
    #[error("Level {level} out of range (source has {level_count} levels)")]
    LevelOutOfRange { level: usize, level_count: usize },

    /// Region extends past the level dimensions
    #[error(
        "Region {width}x{height} at ({x}, {y}) exceeds level {level} dimensions {level_width}x{level_height}"
    )]
    RegionOutOfBounds {
        level: usize,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        level_width: u32,
        level_height: u32,
    },
}

/// Errors surfaced by image handles, tiles and tile topologies
#[derive(Debug, Clone, Error)]
pub enum TilingError {
    /// Invalid topology or configuration parameters
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// Resolution level outside `[0, level_count)`
    #[error("Invalid level {level} for image '{path}': must be in range [0, {level_count})")]
    InvalidLevel {
        path: String,
        level: usize,
        level_count: usize,
    },

    /// The tile's base image cannot serve windowed pixel reads
    #[error("Base image '{image}' does not support windowed pixel reads")]
    InvalidBaseImage { image: String },

    /// The source declares that region reads are not available at this level
    #[error("Region reads are not supported at level {level}")]
    UnsupportedLevel { level: usize },

    /// Tile geometry exceeds the image bounds
    #[error(
        "Tile {width}x{height} at ({x}, {y}) exceeds image bounds {image_width}x{image_height}"
    )]
    OutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    },

    /// Linear tile index outside `[1, tile_count]`
    #[error("Tile index {index} out of range: must be in range [1, {tile_count}]")]
    TileIndex { index: usize, tile_count: usize },

    /// Grid coordinates outside the topology
    #[error("Tile position ({row}, {col}) out of range for a {rows}x{columns} grid")]
    TileCoordinates {
        row: usize,
        col: usize,
        rows: usize,
        columns: usize,
    },

    /// The handle was closed explicitly
    #[error("Image '{path}' is closed")]
    Closed { path: String },

    /// A reopened source no longer matches the geometry captured at first open
    #[error("Image '{path}' changed since it was first opened")]
    SourceChanged { path: String },

    /// Loading a whole slide in memory is refused
    #[error("Loading the full image '{path}' is not supported; read it through a tile topology")]
    FullImageUnsupported { path: String },

    /// A tile worker stopped without reporting a result
    #[error("Tile worker failed: {message}")]
    Worker { message: String },

    /// Failure from the underlying image source
    #[error(transparent)]
    Io(#[from] SourceError),
}

impl TilingError {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        TilingError::Config {
            message: message.into(),
        }
    }
}
