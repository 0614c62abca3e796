//! Test utilities for integration tests.
//!
//! This module provides a tracking range reader, a builder for tiled
//! pyramidal TIFF files and helpers for synthetic slide images.

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, Rgb, RgbImage};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use wsi_tiler::error::{IoError, SourceError};
use wsi_tiler::io::RangeReader;
use wsi_tiler::source::{ImageSource, SourceOpener, TiffSource};

// =============================================================================
// Range Reader with Request Tracking
// =============================================================================

/// An in-memory range reader that records every read request.
#[derive(Clone)]
pub struct TrackingReader {
    data: Bytes,
    identifier: String,
    requests: Arc<Mutex<Vec<(u64, usize)>>>,
    request_count: Arc<AtomicUsize>,
}

impl TrackingReader {
    pub fn new(data: Vec<u8>, identifier: impl Into<String>) -> Self {
        Self {
            data: Bytes::from(data),
            identifier: identifier.into(),
            requests: Arc::new(Mutex::new(Vec::new())),
            request_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(u64, usize)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn reset_tracking(&self) {
        self.request_count.store(0, Ordering::SeqCst);
        self.requests.lock().unwrap().clear();
    }
}

#[async_trait]
impl RangeReader for TrackingReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push((offset, len));

        let end = offset as usize + len;
        if end > self.data.len() {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.data.len() as u64,
            });
        }
        Ok(self.data.slice(offset as usize..end))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

// =============================================================================
// Opener over In-Memory TIFF Files
// =============================================================================

/// Opens TIFF files held in memory, sharing one tracking reader per path.
#[derive(Default)]
pub struct TiffBytesOpener {
    files: Mutex<HashMap<String, TrackingReader>>,
    opens: AtomicUsize,
}

impl TiffBytesOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, data: Vec<u8>) -> TrackingReader {
        let reader = TrackingReader::new(data, path);
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), reader.clone());
        reader
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceOpener for TiffBytesOpener {
    async fn open(&self, path: &str) -> Result<Arc<dyn ImageSource>, SourceError> {
        let reader = self
            .files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| IoError::NotFound(path.to_string()))?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(TiffSource::open(reader).await?))
    }
}

// =============================================================================
// Synthetic Images
// =============================================================================

/// Smooth gradient with a distinct value at every pixel of small images.
pub fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x % 256) as u8,
            (y % 256) as u8,
            ((x / 256 + y / 256 * 4) % 256) as u8,
        ])
    })
}

/// Large flat blocks, friendly to lossy compression.
pub fn blocks(width: u32, height: u32, block: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let v = ((x / block + y / block) % 4) as u8 * 60;
        Rgb([v, 255 - v, 128])
    })
}

/// `image` followed by halved copies, `level_count` levels in total.
pub fn pyramid(image: RgbImage, level_count: usize) -> Vec<RgbImage> {
    let mut levels = vec![image];
    while levels.len() < level_count {
        let prev = &levels[levels.len() - 1];
        let next = imageops::resize(
            prev,
            (prev.width() / 2).max(1),
            (prev.height() / 2).max(1),
            imageops::FilterType::Triangle,
        );
        levels.push(next);
    }
    levels
}

/// Mean absolute per-channel difference of two equally sized images.
pub fn mean_abs_diff(a: &RgbImage, b: &RgbImage) -> f64 {
    assert_eq!(a.dimensions(), b.dimensions());
    let total: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(x, y)| (*x as i32 - *y as i32).unsigned_abs() as u64)
        .sum();
    total as f64 / a.as_raw().len() as f64
}

/// Encode `image` as a baseline JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(image)
        .unwrap();
    buf
}

/// Split a complete JPEG stream into a JPEGTables blob (SOI, DQT/DHT, EOI)
/// and an abbreviated stream holding everything else.
pub fn split_jpeg_tables(jpeg: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut tables = vec![0xFF, 0xD8];
    let mut rest = vec![0xFF, 0xD8];
    let mut pos = 2;

    while pos + 4 <= jpeg.len() {
        let marker = jpeg[pos + 1];
        if marker == 0xDA {
            // Scan runs to the end of the stream
            rest.extend_from_slice(&jpeg[pos..]);
            break;
        }
        let length = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        let segment = &jpeg[pos..pos + 2 + length];
        if marker == 0xDB || marker == 0xC4 {
            tables.extend_from_slice(segment);
        } else {
            rest.extend_from_slice(segment);
        }
        pos += 2 + length;
    }

    tables.extend_from_slice(&[0xFF, 0xD9]);
    (tables, rest)
}

// =============================================================================
// Temporary Files
// =============================================================================

/// A file under the system temp directory, removed on drop.
pub struct TempFile {
    path: PathBuf,
}

impl TempFile {
    pub fn with_contents(name: &str, contents: &[u8]) -> Self {
        let unique = format!(
            "wsi-tiler-{}-{}-{}",
            std::process::id(),
            NEXT_TEMP.fetch_add(1, Ordering::SeqCst),
            name
        );
        let path = std::env::temp_dir().join(unique);
        std::fs::write(&path, contents).unwrap();
        Self { path }
    }

    /// Replace the file contents in place.
    pub fn overwrite(&self, contents: &[u8]) {
        std::fs::write(&self.path, contents).unwrap();
    }

    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

static NEXT_TEMP: AtomicUsize = AtomicUsize::new(0);

// =============================================================================
// TIFF File Builder
// =============================================================================

#[derive(Clone, Copy, Debug)]
pub enum ByteOrderType {
    LittleEndian,
    BigEndian,
}

/// How stored tiles are encoded.
#[derive(Clone, Copy, Debug)]
pub enum TileEncoding {
    /// Uncompressed interleaved RGB
    Raw,
    /// Self-contained JPEG per tile
    Jpeg { quality: u8 },
    /// JPEG tiles without tables, tables in the JPEGTables tag
    AbbreviatedJpeg { quality: u8 },
}

/// Builder for tiled multi-level TIFF files, one IFD per level.
pub struct PyramidTiffBuilder {
    byte_order: ByteOrderType,
    bigtiff: bool,
    tile_width: u32,
    tile_height: u32,
    encoding: TileEncoding,
    description: Option<String>,
    levels: Vec<RgbImage>,
    extra_strip_ifd: bool,
}

struct Entry {
    tag: u16,
    field_type: u16,
    count: u64,
    payload: Vec<u8>,
}

impl PyramidTiffBuilder {
    pub fn new(levels: Vec<RgbImage>) -> Self {
        Self {
            byte_order: ByteOrderType::LittleEndian,
            bigtiff: false,
            tile_width: 64,
            tile_height: 64,
            encoding: TileEncoding::Raw,
            description: None,
            levels,
            extra_strip_ifd: false,
        }
    }

    pub fn with_byte_order(mut self, order: ByteOrderType) -> Self {
        self.byte_order = order;
        self
    }

    pub fn with_bigtiff(mut self, bigtiff: bool) -> Self {
        self.bigtiff = bigtiff;
        self
    }

    pub fn with_tile_size(mut self, width: u32, height: u32) -> Self {
        self.tile_width = width;
        self.tile_height = height;
        self
    }

    pub fn with_encoding(mut self, encoding: TileEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// ImageDescription of the first IFD.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Append a small stripped IFD (like a label image) after the levels.
    pub fn with_label_ifd(mut self) -> Self {
        self.extra_strip_ifd = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self.byte_order {
            ByteOrderType::LittleEndian => out.extend_from_slice(b"II"),
            ByteOrderType::BigEndian => out.extend_from_slice(b"MM"),
        }
        if self.bigtiff {
            self.put_u16(&mut out, 43);
            self.put_u16(&mut out, 8);
            self.put_u16(&mut out, 0);
        } else {
            self.put_u16(&mut out, 42);
        }
        let mut next_pointer_pos = out.len();
        self.put_offset(&mut out, 0);

        let mut ifds: Vec<Vec<Entry>> = Vec::new();
        for (index, level) in self.levels.iter().enumerate() {
            let mut offsets = Vec::new();
            let mut counts = Vec::new();
            let (tiles, tables) = self.encode_level(level);
            for tile in tiles {
                offsets.push(out.len() as u64);
                counts.push(tile.len() as u64);
                out.extend_from_slice(&tile);
            }
            let description = if index == 0 {
                self.description.as_deref()
            } else {
                None
            };
            ifds.push(self.level_entries(level, &offsets, &counts, tables, description));
        }

        if self.extra_strip_ifd {
            let offset = out.len() as u64;
            out.extend_from_slice(&[200u8; 8 * 4 * 3]);
            ifds.push(vec![
                self.long_entry(256, 8),
                self.long_entry(257, 4),
                self.short_entry(258, &[8, 8, 8]),
                self.short_entry(259, &[1]),
                self.short_entry(277, &[3]),
                self.offset_entry(273, &[offset]),
                self.offset_entry(279, &[8 * 4 * 3]),
            ]);
        }

        for mut entries in ifds {
            entries.sort_by_key(|e| e.tag);
            let inline_size = if self.bigtiff { 8 } else { 4 };

            // External payloads go before the IFD that points at them
            let mut values = Vec::with_capacity(entries.len());
            for entry in &entries {
                if entry.payload.len() <= inline_size {
                    let mut inline = entry.payload.clone();
                    inline.resize(inline_size, 0);
                    values.push(inline);
                } else {
                    if out.len() % 2 == 1 {
                        out.push(0);
                    }
                    let mut pointer = Vec::new();
                    self.put_offset(&mut pointer, out.len() as u64);
                    out.extend_from_slice(&entry.payload);
                    values.push(pointer);
                }
            }

            if out.len() % 2 == 1 {
                out.push(0);
            }
            let ifd_offset = out.len() as u64;
            self.patch_offset(&mut out, next_pointer_pos, ifd_offset);

            if self.bigtiff {
                self.put_u64(&mut out, entries.len() as u64);
            } else {
                self.put_u16(&mut out, entries.len() as u16);
            }
            for (entry, value) in entries.iter().zip(values) {
                self.put_u16(&mut out, entry.tag);
                self.put_u16(&mut out, entry.field_type);
                if self.bigtiff {
                    self.put_u64(&mut out, entry.count);
                } else {
                    self.put_u32(&mut out, entry.count as u32);
                }
                out.extend_from_slice(&value);
            }
            next_pointer_pos = out.len();
            self.put_offset(&mut out, 0);
        }

        out
    }

    fn encode_level(&self, level: &RgbImage) -> (Vec<Vec<u8>>, Option<Vec<u8>>) {
        let (tw, th) = (self.tile_width, self.tile_height);
        let tiles_x = level.width().div_ceil(tw);
        let tiles_y = level.height().div_ceil(th);
        let mut tiles = Vec::new();
        let mut tables = None;

        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                // Edge tiles are padded to the full tile size
                let mut tile = RgbImage::from_pixel(tw, th, Rgb([255, 255, 255]));
                let x = tx * tw;
                let y = ty * th;
                let w = tw.min(level.width() - x);
                let h = th.min(level.height() - y);
                let part = imageops::crop_imm(level, x, y, w, h).to_image();
                imageops::replace(&mut tile, &part, 0, 0);

                let bytes = match self.encoding {
                    TileEncoding::Raw => tile.into_raw(),
                    TileEncoding::Jpeg { quality } => encode_jpeg(&tile, quality),
                    TileEncoding::AbbreviatedJpeg { quality } => {
                        let (t, rest) = split_jpeg_tables(&encode_jpeg(&tile, quality));
                        tables.get_or_insert(t);
                        rest
                    }
                };
                tiles.push(bytes);
            }
        }
        (tiles, tables)
    }

    fn level_entries(
        &self,
        level: &RgbImage,
        offsets: &[u64],
        counts: &[u64],
        tables: Option<Vec<u8>>,
        description: Option<&str>,
    ) -> Vec<Entry> {
        let compression = match self.encoding {
            TileEncoding::Raw => 1,
            _ => 7,
        };
        let photometric = match self.encoding {
            TileEncoding::Raw => 2,
            _ => 6,
        };

        let mut entries = vec![
            self.long_entry(256, level.width()),
            self.long_entry(257, level.height()),
            self.short_entry(258, &[8, 8, 8]),
            self.short_entry(259, &[compression]),
            self.short_entry(262, &[photometric]),
            self.short_entry(277, &[3]),
            self.short_entry(284, &[1]),
            self.long_entry(322, self.tile_width),
            self.long_entry(323, self.tile_height),
            self.offset_entry(324, offsets),
            self.offset_entry(325, counts),
        ];
        if let Some(text) = description {
            let mut payload = text.as_bytes().to_vec();
            payload.push(0);
            entries.push(Entry {
                tag: 270,
                field_type: 2,
                count: payload.len() as u64,
                payload,
            });
        }
        if let Some(tables) = tables {
            entries.push(Entry {
                tag: 347,
                field_type: 7,
                count: tables.len() as u64,
                payload: tables,
            });
        }
        entries
    }

    fn short_entry(&self, tag: u16, values: &[u16]) -> Entry {
        let mut payload = Vec::new();
        for v in values {
            self.put_u16(&mut payload, *v);
        }
        Entry {
            tag,
            field_type: 3,
            count: values.len() as u64,
            payload,
        }
    }

    fn long_entry(&self, tag: u16, value: u32) -> Entry {
        let mut payload = Vec::new();
        self.put_u32(&mut payload, value);
        Entry {
            tag,
            field_type: 4,
            count: 1,
            payload,
        }
    }

    /// LONG array in classic TIFF, LONG8 in BigTIFF.
    fn offset_entry(&self, tag: u16, values: &[u64]) -> Entry {
        let mut payload = Vec::new();
        for v in values {
            self.put_offset(&mut payload, *v);
        }
        Entry {
            tag,
            field_type: if self.bigtiff { 16 } else { 4 },
            count: values.len() as u64,
            payload,
        }
    }

    fn put_offset(&self, out: &mut Vec<u8>, value: u64) {
        if self.bigtiff {
            self.put_u64(out, value);
        } else {
            self.put_u32(out, value as u32);
        }
    }

    fn patch_offset(&self, out: &mut [u8], pos: usize, value: u64) {
        let mut bytes = Vec::new();
        self.put_offset(&mut bytes, value);
        out[pos..pos + bytes.len()].copy_from_slice(&bytes);
    }

    fn put_u16(&self, out: &mut Vec<u8>, value: u16) {
        match self.byte_order {
            ByteOrderType::LittleEndian => out.extend_from_slice(&value.to_le_bytes()),
            ByteOrderType::BigEndian => out.extend_from_slice(&value.to_be_bytes()),
        }
    }

    fn put_u32(&self, out: &mut Vec<u8>, value: u32) {
        match self.byte_order {
            ByteOrderType::LittleEndian => out.extend_from_slice(&value.to_le_bytes()),
            ByteOrderType::BigEndian => out.extend_from_slice(&value.to_be_bytes()),
        }
    }

    fn put_u64(&self, out: &mut Vec<u8>, value: u64) {
        match self.byte_order {
            ByteOrderType::LittleEndian => out.extend_from_slice(&value.to_le_bytes()),
            ByteOrderType::BigEndian => out.extend_from_slice(&value.to_be_bytes()),
        }
    }
}

/// Aperio-style ImageDescription with a resolution.
pub fn aperio_description(mpp: f64) -> String {
    format!(
        "Aperio Image Library v12.0.15\r\n1024x768 [0,0 1024x768] (256x256) JPEG/RGB Q=70|AppMag = 20|MPP = {}",
        mpp
    )
}
