//! Region reads composed from stored TIFF tiles.

use std::io::Cursor;
use std::sync::Arc;

use image::{imageops, ImageFormat, RgbImage};
use wsi_tiler::error::{SourceError, TiffError};
use wsi_tiler::io::{BlockCache, MemoryRangeReader};
use wsi_tiler::source::{FileSourceOpener, ImageSource, SourceOpener, TiffSource};

use super::test_utils::{
    aperio_description, blocks, gradient, mean_abs_diff, pyramid, ByteOrderType,
    PyramidTiffBuilder, TempFile, TileEncoding, TrackingReader,
};

async fn open_bytes(data: Vec<u8>) -> TiffSource<MemoryRangeReader> {
    TiffSource::open(MemoryRangeReader::new(data, "test.tif"))
        .await
        .unwrap()
}

fn crop(image: &RgbImage, x: u32, y: u32, w: u32, h: u32) -> RgbImage {
    imageops::crop_imm(image, x, y, w, h).to_image()
}

#[tokio::test]
async fn test_region_spanning_stored_tiles() {
    let image = gradient(200, 150);
    let source = open_bytes(
        PyramidTiffBuilder::new(vec![image.clone()])
            .with_tile_size(64, 64)
            .build(),
    )
    .await;

    // Touches a 3x3 block of stored tiles
    let region = source.read_region(40, 30, 0, 100, 80).await.unwrap();
    assert_eq!(region, crop(&image, 40, 30, 100, 80));

    // Inside a single stored tile
    let region = source.read_region(70, 70, 0, 20, 20).await.unwrap();
    assert_eq!(region, crop(&image, 70, 70, 20, 20));

    // Right and bottom edge tiles are padded in the file
    let region = source.read_region(150, 100, 0, 50, 50).await.unwrap();
    assert_eq!(region, crop(&image, 150, 100, 50, 50));

    // Whole level
    let region = source.read_region(0, 0, 0, 200, 150).await.unwrap();
    assert_eq!(region, image);
}

#[tokio::test]
async fn test_levels_are_read_in_level_coordinates() {
    let levels = pyramid(gradient(512, 384), 3);
    let source = open_bytes(
        PyramidTiffBuilder::new(levels.clone())
            .with_tile_size(64, 64)
            .build(),
    )
    .await;

    assert_eq!(source.level_count(), 3);
    assert_eq!(source.level_dimensions(2), Some((128, 96)));
    assert_eq!(source.level_downsample(1), Some(2.0));
    assert_eq!(source.format_name(), "Generic Pyramidal TIFF");
    assert_eq!(source.microns_per_pixel(), None);

    let region = source.read_region(60, 10, 2, 68, 80).await.unwrap();
    assert_eq!(region, crop(&levels[2], 60, 10, 68, 80));
}

#[tokio::test]
async fn test_out_of_bounds_region() {
    let source = open_bytes(PyramidTiffBuilder::new(vec![gradient(100, 100)]).build()).await;

    let err = source.read_region(90, 0, 0, 20, 10).await.unwrap_err();
    assert!(matches!(
        err,
        SourceError::RegionOutOfBounds {
            level_width: 100,
            ..
        }
    ));

    let err = source.read_region(0, 0, 1, 10, 10).await.unwrap_err();
    assert!(matches!(err, SourceError::LevelOutOfRange { level: 1, .. }));

    let err = source.read_region(0, 0, 0, 0, 10).await.unwrap_err();
    assert!(matches!(err, SourceError::RegionOutOfBounds { .. }));
}

#[tokio::test]
async fn test_jpeg_tiles() {
    let image = blocks(256, 192, 32);
    let source = open_bytes(
        PyramidTiffBuilder::new(vec![image.clone()])
            .with_tile_size(64, 64)
            .with_encoding(TileEncoding::Jpeg { quality: 95 })
            .build(),
    )
    .await;

    let region = source.read_region(32, 32, 0, 160, 96).await.unwrap();
    assert_eq!(region.dimensions(), (160, 96));
    assert!(mean_abs_diff(&region, &crop(&image, 32, 32, 160, 96)) < 4.0);
}

#[tokio::test]
async fn test_abbreviated_jpeg_tiles_with_shared_tables() {
    let image = blocks(192, 128, 32);
    let source = open_bytes(
        PyramidTiffBuilder::new(vec![image.clone()])
            .with_tile_size(64, 64)
            .with_encoding(TileEncoding::AbbreviatedJpeg { quality: 95 })
            .with_description(aperio_description(0.5))
            .build(),
    )
    .await;

    assert_eq!(source.format_name(), "Aperio SVS");
    assert_eq!(source.microns_per_pixel(), Some(0.5));
    assert!(source
        .tiff()
        .get_level(0)
        .and_then(|l| l.jpeg_tables())
        .is_some());

    let region = source.read_region(0, 0, 0, 192, 128).await.unwrap();
    assert!(mean_abs_diff(&region, &image) < 4.0);
}

#[tokio::test]
async fn test_big_endian_and_bigtiff() {
    let image = gradient(130, 70);
    for (order, bigtiff) in [
        (ByteOrderType::BigEndian, false),
        (ByteOrderType::LittleEndian, true),
        (ByteOrderType::BigEndian, true),
    ] {
        let source = open_bytes(
            PyramidTiffBuilder::new(vec![image.clone()])
                .with_tile_size(32, 32)
                .with_byte_order(order)
                .with_bigtiff(bigtiff)
                .build(),
        )
        .await;
        assert_eq!(source.tiff().header().is_bigtiff, bigtiff);
        let region = source.read_region(10, 5, 0, 100, 60).await.unwrap();
        assert_eq!(region, crop(&image, 10, 5, 100, 60), "{order:?} bigtiff={bigtiff}");
    }
}

#[tokio::test]
async fn test_label_ifd_is_not_a_level() {
    let source = open_bytes(
        PyramidTiffBuilder::new(pyramid(gradient(256, 256), 2))
            .with_label_ifd()
            .build(),
    )
    .await;
    assert_eq!(source.level_count(), 2);
}

#[tokio::test]
async fn test_unsupported_compression() {
    let mut data = PyramidTiffBuilder::new(vec![gradient(64, 64)]).build();
    // Patch Compression (tag 259, SHORT, count 1) from 1 to LZW (5)
    let entry = data
        .windows(8)
        .position(|w| w == [0x03, 0x01, 0x03, 0x00, 0x01, 0x00, 0x00, 0x00])
        .unwrap();
    data[entry + 8] = 5;

    let result = TiffSource::open(MemoryRangeReader::new(data, "lzw.tif")).await;
    assert!(matches!(
        result.err().unwrap(),
        SourceError::Tiff(TiffError::UnsupportedCompression(_))
    ));
}

#[tokio::test]
async fn test_block_cache_serves_repeated_reads() {
    let image = gradient(256, 256);
    let reader = TrackingReader::new(
        PyramidTiffBuilder::new(vec![image.clone()])
            .with_tile_size(64, 64)
            .build(),
        "cached.tif",
    );
    let source = TiffSource::open(BlockCache::with_capacity(reader.clone(), 16 * 1024, 64))
        .await
        .unwrap();

    let first = source.read_region(0, 0, 0, 128, 128).await.unwrap();
    let after_first = reader.request_count();
    assert!(after_first > 0);
    assert!(reader.requests().iter().all(|(offset, _)| offset % (16 * 1024) == 0));

    reader.reset_tracking();
    let second = source.read_region(0, 0, 0, 128, 128).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(reader.request_count(), 0);
    assert!(source.reader().stats().hits > 0);
}

#[tokio::test]
async fn test_file_opener_reads_tiff_from_disk() {
    let image = gradient(300, 200);
    let file = TempFile::with_contents(
        "disk.tif",
        &PyramidTiffBuilder::new(vec![image.clone()])
            .with_tile_size(64, 64)
            .build(),
    );

    let source = FileSourceOpener::with_block_cache(4096, 32)
        .open(&file.path_str())
        .await
        .unwrap();
    assert_eq!(source.level_dimensions(0), Some((300, 200)));
    let region = source.read_region(33, 44, 0, 200, 100).await.unwrap();
    assert_eq!(region, crop(&image, 33, 44, 200, 100));
}

#[tokio::test]
async fn test_file_opener_decodes_png() {
    let image = gradient(90, 60);
    let mut png = Cursor::new(Vec::new());
    image.write_to(&mut png, ImageFormat::Png).unwrap();
    let file = TempFile::with_contents("plain.png", png.get_ref());

    let source: Arc<dyn ImageSource> = FileSourceOpener::new()
        .open(&file.path_str())
        .await
        .unwrap();
    assert_eq!(source.level_count(), 1);
    assert_eq!(source.format_name(), "raster");
    let region = source.read_region(10, 10, 0, 50, 40).await.unwrap();
    assert_eq!(region, crop(&image, 10, 10, 50, 40));
}
