//! Tile grids over TIFF-backed slides.

use std::sync::Arc;

use image::imageops;
use wsi_tiler::{ImageHandle, SlideTileBuilder, TileBounds, TileTopology, TilingError};

use super::test_utils::{gradient, pyramid, PyramidTiffBuilder, TiffBytesOpener};

/// Two-level slide: 1169x1027 and 584x513, stored in 256px tiles.
async fn slide() -> (Arc<TiffBytesOpener>, Arc<ImageHandle>) {
    let levels = pyramid(gradient(1169, 1027), 2);
    let data = PyramidTiffBuilder::new(levels)
        .with_tile_size(256, 256)
        .build();

    let opener = Arc::new(TiffBytesOpener::new());
    opener.insert("slide.tif", data);
    let handle = ImageHandle::open("slide.tif", opener.clone(), None, 0)
        .await
        .unwrap();
    (opener, Arc::new(handle))
}

fn grid(handle: &Arc<ImageHandle>, size: u32, overlap: u32) -> TileTopology {
    handle
        .tile_topology(Arc::new(SlideTileBuilder), size, size, overlap)
        .unwrap()
}

#[tokio::test]
async fn test_full_resolution_grid() {
    let (_, handle) = slide().await;
    assert_eq!(handle.all_level_dimensions(), &[(1169, 1027), (584, 513)]);

    let topo = grid(&handle, 300, 0);
    assert_eq!(topo.tile_count(), 16);
    assert_eq!((topo.tile_rows(), topo.tile_columns()), (4, 4));
    assert_eq!(
        topo.tile_geometry(16).unwrap(),
        TileBounds::new(900, 900, 269, 127)
    );
}

#[tokio::test]
async fn test_lower_level_grid() {
    let (_, handle) = slide().await;
    handle.set_level(1).unwrap();

    let topo = grid(&handle, 300, 0);
    assert_eq!(topo.level(), 1);
    assert_eq!(topo.tile_count(), 4);

    let last = topo.tile(4).unwrap();
    assert_eq!(last.offset(), (300, 300));
    assert_eq!((last.width(), last.height()), (584 - 300, 513 - 300));

    let pixels = last.materialize().await.unwrap();
    assert_eq!(pixels.dimensions(), (284, 213));
}

#[tokio::test]
async fn test_tiles_cover_level_exactly_once_without_overlap() {
    let (_, handle) = slide().await;
    let topo = grid(&handle, 300, 0);

    let mut hits = vec![0u8; 1169 * 1027];
    for tile in topo.iter() {
        let b = tile.unwrap().bounds();
        for y in b.y..b.y + b.height {
            for x in b.x..b.x + b.width {
                hits[(y * 1169 + x) as usize] += 1;
            }
        }
    }
    assert!(hits.iter().all(|&h| h == 1));
}

#[tokio::test]
async fn test_materialized_tiles_match_source_pixels() {
    let source = gradient(1169, 1027);
    let (_, handle) = slide().await;
    let topo = grid(&handle, 300, 40);

    for index in [1, 2, topo.tile_columns(), topo.tile_count()] {
        let tile = topo.tile(index).unwrap();
        let pixels = tile.materialize().await.unwrap();
        let (x, y) = tile.offset();
        let expected = imageops::crop_imm(&source, x, y, tile.width(), tile.height()).to_image();
        assert_eq!(pixels, expected, "tile {index}");

        // Same pixels as a direct read through the handle
        let direct = handle
            .read_region(x, y, tile.width(), tile.height())
            .await
            .unwrap();
        assert_eq!(pixels, direct);
    }
}

#[tokio::test]
async fn test_topology_is_deterministic() {
    let (_, handle) = slide().await;
    let a = grid(&handle, 256, 32);
    let b = grid(&handle, 256, 32);

    let ga: Vec<_> = (1..=a.tile_count()).map(|i| a.tile_geometry(i).unwrap()).collect();
    let gb: Vec<_> = b.iter().map(|t| t.unwrap().bounds()).collect();
    assert_eq!(ga, gb);

    // A second pass over the same topology yields the same tiles
    let again: Vec<_> = a.iter().map(|t| t.unwrap().bounds()).collect();
    assert_eq!(ga, again);
}

#[tokio::test]
async fn test_level_change_does_not_affect_existing_topology() {
    let (_, handle) = slide().await;
    let level0 = grid(&handle, 300, 0);

    handle.set_level(1).unwrap();
    let level1 = grid(&handle, 300, 0);

    assert_eq!(level0.tile_count(), 16);
    assert_eq!(level0.tile(16).unwrap().level(), 0);
    assert_eq!(level1.tile_count(), 4);

    // Tiles keep reading their own level
    let pixels = level0.tile(16).unwrap().materialize().await.unwrap();
    assert_eq!(pixels.dimensions(), (269, 127));
}

#[tokio::test]
async fn test_single_tile_slide() {
    let opener = Arc::new(TiffBytesOpener::new());
    opener.insert(
        "small.tif",
        PyramidTiffBuilder::new(vec![gradient(120, 90)]).build(),
    );
    let handle = Arc::new(ImageHandle::open("small.tif", opener, None, 0).await.unwrap());

    let topo = grid(&handle, 300, 50);
    assert_eq!(topo.tile_count(), 1);
    let tile = topo.tile(1).unwrap();
    assert_eq!(tile.bounds(), TileBounds::new(0, 0, 120, 90));
    assert_eq!(tile.materialize().await.unwrap(), gradient(120, 90));
}

#[tokio::test]
async fn test_invalid_requests() {
    let (_, handle) = slide().await;

    let err = handle
        .tile_topology(Arc::new(SlideTileBuilder), 300, 300, 300)
        .unwrap_err();
    assert!(matches!(err, TilingError::Config { .. }));

    let topo = grid(&handle, 300, 0);
    assert!(matches!(
        topo.tile(17).unwrap_err(),
        TilingError::TileIndex {
            index: 17,
            tile_count: 16
        }
    ));
    assert!(matches!(
        topo.tile_at(0, 4).unwrap_err(),
        TilingError::TileCoordinates { col: 4, .. }
    ));
}

#[tokio::test]
async fn test_neighbours_overlap_their_tile() {
    let (_, handle) = slide().await;
    let topo = grid(&handle, 300, 30);

    for index in 1..=topo.tile_count() {
        let bounds = topo.tile_geometry(index).unwrap();
        for n in topo.neighbours(index).unwrap() {
            let other = topo.tile_geometry(n).unwrap();
            assert!(bounds.intersects(&other), "{index} and {n}");
        }
    }
}
