//! Property tests for tile grid geometry.

use std::sync::Arc;

use proptest::prelude::*;
use wsi_tiler::{BaseImage, SlideTileBuilder, TileBounds, TileTopology};

/// Geometry-only image of a fixed size.
struct Blank {
    width: u32,
    height: u32,
}

impl BaseImage for Blank {
    fn identifier(&self) -> &str {
        "blank"
    }

    fn level(&self) -> usize {
        0
    }

    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        (level == 0).then_some((self.width, self.height))
    }
}

fn topology(width: u32, height: u32, tw: u32, th: u32, overlap: u32) -> TileTopology {
    TileTopology::new(
        Arc::new(Blank { width, height }),
        Arc::new(SlideTileBuilder),
        tw,
        th,
        overlap,
    )
    .unwrap()
}

/// Image size, tile size and an overlap smaller than both tile dimensions.
fn grid_params() -> impl Strategy<Value = (u32, u32, u32, u32, u32)> {
    (1u32..3000, 1u32..3000, 1u32..600, 1u32..600).prop_flat_map(|(w, h, tw, th)| {
        (
            Just(w),
            Just(h),
            Just(tw),
            Just(th),
            0..tw.min(th),
        )
    })
}

proptest! {
    #[test]
    fn tiles_stay_inside_and_are_never_empty((w, h, tw, th, o) in grid_params()) {
        let topo = topology(w, h, tw, th, o);
        prop_assert_eq!(topo.tile_count(), topo.tile_rows() * topo.tile_columns());
        prop_assert!(topo.tile_count() >= 1);

        for index in [1, topo.tile_columns(), topo.tile_count()] {
            let b = topo.tile_geometry(index).unwrap();
            prop_assert!(b.width > 0 && b.height > 0);
            prop_assert!(b.width <= tw && b.height <= th);
            prop_assert!(b.right() <= w as u64 && b.bottom() <= h as u64);
        }
    }

    #[test]
    fn rows_and_columns_cover_the_image((w, h, tw, th, o) in grid_params()) {
        let topo = topology(w, h, tw, th, o);

        // Along the first row: starts at 0, no gaps, ends on the border
        let row: Vec<TileBounds> = (0..topo.tile_columns())
            .map(|c| topo.tile_geometry(topo.tile_index(0, c).unwrap()).unwrap())
            .collect();
        prop_assert_eq!(row[0].x, 0);
        prop_assert_eq!(row[row.len() - 1].right(), w as u64);
        for pair in row.windows(2) {
            prop_assert!(pair[1].x as u64 <= pair[0].right());
            prop_assert_eq!(pair[1].x - pair[0].x, tw - o);
            // Neighbours share exactly the overlap
            prop_assert_eq!(pair[0].right() - pair[1].x as u64, o as u64);
        }

        // Down the first column
        let col: Vec<TileBounds> = (0..topo.tile_rows())
            .map(|r| topo.tile_geometry(topo.tile_index(r, 0).unwrap()).unwrap())
            .collect();
        prop_assert_eq!(col[0].y, 0);
        prop_assert_eq!(col[col.len() - 1].bottom(), h as u64);
        for pair in col.windows(2) {
            prop_assert_eq!(pair[0].bottom() - pair[1].y as u64, o as u64);
        }
    }

    #[test]
    fn geometry_is_deterministic((w, h, tw, th, o) in grid_params(), pick in 0.0f64..1.0) {
        let a = topology(w, h, tw, th, o);
        let b = topology(w, h, tw, th, o);
        prop_assert_eq!(a.tile_count(), b.tile_count());

        let index = 1 + ((a.tile_count() - 1) as f64 * pick) as usize;
        prop_assert_eq!(a.tile_geometry(index).unwrap(), b.tile_geometry(index).unwrap());
        prop_assert_eq!(a.tile(index).unwrap().bounds(), a.tile_geometry(index).unwrap());

        let (row, col) = a.tile_position(index).unwrap();
        prop_assert_eq!(a.tile_index(row, col).unwrap(), index);
    }

    #[test]
    fn count_matches_formula((w, h, tw, th, o) in grid_params()) {
        let topo = topology(w, h, tw, th, o);
        let expected = |size: u32, tile: u32| {
            let span = size.saturating_sub(o).max(1);
            span.div_ceil(tile - o).max(1) as usize
        };
        prop_assert_eq!(topo.tile_columns(), expected(w, tw));
        prop_assert_eq!(topo.tile_rows(), expected(h, th));
    }
}
