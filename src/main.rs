//! WSI Tiler - inspect and cut Whole Slide Images from the command line.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use image::{ImageFormat, RgbImage};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_tiler::{
    config::{Cli, Command, ExtractArgs, GridArgs, InfoArgs, TilesArgs},
    FileSourceOpener, ImageHandle, SlideTileBuilder, Tile, TileBounds,
    TileProcessor, TileTopology, TilingError, WorkflowDriver,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Info(args) => run_info(args).await,
        Command::Tiles(args) => run_tiles(args).await,
        Command::Extract(args) => run_extract(args).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "wsi_tiler=debug"
    } else {
        "wsi_tiler=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn open_grid(
    path: &Path,
    grid: &GridArgs,
) -> Result<(Arc<ImageHandle>, TileTopology), TilingError> {
    grid.to_config(1).validate()?;
    let opener = Arc::new(grid.opener()?);
    let handle =
        Arc::new(ImageHandle::open(path.to_string_lossy(), opener, None, grid.level).await?);
    let topology = handle.tile_topology(
        Arc::new(SlideTileBuilder),
        grid.tile_width,
        grid.tile_height,
        grid.overlap,
    )?;
    Ok((handle, topology))
}

// =============================================================================
// Info Command
// =============================================================================

#[derive(Serialize)]
struct LevelInfo {
    level: usize,
    width: u32,
    height: u32,
    downsample: Option<f64>,
}

#[derive(Serialize)]
struct ImageInfo {
    path: String,
    format: String,
    microns_per_pixel: Option<f64>,
    levels: Vec<LevelInfo>,
}

async fn run_info(args: InfoArgs) -> Result<ExitCode, TilingError> {
    let opener = Arc::new(FileSourceOpener::new());
    let handle = ImageHandle::open(args.path.to_string_lossy(), opener, None, 0).await?;
    let source = handle.source().await?;

    let info = ImageInfo {
        path: handle.path().to_string(),
        format: source.format_name().to_string(),
        microns_per_pixel: source.microns_per_pixel(),
        levels: handle
            .all_level_dimensions()
            .iter()
            .enumerate()
            .map(|(level, &(width, height))| LevelInfo {
                level,
                width,
                height,
                downsample: source.level_downsample(level),
            })
            .collect(),
    };

    if args.json {
        return Ok(if print_json(&info) {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    println!("Path:   {}", info.path);
    println!("Format: {}", info.format);
    match info.microns_per_pixel {
        Some(mpp) => println!("MPP:    {:.4}", mpp),
        None => println!("MPP:    unknown"),
    }
    println!("Levels:");
    for level in &info.levels {
        let downsample = level
            .downsample
            .map_or_else(|| "?".to_string(), |d| format!("{:.2}", d));
        println!(
            "  {:>2}  {:>7} x {:<7}  downsample {}",
            level.level, level.width, level.height, downsample
        );
    }
    Ok(ExitCode::SUCCESS)
}

// =============================================================================
// Tiles Command
// =============================================================================

#[derive(Serialize)]
struct TileRecord {
    index: usize,
    row: usize,
    col: usize,
    #[serde(flatten)]
    bounds: TileBounds,
}

#[derive(Serialize)]
struct GridInfo {
    path: String,
    level: usize,
    image_width: u32,
    image_height: u32,
    tile_width: u32,
    tile_height: u32,
    overlap: u32,
    rows: usize,
    columns: usize,
    tile_count: usize,
    tiles: Vec<TileRecord>,
}

/// Materializes a tile and keeps only its size.
struct Probe;

#[async_trait]
impl TileProcessor for Probe {
    type Output = (u32, u32);

    async fn process(
        &self,
        _index: usize,
        _tile: &Tile,
        pixels: RgbImage,
    ) -> Result<(u32, u32), TilingError> {
        Ok(pixels.dimensions())
    }
}

async fn run_tiles(args: TilesArgs) -> Result<ExitCode, TilingError> {
    let (handle, topology) = open_grid(&args.path, &args.grid).await?;

    let tiles = (1..=topology.tile_count())
        .map(|index| {
            let (row, col) = topology.tile_position(index)?;
            Ok(TileRecord {
                index,
                row,
                col,
                bounds: topology.tile_geometry(index)?,
            })
        })
        .collect::<Result<Vec<_>, TilingError>>()?;

    let grid = GridInfo {
        path: args.path.to_string_lossy().into_owned(),
        level: topology.level(),
        image_width: topology.image_width(),
        image_height: topology.image_height(),
        tile_width: topology.max_tile_width(),
        tile_height: topology.max_tile_height(),
        overlap: topology.overlap(),
        rows: topology.tile_rows(),
        columns: topology.tile_columns(),
        tile_count: topology.tile_count(),
        tiles,
    };

    if args.json {
        if !print_json(&grid) {
            return Ok(ExitCode::FAILURE);
        }
    } else {
        println!(
            "Level {}: {} x {} px, {} x {} tiles of at most {} x {} px, overlap {}",
            grid.level,
            grid.image_width,
            grid.image_height,
            grid.columns,
            grid.rows,
            grid.tile_width,
            grid.tile_height,
            grid.overlap
        );
        for tile in &grid.tiles {
            let b = tile.bounds;
            println!(
                "{:>6}  row {:>4} col {:>4}  ({}, {}) {} x {}",
                tile.index, tile.row, tile.col, b.x, b.y, b.width, b.height
            );
        }
    }

    let Some(workers) = args.read else {
        return Ok(ExitCode::SUCCESS);
    };

    // Workers rebuild their own handles from the descriptor
    let descriptor = handle.descriptor();
    drop(topology);
    drop(handle);

    let driver = WorkflowDriver::new(args.grid.to_config(workers), Arc::new(args.grid.opener()?));
    let report = driver.run(&descriptor, Arc::new(Probe)).await?;

    info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Read every tile"
    );
    for failure in &report.failures {
        error!(index = failure.index, "Tile {}: {}", failure.index, failure.error);
    }

    Ok(if report.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

// =============================================================================
// Extract Command
// =============================================================================

async fn run_extract(args: ExtractArgs) -> Result<ExitCode, TilingError> {
    let (_handle, topology) = open_grid(&args.path, &args.grid).await?;
    let tile = topology.tile(args.index)?;
    let pixels = tile.materialize().await?;

    if let Err(e) = pixels.save_with_format(&args.output, ImageFormat::Png) {
        error!("Failed to write {}: {}", args.output.display(), e);
        return Ok(ExitCode::FAILURE);
    }

    let b = tile.bounds();
    info!(
        index = args.index,
        x = b.x,
        y = b.y,
        width = b.width,
        height = b.height,
        output = %args.output.display(),
        "Wrote tile"
    );
    Ok(ExitCode::SUCCESS)
}

fn print_json<T: Serialize>(value: &T) -> bool {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            true
        }
        Err(e) => {
            error!("Failed to serialize output: {}", e);
            false
        }
    }
}
