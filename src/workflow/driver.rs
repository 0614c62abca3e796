use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::RgbImage;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::config::TilingConfig;
use crate::error::TilingError;
use crate::slide::{HandleDescriptor, ImageHandle};
use crate::source::SourceOpener;
use crate::tile::{SlideTileBuilder, Tile, TileBounds, TileBuilder, TileTopology};

/// Capacity of the result channel between tile tasks and the collector.
const RESULT_CHANNEL_CAPACITY: usize = 32;

/// Work applied to every tile of a run.
///
/// `process` receives the tile and its materialized pixels. Calls for
/// different tiles run concurrently.
#[async_trait]
pub trait TileProcessor: Send + Sync + 'static {
    type Output: Send + 'static;

    async fn process(
        &self,
        index: usize,
        tile: &Tile,
        pixels: RgbImage,
    ) -> Result<Self::Output, TilingError>;
}

/// A tile that could not be built, read or processed.
#[derive(Debug)]
pub struct TileFailure {
    pub index: usize,
    pub bounds: Option<TileBounds>,
    pub error: TilingError,
}

/// Outcome of a run: per-tile outputs and failures, both ordered by index.
#[derive(Debug)]
pub struct WorkflowReport<T> {
    pub level: usize,
    pub tile_count: usize,
    pub outputs: Vec<(usize, T)>,
    pub failures: Vec<TileFailure>,
    pub elapsed: Duration,
}

impl<T> WorkflowReport<T> {
    /// Whether every tile produced an output.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.outputs.len() == self.tile_count
    }

    pub fn succeeded(&self) -> usize {
        self.outputs.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn output(&self, index: usize) -> Option<&T> {
        self.outputs
            .binary_search_by_key(&index, |(i, _)| *i)
            .ok()
            .map(|pos| &self.outputs[pos].1)
    }

    pub fn into_outputs(self) -> Vec<(usize, T)> {
        self.outputs
    }
}

/// Builds the per-worker handle and topology from a descriptor.
struct SlotFactory {
    descriptor: HandleDescriptor,
    opener: Arc<dyn SourceOpener>,
    builder: Arc<dyn TileBuilder>,
    config: TilingConfig,
}

impl SlotFactory {
    fn build(&self) -> Result<TileTopology, TilingError> {
        let handle = Arc::new(ImageHandle::from_descriptor(
            self.descriptor.clone(),
            self.opener.clone(),
        )?);
        if let Some(level) = self.config.level {
            handle.set_level(level)?;
        }
        handle.tile_topology(
            self.builder.clone(),
            self.config.tile_width,
            self.config.tile_height,
            self.config.overlap,
        )
    }
}

/// Runs a [`TileProcessor`] over every tile of an image.
pub struct WorkflowDriver {
    config: TilingConfig,
    opener: Arc<dyn SourceOpener>,
    builder: Arc<dyn TileBuilder>,
}

impl WorkflowDriver {
    pub fn new(config: TilingConfig, opener: Arc<dyn SourceOpener>) -> Self {
        Self {
            config,
            opener,
            builder: Arc::new(SlideTileBuilder),
        }
    }

    /// Use a custom tile builder instead of [`SlideTileBuilder`].
    pub fn with_builder(mut self, builder: Arc<dyn TileBuilder>) -> Self {
        self.builder = builder;
        self
    }

    pub fn config(&self) -> &TilingConfig {
        &self.config
    }

    /// Process every tile of the image described by `descriptor`.
    ///
    /// Configuration and level errors abort the run before any tile is
    /// read. Per-tile errors are collected in the report and do not stop
    /// the other tiles.
    pub async fn run<P: TileProcessor>(
        &self,
        descriptor: &HandleDescriptor,
        processor: Arc<P>,
    ) -> Result<WorkflowReport<P::Output>, TilingError> {
        self.config.validate()?;
        let started = Instant::now();

        let factory = Arc::new(SlotFactory {
            descriptor: descriptor.clone(),
            opener: self.opener.clone(),
            builder: self.builder.clone(),
            config: self.config.clone(),
        });

        let first = factory.build()?;
        let level = first.level();
        let tile_count = first.tile_count();
        let workers = self.config.workers.min(tile_count);

        info!(
            path = %descriptor.path,
            level = level,
            rows = first.tile_rows(),
            columns = first.tile_columns(),
            tiles = tile_count,
            workers = workers,
            "Starting tiling workflow"
        );

        let mut slots = Vec::with_capacity(workers);
        slots.push(first);
        for _ in 1..workers {
            slots.push(factory.build()?);
        }

        let pool = Arc::new(Mutex::new(slots));
        let semaphore = Arc::new(Semaphore::new(workers));
        let (result_tx, mut result_rx) =
            mpsc::channel::<Result<(usize, P::Output), TileFailure>>(RESULT_CHANNEL_CAPACITY);

        // Dispatch runs beside the collector below; tasks block on a full
        // result channel while holding permits.
        let dispatch = {
            let pool = pool.clone();
            let factory = factory.clone();
            let tx = result_tx.clone();
            tokio::spawn(async move {
                for index in 1..=tile_count {
                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                        break;
                    };

                    let pool = pool.clone();
                    let factory = factory.clone();
                    let processor = processor.clone();
                    let tx = tx.clone();

                    tokio::spawn(async move {
                        let _permit = permit;

                        let slot = pool.lock().await.pop();
                        let topology = match slot {
                            Some(topology) => topology,
                            None => match factory.build() {
                                Ok(topology) => topology,
                                Err(error) => {
                                    let failure = TileFailure {
                                        index,
                                        bounds: None,
                                        error,
                                    };
                                    let _ = tx.send(Err(failure)).await;
                                    return;
                                }
                            },
                        };

                        let result = match process_tile(&topology, index, processor.as_ref()).await
                        {
                            Ok(output) => Ok((index, output)),
                            Err(error) => Err(TileFailure {
                                index,
                                bounds: topology.tile_geometry(index).ok(),
                                error,
                            }),
                        };

                        pool.lock().await.push(topology);
                        let _ = tx.send(result).await;
                    });
                }
            })
        };
        drop(result_tx);

        let mut outputs = Vec::with_capacity(tile_count);
        let mut failures = Vec::new();
        while let Some(result) = result_rx.recv().await {
            match result {
                Ok(output) => outputs.push(output),
                Err(failure) => {
                    warn!(
                        index = failure.index,
                        error = %failure.error,
                        "Tile failed"
                    );
                    failures.push(failure);
                }
            }
        }

        dispatch.await.map_err(|e| TilingError::Worker {
            message: e.to_string(),
        })?;

        outputs.sort_unstable_by_key(|(index, _)| *index);
        failures.sort_unstable_by_key(|f| f.index);

        // A task that panicked sends nothing
        if outputs.len() + failures.len() < tile_count {
            let mut reported = vec![false; tile_count + 1];
            for index in outputs.iter().map(|(i, _)| *i).chain(failures.iter().map(|f| f.index)) {
                reported[index] = true;
            }
            for index in (1..=tile_count).filter(|i| !reported[*i]) {
                warn!(index = index, "Tile task ended without a result");
                failures.push(TileFailure {
                    index,
                    bounds: None,
                    error: TilingError::Worker {
                        message: format!("task for tile {} ended without a result", index),
                    },
                });
            }
            failures.sort_unstable_by_key(|f| f.index);
        }

        let elapsed = started.elapsed();
        info!(
            path = %descriptor.path,
            succeeded = outputs.len(),
            failed = failures.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Tiling workflow finished"
        );

        Ok(WorkflowReport {
            level,
            tile_count,
            outputs,
            failures,
            elapsed,
        })
    }
}

async fn process_tile<P: TileProcessor>(
    topology: &TileTopology,
    index: usize,
    processor: &P,
) -> Result<P::Output, TilingError> {
    let tile = topology.tile(index)?;
    let pixels = tile.materialize().await?;
    debug!(index = index, bounds = ?tile.bounds(), "Processing tile");
    processor.process(index, &tile, pixels).await
}
