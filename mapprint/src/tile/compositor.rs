//! Concurrent tiled-raster composition.
//!
//! # Architecture
//!
//! ```text
//!  TileGrid ──► cells (row-major) ──► TileFetchTask per cell
//!                                         │
//!                         ┌───────────────┼───────────────┐
//!                         ▼               ▼               ▼
//!                     JoinSet task    JoinSet task    JoinSet task
//!                    (FetchLimiter permit held for fetch + retries)
//!                         │               │               │
//!                         └──────► fragments[index] ◄─────┘
//!                                         │
//!                               spawn_blocking: paint
//!                                         ▼
//!                                  ComposedRaster
//! ```
//!
//! Fragments are collected by cell index and painted in row-major order
//! after every task has finished. Cells own disjoint pixel rectangles, so
//! the output is identical for any completion order.
//!
//! With `fail_on_error` the first exhausted tile cancels the remaining tasks
//! and the partial raster is discarded. Without it, failed tiles are painted
//! transparent and counted in [`ComposedRaster::failed_tiles`].

use image::RgbaImage;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::config::FetchConfig;
use super::fetcher::TileFetcher;
use super::grid::TileGrid;
use super::limiter::FetchLimiter;
use super::metrics::{TileMetrics, TileMetricsSnapshot};
use super::task::{TileFetchFailure, TileFetchTask, TileFragment, TileOutcome, TileTaskError};
use super::uri::TileUriBuilder;

/// Errors that abort a composition.
#[derive(Debug, Error)]
pub enum CompositionError {
    /// A tile exhausted its retries while failing on error
    #[error("composition failed: {0}")]
    TileFailed(TileFetchFailure),

    /// The caller's cancellation token fired
    #[error("composition cancelled")]
    Cancelled,

    /// A tile or paint task panicked, or the fetch pool was closed
    #[error("composition internal error: {0}")]
    Internal(String),
}

/// Result of a composition.
#[derive(Debug, Clone)]
pub struct ComposedRaster {
    /// Full grid raster (tile-aligned, a superset of the requested area)
    pub image: RgbaImage,
    pub grid: TileGrid,
    /// Tiles painted transparent after exhausting their retries
    pub failed_tiles: usize,
    /// Tiles the source reported as having no data
    pub empty_tiles: usize,
}

impl ComposedRaster {
    /// Crops the raster to the requested bounds.
    pub fn cropped(&self) -> RgbaImage {
        let rect = self.grid.crop_rect();
        image::imageops::crop_imm(&self.image, rect.x, rect.y, rect.width, rect.height)
            .to_image()
    }
}

/// Fans tile fetches out over a bounded pool and paints the results.
pub struct TiledRasterCompositor<F: TileFetcher> {
    fetcher: Arc<F>,
    config: FetchConfig,
    limiter: FetchLimiter,
    metrics: Arc<TileMetrics>,
}

impl<F: TileFetcher> TiledRasterCompositor<F> {
    /// Creates a compositor with its own fetch pool sized from `config`.
    pub fn new(fetcher: Arc<F>, config: FetchConfig) -> Self {
        let limiter = FetchLimiter::new(config.max_concurrent_fetches);
        Self {
            fetcher,
            config,
            limiter,
            metrics: Arc::new(TileMetrics::new()),
        }
    }

    /// Shares an existing fetch pool with other compositors.
    pub fn with_limiter(mut self, limiter: FetchLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn limiter(&self) -> &FetchLimiter {
        &self.limiter
    }

    pub fn metrics(&self) -> TileMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Fetches every tile of `grid` and composes them into one raster.
    ///
    /// # Arguments
    ///
    /// * `grid` - Tiles to fetch
    /// * `uris` - Maps each cell to its URI
    /// * `fail_on_error` - Abort on the first exhausted tile instead of
    ///   painting it transparent
    /// * `cancel` - Job cancellation flag
    #[instrument(
        skip_all,
        fields(level = grid.level(), tiles = grid.tile_count(), fail_on_error = fail_on_error)
    )]
    pub async fn compose<U>(
        &self,
        grid: &TileGrid,
        uris: &U,
        fail_on_error: bool,
        cancel: &CancellationToken,
    ) -> Result<ComposedRaster, CompositionError>
    where
        U: TileUriBuilder + ?Sized,
    {
        if cancel.is_cancelled() {
            return Err(CompositionError::Cancelled);
        }

        let tile_count = grid.tile_count();
        let abort = cancel.child_token();
        let mut tasks = JoinSet::new();

        for cell in grid.cells() {
            let task = TileFetchTask::new(&cell, uris.tile_uri(&cell), &self.config, fail_on_error);
            let fetcher = Arc::clone(&self.fetcher);
            let metrics = Arc::clone(&self.metrics);
            let limiter = self.limiter.clone();
            let token = abort.clone();

            tasks.spawn(async move {
                let index = task.index();
                let permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => return (index, Err(TileTaskError::Cancelled)),
                    permit = limiter.acquire() => permit,
                };
                let Some(_permit) = permit else {
                    return (index, Err(TileTaskError::Cancelled));
                };
                (index, task.run(fetcher.as_ref(), &metrics, &token).await)
            });
        }

        let mut fragments: Vec<Option<TileFragment>> = (0..tile_count).map(|_| None).collect();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(fragment))) => {
                    if let Some(slot) = fragments.get_mut(index) {
                        *slot = Some(fragment);
                    }
                }
                Ok((_, Err(TileTaskError::Failed(failure)))) => {
                    abort.cancel();
                    tasks.abort_all();
                    return Err(CompositionError::TileFailed(failure));
                }
                Ok((_, Err(TileTaskError::Cancelled))) => {}
                Err(e) if e.is_panic() => {
                    warn!(error = %e, "tile task panicked");
                    abort.cancel();
                    tasks.abort_all();
                    return Err(CompositionError::Internal(format!("tile task panicked: {}", e)));
                }
                Err(e) => {
                    debug!(error = %e, "tile task aborted");
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(CompositionError::Cancelled);
        }

        let fragments: Vec<TileFragment> = fragments.into_iter().flatten().collect();
        if fragments.len() != tile_count {
            return Err(CompositionError::Internal(format!(
                "{} of {} tiles missing (fetch pool closed)",
                tile_count - fragments.len(),
                tile_count
            )));
        }

        let failed_tiles = fragments.iter().filter(|f| f.failed()).count();
        let empty_tiles = fragments
            .iter()
            .filter(|f| f.outcome == TileOutcome::NoContent)
            .count();

        let (width, height) = grid.pixel_size();
        let image = tokio::task::spawn_blocking(move || paint(width, height, &fragments))
            .await
            .map_err(|e| CompositionError::Internal(format!("paint task failed: {}", e)))?;

        debug!(failed_tiles, empty_tiles, "composition complete");

        Ok(ComposedRaster {
            image,
            grid: grid.clone(),
            failed_tiles,
            empty_tiles,
        })
    }
}

/// Paints fragments onto a transparent canvas in row-major order.
fn paint(width: u32, height: u32, fragments: &[TileFragment]) -> RgbaImage {
    let mut canvas = RgbaImage::new(width, height);
    for fragment in fragments {
        image::imageops::replace(
            &mut canvas,
            &fragment.image,
            i64::from(fragment.pixel_x),
            i64::from(fragment.pixel_y),
        );
    }
    canvas
}
