//! Concurrent tiled-raster fetch and compose engine.
//!
//! Given a map area, a target resolution and a source's tile scheme, this
//! module computes the covering [`TileGrid`], fetches every tile in parallel
//! on a bounded pool with per-tile retries, and paints the results into one
//! raster in a deterministic order.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mapprint::tile::*;
//!
//! let scheme = TileScheme::web_mercator(19);
//! let grid = TileGrid::compute(bounds, 19.1, &scheme)?;
//! let fetcher = Arc::new(ReqwestTileFetcher::new(config.request_timeout)?);
//! let compositor = TiledRasterCompositor::new(fetcher, FetchConfig::default());
//! let source = XyzUriBuilder::new("https://tile.example/{z}/{x}/{y}.png");
//! let raster = compositor.compose(&grid, &source, false, &cancel).await?;
//! ```

mod compositor;
mod config;
mod fetcher;
mod grid;
mod limiter;
mod metrics;
mod task;
mod uri;

pub use compositor::{ComposedRaster, CompositionError, TiledRasterCompositor};
pub use config::{
    FetchConfig, DEFAULT_MAX_CONCURRENT_FETCHES, DEFAULT_MAX_RETRIES, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_RETRY_INTERVAL,
};
pub use fetcher::{
    FetchResponse, ReqwestTileFetcher, TileFetcher, TransportError, DEFAULT_USER_AGENT,
    STATUS_NO_CONTENT,
};
pub use grid::{
    Bounds, CropRect, GridError, TileCell, TileGrid, TileScheme, MAX_GRID_PIXELS, MAX_GRID_TILES,
    MAX_TILE_DIMENSION,
};
pub use limiter::{FetchLimiter, FetchPermit};
pub use metrics::{TileMetrics, TileMetricsSnapshot};
pub use task::{
    FailureReason, TileFetchFailure, TileFetchTask, TileFragment, TileOutcome, TileTaskError,
};
pub use uri::{TileUriBuilder, WmsUriBuilder, WmtsUriBuilder, XyzUriBuilder};
