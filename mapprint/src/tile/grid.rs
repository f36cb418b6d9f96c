//! Tile grid computation.
//!
//! Maps a requested map area and resolution onto the native tile matrix of a
//! source. The grid is computed once per panel and never mutated.
//!
//! Coordinates are in the source's map units. The tile matrix origin is the
//! top-left corner; columns grow to the right (+x) and rows grow downwards
//! (-y).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on cells in a single grid.
pub const MAX_GRID_TILES: usize = 4096;

/// Upper bound on either side of a tile, in pixels.
pub const MAX_TILE_DIMENSION: u32 = 4096;

/// Upper bound on the pixel area of a composed grid (256 Mpx).
pub const MAX_GRID_PIXELS: u64 = 1 << 28;

/// Tolerance when picking a resolution level (5 % coarser is accepted).
const RESOLUTION_TOLERANCE: f64 = 1.05;

/// Slack for floating point error when snapping to tile edges.
const EDGE_EPSILON: f64 = 1e-9;

/// Errors from grid computation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GridError {
    #[error("invalid bounds: {0}")]
    InvalidBounds(String),

    #[error("invalid resolution: {0}")]
    InvalidResolution(f64),

    #[error("tile scheme has no resolution levels")]
    NoResolutions,

    #[error("tile scheme has zero-sized tiles")]
    ZeroTileSize,

    #[error("tile size {width}x{height} exceeds the limit of {limit}px per side")]
    TileTooLarge { width: u32, height: u32, limit: u32 },

    #[error("grid of {width}x{height} pixels exceeds the limit of {limit} pixels")]
    TooLarge { width: u64, height: u64, limit: u64 },

    #[error("grid of {columns}x{rows} tiles exceeds the limit of {limit}")]
    TooManyTiles {
        columns: u64,
        rows: u64,
        limit: usize,
    },
}

/// Axis-aligned rectangle in map units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    fn validate(&self) -> Result<(), GridError> {
        let finite = [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(GridError::InvalidBounds("non-finite coordinate".into()));
        }
        if self.width() <= 0.0 || self.height() <= 0.0 {
            return Err(GridError::InvalidBounds(format!(
                "empty area ({} x {})",
                self.width(),
                self.height()
            )));
        }
        Ok(())
    }
}

/// Native tile matrix of a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileScheme {
    /// X of the matrix's top-left corner
    pub origin_x: f64,
    /// Y of the matrix's top-left corner
    pub origin_y: f64,
    /// Tile width in pixels
    pub tile_width: u32,
    /// Tile height in pixels
    pub tile_height: u32,
    /// Map units per pixel for each level, coarsest first
    pub resolutions: Vec<f64>,
}

impl TileScheme {
    /// Spherical Mercator (EPSG:3857) with 256px tiles, the usual XYZ layout.
    pub fn web_mercator(max_zoom: u8) -> Self {
        const HALF_EXTENT: f64 = 20_037_508.342_789_244;
        let base = (2.0 * HALF_EXTENT) / 256.0;
        Self {
            origin_x: -HALF_EXTENT,
            origin_y: HALF_EXTENT,
            tile_width: 256,
            tile_height: 256,
            resolutions: (0..=max_zoom)
                .map(|z| base / f64::from(1u32 << z))
                .collect(),
        }
    }

    /// Picks the coarsest level at least as detailed as `target`.
    ///
    /// Falls back to the finest level when none is detailed enough.
    pub fn level_for(&self, target: f64) -> Option<usize> {
        if self.resolutions.is_empty() {
            return None;
        }
        let level = self
            .resolutions
            .iter()
            .position(|&res| res <= target * RESOLUTION_TOLERANCE)
            .unwrap_or(self.resolutions.len() - 1);
        Some(level)
    }
}

/// One cell of a [`TileGrid`].
#[derive(Debug, Clone, PartialEq)]
pub struct TileCell {
    /// Position in row-major order
    pub index: usize,
    /// Resolution level
    pub level: u32,
    /// Absolute column in the tile matrix
    pub column: i64,
    /// Absolute row in the tile matrix
    pub row: i64,
    /// Geographic extent of this tile
    pub bounds: Bounds,
    /// Left edge within the composed raster
    pub pixel_x: u32,
    /// Top edge within the composed raster
    pub pixel_y: u32,
    pub width: u32,
    pub height: u32,
}

/// Sub-rectangle of the composed raster, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// The set of tiles covering a map area at one resolution level.
#[derive(Debug, Clone, PartialEq)]
pub struct TileGrid {
    requested: Bounds,
    level: u32,
    resolution: f64,
    first_column: i64,
    first_row: i64,
    columns: u32,
    rows: u32,
    tile_width: u32,
    tile_height: u32,
    pixel_width: u32,
    pixel_height: u32,
    left: f64,
    top: f64,
}

impl TileGrid {
    /// Computes the grid covering `bounds` at roughly `target_resolution`.
    pub fn compute(
        bounds: Bounds,
        target_resolution: f64,
        scheme: &TileScheme,
    ) -> Result<Self, GridError> {
        bounds.validate()?;
        if !target_resolution.is_finite() || target_resolution <= 0.0 {
            return Err(GridError::InvalidResolution(target_resolution));
        }
        if scheme.tile_width == 0 || scheme.tile_height == 0 {
            return Err(GridError::ZeroTileSize);
        }
        if scheme.tile_width > MAX_TILE_DIMENSION || scheme.tile_height > MAX_TILE_DIMENSION {
            return Err(GridError::TileTooLarge {
                width: scheme.tile_width,
                height: scheme.tile_height,
                limit: MAX_TILE_DIMENSION,
            });
        }
        let level = scheme
            .level_for(target_resolution)
            .ok_or(GridError::NoResolutions)?;
        let resolution = scheme.resolutions[level];
        if !resolution.is_finite() || resolution <= 0.0 {
            return Err(GridError::InvalidResolution(resolution));
        }

        let span_x = f64::from(scheme.tile_width) * resolution;
        let span_y = f64::from(scheme.tile_height) * resolution;

        let first_column = snap_down((bounds.min_x - scheme.origin_x) / span_x);
        let last_column = snap_up((bounds.max_x - scheme.origin_x) / span_x) - 1;
        let first_row = snap_down((scheme.origin_y - bounds.max_y) / span_y);
        let last_row = snap_up((scheme.origin_y - bounds.min_y) / span_y) - 1;

        let columns = (last_column - first_column + 1).max(1) as u64;
        let rows = (last_row - first_row + 1).max(1) as u64;
        if columns.saturating_mul(rows) > MAX_GRID_TILES as u64 {
            return Err(GridError::TooManyTiles {
                columns,
                rows,
                limit: MAX_GRID_TILES,
            });
        }
        let (pixel_width, pixel_height) =
            checked_pixel_size(columns, rows, scheme.tile_width, scheme.tile_height)?;

        Ok(Self {
            requested: bounds,
            level: level as u32,
            resolution,
            first_column,
            first_row,
            columns: columns as u32,
            rows: rows as u32,
            tile_width: scheme.tile_width,
            tile_height: scheme.tile_height,
            pixel_width,
            pixel_height,
            left: scheme.origin_x + first_column as f64 * span_x,
            top: scheme.origin_y - first_row as f64 * span_y,
        })
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// Map units per pixel of the composed raster.
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn tile_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    pub fn tile_size(&self) -> (u32, u32) {
        (self.tile_width, self.tile_height)
    }

    /// Pixel size of the fully composed raster.
    pub fn pixel_size(&self) -> (u32, u32) {
        (self.pixel_width, self.pixel_height)
    }

    /// Geographic extent of the whole grid (a superset of the request).
    pub fn extent(&self) -> Bounds {
        let (w, h) = self.pixel_size();
        Bounds::new(
            self.left,
            self.top - f64::from(h) * self.resolution,
            self.left + f64::from(w) * self.resolution,
            self.top,
        )
    }

    /// Returns the cell at a row-major index.
    pub fn cell(&self, index: usize) -> Option<TileCell> {
        if index >= self.tile_count() {
            return None;
        }
        let c = (index % self.columns as usize) as u32;
        let r = (index / self.columns as usize) as u32;
        let span_x = f64::from(self.tile_width) * self.resolution;
        let span_y = f64::from(self.tile_height) * self.resolution;
        let min_x = self.left + f64::from(c) * span_x;
        let max_y = self.top - f64::from(r) * span_y;

        Some(TileCell {
            index,
            level: self.level,
            column: self.first_column + i64::from(c),
            row: self.first_row + i64::from(r),
            bounds: Bounds::new(min_x, max_y - span_y, min_x + span_x, max_y),
            pixel_x: c * self.tile_width,
            pixel_y: r * self.tile_height,
            width: self.tile_width,
            height: self.tile_height,
        })
    }

    /// Iterates cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = TileCell> + '_ {
        (0..self.tile_count()).filter_map(move |i| self.cell(i))
    }

    /// Pixel rectangle of the requested bounds within the composed raster.
    pub fn crop_rect(&self) -> CropRect {
        let (w, h) = self.pixel_size();
        let x = ((self.requested.min_x - self.left) / self.resolution)
            .round()
            .clamp(0.0, f64::from(w)) as u32;
        let y = ((self.top - self.requested.max_y) / self.resolution)
            .round()
            .clamp(0.0, f64::from(h)) as u32;
        let width = (self.requested.width() / self.resolution).round().max(1.0) as u32;
        let height = (self.requested.height() / self.resolution).round().max(1.0) as u32;

        CropRect {
            x,
            y,
            width: width.min(w.saturating_sub(x)).max(1),
            height: height.min(h.saturating_sub(y)).max(1),
        }
    }
}

/// Composed raster size, bounded by [`MAX_GRID_PIXELS`].
///
/// Every cell offset is smaller than the returned size, so it fits in `u32`.
fn checked_pixel_size(
    columns: u64,
    rows: u64,
    tile_width: u32,
    tile_height: u32,
) -> Result<(u32, u32), GridError> {
    let too_large = || GridError::TooLarge {
        width: columns.saturating_mul(u64::from(tile_width)),
        height: rows.saturating_mul(u64::from(tile_height)),
        limit: MAX_GRID_PIXELS,
    };
    let width = columns
        .checked_mul(u64::from(tile_width))
        .ok_or_else(too_large)?;
    let height = rows
        .checked_mul(u64::from(tile_height))
        .ok_or_else(too_large)?;
    match width.checked_mul(height) {
        Some(area) if area <= MAX_GRID_PIXELS => {}
        _ => return Err(too_large()),
    }
    let width = u32::try_from(width).map_err(|_| too_large())?;
    let height = u32::try_from(height).map_err(|_| too_large())?;
    Ok((width, height))
}

#[inline]
fn snap_down(tiles: f64) -> i64 {
    (tiles + EDGE_EPSILON).floor() as i64
}

#[inline]
fn snap_up(tiles: f64) -> i64 {
    (tiles - EDGE_EPSILON).ceil() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 10 units/px at level 0, 5 at level 1, 100px tiles, origin (0, 1000).
    fn scheme() -> TileScheme {
        TileScheme {
            origin_x: 0.0,
            origin_y: 1000.0,
            tile_width: 100,
            tile_height: 100,
            resolutions: vec![10.0, 5.0, 2.5],
        }
    }

    #[test]
    fn test_level_selection() {
        let s = scheme();
        assert_eq!(s.level_for(20.0), Some(0));
        assert_eq!(s.level_for(10.0), Some(0));
        // 9.9 * 1.05 still admits level 0
        assert_eq!(s.level_for(9.9), Some(0));
        assert_eq!(s.level_for(6.0), Some(1));
        assert_eq!(s.level_for(0.1), Some(2));
    }

    #[test]
    fn test_grid_aligned_to_tile_edges() {
        // Exactly tiles (0..2, 0..1) at level 0 (1000 units per tile).
        let grid =
            TileGrid::compute(Bounds::new(0.0, -1000.0, 2000.0, 1000.0), 10.0, &scheme())
                .unwrap();
        assert_eq!(grid.level(), 0);
        assert_eq!((grid.columns(), grid.rows()), (2, 2));
        assert_eq!(grid.pixel_size(), (200, 200));
        assert_eq!(
            grid.crop_rect(),
            CropRect {
                x: 0,
                y: 0,
                width: 200,
                height: 200
            }
        );
    }

    #[test]
    fn test_grid_unaligned_bounds_and_crop() {
        let grid =
            TileGrid::compute(Bounds::new(500.0, 250.0, 1500.0, 750.0), 10.0, &scheme()).unwrap();
        assert_eq!((grid.columns(), grid.rows()), (2, 1));
        assert_eq!(grid.extent(), Bounds::new(0.0, 0.0, 2000.0, 1000.0));

        let crop = grid.crop_rect();
        assert_eq!(
            crop,
            CropRect {
                x: 50,
                y: 25,
                width: 100,
                height: 50
            }
        );
    }

    #[test]
    fn test_cells_row_major_with_offsets() {
        let grid =
            TileGrid::compute(Bounds::new(0.0, -1000.0, 2000.0, 1000.0), 10.0, &scheme())
                .unwrap();
        let cells: Vec<_> = grid.cells().collect();
        assert_eq!(cells.len(), 4);

        let coords: Vec<_> = cells.iter().map(|c| (c.column, c.row)).collect();
        assert_eq!(coords, vec![(0, 0), (1, 0), (0, 1), (1, 1)]);

        assert_eq!((cells[3].pixel_x, cells[3].pixel_y), (100, 100));
        assert_eq!(cells[3].bounds, Bounds::new(1000.0, -1000.0, 2000.0, 0.0));
        assert!(grid.cell(4).is_none());
    }

    #[test]
    fn test_rejects_degenerate_input() {
        let s = scheme();
        assert!(matches!(
            TileGrid::compute(Bounds::new(0.0, 0.0, 0.0, 10.0), 10.0, &s),
            Err(GridError::InvalidBounds(_))
        ));
        assert!(matches!(
            TileGrid::compute(Bounds::new(0.0, 0.0, 10.0, 10.0), -1.0, &s),
            Err(GridError::InvalidResolution(_))
        ));

        let empty = TileScheme {
            resolutions: vec![],
            ..s
        };
        assert_eq!(
            TileGrid::compute(Bounds::new(0.0, 0.0, 10.0, 10.0), 1.0, &empty),
            Err(GridError::NoResolutions)
        );
    }

    #[test]
    fn test_too_many_tiles() {
        let result = TileGrid::compute(
            Bounds::new(0.0, -1_000_000.0, 1_000_000.0, 1000.0),
            2.5,
            &scheme(),
        );
        assert!(matches!(result, Err(GridError::TooManyTiles { .. })));
    }

    #[test]
    fn test_web_mercator_world_at_zoom_one() {
        let scheme = TileScheme::web_mercator(18);
        let extent = 20_037_508.342_789_244;
        let grid = TileGrid::compute(
            Bounds::new(-extent, -extent, extent, extent),
            scheme.resolutions[1],
            &scheme,
        )
        .unwrap();
        assert_eq!(grid.level(), 1);
        assert_eq!((grid.columns(), grid.rows()), (2, 2));
    }

    #[test]
    fn test_oversized_tiles_are_rejected() {
        let huge = TileScheme {
            origin_x: 0.0,
            origin_y: 1.0,
            tile_width: 1 << 30,
            tile_height: 1,
            resolutions: vec![1.0],
        };
        // Four tiles wide would need 2^32 pixels per row.
        let bounds = Bounds::new(0.0, 0.0, 4.0 * f64::from(1u32 << 30), 1.0);
        assert_eq!(
            TileGrid::compute(bounds, 1.0, &huge),
            Err(GridError::TileTooLarge {
                width: 1 << 30,
                height: 1,
                limit: MAX_TILE_DIMENSION,
            })
        );
    }

    #[test]
    fn test_pixel_area_is_bounded() {
        let big = TileScheme {
            origin_x: 0.0,
            origin_y: 4096.0 * 64.0,
            tile_width: MAX_TILE_DIMENSION,
            tile_height: MAX_TILE_DIMENSION,
            resolutions: vec![1.0],
        };
        // 64 x 64 tiles of 4096px: within the tile count, far beyond the area.
        let side = f64::from(MAX_TILE_DIMENSION) * 64.0;
        match TileGrid::compute(Bounds::new(0.0, 0.0, side, side), 1.0, &big) {
            Err(GridError::TooLarge { width, height, limit }) => {
                assert_eq!((width, height), (262_144, 262_144));
                assert_eq!(limit, MAX_GRID_PIXELS);
            }
            other => panic!("unexpected: {other:?}"),
        }

        let grid = TileGrid::compute(Bounds::new(0.0, side - 8192.0, 8192.0, side), 1.0, &big)
            .unwrap();
        assert_eq!(grid.pixel_size(), (8192, 8192));
        let last = grid.cell(grid.tile_count() - 1).unwrap();
        assert_eq!((last.pixel_x, last.pixel_y), (4096, 4096));
    }
}
