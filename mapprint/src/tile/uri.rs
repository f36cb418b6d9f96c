//! Tile URI builders.
//!
//! Every tile source kind reduces to the same capability: given a grid cell,
//! produce a fetchable URI. Closures implement [`TileUriBuilder`] directly, so
//! callers can plug in ad-hoc sources without a new type.

use super::grid::TileCell;

/// Produces the URI for one tile.
pub trait TileUriBuilder: Send + Sync {
    fn tile_uri(&self, cell: &TileCell) -> String;
}

impl<F> TileUriBuilder for F
where
    F: Fn(&TileCell) -> String + Send + Sync,
{
    fn tile_uri(&self, cell: &TileCell) -> String {
        self(cell)
    }
}

/// Slippy-map template source, e.g. `https://tile.example/{z}/{x}/{y}.png`.
///
/// Supported placeholders: `{z}`, `{x}`, `{y}` and `{-y}` (TMS row order).
#[derive(Debug, Clone)]
pub struct XyzUriBuilder {
    template: String,
}

impl XyzUriBuilder {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl TileUriBuilder for XyzUriBuilder {
    fn tile_uri(&self, cell: &TileCell) -> String {
        let flipped = (1i64 << cell.level.min(62)) - 1 - cell.row;
        self.template
            .replace("{z}", &cell.level.to_string())
            .replace("{x}", &cell.column.to_string())
            .replace("{-y}", &flipped.to_string())
            .replace("{y}", &cell.row.to_string())
    }
}

/// WMS `GetMap` source; each tile is requested by its bounding box.
#[derive(Debug, Clone)]
pub struct WmsUriBuilder {
    base_url: String,
    layers: String,
    srs: String,
    format: String,
    version: String,
}

impl WmsUriBuilder {
    pub fn new(base_url: impl Into<String>, layers: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            layers: layers.into(),
            srs: "EPSG:3857".to_string(),
            format: "image/png".to_string(),
            version: "1.1.1".to_string(),
        }
    }

    pub fn with_srs(mut self, srs: impl Into<String>) -> Self {
        self.srs = srs.into();
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }
}

impl TileUriBuilder for WmsUriBuilder {
    fn tile_uri(&self, cell: &TileCell) -> String {
        let b = &cell.bounds;
        format!(
            "{}{}SERVICE=WMS&VERSION={}&REQUEST=GetMap&LAYERS={}&STYLES=&SRS={}\
             &BBOX={},{},{},{}&WIDTH={}&HEIGHT={}&FORMAT={}&TRANSPARENT=TRUE",
            self.base_url,
            query_separator(&self.base_url),
            self.version,
            self.layers,
            self.srs,
            b.min_x,
            b.min_y,
            b.max_x,
            b.max_y,
            cell.width,
            cell.height,
            self.format,
        )
    }
}

/// WMTS KVP `GetTile` source.
#[derive(Debug, Clone)]
pub struct WmtsUriBuilder {
    base_url: String,
    layer: String,
    style: String,
    matrix_set: String,
    format: String,
    matrix_ids: Vec<String>,
}

impl WmtsUriBuilder {
    pub fn new(
        base_url: impl Into<String>,
        layer: impl Into<String>,
        matrix_set: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            layer: layer.into(),
            style: "default".to_string(),
            matrix_set: matrix_set.into(),
            format: "image/png".to_string(),
            matrix_ids: Vec::new(),
        }
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = style.into();
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    /// Names of the tile matrices per level. Without them the level number
    /// is used as the matrix identifier.
    pub fn with_matrix_ids(mut self, ids: Vec<String>) -> Self {
        self.matrix_ids = ids;
        self
    }
}

impl TileUriBuilder for WmtsUriBuilder {
    fn tile_uri(&self, cell: &TileCell) -> String {
        let matrix = self
            .matrix_ids
            .get(cell.level as usize)
            .cloned()
            .unwrap_or_else(|| cell.level.to_string());
        format!(
            "{}{}SERVICE=WMTS&REQUEST=GetTile&VERSION=1.0.0&LAYER={}&STYLE={}\
             &TILEMATRIXSET={}&TILEMATRIX={}&TILEROW={}&TILECOL={}&FORMAT={}",
            self.base_url,
            query_separator(&self.base_url),
            self.layer,
            self.style,
            self.matrix_set,
            matrix,
            cell.row,
            cell.column,
            self.format,
        )
    }
}

fn query_separator(base: &str) -> &'static str {
    if !base.contains('?') {
        "?"
    } else if base.ends_with('?') || base.ends_with('&') {
        ""
    } else {
        "&"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::grid::Bounds;

    fn cell(level: u32, column: i64, row: i64) -> TileCell {
        TileCell {
            index: 0,
            level,
            column,
            row,
            bounds: Bounds::new(0.0, 0.0, 100.0, 50.0),
            pixel_x: 0,
            pixel_y: 0,
            width: 256,
            height: 128,
        }
    }

    #[test]
    fn test_xyz_placeholders() {
        let builder = XyzUriBuilder::new("https://t.example/{z}/{x}/{y}.png?tms={-y}");
        assert_eq!(
            builder.tile_uri(&cell(3, 5, 1)),
            "https://t.example/3/5/1.png?tms=6"
        );
    }

    #[test]
    fn test_wms_bbox_and_size() {
        let builder = WmsUriBuilder::new("https://wms.example/service", "roads");
        let uri = builder.tile_uri(&cell(0, 0, 0));
        assert!(uri.starts_with("https://wms.example/service?SERVICE=WMS"));
        assert!(uri.contains("LAYERS=roads"));
        assert!(uri.contains("BBOX=0,0,100,50"));
        assert!(uri.contains("WIDTH=256&HEIGHT=128"));
    }

    #[test]
    fn test_wms_existing_query() {
        let builder = WmsUriBuilder::new("https://wms.example/map?key=1", "base")
            .with_format("image/jpeg");
        let uri = builder.tile_uri(&cell(0, 0, 0));
        assert!(uri.starts_with("https://wms.example/map?key=1&SERVICE=WMS"));
        assert!(uri.ends_with("FORMAT=image/jpeg&TRANSPARENT=TRUE"));
    }

    #[test]
    fn test_wmts_matrix_ids() {
        let builder = WmtsUriBuilder::new("https://wmts.example/", "ortho", "GoogleMapsCompatible")
            .with_matrix_ids(vec!["m0".into(), "m1".into()]);
        let uri = builder.tile_uri(&cell(1, 7, 9));
        assert!(uri.contains("TILEMATRIX=m1&TILEROW=9&TILECOL=7"));

        let uri = builder.tile_uri(&cell(4, 7, 9));
        assert!(uri.contains("TILEMATRIX=4&"));
    }

    #[test]
    fn test_closure_builder() {
        let builder = |c: &TileCell| format!("mem://{}-{}", c.column, c.row);
        assert_eq!(builder.tile_uri(&cell(0, 2, 3)), "mem://2-3");
    }
}
