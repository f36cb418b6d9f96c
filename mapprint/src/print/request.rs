//! Print request model.
//!
//! The scheduler treats requests as opaque JSON; this is the shape the print
//! runner expects:
//!
//! ```json
//! {
//!   "layout": "A4 portrait",
//!   "output_format": "png",
//!   "panels": [{
//!     "bounds": {"min_x": 0, "min_y": 0, "max_x": 1000, "max_y": 1000},
//!     "resolution": 2.0,
//!     "source": {"kind": "xyz", "url": "https://tile.example/{z}/{x}/{y}.png"},
//!     "fail_on_error": true
//!   }],
//!   "attributes": {"title": "Site plan"}
//! }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tile::{
    Bounds, GridError, TileGrid, TileScheme, TileUriBuilder, WmsUriBuilder, WmtsUriBuilder,
    XyzUriBuilder,
};

const DEFAULT_LAYOUT: &str = "default";
const DEFAULT_OUTPUT_FORMAT: &str = "png";
const DEFAULT_MAX_ZOOM: u8 = 22;

/// Why a request payload cannot be printed.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("malformed print request: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("print request has no panels")]
    NoPanels,

    #[error("{kind} source requires `{field}`")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("panel {index}: {source}")]
    Grid {
        index: usize,
        #[source]
        source: GridError,
    },
}

/// Protocol of a tile source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Xyz,
    Wms,
    Wmts,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Xyz => "xyz",
            SourceKind::Wms => "wms",
            SourceKind::Wmts => "wmts",
        }
    }
}

/// Where a panel's tiles come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileSource {
    pub kind: SourceKind,
    /// URL template for XYZ, service base URL otherwise
    pub url: String,
    /// WMS layers, or the WMTS layer
    #[serde(default)]
    pub layers: Option<String>,
    #[serde(default)]
    pub matrix_set: Option<String>,
    #[serde(default)]
    pub matrix_ids: Vec<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub srs: Option<String>,
    /// Native tile matrix; spherical Mercator when omitted
    #[serde(default = "default_scheme")]
    pub scheme: TileScheme,
}

fn default_scheme() -> TileScheme {
    TileScheme::web_mercator(DEFAULT_MAX_ZOOM)
}

impl TileSource {
    /// Builds the URI builder for this source.
    pub fn uri_builder(&self) -> Result<Box<dyn TileUriBuilder>, RequestError> {
        match self.kind {
            SourceKind::Xyz => Ok(Box::new(XyzUriBuilder::new(&self.url))),
            SourceKind::Wms => {
                let layers = self.required(self.layers.as_ref(), "layers")?;
                let mut builder = WmsUriBuilder::new(&self.url, layers);
                if let Some(srs) = &self.srs {
                    builder = builder.with_srs(srs);
                }
                if let Some(format) = &self.format {
                    builder = builder.with_format(format);
                }
                Ok(Box::new(builder))
            }
            SourceKind::Wmts => {
                let layer = self.required(self.layers.as_ref(), "layers")?;
                let matrix_set = self.required(self.matrix_set.as_ref(), "matrix_set")?;
                let mut builder = WmtsUriBuilder::new(&self.url, layer, matrix_set)
                    .with_matrix_ids(self.matrix_ids.clone());
                if let Some(style) = &self.style {
                    builder = builder.with_style(style);
                }
                if let Some(format) = &self.format {
                    builder = builder.with_format(format);
                }
                Ok(Box::new(builder))
            }
        }
    }

    fn required<'a>(
        &self,
        value: Option<&'a String>,
        field: &'static str,
    ) -> Result<&'a String, RequestError> {
        value.ok_or(RequestError::MissingField {
            kind: self.kind.as_str(),
            field,
        })
    }
}

/// One map on the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapPanel {
    pub bounds: Bounds,
    /// Requested map units per pixel
    pub resolution: f64,
    pub source: TileSource,
    /// Overrides the configured tile failure policy
    #[serde(default)]
    pub fail_on_error: Option<bool>,
}

impl MapPanel {
    pub fn grid(&self) -> Result<TileGrid, GridError> {
        TileGrid::compute(self.bounds, self.resolution, &self.source.scheme)
    }
}

/// A print request as submitted by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintRequest {
    #[serde(default = "default_layout")]
    pub layout: String,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    pub panels: Vec<MapPanel>,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

fn default_layout() -> String {
    DEFAULT_LAYOUT.to_string()
}

fn default_output_format() -> String {
    DEFAULT_OUTPUT_FORMAT.to_string()
}

impl PrintRequest {
    /// Parses and validates a request payload.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, RequestError> {
        let request = Self::deserialize(value)?;
        if request.panels.is_empty() {
            return Err(RequestError::NoPanels);
        }
        Ok(request)
    }

    /// Computes every panel's grid up front so a bad panel fails the job
    /// before any tile is fetched.
    pub fn grids(&self) -> Result<Vec<TileGrid>, RequestError> {
        self.panels
            .iter()
            .enumerate()
            .map(|(index, panel)| {
                panel
                    .grid()
                    .map_err(|source| RequestError::Grid { index, source })
            })
            .collect()
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
