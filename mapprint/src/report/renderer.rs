//! Report rendering seam and the built-in raster renderer.

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;

use super::ReportError;
use crate::job::ReferenceId;
use crate::tile::{ComposedRaster, MAX_GRID_PIXELS};

/// Everything a renderer needs to lay out one report.
#[derive(Debug, Clone)]
pub struct ReportDocument {
    pub reference_id: ReferenceId,
    pub layout: String,
    pub output_format: String,
    pub attributes: serde_json::Map<String, serde_json::Value>,
    /// Composed rasters in request order
    pub panels: Vec<ComposedRaster>,
}

/// Encoded report ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReport {
    pub bytes: Vec<u8>,
    pub content_type: String,
    /// File extension without the dot
    pub extension: String,
}

/// Turns composed panels into a document.
///
/// Rendering is CPU-bound and runs on the blocking pool.
pub trait ReportRenderer: Send + Sync + 'static {
    fn render(&self, document: &ReportDocument) -> Result<RenderedReport, ReportError>;
}

/// Crops every panel to its requested bounds and stacks them top to bottom
/// into one PNG.
#[derive(Debug, Clone)]
pub struct PngPanelRenderer {
    spacing: u32,
    background: Rgba<u8>,
}

impl Default for PngPanelRenderer {
    fn default() -> Self {
        Self {
            spacing: 0,
            background: Rgba([0, 0, 0, 0]),
        }
    }
}

impl PngPanelRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vertical gap between panels, in pixels.
    pub fn with_spacing(mut self, spacing: u32) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn with_background(mut self, background: Rgba<u8>) -> Self {
        self.background = background;
        self
    }
}

impl PngPanelRenderer {
    /// Size of the stacked panels, bounded by [`MAX_GRID_PIXELS`].
    fn canvas_size(&self, panels: &[RgbaImage]) -> Result<(u32, u32), ReportError> {
        let width = panels.iter().map(|p| u64::from(p.width())).max().unwrap_or(0);
        let gaps = u64::from(self.spacing) * (panels.len() as u64).saturating_sub(1);
        let height = panels.iter().map(|p| u64::from(p.height())).sum::<u64>() + gaps;

        let too_large = || ReportError::TooLarge {
            width,
            height,
            limit: MAX_GRID_PIXELS,
        };
        if width.saturating_mul(height) > MAX_GRID_PIXELS {
            return Err(too_large());
        }
        Ok((
            u32::try_from(width).map_err(|_| too_large())?,
            u32::try_from(height).map_err(|_| too_large())?,
        ))
    }
}

impl ReportRenderer for PngPanelRenderer {
    fn render(&self, document: &ReportDocument) -> Result<RenderedReport, ReportError> {
        if !document.output_format.eq_ignore_ascii_case("png") {
            return Err(ReportError::UnsupportedFormat(
                document.output_format.clone(),
            ));
        }
        if document.panels.is_empty() {
            return Err(ReportError::Empty);
        }

        let panels: Vec<RgbaImage> = document.panels.iter().map(|p| p.cropped()).collect();
        let (width, height) = self.canvas_size(&panels)?;

        let mut canvas = RgbaImage::from_pixel(width, height, self.background);
        let mut y = 0i64;
        for panel in &panels {
            image::imageops::overlay(&mut canvas, panel, 0, y);
            y += i64::from(panel.height()) + i64::from(self.spacing);
        }

        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(canvas).write_to(&mut cursor, ImageFormat::Png)?;

        Ok(RenderedReport {
            bytes: cursor.into_inner(),
            content_type: "image/png".to_string(),
            extension: "png".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::{Bounds, TileGrid, TileScheme};

    /// Single 4x4 tile covering (0,0)-(4,4), filled with `color`.
    fn panel(color: [u8; 4]) -> ComposedRaster {
        let scheme = TileScheme {
            origin_x: 0.0,
            origin_y: 4.0,
            tile_width: 4,
            tile_height: 4,
            resolutions: vec![1.0],
        };
        let grid = TileGrid::compute(Bounds::new(0.0, 0.0, 4.0, 4.0), 1.0, &scheme).unwrap();
        ComposedRaster {
            image: RgbaImage::from_pixel(4, 4, Rgba(color)),
            grid,
            failed_tiles: 0,
            empty_tiles: 0,
        }
    }

    fn document(format: &str, panels: Vec<ComposedRaster>) -> ReportDocument {
        ReportDocument {
            reference_id: ReferenceId::new("r1").unwrap(),
            layout: "A4 portrait".into(),
            output_format: format.into(),
            attributes: serde_json::Map::new(),
            panels,
        }
    }

    #[test]
    fn test_panels_are_stacked_with_spacing() {
        let renderer = PngPanelRenderer::new().with_spacing(2);
        let doc = document("png", vec![panel([255, 0, 0, 255]), panel([0, 0, 255, 255])]);
        let report = renderer.render(&doc).unwrap();
        assert_eq!(report.content_type, "image/png");
        assert_eq!(report.extension, "png");

        let decoded = image::load_from_memory(&report.bytes).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (4, 10));
        assert_eq!(decoded.get_pixel(1, 1), &Rgba([255, 0, 0, 255]));
        assert_eq!(decoded.get_pixel(1, 4)[3], 0);
        assert_eq!(decoded.get_pixel(1, 8), &Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_rejects_other_formats_and_empty_documents() {
        let renderer = PngPanelRenderer::new();
        assert!(matches!(
            renderer.render(&document("pdf", vec![panel([0; 4])])),
            Err(ReportError::UnsupportedFormat(f)) if f == "pdf"
        ));
        assert!(matches!(
            renderer.render(&document("PNG", vec![])),
            Err(ReportError::Empty)
        ));
    }

    #[test]
    fn test_oversized_stack_is_rejected() {
        let renderer = PngPanelRenderer::new().with_spacing(u32::MAX);
        let doc = document("png", vec![panel([0; 4]), panel([0; 4])]);
        match renderer.render(&doc) {
            Err(ReportError::TooLarge { width, height, .. }) => {
                assert_eq!(width, 4);
                assert_eq!(height, 8 + u64::from(u32::MAX));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
