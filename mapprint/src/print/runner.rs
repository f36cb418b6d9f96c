//! The print [`JobRunner`]: access check, composition, rendering, storage.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::access::{AccessEvaluator, PermitAll};
use super::request::PrintRequest;
use crate::job::{JobFailure, JobRunner, PrintJobEntry, ReportArtifact};
use crate::report::{
    PngPanelRenderer, RenderedReport, ReportDocument, ReportError, ReportRenderer, ReportStore,
};
use crate::tile::{TileFetcher, TileMetricsSnapshot, TiledRasterCompositor};

/// Runs print requests end to end.
///
/// Every panel is composed through the shared compositor, so all jobs of a
/// process draw tiles from one fetch pool.
pub struct PrintJobRunner<F, S, A = PermitAll, Rd = PngPanelRenderer>
where
    F: TileFetcher,
    S: ReportStore,
    A: AccessEvaluator,
    Rd: ReportRenderer,
{
    compositor: TiledRasterCompositor<F>,
    store: S,
    access: A,
    renderer: Arc<Rd>,
    fail_on_error: bool,
}

impl<F: TileFetcher, S: ReportStore> PrintJobRunner<F, S> {
    pub fn new(compositor: TiledRasterCompositor<F>, store: S) -> Self {
        Self {
            compositor,
            store,
            access: PermitAll,
            renderer: Arc::new(PngPanelRenderer::default()),
            fail_on_error: false,
        }
    }
}

impl<F, S, A, Rd> PrintJobRunner<F, S, A, Rd>
where
    F: TileFetcher,
    S: ReportStore,
    A: AccessEvaluator,
    Rd: ReportRenderer,
{
    pub fn with_access<A2: AccessEvaluator>(self, access: A2) -> PrintJobRunner<F, S, A2, Rd> {
        PrintJobRunner {
            compositor: self.compositor,
            store: self.store,
            access,
            renderer: self.renderer,
            fail_on_error: self.fail_on_error,
        }
    }

    pub fn with_renderer<Rd2: ReportRenderer>(self, renderer: Rd2) -> PrintJobRunner<F, S, A, Rd2> {
        PrintJobRunner {
            compositor: self.compositor,
            store: self.store,
            access: self.access,
            renderer: Arc::new(renderer),
            fail_on_error: self.fail_on_error,
        }
    }

    /// Tile failure policy for panels that do not set their own.
    pub fn with_fail_on_error(mut self, fail_on_error: bool) -> Self {
        self.fail_on_error = fail_on_error;
        self
    }

    pub fn tile_metrics(&self) -> TileMetricsSnapshot {
        self.compositor.metrics()
    }

    async fn render(&self, document: ReportDocument) -> Result<RenderedReport, JobFailure> {
        let renderer = Arc::clone(&self.renderer);
        tokio::task::spawn_blocking(move || renderer.render(&document))
            .await
            .map_err(|e| JobFailure::internal(format!("render task failed: {}", e)))?
            .map_err(|e| match e {
                ReportError::UnsupportedFormat(_) | ReportError::TooLarge { .. } => {
                    JobFailure::invalid_request(e.to_string())
                }
                e => JobFailure::rendering(e.to_string()),
            })
    }
}

impl<F, S, A, Rd> JobRunner for PrintJobRunner<F, S, A, Rd>
where
    F: TileFetcher,
    S: ReportStore,
    A: AccessEvaluator,
    Rd: ReportRenderer,
{
    async fn run(
        &self,
        entry: &PrintJobEntry,
        cancel: &CancellationToken,
    ) -> Result<ReportArtifact, JobFailure> {
        let id = &entry.reference_id;

        self.access
            .evaluate(&entry.access_assertion, &entry.request)
            .map_err(|denied| JobFailure::access_denied(denied.0))?;

        let request = PrintRequest::from_value(&entry.request)
            .map_err(|e| JobFailure::invalid_request(e.to_string()))?;
        let grids = request
            .grids()
            .map_err(|e| JobFailure::invalid_request(e.to_string()))?;

        let mut panels = Vec::with_capacity(grids.len());
        for (index, (panel, grid)) in request.panels.iter().zip(&grids).enumerate() {
            if cancel.is_cancelled() {
                return Err(JobFailure::cancelled());
            }
            let uris = panel
                .source
                .uri_builder()
                .map_err(|e| JobFailure::invalid_request(e.to_string()))?;
            let fail_on_error = panel.fail_on_error.unwrap_or(self.fail_on_error);

            let raster = self
                .compositor
                .compose(grid, uris.as_ref(), fail_on_error, cancel)
                .await?;
            debug!(
                reference_id = %id,
                panel = index,
                failed_tiles = raster.failed_tiles,
                empty_tiles = raster.empty_tiles,
                "panel composed"
            );
            panels.push(raster);
        }

        let rendered = self
            .render(ReportDocument {
                reference_id: id.clone(),
                layout: request.layout,
                output_format: request.output_format,
                attributes: request.attributes,
                panels,
            })
            .await?;

        if cancel.is_cancelled() {
            return Err(JobFailure::cancelled());
        }

        let locator = self
            .store
            .store(id, &rendered)
            .await
            .map_err(|e| JobFailure::storage(e.to_string()))?;
        info!(reference_id = %id, locator = %locator, "report stored");

        Ok(ReportArtifact {
            locator,
            content_type: rendered.content_type,
        })
    }
}
