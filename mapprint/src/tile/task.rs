//! Single-tile fetch with retries.
//!
//! A task makes up to `max_retries + 1` attempts. Each attempt is classified
//! as one of:
//!
//! | Response                          | Outcome                           |
//! |-----------------------------------|-----------------------------------|
//! | 204                               | no content, transparent, no retry |
//! | other 2xx with a decodable image  | image                             |
//! | anything else, transport errors   | failure, retried after a pause    |
//!
//! Cancellation is checked before each attempt and during the pause between
//! attempts. A request already on the wire is allowed to finish.

use image::imageops::FilterType;
use image::RgbaImage;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::FetchConfig;
use super::fetcher::{TileFetcher, STATUS_NO_CONTENT};
use super::grid::TileCell;
use super::metrics::TileMetrics;

/// Why an attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("HTTP status {0}")]
    Status(u16),

    #[error("undecodable image: {0}")]
    Undecodable(String),

    #[error("{0}")]
    Transport(String),
}

impl FailureReason {
    /// HTTP status of the failing response, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status(code) => Some(*code),
            _ => None,
        }
    }
}

/// A tile that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("tile {uri} failed after {attempts} attempt(s): {reason}")]
pub struct TileFetchFailure {
    pub uri: String,
    pub attempts: u32,
    pub reason: FailureReason,
}

/// Errors that end a tile task without a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TileTaskError {
    /// Retries exhausted with fail-on-error set
    #[error(transparent)]
    Failed(TileFetchFailure),

    /// The job was cancelled before the tile finished
    #[error("tile fetch cancelled")]
    Cancelled,
}

/// How a fragment was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileOutcome {
    Image,
    NoContent,
    Failed(FailureReason),
}

/// A positioned raster piece ready to be painted.
#[derive(Debug, Clone)]
pub struct TileFragment {
    pub index: usize,
    pub column: i64,
    pub row: i64,
    pub pixel_x: u32,
    pub pixel_y: u32,
    pub image: RgbaImage,
    pub outcome: TileOutcome,
    pub attempts: u32,
}

impl TileFragment {
    pub fn failed(&self) -> bool {
        matches!(self.outcome, TileOutcome::Failed(_))
    }
}

enum Attempt {
    Image(RgbaImage, usize),
    NoContent,
}

/// Fetches, decodes and positions one tile.
#[derive(Debug, Clone)]
pub struct TileFetchTask {
    index: usize,
    column: i64,
    row: i64,
    pixel_x: u32,
    pixel_y: u32,
    width: u32,
    height: u32,
    uri: String,
    max_retries: u32,
    retry_interval: Duration,
    fail_on_error: bool,
}

impl TileFetchTask {
    pub fn new(cell: &TileCell, uri: String, config: &FetchConfig, fail_on_error: bool) -> Self {
        Self {
            index: cell.index,
            column: cell.column,
            row: cell.row,
            pixel_x: cell.pixel_x,
            pixel_y: cell.pixel_y,
            width: cell.width,
            height: cell.height,
            uri,
            max_retries: config.max_retries,
            retry_interval: config.retry_interval,
            fail_on_error,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Runs the task to completion.
    ///
    /// Returns a fragment for images, no-content tiles and (when not failing
    /// on error) exhausted tiles. Returns [`TileTaskError::Failed`] only when
    /// `fail_on_error` is set.
    pub async fn run<F: TileFetcher>(
        self,
        fetcher: &F,
        metrics: &TileMetrics,
        cancel: &CancellationToken,
    ) -> Result<TileFragment, TileTaskError> {
        let total_attempts = self.max_retries.saturating_add(1);
        let mut last_reason = None;

        for attempt in 1..=total_attempts {
            if cancel.is_cancelled() {
                return Err(TileTaskError::Cancelled);
            }

            match self.attempt(fetcher).await {
                Ok(Attempt::Image(image, bytes)) => {
                    metrics.record_fetched(bytes);
                    return Ok(self.fragment(image, TileOutcome::Image, attempt));
                }
                Ok(Attempt::NoContent) => {
                    metrics.record_no_content();
                    let blank = RgbaImage::new(self.width, self.height);
                    return Ok(self.fragment(blank, TileOutcome::NoContent, attempt));
                }
                Err(reason) => {
                    debug!(
                        uri = %self.uri,
                        attempt = attempt,
                        max_attempts = total_attempts,
                        reason = %reason,
                        "tile attempt failed"
                    );
                    last_reason = Some(reason);
                }
            }

            if attempt < total_attempts {
                metrics.record_retry();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(TileTaskError::Cancelled),
                    _ = tokio::time::sleep(self.retry_interval) => {}
                }
            }
        }

        let reason = last_reason
            .unwrap_or_else(|| FailureReason::Transport("no attempt was made".to_string()));

        if self.fail_on_error {
            metrics.record_failed(false);
            warn!(
                uri = %self.uri,
                attempts = total_attempts,
                reason = %reason,
                "tile failed, aborting composition"
            );
            return Err(TileTaskError::Failed(TileFetchFailure {
                uri: self.uri,
                attempts: total_attempts,
                reason,
            }));
        }

        metrics.record_failed(true);
        warn!(
            uri = %self.uri,
            attempts = total_attempts,
            reason = %reason,
            "tile failed, painting transparent"
        );
        let blank = RgbaImage::new(self.width, self.height);
        Ok(self.fragment(blank, TileOutcome::Failed(reason), total_attempts))
    }

    async fn attempt<F: TileFetcher>(&self, fetcher: &F) -> Result<Attempt, FailureReason> {
        let response = fetcher
            .fetch(&self.uri)
            .await
            .map_err(|e| FailureReason::Transport(e.0))?;

        if response.status == STATUS_NO_CONTENT {
            return Ok(Attempt::NoContent);
        }
        if !(200..300).contains(&response.status) {
            return Err(FailureReason::Status(response.status));
        }

        let bytes = response.body.len();
        let body = response.body;
        let (width, height) = (self.width, self.height);
        let decoded = tokio::task::spawn_blocking(move || {
            image::load_from_memory(&body).map(|img| {
                let rgba = img.to_rgba8();
                if rgba.dimensions() == (width, height) {
                    rgba
                } else {
                    image::imageops::resize(&rgba, width, height, FilterType::Triangle)
                }
            })
        })
        .await
        .map_err(|e| FailureReason::Undecodable(format!("decoder task failed: {}", e)))?
        .map_err(|e| FailureReason::Undecodable(e.to_string()))?;

        Ok(Attempt::Image(decoded, bytes))
    }

    fn fragment(&self, image: RgbaImage, outcome: TileOutcome, attempts: u32) -> TileFragment {
        TileFragment {
            index: self.index,
            column: self.column,
            row: self.row,
            pixel_x: self.pixel_x,
            pixel_y: self.pixel_y,
            image,
            outcome,
            attempts,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::tile::fetcher::{FetchResponse, TransportError};
    use crate::tile::grid::Bounds;
    use image::{ImageFormat, Rgba};
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    pub(crate) fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba(color));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    /// Replays a fixed script of responses, repeating the last one.
    struct ScriptedFetcher {
        script: Mutex<VecDeque<Result<FetchResponse, TransportError>>>,
        calls: AtomicU32,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<FetchResponse, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TileFetcher for ScriptedFetcher {
        async fn fetch(&self, _uri: &str) -> Result<FetchResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }
    }

    fn cell() -> TileCell {
        TileCell {
            index: 3,
            level: 0,
            column: 1,
            row: 1,
            bounds: Bounds::new(0.0, 0.0, 1.0, 1.0),
            pixel_x: 8,
            pixel_y: 8,
            width: 8,
            height: 8,
        }
    }

    fn config(max_retries: u32) -> FetchConfig {
        FetchConfig::default()
            .with_max_retries(max_retries)
            .with_retry_interval(Duration::from_millis(5))
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_makes_retries_plus_one_attempts() {
        let fetcher = ScriptedFetcher::new(vec![Ok(FetchResponse::new(500, Vec::new()))]);
        let metrics = TileMetrics::new();
        let task = TileFetchTask::new(&cell(), "mem://t".into(), &config(2), true);

        let err = task
            .run(&fetcher, &metrics, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(fetcher.calls(), 3);
        match err {
            TileTaskError::Failed(failure) => {
                assert_eq!(failure.uri, "mem://t");
                assert_eq!(failure.attempts, 3);
                assert_eq!(failure.reason.status(), Some(500));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(metrics.snapshot().retried, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degrade_returns_transparent_fragment() {
        let fetcher = ScriptedFetcher::new(vec![Err(TransportError("refused".into()))]);
        let metrics = TileMetrics::new();
        let task = TileFetchTask::new(&cell(), "mem://t".into(), &config(1), false);

        let fragment = task
            .run(&fetcher, &metrics, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fetcher.calls(), 2);
        assert!(fragment.failed());
        assert_eq!(fragment.attempts, 2);
        assert!(fragment.image.pixels().all(|p| p.0[3] == 0));
        let snap = metrics.snapshot();
        assert_eq!((snap.failed, snap.degraded), (1, 1));
    }

    #[tokio::test]
    async fn test_no_content_uses_single_attempt() {
        let fetcher = ScriptedFetcher::new(vec![Ok(FetchResponse::new(204, Vec::new()))]);
        let metrics = TileMetrics::new();
        let task = TileFetchTask::new(&cell(), "mem://t".into(), &config(4), true);

        let fragment = task
            .run(&fetcher, &metrics, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(fragment.outcome, TileOutcome::NoContent);
        assert_eq!(fragment.attempts, 1);
        assert_eq!(fragment.image.dimensions(), (8, 8));
        assert!(fragment.image.pixels().all(|p| p.0 == [0, 0, 0, 0]));
        assert_eq!(metrics.snapshot().retried, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_then_success() {
        let fetcher = ScriptedFetcher::new(vec![
            Ok(FetchResponse::new(503, Vec::new())),
            Ok(FetchResponse::new(200, b"not an image".to_vec())),
            Ok(FetchResponse::new(200, png(8, 8, [10, 20, 30, 255]))),
        ]);
        let metrics = TileMetrics::new();
        let task = TileFetchTask::new(&cell(), "mem://t".into(), &config(3), true);

        let fragment = task
            .run(&fetcher, &metrics, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fetcher.calls(), 3);
        assert_eq!(fragment.outcome, TileOutcome::Image);
        assert_eq!(fragment.attempts, 3);
        assert_eq!((fragment.pixel_x, fragment.pixel_y), (8, 8));
        assert_eq!(fragment.image.get_pixel(0, 0).0, [10, 20, 30, 255]);
    }

    #[tokio::test]
    async fn test_mismatched_tile_size_is_resized() {
        let fetcher = ScriptedFetcher::new(vec![Ok(FetchResponse::new(
            200,
            png(16, 16, [1, 2, 3, 255]),
        ))]);
        let task = TileFetchTask::new(&cell(), "mem://t".into(), &config(0), true);

        let fragment = task
            .run(&fetcher, &TileMetrics::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(fragment.image.dimensions(), (8, 8));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let fetcher = ScriptedFetcher::new(vec![Ok(FetchResponse::new(204, Vec::new()))]);
        let token = CancellationToken::new();
        token.cancel();
        let task = TileFetchTask::new(&cell(), "mem://t".into(), &config(2), true);

        let err = task
            .run(&fetcher, &TileMetrics::new(), &token)
            .await
            .unwrap_err();
        assert_eq!(err, TileTaskError::Cancelled);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_retry_pause() {
        let fetcher = ScriptedFetcher::new(vec![Ok(FetchResponse::new(500, Vec::new()))]);
        let token = CancellationToken::new();
        let config = FetchConfig::default()
            .with_max_retries(5)
            .with_retry_interval(Duration::from_secs(60));
        let task = TileFetchTask::new(&cell(), "mem://t".into(), &config, false);

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                token.cancel();
            })
        };

        let err = task
            .run(&fetcher, &TileMetrics::new(), &token)
            .await
            .unwrap_err();
        canceller.await.unwrap();
        assert_eq!(err, TileTaskError::Cancelled);
        assert_eq!(fetcher.calls(), 1);
    }
}
