//! Export pipeline: per-photo fetch/process unit, the group-wise batch
//! scheduler and the job runner that ties paging, compositing and archive
//! assembly together.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use tokio::task::JoinSet;

use crate::archive::{self, ExportReport, PhotoFailure};
use crate::compositor::{
    self, Position, PreparedWatermark, WatermarkConfig, BULK_JPEG_QUALITY, PREVIEW_JPEG_QUALITY,
};
use crate::config::ExportSettings;
use crate::db::{Collection, DbPool, Photo};
use crate::export_error::ExportError;
use crate::fetcher::{fetch_with_retry, ImageSource};
use crate::paging::{total_pages, ExportMode, PageRequest};
use crate::retry::RetryPolicy;

/// Everything a request handler needs, built once at startup.
#[derive(Clone)]
pub struct ExportContext {
    pub db_pool: DbPool,
    pub source: Arc<dyn ImageSource>,
    pub settings: ExportSettings,
    pub retry: RetryPolicy,
}

impl ExportContext {
    pub fn new(db_pool: DbPool, source: Arc<dyn ImageSource>, settings: ExportSettings) -> Self {
        let retry = RetryPolicy::new(
            settings.fetch_max_attempts,
            settings.fetch_retry_base_delay,
        );
        Self {
            db_pool,
            source,
            settings,
            retry,
        }
    }

    pub fn page_size(&self, mode: ExportMode) -> usize {
        match mode {
            ExportMode::Batch => self.settings.batch_size,
            ExportMode::Chunk => self.settings.chunk_size,
        }
    }

    pub fn concurrency(&self, mode: ExportMode) -> usize {
        match mode {
            ExportMode::Batch => self.settings.batch_concurrency,
            ExportMode::Chunk => self.settings.chunk_concurrency,
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, crate::fetcher::FetchError> {
        fetch_with_retry(
            self.source.as_ref(),
            &self.retry,
            url,
            self.settings.fetch_timeout,
        )
        .await
    }
}

/// Result of one per-photo unit.
#[derive(Debug)]
pub struct PhotoOutcome {
    pub photo_id: String,
    pub sequence: i64,
    pub output_name: String,
    pub result: Result<Vec<u8>, String>,
}

impl PhotoOutcome {
    fn failure(photo: &Photo, output_name: String, error: String) -> Self {
        Self {
            photo_id: photo.id.clone(),
            sequence: photo.sequence,
            output_name,
            result: Err(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Archive member name: zero-padded sequence plus the source file stem.
/// Output is always JPEG, so the extension is always `.jpg`.
pub fn output_name(photo: &Photo) -> String {
    let stem = source_file_stem(&photo.url).unwrap_or_else(|| format!("photo_{}", photo.id));
    format!("{:04}_{}.jpg", photo.sequence, stem)
}

fn source_file_stem(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let segment = path.trim_end_matches('/').rsplit('/').next()?;
    let stem = match segment.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => segment,
    };

    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Fetches one photo, composites the shared watermark and encodes it.
/// Never fails: every error is captured in the outcome.
pub async fn process_photo(
    ctx: ExportContext,
    photo: Photo,
    watermark: Arc<PreparedWatermark>,
    position: Position,
    quality: u8,
) -> PhotoOutcome {
    let name = output_name(&photo);

    let bytes = match ctx.fetch(&photo.url).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to fetch photo {} ({}): {}", photo.id, photo.url, e);
            return PhotoOutcome::failure(&photo, name, e.to_string());
        }
    };

    let max_pixels = ctx.settings.max_image_pixels;
    let composited = tokio::task::spawn_blocking(move || {
        compositor::watermark_photo(&bytes, &watermark, position, quality, max_pixels)
    })
    .await;

    match composited {
        Ok(Ok(jpeg)) => {
            debug!("Watermarked {} ({} bytes)", name, jpeg.len());
            PhotoOutcome {
                photo_id: photo.id,
                sequence: photo.sequence,
                output_name: name,
                result: Ok(jpeg),
            }
        }
        Ok(Err(e)) => {
            warn!("Failed to watermark photo {}: {}", photo.id, e);
            PhotoOutcome::failure(&photo, name, e.to_string())
        }
        Err(e) => {
            error!("Watermark task for photo {} failed: {}", photo.id, e);
            PhotoOutcome::failure(&photo, name, format!("Processing task failed: {}", e))
        }
    }
}

/// Processes `photos` in consecutive groups of `concurrency`, waiting for each
/// group to settle before starting the next. Outcomes are stored by input
/// position, so the returned order always matches `photos`.
pub async fn process_slice(
    ctx: &ExportContext,
    photos: &[Photo],
    watermark: Arc<PreparedWatermark>,
    position: Position,
    concurrency: usize,
    quality: u8,
) -> Vec<PhotoOutcome> {
    let concurrency = concurrency.max(1);
    let mut slots: Vec<Option<PhotoOutcome>> = (0..photos.len()).map(|_| None).collect();
    let group_count = total_pages(photos.len(), concurrency);

    for (group_idx, group) in photos.chunks(concurrency).enumerate() {
        let base = group_idx * concurrency;
        let mut tasks = JoinSet::new();

        for (offset, photo) in group.iter().enumerate() {
            let ctx = ctx.clone();
            let photo = photo.clone();
            let watermark = watermark.clone();
            tasks.spawn(async move {
                let outcome = process_photo(ctx, photo, watermark, position, quality).await;
                (base + offset, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, outcome)) => slots[slot] = Some(outcome),
                Err(e) => error!("Photo task panicked: {}", e),
            }
        }

        debug!(
            "Finished group {}/{} ({} photos)",
            group_idx + 1,
            group_count,
            group.len()
        );
    }

    slots
        .into_iter()
        .zip(photos)
        .map(|(slot, photo)| {
            slot.unwrap_or_else(|| {
                PhotoOutcome::failure(
                    photo,
                    output_name(photo),
                    "Processing task aborted".to_string(),
                )
            })
        })
        .collect()
}

/// Fetches and prepares the job's watermark. Any failure here is fatal for
/// the whole request, since every photo needs it.
pub async fn load_watermark(
    ctx: &ExportContext,
    config: &WatermarkConfig,
) -> Result<Arc<PreparedWatermark>, ExportError> {
    let bytes = ctx
        .fetch(&config.watermark_source_url)
        .await
        .map_err(|e| {
            error!(
                "Failed to fetch watermark {}: {}",
                config.watermark_source_url, e
            );
            ExportError::WatermarkUnavailable(e)
        })?;

    let config = config.clone();
    let max_pixels = ctx.settings.max_image_pixels;
    let prepared = tokio::task::spawn_blocking(move || {
        compositor::prepare_watermark(&bytes, &config, max_pixels)
    })
    .await
    .map_err(|e| ExportError::Internal(format!("Watermark task failed: {}", e)))?
    .map_err(ExportError::WatermarkInvalid)?;

    debug!(
        "Prepared watermark footprint {}x{}",
        prepared.width(),
        prepared.height()
    );
    Ok(Arc::new(prepared))
}

/// One export invocation over an already validated page.
pub struct ExportRequest<'a> {
    pub collection: &'a Collection,
    pub config: &'a WatermarkConfig,
    /// Full ordered (and capped) photo list of the collection
    pub photos: &'a [Photo],
    pub page: PageRequest,
    pub mode: ExportMode,
    pub client_total_chunks: Option<i64>,
}

#[derive(Debug)]
pub struct ExportArchive {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub report: ExportReport,
}

pub fn build_report(request: &ExportRequest<'_>, outcomes: &[PhotoOutcome]) -> ExportReport {
    let failures: Vec<PhotoFailure> = outcomes
        .iter()
        .filter_map(|outcome| {
            outcome.result.as_ref().err().map(|error| PhotoFailure {
                photo_id: outcome.photo_id.clone(),
                sequence: outcome.sequence,
                output_name: outcome.output_name.clone(),
                error: error.clone(),
            })
        })
        .collect();

    ExportReport {
        collection_name: request.collection.name.clone(),
        mode: request.mode,
        page_index: request.page.index,
        total_pages: total_pages(request.photos.len(), request.page.size),
        client_total_chunks: request.client_total_chunks,
        page_size: request.page.size,
        total_photos: request.photos.len(),
        attempted: outcomes.len(),
        succeeded: outcomes.len() - failures.len(),
        failed: failures.len(),
        failures,
        generated_at: chrono::Utc::now().to_rfc3339(),
    }
}

pub async fn run_export(
    ctx: &ExportContext,
    request: ExportRequest<'_>,
) -> Result<ExportArchive, ExportError> {
    let started = Instant::now();
    let slice = request.page.slice(request.photos);

    info!(
        "Exporting collection {} ({} {} of {}, {} photos)",
        request.collection.id,
        request.mode,
        request.page.index,
        total_pages(request.photos.len(), request.page.size),
        slice.len()
    );

    let watermark = load_watermark(ctx, request.config).await?;
    let outcomes = process_slice(
        ctx,
        slice,
        watermark,
        request.config.position,
        ctx.concurrency(request.mode),
        BULK_JPEG_QUALITY,
    )
    .await;

    let report = build_report(&request, &outcomes);
    if report.succeeded == 0 {
        error!(
            "Export of collection {} failed: none of {} photos succeeded",
            request.collection.id, report.attempted
        );
        return Err(ExportError::AllPhotosFailed {
            attempted: report.attempted,
        });
    }

    let filename = archive::archive_filename(&request.collection.name, &report);
    let archive_report = report.clone();
    let bytes = tokio::task::spawn_blocking(move || {
        archive::build_archive(
            outcomes.iter().filter_map(|outcome| {
                outcome
                    .result
                    .as_ref()
                    .ok()
                    .map(|jpeg| (outcome.output_name.as_str(), jpeg.as_slice()))
            }),
            &archive_report,
        )
    })
    .await
    .map_err(|e| ExportError::Internal(format!("Archive task failed: {}", e)))??;

    let elapsed = started.elapsed();
    if elapsed > ctx.settings.request_budget {
        warn!(
            "Export of collection {} took {:?}, over the {:?} budget",
            request.collection.id, elapsed, ctx.settings.request_budget
        );
    }
    info!(
        "Export of collection {} done in {:?}: {} succeeded, {} failed, {} bytes",
        request.collection.id,
        elapsed,
        report.succeeded,
        report.failed,
        bytes.len()
    );

    Ok(ExportArchive {
        filename,
        bytes,
        report,
    })
}

/// Single-photo preview at preview quality.
pub async fn render_preview(
    ctx: &ExportContext,
    config: &WatermarkConfig,
    photo: &Photo,
) -> Result<Vec<u8>, ExportError> {
    let watermark = load_watermark(ctx, config).await?;
    let outcome = process_photo(
        ctx.clone(),
        photo.clone(),
        watermark,
        config.position,
        PREVIEW_JPEG_QUALITY,
    )
    .await;

    outcome.result.map_err(ExportError::PhotoFailed)
}
