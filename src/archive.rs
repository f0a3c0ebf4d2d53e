//! Archive Assembler
//!
//! Packs watermarked photos plus one report member into a ZIP. Members are
//! written in the order given; callers pass photos in sequence order.

use std::fmt::Write as _;
use std::io::{Cursor, Write};

use serde::Serialize;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::paging::ExportMode;

/// Inputs are already JPEG-compressed, so the fastest deflate level is enough.
const COMPRESSION_LEVEL: i64 = 1;

pub const BATCH_REPORT_NAME: &str = "processing_report.txt";
pub const CHUNK_REPORT_NAME: &str = "chunk_metadata.json";

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize report: {0}")]
    Report(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoFailure {
    pub photo_id: String,
    pub sequence: i64,
    pub output_name: String,
    pub error: String,
}

/// Processing report for one export request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportReport {
    pub collection_name: String,
    pub mode: ExportMode,
    /// Zero-based page index
    pub page_index: usize,
    pub total_pages: usize,
    /// Chunk count as sent by the client, echoed only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_total_chunks: Option<i64>,
    pub page_size: usize,
    pub total_photos: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<PhotoFailure>,
    pub generated_at: String,
}

impl ExportReport {
    pub fn member_name(&self) -> &'static str {
        match self.mode {
            ExportMode::Batch => BATCH_REPORT_NAME,
            ExportMode::Chunk => CHUNK_REPORT_NAME,
        }
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Collection: {}", self.collection_name);
        let _ = writeln!(
            out,
            "Batch: {} of {} ({} photos per batch)",
            self.page_index + 1,
            self.total_pages,
            self.page_size
        );
        let _ = writeln!(out, "Total photos in collection: {}", self.total_photos);
        let _ = writeln!(out, "Generated at: {}", self.generated_at);
        let _ = writeln!(out);
        let _ = writeln!(out, "Photos attempted: {}", self.attempted);
        let _ = writeln!(out, "Succeeded: {}", self.succeeded);
        let _ = writeln!(out, "Failed: {}", self.failed);

        if !self.failures.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Failures:");
            for failure in &self.failures {
                let _ = writeln!(
                    out,
                    "- {} (photo {}): {}",
                    failure.output_name, failure.photo_id, failure.error
                );
            }
        }
        out
    }

    pub fn render(&self) -> Result<Vec<u8>, ArchiveError> {
        match self.mode {
            ExportMode::Batch => Ok(self.to_text().into_bytes()),
            ExportMode::Chunk => Ok(serde_json::to_vec_pretty(self)?),
        }
    }
}

/// Writes `photos` followed by the rendered report into an in-memory ZIP.
pub fn build_archive<'a, I>(photos: I, report: &ExportReport) -> Result<Vec<u8>, ArchiveError>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL));

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in photos {
        zip.start_file(name, options)?;
        zip.write_all(bytes)?;
    }

    zip.start_file(report.member_name(), options)?;
    zip.write_all(&report.render()?)?;

    Ok(zip.finish()?.into_inner())
}

/// Replaces everything except ASCII letters and digits with `_`.
pub fn sanitize_file_stem(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "collection".to_string()
    } else {
        cleaned
    }
}

/// Download name such as `Summer_Wedding_batch_2_of_5.zip`. Pages are
/// numbered from 1 in file names regardless of the URL convention.
pub fn archive_filename(collection_name: &str, report: &ExportReport) -> String {
    format!(
        "{}_{}_{}_of_{}.zip",
        sanitize_file_stem(collection_name),
        report.mode,
        report.page_index + 1,
        report.total_pages
    )
}

pub fn content_disposition(filename: &str) -> String {
    format!("attachment; filename=\"{}\"", filename)
}
