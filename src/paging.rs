//! One paging primitive for both export URL conventions.
//!
//! Batch URLs number pages from 1 (`?batch=`), chunk URLs from 0 (`?chunk=`).
//! Both resolve to a zero-based `PageRequest` and the same slicing rule:
//! page `i` covers `[i * size, min((i + 1) * size, total))` of the ordered list.

use std::ops::Range;

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PagingError {
    #[error("Invalid batch number {requested}. Valid range: 1-{total}")]
    BatchOutOfRange { requested: i64, total: usize },
    #[error("Invalid chunk index {requested}. Valid range: 0-{last}")]
    ChunkOutOfRange { requested: i64, last: usize },
    #[error("Collection has no photos to export")]
    Empty,
    #[error("Page size must be between 1 and {max}, got {requested}")]
    InvalidPageSize { requested: i64, max: usize },
}

/// Which URL convention the caller used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    Batch,
    Chunk,
}

impl ExportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportMode::Batch => "batch",
            ExportMode::Chunk => "chunk",
        }
    }
}

impl std::fmt::Display for ExportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Zero-based page of a fixed size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub index: usize,
    pub size: usize,
}

pub fn total_pages(total_items: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    total_items.div_ceil(page_size)
}

impl PageRequest {
    /// Validates a caller-supplied page size against the configured maximum.
    pub fn page_size(requested: Option<i64>, max: usize) -> Result<usize, PagingError> {
        match requested {
            None => Ok(max),
            Some(size) if size >= 1 && size as u64 <= max as u64 => Ok(size as usize),
            Some(size) => Err(PagingError::InvalidPageSize {
                requested: size,
                max,
            }),
        }
    }

    /// 1-based batch number.
    pub fn from_batch(batch: i64, size: usize, total_items: usize) -> Result<Self, PagingError> {
        let total = total_pages(total_items, size);
        if total == 0 {
            return Err(PagingError::Empty);
        }
        if batch < 1 || batch as u64 > total as u64 {
            return Err(PagingError::BatchOutOfRange {
                requested: batch,
                total,
            });
        }
        Ok(Self {
            index: (batch - 1) as usize,
            size,
        })
    }

    /// 0-based chunk index. Any client-side chunk count is ignored here.
    pub fn from_chunk(chunk: i64, size: usize, total_items: usize) -> Result<Self, PagingError> {
        let total = total_pages(total_items, size);
        if total == 0 {
            return Err(PagingError::Empty);
        }
        if chunk < 0 || chunk as u64 >= total as u64 {
            return Err(PagingError::ChunkOutOfRange {
                requested: chunk,
                last: total - 1,
            });
        }
        Ok(Self {
            index: chunk as usize,
            size,
        })
    }

    /// Item range this page covers within a list of `total_items`.
    pub fn range(&self, total_items: usize) -> Range<usize> {
        let start = self.index.saturating_mul(self.size).min(total_items);
        let end = start.saturating_add(self.size).min(total_items);
        start..end
    }

    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        &items[self.range(items.len())]
    }
}

/// Paging plan reported by the size endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPlan {
    pub total_photos: usize,
    pub total_chunks: usize,
    pub chunk_size: usize,
    pub max_photos: usize,
    pub has_watermark_config: bool,
}

impl ExportPlan {
    /// `stored_photos` is capped at `max_photos` before planning.
    pub fn new(
        stored_photos: usize,
        chunk_size: usize,
        max_photos: usize,
        has_watermark_config: bool,
    ) -> Self {
        let total_photos = stored_photos.min(max_photos);
        Self {
            total_photos,
            total_chunks: total_pages(total_photos, chunk_size),
            chunk_size,
            max_photos,
            has_watermark_config,
        }
    }
}
