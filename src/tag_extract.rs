//! Audio tag extraction.
//!
//! [`TagExtractor`] is the seam between the catalog and the tag library.
//! [`LoftyExtractor`] reads real files through `lofty`. Unit tests use a
//! scripted extractor so pipeline tests do not need encoded audio.

use std::path::Path;

use lofty::prelude::*;
use lofty::probe::Probe;

use crate::error::CatalogError;
use crate::models::TagData;

/// Reads artist/album/title/year from one file.
///
/// Returns `Ok(None)` when the file carries no usable tags, and
/// [`CatalogError::Extraction`] when the file cannot be read or parsed.
pub trait TagExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Option<TagData>, CatalogError>;
}

/// Tag extractor backed by `lofty`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyExtractor;

impl LoftyExtractor {
    pub fn new() -> Self {
        Self
    }
}

fn extraction_error(path: &Path, err: impl std::fmt::Display) -> CatalogError {
    CatalogError::Extraction {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

impl TagExtractor for LoftyExtractor {
    fn extract(&self, path: &Path) -> Result<Option<TagData>, CatalogError> {
        // .m4r is not always mapped by extension, so sniff the content too.
        let tagged_file = Probe::open(path)
            .map_err(|e| extraction_error(path, e))?
            .guess_file_type()
            .map_err(|e| extraction_error(path, e))?
            .read()
            .map_err(|e| extraction_error(path, e))?;

        let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
            tracing::debug!(file = %path.display(), "no tag block present");
            return Ok(None);
        };

        let data = TagData {
            artist: tag.artist().map(|s| s.to_string()),
            album: tag.album().map(|s| s.to_string()),
            title: tag.title().map(|s| s.to_string()),
            year: tag.year(),
        };

        tracing::debug!(
            file = %path.display(),
            artist = ?data.artist,
            title = ?data.title,
            year = ?data.year,
            "extracted tags"
        );

        if data.is_empty() {
            Ok(None)
        } else {
            Ok(Some(data))
        }
    }
}

#[cfg(test)]
pub(crate) use fixed::FixedTagExtractor;
