//! Document and page data model.
//!
//! These types are exactly what gets written to each document's
//! `state.json` snapshot and what the live event stream carries, so every
//! field is serialisable and the JSON shape is part of the public contract.

use crate::error::PaperPilotError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Lifecycle status of a document.
///
/// The only legal transitions are `Processing → Ready` and
/// `Processing → Error`; both end states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Processing,
    Ready,
    Error,
}

impl DocumentStatus {
    /// Whether moving from `self` to `next` is allowed. Staying put is always allowed.
    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        self == next || self == DocumentStatus::Processing
    }
}

/// Classification of a single page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    /// Content page, kept in the export.
    Valid,
    /// Blank (or user-discarded) page, dropped from the export.
    Delete,
    /// Separator sheet: closes the current output document.
    Split,
}

/// Clockwise page rotation in right-angle steps.
///
/// Serialised as the plain integer number of degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Rotation {
    #[default]
    R0,
    R90,
    R180,
    R270,
}

impl Rotation {
    pub fn degrees(self) -> i64 {
        match self {
            Rotation::R0 => 0,
            Rotation::R90 => 90,
            Rotation::R180 => 180,
            Rotation::R270 => 270,
        }
    }
}

impl TryFrom<i64> for Rotation {
    type Error = PaperPilotError;

    fn try_from(degrees: i64) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Rotation::R0),
            90 => Ok(Rotation::R90),
            180 => Ok(Rotation::R180),
            270 => Ok(Rotation::R270),
            other => Err(PaperPilotError::InvalidRotation(other)),
        }
    }
}

impl From<Rotation> for i64 {
    fn from(r: Rotation) -> Self {
        r.degrees()
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// One page of an ingested batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// 0-indexed position in the source PDF; equals the index in `Document::pages`.
    pub page_number: usize,
    /// Rendered raster image, relative to the working root (`{id}/images/page_{n}.jpg`).
    pub image_path: String,
    pub status: PageStatus,
    #[serde(default)]
    pub rotation: Rotation,
    /// Pixel width of the rendered image.
    pub original_width: u32,
    /// Pixel height of the rendered image.
    pub original_height: u32,
}

/// A scanned batch moving through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    /// File name as it arrived in the input directory.
    pub original_filename: String,
    /// User-chosen base name for exported files. `None` falls back to the
    /// stem of `original_filename`.
    #[serde(default)]
    pub display_name: Option<String>,
    pub status: DocumentStatus,
    #[serde(default)]
    pub pages: Vec<Page>,
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// A freshly accepted document: no pages yet, status `Processing`.
    pub fn new(id: impl Into<String>, original_filename: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            original_filename: original_filename.into(),
            display_name: None,
            status: DocumentStatus::Processing,
            pages: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Base name used for exported files.
    pub fn export_base_name(&self) -> String {
        let base = match self.display_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => strip_pdf_suffix(name).to_string(),
            _ => Path::new(&self.original_filename)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.id.clone()),
        };
        sanitize_file_name(&base)
    }

    /// Get a page by number, or a `PageNotFound` error.
    pub fn page_mut(&mut self, page_number: usize) -> Result<&mut Page, PaperPilotError> {
        let total = self.pages.len();
        let id = self.id.clone();
        self.pages
            .get_mut(page_number)
            .ok_or(PaperPilotError::PageNotFound {
                id,
                page: page_number,
                total,
            })
    }

    /// `pages[i].page_number == i` for every page.
    pub fn pages_are_ordered(&self) -> bool {
        self.pages
            .iter()
            .enumerate()
            .all(|(i, p)| p.page_number == i)
    }

    pub fn count_pages(&self, status: PageStatus) -> usize {
        self.pages.iter().filter(|p| p.status == status).count()
    }
}

fn strip_pdf_suffix(name: &str) -> &str {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".pdf") && name.len() > 4 {
        &name[..name.len() - 4]
    } else {
        name
    }
}

/// Replace characters that would escape or break a single path component.
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').trim();
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned.to_string()
    }
}
