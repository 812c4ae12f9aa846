//! Page classification: separator, blank, or content.
//!
//! Checks run in a fixed order per page:
//!
//! 1. **Separator** — any QR code on the page whose payload equals the
//!    separator token makes it `Split`, whatever else is on the page.
//! 2. **Blank** — grayscale standard deviation below the threshold makes
//!    it `Delete`. Scanned content has texture even on sparse pages; an
//!    evenly exposed sheet does not.
//! 3. **Orientation** — only for `Valid` pages, and only trusted when the
//!    detector's confidence reaches the configured threshold.
//!
//! Sub-step failures (decode error, orientation tool failure) degrade to
//! "not a separator" and "upright"; they never fail the document.

use crate::config::PipelineConfig;
use crate::error::{PageError, PaperPilotError};
use crate::model::{Page, PageStatus, Rotation};
use crate::pipeline::orientation::{resolve_rotation, OrientationDetector};
use crate::pipeline::render::PageRasterizer;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Subdirectory of a working area holding rendered page images.
pub const IMAGES_DIR: &str = "images";

/// Verdict for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub status: PageStatus,
    pub rotation: Rotation,
}

/// Classifies rendered pages.
#[derive(Clone)]
pub struct PageClassifier {
    separator_token: String,
    blank_threshold: f64,
    orientation: Option<Arc<dyn OrientationDetector>>,
    orientation_threshold: f32,
}

impl PageClassifier {
    pub fn new(config: &PipelineConfig, orientation: Option<Arc<dyn OrientationDetector>>) -> Self {
        Self {
            separator_token: config.separator_token.clone(),
            blank_threshold: config.blank_threshold,
            orientation,
            orientation_threshold: config.orientation_threshold,
        }
    }

    /// Classify one rendered page. `image_path` is where the raster was
    /// stored; the orientation detector reads it from there.
    pub fn classify(&self, page: usize, image: &DynamicImage, image_path: &Path) -> Classification {
        let luma = image.to_luma8();

        match contains_token(page, &luma, &self.separator_token) {
            Ok(true) => {
                debug!(page, "Separator code found");
                return Classification {
                    status: PageStatus::Split,
                    rotation: Rotation::R0,
                };
            }
            Ok(false) => {}
            Err(e) => debug!("{} (treating as content)", e),
        }

        let std_dev = intensity_std_dev(&luma);
        if std_dev < self.blank_threshold {
            debug!(page, std_dev, "Blank page");
            return Classification {
                status: PageStatus::Delete,
                rotation: Rotation::R0,
            };
        }

        let rotation = match &self.orientation {
            Some(detector) => match detector.detect(page, image_path) {
                Ok(estimate) => resolve_rotation(estimate, self.orientation_threshold),
                Err(e) => {
                    debug!("{} (keeping page upright)", e);
                    Rotation::R0
                }
            },
            None => Rotation::R0,
        };

        Classification {
            status: PageStatus::Valid,
            rotation,
        }
    }
}

/// Whether any decodable QR code on the page carries exactly `token`.
///
/// `Err` only when nothing matched and at least one grid failed to decode.
pub fn contains_token(page: usize, luma: &GrayImage, token: &str) -> Result<bool, PageError> {
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
        luma.width() as usize,
        luma.height() as usize,
        |x, y| luma.get_pixel(x as u32, y as u32).0[0],
    );

    let mut first_error = None;
    for grid in prepared.detect_grids() {
        match grid.decode() {
            Ok((_, payload)) if payload == token => return Ok(true),
            Ok(_) => {}
            Err(e) => {
                first_error.get_or_insert_with(|| e.to_string());
            }
        }
    }

    match first_error {
        Some(detail) => Err(PageError::DecodeFailed { page, detail }),
        None => Ok(false),
    }
}

/// Population standard deviation of 8-bit luma values.
pub fn intensity_std_dev(luma: &GrayImage) -> f64 {
    let n = (luma.width() as u64 * luma.height() as u64) as f64;
    if n == 0.0 {
        return 0.0;
    }
    let (sum, sum_sq) = luma.pixels().fold((0.0f64, 0.0f64), |(s, sq), p| {
        let v = p.0[0] as f64;
        (s + v, sq + v * v)
    });
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0).sqrt()
}

/// Render, store and classify every page of `pdf_path`.
///
/// Page images land in `{doc_dir}/images/page_{n}.jpg`; the returned pages
/// reference them as `{doc_id}/images/page_{n}.jpg`. Blocking: run it on
/// the worker pool.
pub fn classify_document(
    doc_id: &str,
    pdf_path: &Path,
    doc_dir: &Path,
    rasterizer: &dyn PageRasterizer,
    classifier: &PageClassifier,
    jpeg_quality: u8,
) -> Result<Vec<Page>, PaperPilotError> {
    let images_dir = doc_dir.join(IMAGES_DIR);
    std::fs::create_dir_all(&images_dir).map_err(|e| PaperPilotError::io(&images_dir, e))?;

    let mut pages = Vec::new();
    rasterizer.render_each(pdf_path, &mut |idx, image| {
        let file_name = format!("page_{idx}.jpg");
        let abs_path = images_dir.join(&file_name);
        save_jpeg(&image, &abs_path, jpeg_quality)?;

        let verdict = classifier.classify(idx, &image, &abs_path);
        pages.push(Page {
            page_number: idx,
            image_path: format!("{doc_id}/{IMAGES_DIR}/{file_name}"),
            status: verdict.status,
            rotation: verdict.rotation,
            original_width: image.width(),
            original_height: image.height(),
        });
        Ok(())
    })?;

    info!(
        doc_id,
        pages = pages.len(),
        valid = pages.iter().filter(|p| p.status == PageStatus::Valid).count(),
        blank = pages.iter().filter(|p| p.status == PageStatus::Delete).count(),
        separators = pages.iter().filter(|p| p.status == PageStatus::Split).count(),
        "Classification complete"
    );
    Ok(pages)
}

fn save_jpeg(image: &DynamicImage, path: &Path, quality: u8) -> Result<(), PaperPilotError> {
    let file = File::create(path).map_err(|e| PaperPilotError::io(path, e))?;
    let encoder = JpegEncoder::new_with_quality(BufWriter::new(file), quality);
    image
        .to_rgb8()
        .write_with_encoder(encoder)
        .map_err(|e| PaperPilotError::Internal(format!("JPEG encode '{}': {}", path.display(), e)))
}
