//! PDF rasterisation: render every page of a batch to a `DynamicImage`.
//!
//! ## Why a visitor?
//!
//! A 300-DPI A4 page is ~35 MB of RGBA pixels. Collecting a hundred-page
//! batch into a `Vec` would need gigabytes, so [`PageRasterizer::render_each`]
//! hands each page to a callback and drops it before rendering the next.
//!
//! ## Why bind per call?
//!
//! The pdfium C++ library keeps thread-local state and is not async-safe.
//! Rendering always runs on a worker thread (see [`crate::worker`]); binding
//! pdfium inside that call keeps every pdfium handle on the thread that
//! created it.

use crate::config::PipelineConfig;
use crate::error::PaperPilotError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Callback receiving `(page_index_0based, image)` for each rendered page.
pub type PageVisitor<'a> = dyn FnMut(usize, DynamicImage) -> Result<(), PaperPilotError> + 'a;

/// Turns a PDF into page images.
pub trait PageRasterizer: Send + Sync {
    /// Render every page in order, passing each to `visit`.
    ///
    /// Returns the page count. Any error (unreadable PDF, page render
    /// failure, or an error from `visit`) aborts the whole document.
    fn render_each(&self, pdf_path: &Path, visit: &mut PageVisitor<'_>)
        -> Result<usize, PaperPilotError>;
}

/// [`PageRasterizer`] backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    dpi: u32,
    max_pixels: u32,
    lib_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_pixels: config.max_rendered_pixels,
            lib_path: config.pdfium_lib_path.clone(),
        }
    }

    /// Bind once to verify the library is loadable; call at startup so a
    /// missing libpdfium is reported before the first scan arrives.
    pub fn check(&self) -> Result<(), PaperPilotError> {
        bind_pdfium(self.lib_path.as_deref()).map(|_| ())
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn render_each(
        &self,
        pdf_path: &Path,
        visit: &mut PageVisitor<'_>,
    ) -> Result<usize, PaperPilotError> {
        let pdfium = bind_pdfium(self.lib_path.as_deref())?;

        let document =
            pdfium
                .load_pdf_from_file(pdf_path, None)
                .map_err(|e| PaperPilotError::CorruptPdf {
                    path: pdf_path.to_path_buf(),
                    detail: format!("{:?}", e),
                })?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        info!("PDF loaded: {} pages", total_pages);

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(self.dpi as f32 / 72.0)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        for idx in 0..total_pages {
            let page = pages
                .get(idx as u16)
                .map_err(|e| PaperPilotError::RasterisationFailed {
                    page: idx,
                    detail: format!("{:?}", e),
                })?;

            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                PaperPilotError::RasterisationFailed {
                    page: idx,
                    detail: format!("{:?}", e),
                }
            })?;

            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx,
                image.width(),
                image.height()
            );

            visit(idx, image)?;
        }

        Ok(total_pages)
    }
}

/// Bind to libpdfium: the configured directory, else the working directory,
/// else the system library path.
fn bind_pdfium(lib_dir: Option<&Path>) -> Result<Pdfium, PaperPilotError> {
    let bindings = match lib_dir {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| PaperPilotError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}
