//! Separator marker: the QR code that tells the classifier "a new document
//! starts after this page", and the printable sheet that carries it.
//!
//! The sheet is drawn with vector rectangles rather than an embedded raster
//! so the printed code stays crisp at any printer resolution.

use crate::error::PaperPilotError;
use image::{GrayImage, Luma};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream};
use qrcode::{Color, QrCode};
use std::path::{Path, PathBuf};
use tracing::info;

/// File name used by [`write_separator_sheet`] inside the working root.
pub const SEPARATOR_SHEET_FILE: &str = "split_sheet.pdf";

/// A4 portrait in PDF points.
const PAGE_WIDTH: f32 = 595.28;
const PAGE_HEIGHT: f32 = 841.89;

/// Printed edge length of the code including its quiet zone, in points (≈ 14 cm).
const CODE_SIZE_PT: f32 = 400.0;

/// Blank modules around the code required by the QR standard (quiet zone).
const QUIET_ZONE: usize = 4;

/// Dark/light module grid of an encoded token, without quiet zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMatrix {
    width: usize,
    dark: Vec<bool>,
}

impl ModuleMatrix {
    /// QR-encode `token`.
    pub fn encode(token: &str) -> Result<Self, PaperPilotError> {
        let code = QrCode::new(token.as_bytes())
            .map_err(|e| PaperPilotError::Internal(format!("QR encoding failed: {e}")))?;
        Ok(Self {
            width: code.width(),
            dark: code
                .to_colors()
                .into_iter()
                .map(|c| c == Color::Dark)
                .collect(),
        })
    }

    /// Modules per side.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn is_dark(&self, x: usize, y: usize) -> bool {
        self.dark[y * self.width + x]
    }

    /// Rasterise with `module_px` pixels per module and the standard quiet zone.
    pub fn to_image(&self, module_px: u32) -> GrayImage {
        let module_px = module_px.max(1);
        let side = ((self.width + 2 * QUIET_ZONE) as u32) * module_px;
        let offset = QUIET_ZONE as u32 * module_px;
        GrayImage::from_fn(side, side, |px, py| {
            if px < offset || py < offset {
                return Luma([255]);
            }
            let mx = ((px - offset) / module_px) as usize;
            let my = ((py - offset) / module_px) as usize;
            if mx < self.width && my < self.width && self.is_dark(mx, my) {
                Luma([0])
            } else {
                Luma([255])
            }
        })
    }
}

/// Build the one-page separator sheet PDF for `token`.
pub fn separator_sheet(token: &str) -> Result<Vec<u8>, PaperPilotError> {
    let matrix = ModuleMatrix::encode(token)?;

    let mut ops = Vec::new();
    centred_text(&mut ops, "F1", 30.0, PAGE_HEIGHT - 100.0, "PaperPilot Split Sheet");
    centred_text(
        &mut ops,
        "F2",
        14.0,
        PAGE_HEIGHT - 150.0,
        "Insert this page between documents to split them automatically.",
    );
    qr_operations(&mut ops, &matrix);

    let content = Content { operations: ops };
    let encoded = content
        .encode()
        .map_err(|e| PaperPilotError::Internal(format!("Sheet content encoding failed: {e}")))?;

    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let bold_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
    });
    let regular_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => bold_id,
            "F2" => regular_id,
        },
    });
    let content_id = doc.add_object(Stream::new(Dictionary::new(), encoded));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), Object::Real(PAGE_WIDTH), Object::Real(PAGE_HEIGHT)],
        "Contents" => content_id,
        "Resources" => resources_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| PaperPilotError::Internal(format!("Sheet save failed: {e}")))?;
    Ok(buffer)
}

/// Write the separator sheet to `{work_dir}/split_sheet.pdf` and return its path.
pub async fn write_separator_sheet(
    work_dir: &Path,
    token: &str,
) -> Result<PathBuf, PaperPilotError> {
    let bytes = separator_sheet(token)?;
    let path = work_dir.join(SEPARATOR_SHEET_FILE);
    let tmp_path = path.with_extension("pdf.tmp");
    tokio::fs::write(&tmp_path, &bytes)
        .await
        .map_err(|e| PaperPilotError::io(&tmp_path, e))?;
    tokio::fs::rename(&tmp_path, &path)
        .await
        .map_err(|e| PaperPilotError::io(&path, e))?;
    info!("Separator sheet written to '{}'", path.display());
    Ok(path)
}

/// Approximate centring with Helvetica's average glyph width (~0.5 em).
fn centred_text(ops: &mut Vec<Operation>, font: &str, size: f32, y: f32, text: &str) {
    let width = text.chars().count() as f32 * size * 0.5;
    let x = ((PAGE_WIDTH - width) / 2.0).max(20.0);
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new(
        "Tf",
        vec![Object::Name(font.as_bytes().to_vec()), Object::Real(size)],
    ));
    ops.push(Operation::new("Td", vec![Object::Real(x), Object::Real(y)]));
    ops.push(Operation::new("Tj", vec![Object::string_literal(text)]));
    ops.push(Operation::new("ET", vec![]));
}

/// Draw the code centred on the page, one filled rectangle per dark module.
fn qr_operations(ops: &mut Vec<Operation>, matrix: &ModuleMatrix) {
    let total = (matrix.width() + 2 * QUIET_ZONE) as f32;
    let module = CODE_SIZE_PT / total;
    let left = (PAGE_WIDTH - CODE_SIZE_PT) / 2.0 + QUIET_ZONE as f32 * module;
    let top = (PAGE_HEIGHT + CODE_SIZE_PT) / 2.0 - QUIET_ZONE as f32 * module;

    ops.push(Operation::new("q", vec![]));
    ops.push(Operation::new("g", vec![0.into()]));
    for y in 0..matrix.width() {
        for x in 0..matrix.width() {
            if !matrix.is_dark(x, y) {
                continue;
            }
            // PDF y grows upwards; module rows grow downwards.
            let px = left + x as f32 * module;
            let py = top - (y + 1) as f32 * module;
            ops.push(Operation::new(
                "re",
                vec![
                    Object::Real(px),
                    Object::Real(py),
                    Object::Real(module),
                    Object::Real(module),
                ],
            ));
        }
    }
    ops.push(Operation::new("f", vec![]));
    ops.push(Operation::new("Q", vec![]));
}
