//! Orientation detection via tesseract's orientation-and-script pass.
//!
//! `tesseract <image> stdout --psm 0` prints a short report:
//!
//! ```text
//! Page number: 0
//! Orientation in degrees: 270
//! Rotate: 90
//! Orientation confidence: 4.21
//! Script: Latin
//! Script confidence: 2.33
//! ```
//!
//! `Rotate` is the clockwise correction that makes the text upright and is
//! what we store; `Orientation confidence` decides whether we trust it.
//! Every failure here is a [`PageError`]: the caller logs it and keeps the
//! page upright (rotation 0).

use crate::error::PageError;
use crate::model::Rotation;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::process::Command;

static RE_ROTATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^Rotate:\s*(-?\d+)").unwrap());
static RE_CONFIDENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Orientation confidence:\s*(-?[0-9]*\.?[0-9]+)").unwrap());

/// Candidate rotation and how sure the detector is about it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationEstimate {
    pub rotation: Rotation,
    pub confidence: f32,
}

/// Estimates page orientation from a rendered page image on disk.
///
/// Implementations are called from worker threads, one page at a time.
pub trait OrientationDetector: Send + Sync {
    fn detect(&self, page: usize, image_path: &Path) -> Result<OrientationEstimate, PageError>;
}

/// Accept the estimate only when `confidence ≥ threshold`; otherwise upright.
pub fn resolve_rotation(estimate: OrientationEstimate, threshold: f32) -> Rotation {
    if estimate.confidence >= threshold {
        estimate.rotation
    } else {
        Rotation::R0
    }
}

/// Runs the `tesseract` command-line tool.
#[derive(Debug, Clone)]
pub struct TesseractOrientation {
    command: String,
}

impl TesseractOrientation {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl OrientationDetector for TesseractOrientation {
    fn detect(&self, page: usize, image_path: &Path) -> Result<OrientationEstimate, PageError> {
        let fail = |detail: String| PageError::OrientationFailed { page, detail };

        let output = Command::new(&self.command)
            .arg(image_path)
            .arg("stdout")
            .args(["--psm", "0"])
            .output()
            .map_err(|e| fail(format!("could not run '{}': {}", self.command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(fail(format!(
                "'{}' exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_osd(&stdout).map_err(fail)
    }
}

/// Parse tesseract's OSD report.
pub fn parse_osd(report: &str) -> Result<OrientationEstimate, String> {
    let degrees: i64 = RE_ROTATE
        .captures(report)
        .and_then(|c| c[1].parse().ok())
        .ok_or_else(|| "no 'Rotate:' line in OSD output".to_string())?;
    let confidence: f32 = RE_CONFIDENCE
        .captures(report)
        .and_then(|c| c[1].parse().ok())
        .ok_or_else(|| "no 'Orientation confidence:' line in OSD output".to_string())?;
    let rotation = Rotation::try_from(degrees).map_err(|e| e.to_string())?;
    Ok(OrientationEstimate {
        rotation,
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "Page number: 0\n\
Orientation in degrees: 270\n\
Rotate: 90\n\
Orientation confidence: 4.21\n\
Script: Latin\n\
Script confidence: 2.33\n";

    #[test]
    fn parses_tesseract_report() {
        let est = parse_osd(REPORT).unwrap();
        assert_eq!(est.rotation, Rotation::R90);
        assert!((est.confidence - 4.21).abs() < 1e-6);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_osd("Too few characters. Skipping this page").is_err());
        assert!(parse_osd("Rotate: 90\n").is_err());
        assert!(parse_osd("Rotate: 45\nOrientation confidence: 9.0\n").is_err());
    }

    #[test]
    fn threshold_gates_rotation() {
        let est = OrientationEstimate {
            rotation: Rotation::R180,
            confidence: 1.5,
        };
        assert_eq!(resolve_rotation(est, 0.0), Rotation::R180);
        assert_eq!(resolve_rotation(est, 1.5), Rotation::R180);
        assert_eq!(resolve_rotation(est, 1.6), Rotation::R0);
    }

    #[test]
    fn missing_binary_is_a_page_error() {
        let det = TesseractOrientation::new("definitely-not-a-real-tesseract-binary");
        let err = det.detect(3, Path::new("/nonexistent.jpg")).unwrap_err();
        assert!(matches!(err, PageError::OrientationFailed { page: 3, .. }));
    }
}
