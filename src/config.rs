//! Configuration for the ingestion / classification / export pipeline.
//!
//! Every tunable lives in [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. One struct keeps the knobs easy to share
//! across the watcher, the worker pool and the export path, and easy to log
//! at startup.

use crate::error::PaperPilotError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Token carried by the separator sheet's QR code.
pub const DEFAULT_SEPARATOR_TOKEN: &str = "SPLIT_HERE";

/// Configuration for a PaperPilot instance.
///
/// # Example
/// ```rust
/// use paperpilot::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .input_dir("/srv/scans/in")
///     .output_dir("/srv/scans/out")
///     .work_dir("/srv/scans/work")
///     .orientation_threshold(2.0)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 300);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory watched for incoming scans. Accepted files are removed from it.
    pub input_dir: PathBuf,

    /// Directory receiving finished exports.
    pub output_dir: PathBuf,

    /// Root of the per-document working areas (`{work_dir}/{id}/…`).
    pub work_dir: PathBuf,

    /// File extensions eligible for ingestion, lowercase without the dot. Default: `["pdf"]`.
    pub allowed_extensions: Vec<String>,

    /// Rendering resolution for page rasters. Range: 72–600. Default: 300.
    ///
    /// 300 DPI keeps a printed QR code's modules several pixels wide, which
    /// the decoder needs on slightly skewed scans.
    pub dpi: u32,

    /// Cap on either rendered dimension in pixels. Default: 7000.
    ///
    /// An oversized page (A2 drawing at 300 DPI) would otherwise allocate a
    /// very large bitmap; the other dimension scales proportionally.
    pub max_rendered_pixels: u32,

    /// Directory containing the pdfium shared library. `None` tries the
    /// working directory, then the system library path.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Grayscale standard deviation below which a page is considered blank. Default: 10.0.
    pub blank_threshold: f64,

    /// Payload that marks a separator page. Default: [`DEFAULT_SEPARATOR_TOKEN`].
    pub separator_token: String,

    /// Run orientation detection on Valid pages. Default: true.
    pub orientation_enabled: bool,

    /// Minimum confidence to accept a detected rotation. Default: 0.0 (accept all).
    pub orientation_threshold: f32,

    /// Command used for orientation detection. Default: `tesseract`.
    pub tesseract_cmd: String,

    /// Poll interval of the stability detector. Default: 1 s.
    pub stability_interval: Duration,

    /// Give up waiting for a stable size after this long and ingest anyway. Default: 10 s.
    pub stability_timeout: Duration,

    /// Maximum number of classification/export jobs running at once. Default: CPU count.
    pub worker_concurrency: usize,

    /// Per-subscriber event queue policy. Default: unbounded.
    pub event_queue: EventQueuePolicy,

    /// JPEG quality for stored page images (1–100). Default: 85.
    pub jpeg_quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let data = PathBuf::from("data");
        Self {
            input_dir: data.join("input"),
            output_dir: data.join("output"),
            work_dir: data.join("temp"),
            allowed_extensions: vec!["pdf".to_string()],
            dpi: 300,
            max_rendered_pixels: 7000,
            pdfium_lib_path: None,
            blank_threshold: 10.0,
            separator_token: DEFAULT_SEPARATOR_TOKEN.to_string(),
            orientation_enabled: true,
            orientation_threshold: 0.0,
            tesseract_cmd: "tesseract".to_string(),
            stability_interval: Duration::from_secs(1),
            stability_timeout: Duration::from_secs(10),
            worker_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2),
            event_queue: EventQueuePolicy::default(),
            jpeg_quality: 85,
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Whether `path` has one of the allowed extensions (case-insensitive).
    pub fn is_eligible(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.allowed_extensions.iter().any(|a| *a == ext)
            })
            .unwrap_or(false)
    }

    /// Create the input, output and working directories if missing.
    pub fn ensure_dirs(&self) -> Result<(), PaperPilotError> {
        for dir in [&self.input_dir, &self.output_dir, &self.work_dir] {
            std::fs::create_dir_all(dir).map_err(|e| PaperPilotError::io(dir, e))?;
        }
        Ok(())
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.input_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = dir.into();
        self
    }

    pub fn allowed_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.allowed_extensions = exts
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn blank_threshold(mut self, threshold: f64) -> Self {
        self.config.blank_threshold = threshold;
        self
    }

    pub fn separator_token(mut self, token: impl Into<String>) -> Self {
        self.config.separator_token = token.into();
        self
    }

    pub fn orientation_enabled(mut self, v: bool) -> Self {
        self.config.orientation_enabled = v;
        self
    }

    pub fn orientation_threshold(mut self, threshold: f32) -> Self {
        self.config.orientation_threshold = threshold;
        self
    }

    pub fn tesseract_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.config.tesseract_cmd = cmd.into();
        self
    }

    pub fn stability_interval(mut self, interval: Duration) -> Self {
        self.config.stability_interval = interval;
        self
    }

    pub fn stability_timeout(mut self, timeout: Duration) -> Self {
        self.config.stability_timeout = timeout;
        self
    }

    pub fn worker_concurrency(mut self, n: usize) -> Self {
        self.config.worker_concurrency = n.max(1);
        self
    }

    pub fn event_queue(mut self, policy: EventQueuePolicy) -> Self {
        self.config.event_queue = policy;
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PaperPilotError> {
        let c = &self.config;
        if c.allowed_extensions.is_empty() {
            return Err(PaperPilotError::InvalidConfig(
                "At least one allowed extension is required".into(),
            ));
        }
        if c.separator_token.is_empty() {
            return Err(PaperPilotError::InvalidConfig(
                "Separator token must not be empty".into(),
            ));
        }
        if !c.blank_threshold.is_finite() || c.blank_threshold < 0.0 {
            return Err(PaperPilotError::InvalidConfig(format!(
                "Blank threshold must be ≥ 0, got {}",
                c.blank_threshold
            )));
        }
        if c.stability_interval.is_zero() {
            return Err(PaperPilotError::InvalidConfig(
                "Stability interval must be > 0".into(),
            ));
        }
        if let EventQueuePolicy::Bounded { capacity: 0, .. } = c.event_queue {
            return Err(PaperPilotError::InvalidConfig(
                "Bounded event queue needs capacity ≥ 1".into(),
            ));
        }
        let dirs = [&c.input_dir, &c.output_dir, &c.work_dir];
        for (i, a) in dirs.iter().enumerate() {
            if dirs[i + 1..].iter().any(|b| a == b) {
                return Err(PaperPilotError::InvalidConfig(format!(
                    "Input, output and working directories must differ ('{}' is used twice)",
                    a.display()
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Capacity policy of each live-event subscriber queue.
///
/// Broadcasting never waits on a subscriber, so a bounded queue has to shed
/// something when full. Pick the policy that matches the consumer:
///
/// | Policy | Behaviour when full |
/// |--------|---------------------|
/// | `Unbounded` | never full; a stalled subscriber grows without limit (default) |
/// | `Bounded { DropNewest }` | the incoming event is discarded for that subscriber |
/// | `Bounded { DropOldest }` | the oldest queued event is discarded to make room |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EventQueuePolicy {
    #[default]
    Unbounded,
    Bounded {
        capacity: usize,
        overflow: OverflowPolicy,
    },
}

/// What a full bounded subscriber queue discards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OverflowPolicy {
    #[default]
    DropNewest,
    DropOldest,
}
