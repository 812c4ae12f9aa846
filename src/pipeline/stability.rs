//! Stability detection: decide when an externally written file is complete.
//!
//! Scanners and network shares write PDFs incrementally, and a create event
//! arrives long before the last byte. We poll the size at a fixed interval;
//! two consecutive equal, non-zero readings mean the writer is done. This is
//! a best-effort guard: a file that never settles is ingested anyway once
//! the timeout passes.

use std::path::Path;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Outcome of [`wait_until_stable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    /// Size stopped changing at this many bytes.
    Stable(u64),
    /// The file disappeared while we were watching it.
    Vanished,
    /// The timeout passed without two matching readings; proceed anyway.
    TimedOut,
}

impl Stability {
    /// Whether ingestion should go ahead.
    pub fn should_ingest(self) -> bool {
        !matches!(self, Stability::Vanished)
    }
}

/// Poll `path` until its size is stable, it vanishes, or `timeout` elapses.
pub async fn wait_until_stable(path: &Path, interval: Duration, timeout: Duration) -> Stability {
    let start = Instant::now();
    let mut last_size: Option<u64> = None;

    while start.elapsed() < timeout {
        match tokio::fs::metadata(path).await {
            Ok(meta) => {
                let size = meta.len();
                if size > 0 && last_size == Some(size) {
                    debug!("'{}' stable at {} bytes", path.display(), size);
                    return Stability::Stable(size);
                }
                last_size = Some(size);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("'{}' vanished before it stabilised", path.display());
                return Stability::Vanished;
            }
            // Momentary lock or permission glitch on some platforms: keep polling.
            Err(e) => debug!("stat '{}' failed: {}", path.display(), e),
        }
        sleep(interval).await;
    }

    warn!(
        "Timeout waiting for '{}' to stabilise after {:?}. Proceeding anyway.",
        path.display(),
        timeout
    );
    Stability::TimedOut
}
