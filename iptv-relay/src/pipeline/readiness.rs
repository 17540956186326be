//! Readiness gate for the rolling HLS buffer.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{Error, Result};

/// When the buffer counts as deep enough to start relaying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// Segments the playlist must list.
    #[serde(default = "default_min_segments")]
    pub min_segments: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Extra wait once the threshold is met, so the newest segment is fully
    /// written before a relay opens it.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

fn default_min_segments() -> usize {
    4
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_settle_delay_ms() -> u64 {
    2_000
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            min_segments: default_min_segments(),
            timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl ReadinessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Number of media segments listed in the playlist at `path`.
///
/// A missing file or one that does not parse (yet) counts as zero.
pub async fn count_segments(path: &Path) -> usize {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            debug!(path = %path.display(), "Playlist not readable yet: {e}");
            return 0;
        }
    };

    match m3u8_rs::parse_media_playlist_res(&bytes) {
        Ok(playlist) => playlist.segments.len(),
        Err(_) => 0,
    }
}

/// Poll `path` until it lists `min_segments` segments, then wait the settle
/// delay.
///
/// Fails with [`Error::ReadinessTimeout`] when the timeout elapses first. The
/// caller owns whatever process is producing the playlist and must stop it.
pub async fn wait_until_ready(path: &Path, config: &ReadinessConfig) -> Result<usize> {
    let deadline = Instant::now() + config.timeout();

    loop {
        let segments = count_segments(path).await;
        if segments >= config.min_segments {
            info!(segments, "Buffer ready");
            tokio::time::sleep(config.settle_delay()).await;
            return Ok(segments);
        }

        if Instant::now() >= deadline {
            return Err(Error::ReadinessTimeout {
                artifact: path.to_path_buf(),
                min_segments: config.min_segments,
                timeout: config.timeout(),
            });
        }

        debug!(segments, wanted = config.min_segments, "Waiting for buffer");
        tokio::time::sleep(config.poll_interval()).await;
    }
}
