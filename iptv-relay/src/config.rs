//! Relay configuration.
//!
//! Every field has a default, so a partial JSON file or no file at all yields a
//! working configuration. Two environment variables override the pipeline
//! location settings: `FFMPEG_PATH` and `IPTV_WORK_DIR`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::media::StreamDisplay;
use crate::pipeline::PipelineConfig;
use crate::{Error, Result};

/// Avatar shown for streams that have no logo of their own.
pub const DEFAULT_AVATAR_URL: &str = "https://i.imgur.com/ozINkq3.jpeg";

/// Title used when a direct start gives no stream name.
pub const DEFAULT_STREAM_TITLE: &str = "IPTV";

pub const FFMPEG_PATH_ENV: &str = "FFMPEG_PATH";
pub const WORK_DIR_ENV: &str = "IPTV_WORK_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub stream: StreamDefaults,
    #[serde(default)]
    pub rtp: RtpConfig,
    /// How often an active session checks that its processes are alive.
    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,
}

fn default_watchdog_interval_ms() -> u64 {
    5_000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            stream: StreamDefaults::default(),
            rtp: RtpConfig::default(),
            watchdog_interval_ms: default_watchdog_interval_ms(),
        }
    }
}

impl RelayConfig {
    /// Defaults plus environment overrides. Loads `.env` if present.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load a JSON file, then apply environment overrides.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::io_path("reading config", path, e))?;
        let mut config: Self = serde_json::from_str(&raw)?;
        config.apply_env();
        config.validate()?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(ffmpeg) = std::env::var(FFMPEG_PATH_ENV)
            && !ffmpeg.trim().is_empty()
        {
            self.pipeline.ffmpeg_path = ffmpeg;
        }
        if let Ok(dir) = std::env::var(WORK_DIR_ENV)
            && !dir.trim().is_empty()
        {
            self.pipeline.work_root = PathBuf::from(dir);
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.ffmpeg_path.trim().is_empty() {
            return Err(Error::config("pipeline.ffmpeg_path must not be empty"));
        }
        if self.pipeline.readiness.min_segments == 0 {
            return Err(Error::config("pipeline.readiness.min_segments must be at least 1"));
        }
        if self.pipeline.readiness.poll_interval_ms == 0 {
            return Err(Error::config("pipeline.readiness.poll_interval_ms must be positive"));
        }
        if self.watchdog_interval_ms == 0 {
            return Err(Error::config("watchdog_interval_ms must be positive"));
        }
        if self.rtp.video_payload_type == self.rtp.audio_payload_type {
            return Err(Error::config("video and audio payload types must differ"));
        }
        if self.rtp.video_ssrc == self.rtp.audio_ssrc {
            return Err(Error::config("video and audio SSRCs must differ"));
        }
        Ok(())
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    /// Display for a direct start, falling back to the default title.
    pub fn display_for(&self, stream_name: Option<&str>) -> StreamDisplay {
        let title = stream_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.stream.title);
        StreamDisplay {
            title: title.to_string(),
            avatar_url: self.stream.avatar_url.clone(),
        }
    }

    /// Display for a playlist entry, falling back to the default avatar.
    pub fn display_for_entry(&self, entry: &iptv_playlist::PlaylistEntry) -> StreamDisplay {
        StreamDisplay {
            title: entry.name.clone(),
            avatar_url: entry
                .logo
                .clone()
                .filter(|logo| !logo.trim().is_empty())
                .unwrap_or_else(|| self.stream.avatar_url.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDefaults {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_avatar_url")]
    pub avatar_url: String,
}

fn default_title() -> String {
    DEFAULT_STREAM_TITLE.to_string()
}

fn default_avatar_url() -> String {
    DEFAULT_AVATAR_URL.to_string()
}

impl Default for StreamDefaults {
    fn default() -> Self {
        Self {
            title: default_title(),
            avatar_url: default_avatar_url(),
        }
    }
}

/// RTP identifiers of the two relayed streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtpConfig {
    #[serde(default = "default_video_payload_type")]
    pub video_payload_type: u8,
    #[serde(default = "default_audio_payload_type")]
    pub audio_payload_type: u8,
    #[serde(default = "default_video_ssrc")]
    pub video_ssrc: u32,
    #[serde(default = "default_audio_ssrc")]
    pub audio_ssrc: u32,
}

fn default_video_payload_type() -> u8 {
    102
}

fn default_audio_payload_type() -> u8 {
    111
}

fn default_video_ssrc() -> u32 {
    11_111_111
}

fn default_audio_ssrc() -> u32 {
    22_222_222
}

impl Default for RtpConfig {
    fn default() -> Self {
        Self {
            video_payload_type: default_video_payload_type(),
            audio_payload_type: default_audio_payload_type(),
            video_ssrc: default_video_ssrc(),
            audio_ssrc: default_audio_ssrc(),
        }
    }
}
