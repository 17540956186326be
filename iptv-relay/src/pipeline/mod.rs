//! The two-stage ffmpeg pipeline.
//!
//! A buffering stage pulls the upstream source, transcodes it once and keeps a
//! rolling HLS buffer on disk. Once the buffer is deep enough, two relay stages
//! read it in a real-time loop and push video and audio as RTP, copying the
//! elementary streams without re-encoding.

mod args;
mod launcher;
mod output;
mod readiness;
mod supervisor;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use args::{EncodingProfile, RtpTarget, RtpTargets, buffering_args, relay_args};
pub use launcher::{PLAYLIST_FILE, PipelineLauncher, prepare_work_dir};
pub use output::{OutputRecordReader, OutputSink, OutputStream, TracingSink};
pub use readiness::{ReadinessConfig, count_segments, wait_until_ready};
pub use supervisor::ProcessHandle;

/// One of the three supervised processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Buffering,
    VideoRelay,
    AudioRelay,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buffering => "buffering",
            Self::VideoRelay => "video relay",
            Self::AudioRelay => "audio relay",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Path to the ffmpeg binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Root under which each channel gets its buffer directory.
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,
    #[serde(default)]
    pub encoding: EncodingProfile,
    #[serde(default)]
    pub readiness: ReadinessConfig,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_work_root() -> PathBuf {
    std::env::temp_dir().join("iptv-relay")
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            work_root: default_work_root(),
            encoding: EncodingProfile::default(),
            readiness: ReadinessConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Buffer directory for one channel.
    pub fn work_dir(&self, channel: impl fmt::Display) -> PathBuf {
        self.work_root.join(channel.to_string())
    }
}

/// The three processes of a running pipeline.
#[derive(Debug)]
pub struct PipelineHandles {
    pub buffering: ProcessHandle,
    pub video_relay: ProcessHandle,
    pub audio_relay: ProcessHandle,
}

impl PipelineHandles {
    /// Request termination of every process. Never waits.
    pub fn kill_all(&mut self) {
        self.video_relay.kill();
        self.audio_relay.kill();
        self.buffering.kill();
    }

    /// First stage whose process is no longer running.
    pub fn exited_stage(&mut self) -> Option<Stage> {
        [
            &mut self.buffering,
            &mut self.video_relay,
            &mut self.audio_relay,
        ]
        .into_iter()
        .find_map(|handle| handle.has_exited().then(|| handle.stage()))
    }
}
