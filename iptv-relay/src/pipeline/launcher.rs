//! Starts the three pipeline processes in order.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::args::{RtpTargets, buffering_args, relay_args};
use super::output::OutputSink;
use super::readiness::wait_until_ready;
use super::supervisor::ProcessHandle;
use super::{PipelineConfig, PipelineHandles, Stage};
use crate::media::MediaKind;
use crate::{Error, Result};

/// File name of the rolling HLS playlist inside a work directory.
pub const PLAYLIST_FILE: &str = "stream.m3u8";

/// Make `dir` exist and be empty.
///
/// Leftovers of an earlier session would satisfy the readiness gate before the
/// new buffering process has written anything.
pub async fn prepare_work_dir(dir: &Path) -> Result<()> {
    match tokio::fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => {
            let mut entries = tokio::fs::read_dir(dir)
                .await
                .map_err(|e| Error::io_path("reading directory", dir, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::io_path("reading directory", dir, e))?
            {
                let path = entry.path();
                let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
                let removed = if is_dir {
                    tokio::fs::remove_dir_all(&path).await
                } else {
                    tokio::fs::remove_file(&path).await
                };
                match removed {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(Error::io_path("removing", &path, e)),
                }
            }
            debug!(dir = %dir.display(), "Cleared work directory");
            Ok(())
        }
        Ok(_) => Err(Error::io_path(
            "preparing work directory",
            dir,
            std::io::Error::new(std::io::ErrorKind::AlreadyExists, "not a directory"),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::io_path("creating directory", dir, e)),
        Err(e) => Err(Error::io_path("inspecting", dir, e)),
    }
}

/// Launches buffering, waits for the buffer, then launches both relays.
pub struct PipelineLauncher {
    config: PipelineConfig,
    sink: Arc<dyn OutputSink>,
}

impl PipelineLauncher {
    pub fn new(config: PipelineConfig, sink: Arc<dyn OutputSink>) -> Self {
        Self { config, sink }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline for `source_url`, buffering into `work_dir` and sending
    /// RTP to `targets`.
    ///
    /// On any failure every process started so far is killed. Dropping the
    /// returned future has the same effect, so callers may race it against
    /// cancellation.
    pub async fn launch(
        &self,
        source_url: &str,
        work_dir: &Path,
        targets: &RtpTargets,
    ) -> Result<PipelineHandles> {
        prepare_work_dir(work_dir).await?;

        let ffmpeg = &self.config.ffmpeg_path;
        let encoding = &self.config.encoding;
        let playlist = work_dir.join(PLAYLIST_FILE);

        let mut buffering = ProcessHandle::spawn(
            Stage::Buffering,
            ffmpeg,
            buffering_args(source_url, encoding, work_dir),
            Arc::clone(&self.sink),
        )?;

        match wait_until_ready(&playlist, &self.config.readiness).await {
            Ok(segments) => debug!(segments, "Starting relays"),
            Err(e) => {
                warn!(dir = %work_dir.display(), "Buffer never became ready: {e}");
                buffering.kill();
                return Err(e);
            }
        }

        // A buffering process that died during the settle delay leaves a
        // playlist that will never grow.
        if buffering.has_exited() {
            return Err(Error::StageExited {
                stage: Stage::Buffering,
            });
        }

        let packet_size = encoding.rtp_packet_size;
        let video_relay = ProcessHandle::spawn(
            Stage::VideoRelay,
            ffmpeg,
            relay_args(
                MediaKind::Video,
                &playlist,
                &targets.host,
                &targets.video,
                packet_size,
            ),
            Arc::clone(&self.sink),
        )?;
        let audio_relay = ProcessHandle::spawn(
            Stage::AudioRelay,
            ffmpeg,
            relay_args(
                MediaKind::Audio,
                &playlist,
                &targets.host,
                &targets.audio,
                packet_size,
            ),
            Arc::clone(&self.sink),
        )?;

        let handles = PipelineHandles {
            buffering,
            video_relay,
            audio_relay,
        };
        info!(
            buffering = ?handles.buffering.pid(),
            video = ?handles.video_relay.pid(),
            audio = ?handles.audio_relay.pid(),
            "Pipeline running"
        );
        Ok(handles)
    }
}
