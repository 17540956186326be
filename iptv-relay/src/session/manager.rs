//! Session lifecycle: start, stop, forced cleanup and process watchdog.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::registry::{SessionRegistry, WeakRegistry};
use super::state::{Phase, Resource, Session};
use crate::config::RelayConfig;
use crate::media::{
    ChannelId, CloseHook, MediaBackend, PlainTransportOptions, ProducerOptions, StreamDisplay,
    StreamRequest,
};
use crate::pipeline::{PipelineLauncher, RtpTarget, RtpTargets};
use crate::{Error, Result};

/// Key under which the room stream is published.
const STREAM_KEY: &str = "stream";

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NothingToStop,
}

/// Owns every channel's session and drives them through their lifecycle.
pub struct SessionManager {
    registry: SessionRegistry,
    backend: Arc<dyn MediaBackend>,
    launcher: PipelineLauncher,
    config: Arc<RelayConfig>,
}

impl SessionManager {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        launcher: PipelineLauncher,
        config: Arc<RelayConfig>,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(),
            backend,
            launcher,
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Phase of `channel`; untracked channels are idle.
    pub fn phase(&self, channel: ChannelId) -> Phase {
        self.registry.phase(channel)
    }

    pub fn snapshot(&self) -> Vec<(ChannelId, Phase)> {
        self.registry.snapshot()
    }

    /// Start streaming `source_url` into `channel`.
    ///
    /// On failure everything acquired so far is released before the error is
    /// returned. Dropping the returned future releases it as well.
    pub async fn start(
        &self,
        channel: ChannelId,
        source_url: &str,
        stream_display: StreamDisplay,
    ) -> Result<()> {
        let session = self.registry.begin_start(channel)?;
        let guard = StartGuard::new(self.registry.downgrade(), channel, session.id());
        let cancelled = session.cancellation();

        info!(%channel, session_id = session.id(), title = %stream_display.title, "Starting stream");

        let result = tokio::select! {
            biased;
            _ = cancelled.cancelled() => Err(Error::StartAborted),
            result = self.run_start(&session, source_url, stream_display) => result,
        };

        match result {
            Ok(()) => {
                guard.disarm();
                info!(%channel, session_id = session.id(), "Stream active");
                Ok(())
            }
            Err(e) => {
                warn!(%channel, session_id = session.id(), "Stream start failed: {e}");
                drop(guard);
                Err(e)
            }
        }
    }

    async fn run_start(
        &self,
        session: &Arc<Session>,
        source_url: &str,
        stream_display: StreamDisplay,
    ) -> Result<()> {
        let channel = session.channel();
        let rtp = &self.config.rtp;

        let router = self
            .backend
            .router(channel)
            .ok_or_else(|| Error::resource("router", format!("no room router for channel {channel}")))?;

        let listen = self.backend.listen_info().await?;
        debug!(%channel, ip = %listen.ip, announced = ?listen.announced_address, "Listen info");

        router.on_close(self.close_hook(session, "router"));

        let video_transport = router
            .create_plain_transport(PlainTransportOptions::video(listen.clone()))
            .await?;
        session.adopt(Resource::VideoTransport(Arc::clone(&video_transport)))?;

        let audio_transport = router
            .create_plain_transport(PlainTransportOptions::audio(listen.clone()))
            .await?;
        session.adopt(Resource::AudioTransport(Arc::clone(&audio_transport)))?;

        info!(
            %channel,
            video_port = video_transport.local_port(),
            audio_port = audio_transport.local_port(),
            "RTP ingest ready"
        );

        let video_producer = video_transport
            .produce(ProducerOptions::h264(rtp.video_payload_type, rtp.video_ssrc))
            .await?;
        session.adopt(Resource::VideoProducer(Arc::clone(&video_producer)))?;

        let audio_producer = audio_transport
            .produce(ProducerOptions::opus(rtp.audio_payload_type, rtp.audio_ssrc))
            .await?;
        session.adopt(Resource::AudioProducer(Arc::clone(&audio_producer)))?;

        let stream = self.backend.create_stream(StreamRequest {
            key: STREAM_KEY.to_string(),
            channel_id: channel,
            title: stream_display.title,
            avatar_url: stream_display.avatar_url,
            video: Arc::clone(&video_producer),
            audio: Arc::clone(&audio_producer),
        })?;
        session.adopt(Resource::Stream(stream))?;

        video_producer.on_close(self.close_hook(session, "video producer"));
        audio_producer.on_close(self.close_hook(session, "audio producer"));

        let targets = RtpTargets {
            host: listen.ip,
            video: RtpTarget {
                port: video_transport.local_port(),
                payload_type: rtp.video_payload_type,
                ssrc: rtp.video_ssrc,
            },
            audio: RtpTarget {
                port: audio_transport.local_port(),
                payload_type: rtp.audio_payload_type,
                ssrc: rtp.audio_ssrc,
            },
        };
        let work_dir = self.launcher.config().work_dir(channel);
        let pipeline = self.launcher.launch(source_url, &work_dir, &targets).await?;

        let watchdog = spawn_watchdog(
            self.registry.downgrade(),
            Arc::downgrade(session),
            self.config.watchdog_interval(),
            session.cancellation().child_token(),
        );
        session.activate(pipeline, watchdog)
    }

    /// Hook that tears the session down when a collaborator object closes.
    fn close_hook(&self, session: &Session, source: &'static str) -> CloseHook {
        let registry = self.registry.downgrade();
        let channel = session.channel();
        let id = session.id();
        Box::new(move || {
            info!(%channel, session_id = id, "{source} closed, cleaning up");
            registry.cleanup_session(channel, id);
        })
    }

    /// Stop the channel's stream if it is active.
    pub fn stop(&self, channel: ChannelId) -> StopOutcome {
        if self.registry.phase(channel) != Phase::Active {
            info!(%channel, "No active stream to stop");
            return StopOutcome::NothingToStop;
        }
        if self.registry.cleanup(channel) {
            info!(%channel, "Stream stopped");
            StopOutcome::Stopped
        } else {
            StopOutcome::NothingToStop
        }
    }

    /// Tear down the channel's session whatever its phase.
    pub fn force_clean(&self, channel: ChannelId) -> bool {
        self.registry.cleanup(channel)
    }

    /// Tear down every session.
    pub fn force_clean_all(&self) -> usize {
        self.registry.cleanup_all()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let cleaned = self.registry.cleanup_all();
        if cleaned > 0 {
            debug!(cleaned, "Session manager dropped with live sessions");
        }
    }
}

/// Cleans up a start that did not reach the active phase.
struct StartGuard {
    registry: WeakRegistry,
    channel: ChannelId,
    session_id: u64,
    armed: bool,
}

impl StartGuard {
    fn new(registry: WeakRegistry, channel: ChannelId, session_id: u64) -> Self {
        Self {
            registry,
            channel,
            session_id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StartGuard {
    fn drop(&mut self) {
        if self.armed {
            self.registry.cleanup_session(self.channel, self.session_id);
        }
    }
}

/// Periodically check that the session's processes are still running.
fn spawn_watchdog(
    registry: WeakRegistry,
    session: std::sync::Weak<Session>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(session) = session.upgrade() else {
                break;
            };
            if let Some(stage) = session.exited_stage() {
                error!(
                    channel = %session.channel(),
                    session_id = session.id(),
                    %stage,
                    "Pipeline process died, cleaning up"
                );
                registry.cleanup_session(session.channel(), session.id());
                break;
            }
        }
    })
}
