//! Per-channel session state.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::media::{ChannelId, PlainTransport, Producer, RoomStream};
use crate::pipeline::{PipelineHandles, Stage};
use crate::{Error, Result};

/// Lifecycle phase of a channel's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Starting,
    Active,
    Cleaning,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Cleaning => "cleaning",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A media collaborator object the session owns and must close.
pub(crate) enum Resource {
    VideoTransport(Arc<dyn PlainTransport>),
    AudioTransport(Arc<dyn PlainTransport>),
    VideoProducer(Arc<dyn Producer>),
    AudioProducer(Arc<dyn Producer>),
    Stream(Box<dyn RoomStream>),
}

impl Resource {
    fn name(&self) -> &'static str {
        match self {
            Self::VideoTransport(_) => "video transport",
            Self::AudioTransport(_) => "audio transport",
            Self::VideoProducer(_) => "video producer",
            Self::AudioProducer(_) => "audio producer",
            Self::Stream(_) => "room stream",
        }
    }

    fn close(&self) -> Result<()> {
        match self {
            Self::VideoTransport(t) | Self::AudioTransport(t) => t.close(),
            Self::VideoProducer(p) | Self::AudioProducer(p) => p.close(),
            Self::Stream(s) => s.close(),
        }
    }

    /// Close and log, never fail.
    fn close_logged(self, channel: ChannelId) {
        match self.close() {
            Ok(()) => debug!(%channel, resource = self.name(), "Closed"),
            Err(e) => warn!(%channel, resource = self.name(), "Failed to close: {e}"),
        }
    }
}

#[derive(Default)]
pub(crate) struct MediaResources {
    video_transport: Option<Arc<dyn PlainTransport>>,
    audio_transport: Option<Arc<dyn PlainTransport>>,
    video_producer: Option<Arc<dyn Producer>>,
    audio_producer: Option<Arc<dyn Producer>>,
    stream: Option<Box<dyn RoomStream>>,
}

impl MediaResources {
    fn store(&mut self, resource: Resource) {
        match resource {
            Resource::VideoTransport(t) => self.video_transport = Some(t),
            Resource::AudioTransport(t) => self.audio_transport = Some(t),
            Resource::VideoProducer(p) => self.video_producer = Some(p),
            Resource::AudioProducer(p) => self.audio_producer = Some(p),
            Resource::Stream(s) => self.stream = Some(s),
        }
    }

    fn is_complete(&self) -> bool {
        self.video_transport.is_some()
            && self.audio_transport.is_some()
            && self.video_producer.is_some()
            && self.audio_producer.is_some()
            && self.stream.is_some()
    }

    /// Drain in teardown order: stream, producers, transports.
    fn into_close_order(self) -> Vec<Resource> {
        let Self {
            video_transport,
            audio_transport,
            video_producer,
            audio_producer,
            stream,
        } = self;

        let mut out = Vec::with_capacity(5);
        out.extend(stream.map(Resource::Stream));
        out.extend(video_producer.map(Resource::VideoProducer));
        out.extend(audio_producer.map(Resource::AudioProducer));
        out.extend(video_transport.map(Resource::VideoTransport));
        out.extend(audio_transport.map(Resource::AudioTransport));
        out
    }
}

struct SessionState {
    phase: Phase,
    pipeline: Option<PipelineHandles>,
    resources: MediaResources,
    watchdog: Option<JoinHandle<()>>,
}

/// One channel's streaming session.
///
/// The state lock is never held across an await point or while closing a
/// collaborator object, since close hooks may re-enter cleanup synchronously.
pub struct Session {
    id: u64,
    channel: ChannelId,
    state: Mutex<SessionState>,
    cleaning: AtomicBool,
    cancel: CancellationToken,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("phase", &self.phase())
            .finish()
    }
}

impl Session {
    /// A new session, already in [`Phase::Starting`].
    pub(crate) fn starting(id: u64, channel: ChannelId) -> Self {
        Self {
            id,
            channel,
            state: Mutex::new(SessionState {
                phase: Phase::Starting,
                pipeline: None,
                resources: MediaResources::default(),
                watchdog: None,
            }),
            cleaning: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Distinguishes successive sessions of the same channel.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Cancelled when the session is torn down.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Take ownership of a freshly acquired resource.
    ///
    /// If the session stopped starting in the meantime the resource is closed
    /// instead and the start must abort.
    pub(crate) fn adopt(&self, resource: Resource) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.phase == Phase::Starting {
                debug!(channel = %self.channel, resource = resource.name(), "Acquired");
                state.resources.store(resource);
                return Ok(());
            }
        }
        debug!(channel = %self.channel, resource = resource.name(), "Session gone, closing orphan");
        resource.close_logged(self.channel);
        Err(Error::StartAborted)
    }

    /// Move to [`Phase::Active`] with a running pipeline and its watchdog.
    pub(crate) fn activate(&self, pipeline: PipelineHandles, watchdog: JoinHandle<()>) -> Result<()> {
        let mut rejected = {
            let mut state = self.state.lock();
            if state.phase == Phase::Starting && state.resources.is_complete() {
                state.pipeline = Some(pipeline);
                state.watchdog = Some(watchdog);
                state.phase = Phase::Active;
                return Ok(());
            }
            (pipeline, watchdog)
        };
        rejected.0.kill_all();
        rejected.1.abort();
        Err(Error::StartAborted)
    }

    /// First pipeline stage whose process has exited, if any.
    pub(crate) fn exited_stage(&self) -> Option<Stage> {
        let mut state = self.state.lock();
        if state.phase != Phase::Active {
            return None;
        }
        state.pipeline.as_mut().and_then(PipelineHandles::exited_stage)
    }

    /// Release everything the session owns.
    ///
    /// Returns `false` without doing anything if another teardown holds the
    /// guard. The caller must call [`Session::release`] afterwards.
    pub(crate) fn teardown(&self) -> bool {
        if self
            .cleaning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(channel = %self.channel, "Cleanup already in progress");
            return false;
        }

        let (pipeline, resources, watchdog) = {
            let mut state = self.state.lock();
            // Sessions are never revived; a late caller holding an old
            // reference finds it already idle.
            if state.phase == Phase::Idle {
                drop(state);
                self.release();
                return false;
            }
            state.phase = Phase::Cleaning;
            (
                state.pipeline.take(),
                std::mem::take(&mut state.resources),
                state.watchdog.take(),
            )
        };

        if let Some(mut pipeline) = pipeline {
            pipeline.kill_all();
        }
        self.cancel.cancel();

        for resource in resources.into_close_order() {
            resource.close_logged(self.channel);
        }

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        self.state.lock().phase = Phase::Idle;
        true
    }

    /// Clear the cleanup guard.
    pub(crate) fn release(&self) {
        self.cleaning.store(false, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn is_cleaning(&self) -> bool {
        self.cleaning.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::media::CloseHook;

    #[derive(Default)]
    struct CountingProducer {
        closes: AtomicUsize,
    }

    impl Producer for CountingProducer {
        fn id(&self) -> String {
            "p".to_string()
        }

        fn on_close(&self, _hook: CloseHook) {}

        fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn orphan_is_closed_after_teardown() {
        let session = Session::starting(1, ChannelId(7));
        let early = Arc::new(CountingProducer::default());
        session
            .adopt(Resource::VideoProducer(early.clone()))
            .unwrap();

        assert!(session.teardown());
        session.release();
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(early.closes.load(Ordering::SeqCst), 1);
        assert!(session.cancellation().is_cancelled());

        let late = Arc::new(CountingProducer::default());
        let err = session
            .adopt(Resource::AudioProducer(late.clone()))
            .unwrap_err();
        assert!(matches!(err, Error::StartAborted));
        assert_eq!(late.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn teardown_guard_admits_one_caller() {
        let session = Session::starting(1, ChannelId(7));
        assert!(session.teardown());
        assert!(session.is_cleaning());
        assert!(!session.teardown());

        session.release();
        assert!(!session.is_cleaning());
        assert!(!session.teardown());
    }

    #[test]
    fn teardown_without_resources_is_safe() {
        let session = Session::starting(1, ChannelId(7));
        assert!(session.teardown());
        assert_eq!(session.exited_stage(), None);
    }
}
