//! In-memory media collaborators and a shell stand-in for ffmpeg.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use iptv_relay::config::RelayConfig;
use iptv_relay::media::{
    ChannelId, CloseHook, ListenInfo, MediaBackend, MediaKind, PlainTransport,
    PlainTransportOptions, Producer, ProducerOptions, RoomStream, Router, StreamRequest,
};
use iptv_relay::pipeline::{PipelineLauncher, ReadinessConfig, TracingSink};
use iptv_relay::session::{Phase, SessionManager};
use iptv_relay::{Error, Result};
use parking_lot::Mutex;
use tempfile::TempDir;

pub const LISTEN_IP: &str = "127.0.0.1";

/// Run every hook in `hooks` once, outside the lock.
fn fire(hooks: &Mutex<Vec<CloseHook>>) {
    let hooks = std::mem::take(&mut *hooks.lock());
    for hook in hooks {
        hook();
    }
}

#[derive(Default)]
pub struct FakeProducer {
    pub id: String,
    pub options: Option<ProducerOptions>,
    pub closes: AtomicUsize,
    closed: AtomicBool,
    hooks: Mutex<Vec<CloseHook>>,
}

impl FakeProducer {
    /// The producer going away on the host's side.
    pub fn close_remotely(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            fire(&self.hooks);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Producer for FakeProducer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn on_close(&self, hook: CloseHook) {
        self.hooks.lock().push(hook);
    }

    fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.close_remotely();
        Ok(())
    }
}

pub struct FakeTransport {
    pub port: u16,
    pub options: PlainTransportOptions,
    pub closes: AtomicUsize,
    pub producers: Mutex<Vec<Arc<FakeProducer>>>,
    fail_produce: bool,
}

#[async_trait]
impl PlainTransport for FakeTransport {
    fn local_port(&self) -> u16 {
        self.port
    }

    async fn produce(&self, options: ProducerOptions) -> Result<Arc<dyn Producer>> {
        if self.fail_produce {
            return Err(Error::resource("producer", "rejected by fake transport"));
        }
        let producer = Arc::new(FakeProducer {
            id: format!("{}-{}", options.kind, self.port),
            options: Some(options),
            ..FakeProducer::default()
        });
        self.producers.lock().push(Arc::clone(&producer));
        Ok(producer)
    }

    fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeRouter {
    next_port: Arc<AtomicU16>,
    fail_produce: bool,
    pub transports: Mutex<Vec<Arc<FakeTransport>>>,
    hooks: Mutex<Vec<CloseHook>>,
}

impl FakeRouter {
    pub fn close(&self) {
        fire(&self.hooks);
    }

    pub fn transport(&self, index: usize) -> Arc<FakeTransport> {
        Arc::clone(&self.transports.lock()[index])
    }

    /// Producer of `kind` created on any of this router's transports.
    pub fn producer(&self, kind: MediaKind) -> Arc<FakeProducer> {
        self.transports
            .lock()
            .iter()
            .flat_map(|t| t.producers.lock().clone())
            .find(|p| p.options.as_ref().map(|o| o.kind) == Some(kind))
            .expect("no producer of that kind")
    }
}

#[async_trait]
impl Router for FakeRouter {
    async fn create_plain_transport(
        &self,
        options: PlainTransportOptions,
    ) -> Result<Arc<dyn PlainTransport>> {
        let port = self.next_port.fetch_add(2, Ordering::SeqCst);
        let transport = Arc::new(FakeTransport {
            port,
            options,
            closes: AtomicUsize::new(0),
            producers: Mutex::new(Vec::new()),
            fail_produce: self.fail_produce,
        });
        self.transports.lock().push(Arc::clone(&transport));
        Ok(transport)
    }

    fn on_close(&self, hook: CloseHook) {
        self.hooks.lock().push(hook);
    }
}

#[derive(Default)]
pub struct FakeStream {
    pub key: String,
    pub title: String,
    pub avatar_url: String,
    pub closes: AtomicUsize,
}

struct StreamHandle(Arc<FakeStream>);

impl RoomStream for StreamHandle {
    fn close(&self) -> Result<()> {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeBackend {
    routers: HashMap<ChannelId, Arc<FakeRouter>>,
    pub streams: Mutex<Vec<Arc<FakeStream>>>,
}

impl FakeBackend {
    /// Rooms exist for `channels` only.
    pub fn with_rooms(channels: &[u64]) -> Arc<Self> {
        Self::build(channels, false)
    }

    /// Rooms whose transports refuse to create producers.
    pub fn failing_producers(channels: &[u64]) -> Arc<Self> {
        Self::build(channels, true)
    }

    fn build(channels: &[u64], fail_produce: bool) -> Arc<Self> {
        let next_port = Arc::new(AtomicU16::new(40_000));
        let routers = channels
            .iter()
            .map(|&id| {
                let router = Arc::new(FakeRouter {
                    next_port: Arc::clone(&next_port),
                    fail_produce,
                    transports: Mutex::new(Vec::new()),
                    hooks: Mutex::new(Vec::new()),
                });
                (ChannelId(id), router)
            })
            .collect();
        Arc::new(Self {
            routers,
            streams: Mutex::new(Vec::new()),
        })
    }

    pub fn room(&self, channel: u64) -> Arc<FakeRouter> {
        Arc::clone(&self.routers[&ChannelId(channel)])
    }

    pub fn stream(&self, index: usize) -> Arc<FakeStream> {
        Arc::clone(&self.streams.lock()[index])
    }
}

#[async_trait]
impl MediaBackend for FakeBackend {
    fn router(&self, channel: ChannelId) -> Option<Arc<dyn Router>> {
        self.routers
            .get(&channel)
            .map(|r| Arc::clone(r) as Arc<dyn Router>)
    }

    async fn listen_info(&self) -> Result<ListenInfo> {
        Ok(ListenInfo {
            ip: LISTEN_IP.to_string(),
            announced_address: Some("203.0.113.7".to_string()),
        })
    }

    fn create_stream(&self, request: StreamRequest) -> Result<Box<dyn RoomStream>> {
        let stream = Arc::new(FakeStream {
            key: request.key,
            title: request.title,
            avatar_url: request.avatar_url,
            closes: AtomicUsize::new(0),
        });
        self.streams.lock().push(Arc::clone(&stream));
        Ok(Box::new(StreamHandle(stream)))
    }
}

/// How the stand-in ffmpeg behaves.
#[derive(Debug, Clone, Copy)]
pub enum FfmpegBehavior {
    /// Buffering writes a playlist with four segments; every process then idles.
    Healthy,
    /// Buffering never writes a playlist.
    NeverReady,
    /// Like `Healthy`, but relays exit shortly after starting.
    RelaysCrash,
}

/// A POSIX shell script that records its arguments and pid, one invocation
/// per line.
pub struct FakeFfmpeg {
    _dir: TempDir,
    pub path: PathBuf,
    pub log: PathBuf,
    pub pids: PathBuf,
}

impl FakeFfmpeg {
    pub fn new(behavior: FfmpegBehavior) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ffmpeg");
        let log = dir.path().join("invocations.log");
        let pids = dir.path().join("pids.log");

        let buffering = match behavior {
            FfmpegBehavior::NeverReady => "exec sleep 30",
            FfmpegBehavior::Healthy | FfmpegBehavior::RelaysCrash => {
                r#"for last in "$@"; do :; done
{
  printf '#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:0\n'
  for i in 0 1 2 3; do printf '#EXTINF:2.000000,\nsegment_00%s.ts\n' "$i"; done
} > "$last.tmp"
mv "$last.tmp" "$last"
exec sleep 30"#
            }
        };
        let relay = match behavior {
            FfmpegBehavior::RelaysCrash => "sleep 0.2; exit 1",
            FfmpegBehavior::Healthy | FfmpegBehavior::NeverReady => "exec sleep 30",
        };

        let script = format!(
            "#!/bin/sh\necho $$ >> '{pids}'\necho \"$*\" >> '{log}'\ncase \" $* \" in\n  *\" -f hls \"*)\n{buffering}\n    ;;\n  *)\n{relay}\n    ;;\nesac\n",
            log = log.display(),
            pids = pids.display(),
        );
        std::fs::write(&path, script).unwrap();

        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        Self {
            _dir: dir,
            path,
            log,
            pids,
        }
    }

    /// Argument lines of every invocation so far.
    pub fn invocations(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Pids in invocation order. `exec` keeps the pid, so these are the
    /// processes the supervisor holds.
    pub fn pids(&self) -> Vec<u32> {
        std::fs::read_to_string(&self.pids)
            .unwrap_or_default()
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect()
    }

    pub fn relay_invocations(&self) -> Vec<String> {
        self.invocations()
            .into_iter()
            .filter(|line| line.contains("-f rtp"))
            .collect()
    }
}

/// Relay configuration tuned for tests.
pub fn test_config(ffmpeg: &Path, work_root: &Path) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.pipeline.ffmpeg_path = ffmpeg.to_string_lossy().into_owned();
    config.pipeline.work_root = work_root.to_path_buf();
    config.pipeline.readiness = ReadinessConfig {
        min_segments: 4,
        timeout_ms: 5_000,
        poll_interval_ms: 20,
        settle_delay_ms: 10,
    };
    config.watchdog_interval_ms = 50;
    config
}

pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub ffmpeg: FakeFfmpeg,
    pub manager: Arc<SessionManager>,
    pub work_root: TempDir,
}

impl Harness {
    pub fn new(behavior: FfmpegBehavior) -> Self {
        Self::with(FakeBackend::with_rooms(&[1, 2]), behavior, |_| {})
    }

    pub fn with(
        backend: Arc<FakeBackend>,
        behavior: FfmpegBehavior,
        tweak: impl FnOnce(&mut RelayConfig),
    ) -> Self {
        let ffmpeg = FakeFfmpeg::new(behavior);
        let work_root = TempDir::new().unwrap();
        let mut config = test_config(&ffmpeg.path, work_root.path());
        tweak(&mut config);

        let launcher = PipelineLauncher::new(config.pipeline.clone(), Arc::new(TracingSink));
        let manager = Arc::new(SessionManager::new(
            Arc::clone(&backend) as Arc<dyn MediaBackend>,
            launcher,
            Arc::new(config),
        ));

        Self {
            backend,
            ffmpeg,
            manager,
            work_root,
        }
    }

    /// Wait until `channel` reaches `phase`, failing after a few seconds.
    pub async fn wait_for_phase(&self, channel: ChannelId, phase: Phase) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.manager.phase(channel) != phase {
            assert!(
                tokio::time::Instant::now() < deadline,
                "channel {channel} stuck in {}",
                self.manager.phase(channel)
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Whether `pid` is still a live (non-zombie) process.
pub fn is_running(pid: u32) -> bool {
    let output = std::process::Command::new("ps")
        .args(["-o", "stat=", "-p", &pid.to_string()])
        .output()
        .unwrap();
    let stat = String::from_utf8_lossy(&output.stdout);
    let stat = stat.trim();
    !stat.is_empty() && !stat.starts_with('Z')
}

/// Wait until `pid` is gone, failing after a few seconds.
pub async fn wait_for_exit(pid: u32) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while is_running(pid) {
        assert!(tokio::time::Instant::now() < deadline, "process {pid} still running");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
