//! Media transport collaborator interface.
//!
//! The room's real-time transport (router, plain transports, producers, room
//! streams) is owned by the host. The relay only sees it through these traits:
//! it asks for UDP ingest transports, attaches RTP producers to them and
//! registers close hooks so a transport or producer going away tears the
//! session down.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Identifier of the voice channel a session streams into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChannelId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Callback run once when a collaborator object closes.
pub type CloseHook = Box<dyn FnOnce() + Send + 'static>;

/// Local bind address and the address announced to peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenInfo {
    pub ip: String,
    pub announced_address: Option<String>,
}

/// Options for a plain (non-WebRTC) UDP transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainTransportOptions {
    pub listen: ListenInfo,
    /// Share one port between RTP and RTCP.
    pub rtcp_mux: bool,
    /// Learn the remote address from the first received packet.
    pub comedia: bool,
    pub enable_srtp: bool,
}

impl PlainTransportOptions {
    /// Video ingest: separate RTCP port.
    pub fn video(listen: ListenInfo) -> Self {
        Self {
            listen,
            rtcp_mux: false,
            comedia: true,
            enable_srtp: false,
        }
    }

    /// Audio ingest: RTCP multiplexed on the RTP port.
    pub fn audio(listen: ListenInfo) -> Self {
        Self {
            listen,
            rtcp_mux: true,
            comedia: true,
            enable_srtp: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codec description of an RTP stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpCodec {
    pub mime_type: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub channels: Option<u8>,
    pub parameters: Vec<(String, String)>,
}

/// Parameters for a producer on a plain transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerOptions {
    pub kind: MediaKind,
    pub codec: RtpCodec,
    pub ssrc: u32,
}

impl ProducerOptions {
    /// H.264 constrained baseline, packetization mode 1.
    pub fn h264(payload_type: u8, ssrc: u32) -> Self {
        let parameters = [
            ("packetization-mode", "1"),
            ("profile-level-id", "42e01f"),
            ("level-asymmetry-allowed", "1"),
            ("x-google-start-bitrate", "1000"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            kind: MediaKind::Video,
            codec: RtpCodec {
                mime_type: "video/H264".to_string(),
                payload_type,
                clock_rate: 90_000,
                channels: None,
                parameters,
            },
            ssrc,
        }
    }

    /// Stereo Opus at 48 kHz.
    pub fn opus(payload_type: u8, ssrc: u32) -> Self {
        Self {
            kind: MediaKind::Audio,
            codec: RtpCodec {
                mime_type: "audio/opus".to_string(),
                payload_type,
                clock_rate: 48_000,
                channels: Some(2),
                parameters: Vec::new(),
            },
            ssrc,
        }
    }
}

/// What the room shows for the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDisplay {
    pub title: String,
    pub avatar_url: String,
}

/// Request to publish two producers as one room stream.
pub struct StreamRequest {
    pub key: String,
    pub channel_id: ChannelId,
    pub title: String,
    pub avatar_url: String,
    pub video: Arc<dyn Producer>,
    pub audio: Arc<dyn Producer>,
}

/// Entry point into the host's media layer.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Router of the channel's room, if the room exists.
    fn router(&self, channel: ChannelId) -> Option<Arc<dyn Router>>;

    async fn listen_info(&self) -> Result<ListenInfo>;

    fn create_stream(&self, request: StreamRequest) -> Result<Box<dyn RoomStream>>;
}

#[async_trait]
pub trait Router: Send + Sync {
    async fn create_plain_transport(
        &self,
        options: PlainTransportOptions,
    ) -> Result<Arc<dyn PlainTransport>>;

    /// Run `hook` once when the router closes.
    fn on_close(&self, hook: CloseHook);
}

#[async_trait]
pub trait PlainTransport: Send + Sync {
    /// Negotiated local UDP port RTP must be sent to.
    fn local_port(&self) -> u16;

    async fn produce(&self, options: ProducerOptions) -> Result<Arc<dyn Producer>>;

    fn close(&self) -> Result<()>;
}

pub trait Producer: Send + Sync {
    fn id(&self) -> String;

    /// Run `hook` once when the producer closes, whoever closed it.
    fn on_close(&self, hook: CloseHook);

    fn close(&self) -> Result<()>;
}

pub trait RoomStream: Send + Sync {
    fn close(&self) -> Result<()>;
}
