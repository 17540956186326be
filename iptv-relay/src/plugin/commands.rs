//! Command surface: names, argument specs and input decoding.

use std::fmt;

use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::{Error, Result};

pub const START: &str = "iptv_start";
pub const PLAY: &str = "iptv_play";
pub const STOP: &str = "iptv_stop";
pub const CLEAN: &str = "iptv_clean";
pub const CLEAN_ALL: &str = "iptv_cleanall";

/// Argument of a registered command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
    /// Hidden from logs and history.
    pub sensitive: bool,
}

/// A command as registered with the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub args: Vec<ArgSpec>,
}

/// Commands that need only the session layer.
pub fn core_specs() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            name: START,
            description: "Start an IPTV stream in your current voice channel",
            args: vec![
                ArgSpec {
                    name: "sourceUrl",
                    description: "Direct link to a media stream, not a playlist",
                    required: true,
                    sensitive: true,
                },
                ArgSpec {
                    name: "streamName",
                    description: "The name of the stream",
                    required: false,
                    sensitive: false,
                },
            ],
        },
        CommandSpec {
            name: STOP,
            description: "Stop the IPTV stream in your current voice channel",
            args: Vec::new(),
        },
        CommandSpec {
            name: CLEAN,
            description: "Forcefully clean up the stream in your current voice channel",
            args: Vec::new(),
        },
        CommandSpec {
            name: CLEAN_ALL,
            description: "Forcefully clean up all streams and processes",
            args: Vec::new(),
        },
    ]
}

/// Start-from-playlist; registered only when a playlist setting is available.
pub fn play_spec() -> CommandSpec {
    CommandSpec {
        name: PLAY,
        description: "Start a channel from the configured playlist",
        args: vec![ArgSpec {
            name: "channelName",
            description: "Name of the playlist channel, matched fuzzily",
            required: true,
            sensitive: false,
        }],
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartInput {
    source_url: Option<String>,
    stream_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayInput {
    channel_name: Option<String>,
}

/// A decoded command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start {
        /// Trimmed as given. ffmpeg gets this text, not the normalized URL,
        /// since tokenized sources can be sensitive to re-encoding.
        source_url: String,
        stream_name: Option<String>,
    },
    Play {
        channel_name: String,
    },
    Stop,
    Clean,
    CleanAll,
}

impl Command {
    /// Decode the host's command name and JSON arguments.
    pub fn from_input(name: &str, input: &Value) -> Result<Self> {
        match name {
            START => {
                let input: StartInput = decode(input)?;
                let raw = input
                    .source_url
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| Error::invalid_argument("sourceUrl", "a URL is required"))?;
                let source_url = raw.trim();
                Url::parse(source_url)
                    .map_err(|e| Error::invalid_argument("sourceUrl", e.to_string()))?;
                Ok(Self::Start {
                    source_url: source_url.to_string(),
                    stream_name: input.stream_name.filter(|s| !s.trim().is_empty()),
                })
            }
            PLAY => {
                let input: PlayInput = decode(input)?;
                let channel_name = input
                    .channel_name
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        Error::invalid_argument("channelName", "a channel name is required")
                    })?;
                Ok(Self::Play { channel_name })
            }
            STOP => Ok(Self::Stop),
            CLEAN => Ok(Self::Clean),
            CLEAN_ALL => Ok(Self::CleanAll),
            other => Err(Error::UnknownCommand(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => START,
            Self::Play { .. } => PLAY,
            Self::Stop => STOP,
            Self::Clean => CLEAN,
            Self::CleanAll => CLEAN_ALL,
        }
    }

    /// Verb used in the "must be in a voice channel" message, if the command
    /// acts on the caller's channel.
    pub(crate) fn channel_action(&self) -> Option<&'static str> {
        match self {
            Self::Start { .. } | Self::Play { .. } => Some("start"),
            Self::Stop => Some("stop"),
            Self::Clean => Some("clean"),
            Self::CleanAll => None,
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(input: &Value) -> Result<T> {
    // Commands without arguments may arrive with a null payload.
    let input = if input.is_null() {
        Value::Object(Default::default())
    } else {
        input.clone()
    };
    serde_json::from_value(input).map_err(|e| Error::invalid_argument("arguments", e.to_string()))
}

/// What a successful command did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Started { title: String },
    Stopped,
    NothingToStop,
    Cleaned,
    NothingToClean,
    CleanedAll(usize),
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started { title } => write!(f, "Streaming {title}."),
            Self::Stopped => f.write_str("IPTV stream stopped."),
            Self::NothingToStop => f.write_str("No active stream to stop in this channel."),
            Self::Cleaned => f.write_str("Stream cleaned up."),
            Self::NothingToClean => f.write_str("Nothing to clean up in this channel."),
            Self::CleanedAll(n) => write!(f, "Cleaned up {n} stream(s)."),
        }
    }
}
