//! Host plugin surface.
//!
//! The host runtime registers commands and settings through [`PluginHost`],
//! then calls [`IptvPlugin::execute`] for each invocation.

pub mod commands;

use std::sync::Arc;

use iptv_playlist::PlaylistResolver;
use serde_json::Value;
use tracing::{debug, info};

pub use commands::{ArgSpec, Command, CommandOutcome, CommandSpec};

use crate::media::ChannelId;
use crate::session::{SessionManager, StopOutcome};
use crate::{Error, Result};

/// Setting key of the raw playlist document.
pub const PLAYLIST_SETTING: &str = "playlist";

/// Who invoked a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandInvoker {
    /// Voice channel the caller is connected to.
    pub current_voice_channel: Option<ChannelId>,
}

impl CommandInvoker {
    pub fn in_channel(channel: ChannelId) -> Self {
        Self {
            current_voice_channel: Some(channel),
        }
    }
}

/// A plugin setting as registered with the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingSpec {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub default_value: String,
}

/// Registration side of the host runtime.
pub trait PluginHost {
    fn register_command(&self, spec: CommandSpec);

    fn register_setting(&self, spec: SettingSpec);
}

/// Read side of the plugin's settings.
pub trait SettingsProvider: Send + Sync {
    /// Raw playlist document; empty when unset.
    fn playlist(&self) -> String;
}

struct PlaylistLayer {
    settings: Arc<dyn SettingsProvider>,
    resolver: PlaylistResolver,
}

pub struct IptvPlugin {
    manager: Arc<SessionManager>,
    playlist: Option<PlaylistLayer>,
}

impl IptvPlugin {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self {
            manager,
            playlist: None,
        }
    }

    /// Enable start-from-playlist, reading the document from `settings`.
    pub fn with_playlist(mut self, settings: Arc<dyn SettingsProvider>) -> Self {
        self.playlist = Some(PlaylistLayer {
            settings,
            resolver: PlaylistResolver::new(),
        });
        self
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    pub fn on_load(&self, host: &dyn PluginHost) {
        for spec in commands::core_specs() {
            host.register_command(spec);
        }
        if self.playlist.is_some() {
            host.register_command(commands::play_spec());
            host.register_setting(SettingSpec {
                key: PLAYLIST_SETTING,
                name: "Playlist",
                description: "Extended M3U playlist used by iptv_play",
                default_value: String::new(),
            });
        }
        info!(playlist = self.playlist.is_some(), "IPTV plugin loaded");
    }

    /// Run the command `name` with its JSON arguments.
    pub async fn execute(
        &self,
        invoker: &CommandInvoker,
        name: &str,
        input: &Value,
    ) -> Result<CommandOutcome> {
        let command = Command::from_input(name, input)?;
        debug!(command = command.name(), invoker = ?invoker.current_voice_channel, "Executing");

        let channel = match command.channel_action() {
            Some(action) => Some(
                invoker
                    .current_voice_channel
                    .ok_or(Error::NoVoiceChannel { action })?,
            ),
            None => None,
        };

        match (command, channel) {
            (Command::Start { source_url, stream_name }, Some(channel)) => {
                let display = self.manager.config().display_for(stream_name.as_deref());
                let title = display.title.clone();
                self.manager.start(channel, &source_url, display).await?;
                Ok(CommandOutcome::Started { title })
            }
            (Command::Play { channel_name }, Some(channel)) => {
                let layer = self
                    .playlist
                    .as_ref()
                    .ok_or_else(|| Error::UnknownCommand(commands::PLAY.to_string()))?;
                let entry = layer
                    .resolver
                    .resolve(&layer.settings.playlist(), &channel_name)?;
                info!(%channel, query = %channel_name, matched = %entry.name, "Resolved playlist channel");

                let display = self.manager.config().display_for_entry(&entry);
                let title = display.title.clone();
                self.manager.start(channel, &entry.url, display).await?;
                Ok(CommandOutcome::Started { title })
            }
            (Command::Stop, Some(channel)) => Ok(match self.manager.stop(channel) {
                StopOutcome::Stopped => CommandOutcome::Stopped,
                StopOutcome::NothingToStop => CommandOutcome::NothingToStop,
            }),
            (Command::Clean, Some(channel)) => Ok(if self.manager.force_clean(channel) {
                CommandOutcome::Cleaned
            } else {
                CommandOutcome::NothingToClean
            }),
            (Command::CleanAll, _) => Ok(CommandOutcome::CleanedAll(self.manager.force_clean_all())),
            (command, None) => Err(Error::NoVoiceChannel {
                action: command.channel_action().unwrap_or("start"),
            }),
        }
    }

    /// Force-clean every session.
    pub fn on_unload(&self) -> usize {
        let snapshot = self.manager.snapshot();
        let cleaned = self.manager.force_clean_all();
        info!(?snapshot, cleaned, "IPTV plugin unloaded");
        cleaned
    }
}
