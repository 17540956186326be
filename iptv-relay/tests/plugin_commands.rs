#![cfg(unix)]

mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use iptv_relay::Error;
use iptv_relay::config::DEFAULT_AVATAR_URL;
use iptv_relay::media::ChannelId;
use iptv_relay::plugin::{
    CommandInvoker, CommandOutcome, CommandSpec, IptvPlugin, PLAYLIST_SETTING, PluginHost,
    SettingSpec, SettingsProvider,
};
use iptv_relay::session::Phase;
use parking_lot::Mutex;
use serde_json::{Value, json};
use support::{FfmpegBehavior, Harness};

const PLAYLIST: &str = r#"#EXTM3U
#EXTINF:-1 tvg-id="bbc1.uk" tvg-logo="http://logos.example.com/bbc1.png" group-title="UK",BBC One
http://streams.example.com/bbc1.m3u8
#EXTINF:-1 tvg-id="bbc2.uk" group-title="UK",BBC Two
http://streams.example.com/bbc2.m3u8
#EXTINF:-1 tvg-id="cnn.us" group-title="News",CNN International
http://streams.example.com/cnn.m3u8
"#;

#[derive(Default)]
struct RecordingHost {
    commands: Mutex<Vec<CommandSpec>>,
    settings: Mutex<Vec<SettingSpec>>,
}

impl PluginHost for RecordingHost {
    fn register_command(&self, spec: CommandSpec) {
        self.commands.lock().push(spec);
    }

    fn register_setting(&self, spec: SettingSpec) {
        self.settings.lock().push(spec);
    }
}

struct StaticSettings(Mutex<String>);

impl SettingsProvider for StaticSettings {
    fn playlist(&self) -> String {
        self.0.lock().clone()
    }
}

fn plugin(h: &Harness, playlist: &str) -> (IptvPlugin, Arc<StaticSettings>) {
    let settings = Arc::new(StaticSettings(Mutex::new(playlist.to_string())));
    let plugin = IptvPlugin::new(Arc::clone(&h.manager))
        .with_playlist(Arc::clone(&settings) as Arc<dyn SettingsProvider>);
    (plugin, settings)
}

#[test]
fn on_load_registers_commands_and_setting() {
    let h = Harness::new(FfmpegBehavior::Healthy);

    let host = RecordingHost::default();
    IptvPlugin::new(Arc::clone(&h.manager)).on_load(&host);
    let names: Vec<_> = host.commands.lock().iter().map(|c| c.name).collect();
    assert_eq!(names, ["iptv_start", "iptv_stop", "iptv_clean", "iptv_cleanall"]);
    assert!(host.settings.lock().is_empty());

    let host = RecordingHost::default();
    plugin(&h, "").0.on_load(&host);
    let names: Vec<_> = host.commands.lock().iter().map(|c| c.name).collect();
    assert!(names.contains(&"iptv_play"));
    assert_eq!(host.settings.lock()[0].key, PLAYLIST_SETTING);
}

#[tokio::test]
async fn commands_need_a_voice_channel() {
    let h = Harness::new(FfmpegBehavior::Healthy);
    let (plugin, _) = plugin(&h, PLAYLIST);
    let nobody = CommandInvoker::default();

    let err = plugin
        .execute(
            &nobody,
            "iptv_start",
            &json!({ "sourceUrl": "http://example.com/live.m3u8" }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "You must be in a voice channel to start a stream.");

    let err = plugin.execute(&nobody, "iptv_stop", &Value::Null).await.unwrap_err();
    assert_eq!(err.to_string(), "You must be in a voice channel to stop a stream.");

    let outcome = plugin
        .execute(&nobody, "iptv_cleanall", &Value::Null)
        .await
        .unwrap();
    assert_eq!(outcome, CommandOutcome::CleanedAll(0));
}

#[tokio::test]
async fn start_stop_through_commands() {
    let h = Harness::new(FfmpegBehavior::Healthy);
    let (plugin, _) = plugin(&h, PLAYLIST);
    let caller = CommandInvoker::in_channel(ChannelId(1));

    let outcome = plugin
        .execute(
            &caller,
            "iptv_start",
            &json!({ "sourceUrl": "http://example.com/live.m3u8" }),
        )
        .await
        .unwrap();
    assert_eq!(
        outcome,
        CommandOutcome::Started {
            title: "IPTV".to_string()
        }
    );
    let stream = h.backend.stream(0);
    assert_eq!(stream.avatar_url, DEFAULT_AVATAR_URL);

    let outcome = plugin.execute(&caller, "iptv_stop", &Value::Null).await.unwrap();
    assert_eq!(outcome, CommandOutcome::Stopped);
    let outcome = plugin.execute(&caller, "iptv_stop", &Value::Null).await.unwrap();
    assert_eq!(outcome, CommandOutcome::NothingToStop);
    let outcome = plugin.execute(&caller, "iptv_clean", &Value::Null).await.unwrap();
    assert_eq!(outcome, CommandOutcome::NothingToClean);
}

#[tokio::test]
async fn start_hands_source_url_to_ffmpeg_unchanged() {
    let h = Harness::new(FfmpegBehavior::Healthy);
    let (plugin, _) = plugin(&h, PLAYLIST);
    let source = "http://CDN.Example.com:80?token=a%2Fb+c";

    plugin
        .execute(
            &CommandInvoker::in_channel(ChannelId(1)),
            "iptv_start",
            &json!({ "sourceUrl": format!(" {source} ") }),
        )
        .await
        .unwrap();

    assert!(h.ffmpeg.invocations()[0].contains(&format!("-i {source} ")));
    plugin.on_unload();
}

#[tokio::test]
async fn play_resolves_typo_against_playlist() {
    let h = Harness::new(FfmpegBehavior::Healthy);
    let (plugin, _) = plugin(&h, PLAYLIST);
    let caller = CommandInvoker::in_channel(ChannelId(1));

    let outcome = plugin
        .execute(&caller, "iptv_play", &json!({ "channelName": "BBC Onr" }))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        CommandOutcome::Started {
            title: "BBC One".to_string()
        }
    );

    let stream = h.backend.stream(0);
    assert_eq!(stream.avatar_url, "http://logos.example.com/bbc1.png");
    assert!(h.ffmpeg.invocations()[0].contains("-i http://streams.example.com/bbc1.m3u8"));

    assert_eq!(plugin.on_unload(), 1);
    assert_eq!(h.manager.phase(ChannelId(1)), Phase::Idle);
    assert_eq!(stream.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn play_reports_playlist_problems() {
    let h = Harness::new(FfmpegBehavior::Healthy);
    let (plugin, settings) = plugin(&h, "");
    let caller = CommandInvoker::in_channel(ChannelId(1));
    let args = json!({ "channelName": "BBC One" });

    let err = plugin.execute(&caller, "iptv_play", &args).await.unwrap_err();
    assert!(matches!(err, Error::PlaylistEmpty));

    *settings.0.lock() = "http://example.com/no-header.m3u8\n".to_string();
    let err = plugin.execute(&caller, "iptv_play", &args).await.unwrap_err();
    assert!(matches!(err, Error::PlaylistParse(_)));

    *settings.0.lock() = PLAYLIST.to_string();
    let err = plugin
        .execute(&caller, "iptv_play", &json!({ "channelName": "Discovery Science" }))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ChannelNotFound(_)));
    assert!(err.is_usage());

    assert!(h.ffmpeg.invocations().is_empty());
    assert!(h.manager.snapshot().is_empty());
}

#[tokio::test]
async fn play_is_unknown_without_playlist_layer() {
    let h = Harness::new(FfmpegBehavior::Healthy);
    let plugin = IptvPlugin::new(Arc::clone(&h.manager));

    let err = plugin
        .execute(
            &CommandInvoker::in_channel(ChannelId(1)),
            "iptv_play",
            &json!({ "channelName": "BBC One" }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownCommand(_)));
}
