//! ffmpeg command lines for the buffering and relay stages.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::media::MediaKind;

/// Encoding and buffering parameters of the buffering stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingProfile {
    pub user_agent: String,
    /// Upper bound for ffmpeg's reconnect backoff, in seconds.
    pub reconnect_delay_max_secs: u32,
    /// Socket I/O timeout, in microseconds.
    pub io_timeout_us: u64,
    pub deinterlace_filter: String,
    pub video_codec: String,
    pub preset: String,
    pub tune: String,
    pub profile: String,
    pub level: String,
    pub pixel_format: String,
    pub video_bitrate: String,
    pub max_rate: String,
    pub buffer_size: String,
    pub gop_size: u32,
    pub frame_rate: u32,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub audio_channels: u8,
    pub audio_bitrate: String,
    pub segment_secs: u32,
    /// Segments kept in the rolling playlist.
    pub list_size: u32,
    pub rtp_packet_size: u32,
}

impl Default for EncodingProfile {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0".to_string(),
            reconnect_delay_max_secs: 5,
            io_timeout_us: 10_000_000,
            deinterlace_filter: "yadif=1:-1:0".to_string(),
            video_codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            tune: "zerolatency".to_string(),
            profile: "baseline".to_string(),
            level: "3.1".to_string(),
            pixel_format: "yuv420p".to_string(),
            video_bitrate: "2500k".to_string(),
            max_rate: "3000k".to_string(),
            buffer_size: "6000k".to_string(),
            gop_size: 50,
            frame_rate: 25,
            audio_codec: "libopus".to_string(),
            sample_rate: 48_000,
            audio_channels: 2,
            audio_bitrate: "128k".to_string(),
            segment_secs: 2,
            list_size: 15,
            rtp_packet_size: 1200,
        }
    }
}

/// Where one relay sends its RTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpTarget {
    pub port: u16,
    pub payload_type: u8,
    pub ssrc: u32,
}

/// RTP destinations of both relays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpTargets {
    pub host: String,
    pub video: RtpTarget,
    pub audio: RtpTarget,
}

fn push_all(args: &mut Vec<String>, items: &[&str]) {
    args.extend(items.iter().map(|s| s.to_string()));
}

/// Arguments of the buffering stage: pull `source_url`, transcode once and
/// write a rolling HLS buffer into `work_dir`.
pub fn buffering_args(source_url: &str, profile: &EncodingProfile, work_dir: &Path) -> Vec<String> {
    let mut args = Vec::new();

    push_all(&mut args, &["-hide_banner", "-y"]);

    // Survive upstream hiccups
    push_all(
        &mut args,
        &[
            "-reconnect",
            "1",
            "-reconnect_streamed",
            "1",
            "-reconnect_on_network_error",
            "1",
        ],
    );
    args.extend([
        "-reconnect_delay_max".to_string(),
        profile.reconnect_delay_max_secs.to_string(),
        "-timeout".to_string(),
        profile.io_timeout_us.to_string(),
        "-user_agent".to_string(),
        profile.user_agent.clone(),
    ]);
    push_all(
        &mut args,
        &["-fflags", "+genpts+discardcorrupt", "-err_detect", "ignore_err"],
    );

    args.extend(["-i".to_string(), source_url.to_string()]);

    // Deinterlace and encode once, here, so the relays can copy.
    args.extend([
        "-vf".to_string(),
        profile.deinterlace_filter.clone(),
        "-c:v".to_string(),
        profile.video_codec.clone(),
        "-preset".to_string(),
        profile.preset.clone(),
        "-tune".to_string(),
        profile.tune.clone(),
        "-profile:v".to_string(),
        profile.profile.clone(),
        "-level".to_string(),
        profile.level.clone(),
        "-pix_fmt".to_string(),
        profile.pixel_format.clone(),
        "-b:v".to_string(),
        profile.video_bitrate.clone(),
        "-maxrate".to_string(),
        profile.max_rate.clone(),
        "-bufsize".to_string(),
        profile.buffer_size.clone(),
        "-g".to_string(),
        profile.gop_size.to_string(),
        "-sc_threshold".to_string(),
        "0".to_string(),
        "-r".to_string(),
        profile.frame_rate.to_string(),
    ]);

    args.extend([
        "-c:a".to_string(),
        profile.audio_codec.clone(),
        "-ar".to_string(),
        profile.sample_rate.to_string(),
        "-ac".to_string(),
        profile.audio_channels.to_string(),
        "-b:a".to_string(),
        profile.audio_bitrate.clone(),
    ]);

    args.extend([
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        profile.segment_secs.to_string(),
        "-hls_list_size".to_string(),
        profile.list_size.to_string(),
        "-hls_flags".to_string(),
        "delete_segments+append_list".to_string(),
        "-hls_segment_type".to_string(),
        "mpegts".to_string(),
        "-hls_segment_filename".to_string(),
        ffmpeg_path(&work_dir.join("segment_%03d.ts")),
        "-start_number".to_string(),
        "0".to_string(),
        ffmpeg_path(&work_dir.join(super::PLAYLIST_FILE)),
    ]);

    args
}

/// Arguments of a relay stage: loop over the buffered playlist in real time
/// and send one elementary stream, copied, as RTP.
pub fn relay_args(
    kind: MediaKind,
    playlist: &Path,
    host: &str,
    target: &RtpTarget,
    packet_size: u32,
) -> Vec<String> {
    let mut args = Vec::new();

    push_all(&mut args, &["-hide_banner", "-re", "-stream_loop", "-1"]);
    args.extend(["-i".to_string(), ffmpeg_path(playlist)]);

    match kind {
        MediaKind::Video => push_all(&mut args, &["-map", "0:v:0", "-an", "-c:v", "copy"]),
        MediaKind::Audio => push_all(&mut args, &["-map", "0:a:0", "-vn", "-c:a", "copy"]),
    }

    args.extend([
        "-payload_type".to_string(),
        target.payload_type.to_string(),
        "-ssrc".to_string(),
        target.ssrc.to_string(),
        "-f".to_string(),
        "rtp".to_string(),
        format!("rtp://{host}:{}?pkt_size={packet_size}", target.port),
    ]);

    args
}

/// ffmpeg accepts forward slashes on every platform.
fn ffmpeg_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
