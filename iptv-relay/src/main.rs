use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use iptv_playlist::{PlaylistEntry, PlaylistResolver};
use iptv_relay::config::RelayConfig;
use iptv_relay::pipeline::{PipelineLauncher, RtpTarget, RtpTargets, TracingSink};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the ffmpeg binary
    #[arg(long, global = true, env = "FFMPEG_PATH")]
    ffmpeg: Option<String>,

    /// Root directory for per-channel HLS buffers
    #[arg(long, global = true, env = "IPTV_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter directive, e.g. "iptv_relay=debug"
    #[arg(long, global = true)]
    log_filter: Option<String>,

    /// Also write daily-rolling log files here
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Buffer a source and relay it as RTP until interrupted
    Run {
        /// Direct source URL
        #[arg(long, conflicts_with = "playlist", required_unless_present = "playlist")]
        url: Option<String>,

        /// Extended M3U playlist to pick the source from
        #[arg(long, requires = "channel")]
        playlist: Option<PathBuf>,

        /// Playlist channel name, matched fuzzily
        #[arg(long)]
        channel: Option<String>,

        /// RTP destination host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value_t = 5004)]
        video_port: u16,

        #[arg(long, default_value_t = 5006)]
        audio_port: u16,

        /// Name of the buffer directory under the work root
        #[arg(long, default_value = "cli")]
        session: String,
    },

    /// Print the playlist entry best matching QUERY as JSON
    Resolve {
        #[arg(long)]
        playlist: PathBuf,

        query: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _guard = iptv_relay::logging::init_logging(args.log_filter.as_deref(), args.log_dir.as_deref())
        .context("Failed to initialize logging")?;

    let mut config = match &args.config {
        Some(path) => RelayConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RelayConfig::from_env(),
    };
    if let Some(ffmpeg) = args.ffmpeg {
        config.pipeline.ffmpeg_path = ffmpeg;
    }
    if let Some(work_dir) = args.work_dir {
        config.pipeline.work_root = work_dir;
    }
    config.validate()?;

    match args.command {
        Commands::Resolve { playlist, query } => {
            let entry = resolve_entry(&playlist, &query)?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
            Ok(())
        }
        Commands::Run {
            url,
            playlist,
            channel,
            host,
            video_port,
            audio_port,
            session,
        } => {
            let source_url = match (url, playlist, channel) {
                (Some(url), _, _) => url,
                (None, Some(playlist), Some(channel)) => {
                    let entry = resolve_entry(&playlist, &channel)?;
                    info!(channel = %entry.name, "Resolved playlist channel");
                    entry.url
                }
                _ => anyhow::bail!("either --url or --playlist with --channel is required"),
            };
            url::Url::parse(&source_url).context("Source is not an absolute URL")?;

            let targets = RtpTargets {
                host,
                video: RtpTarget {
                    port: video_port,
                    payload_type: config.rtp.video_payload_type,
                    ssrc: config.rtp.video_ssrc,
                },
                audio: RtpTarget {
                    port: audio_port,
                    payload_type: config.rtp.audio_payload_type,
                    ssrc: config.rtp.audio_ssrc,
                },
            };
            run_relay(config, &source_url, &session, &targets).await
        }
    }
}

fn resolve_entry(playlist: &std::path::Path, query: &str) -> anyhow::Result<PlaylistEntry> {
    let raw = std::fs::read_to_string(playlist)
        .with_context(|| format!("Failed to read playlist {}", playlist.display()))?;
    let entry = PlaylistResolver::new()
        .resolve(&raw, query)
        .map_err(iptv_relay::Error::from)?;
    Ok(entry)
}

async fn run_relay(
    config: RelayConfig,
    source_url: &str,
    session: &str,
    targets: &RtpTargets,
) -> anyhow::Result<()> {
    let work_dir = config.pipeline.work_dir(session);
    let watchdog_interval = config.watchdog_interval();
    let launcher = PipelineLauncher::new(config.pipeline, Arc::new(TracingSink));

    let mut pipeline = tokio::select! {
        result = launcher.launch(source_url, &work_dir, targets) => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted while buffering");
            return Ok(());
        }
    };

    info!(
        host = %targets.host,
        video_port = targets.video.port,
        audio_port = targets.audio.port,
        "Relaying, press Ctrl-C to stop"
    );

    let mut ticker = tokio::time::interval(watchdog_interval.max(Duration::from_millis(100)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            _ = ticker.tick() => {
                if let Some(stage) = pipeline.exited_stage() {
                    error!(%stage, "Pipeline process died");
                    pipeline.kill_all();
                    anyhow::bail!("{stage} process exited");
                }
            }
        }
    }

    pipeline.kill_all();
    Ok(())
}
