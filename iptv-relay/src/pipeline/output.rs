//! Draining of child process output.
//!
//! ffmpeg rewrites its progress line with carriage returns (`\r`). When the
//! output is piped those updates are not newline-delimited, so records are
//! split on either `\n` or `\r`. Splitting happens on raw bytes; neither
//! delimiter can occur inside a multi-byte UTF-8 sequence, so each record is
//! decoded on its own.

use std::fmt;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tracing::{debug, warn};

use super::Stage;

/// Which output stream a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        })
    }
}

/// Receives everything supervised processes print.
pub trait OutputSink: Send + Sync + 'static {
    fn record(&self, stage: Stage, stream: OutputStream, line: &str);

    /// The stream could not be read any further.
    fn read_error(&self, stage: Stage, stream: OutputStream, error: &io::Error);
}

/// Forwards process output to `tracing` under the `iptv_relay::ffmpeg` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn record(&self, stage: Stage, stream: OutputStream, line: &str) {
        debug!(target: "iptv_relay::ffmpeg", %stage, %stream, "{line}");
    }

    fn read_error(&self, stage: Stage, stream: OutputStream, error: &io::Error) {
        warn!(target: "iptv_relay::ffmpeg", %stage, %stream, "Failed to read process output: {error}");
    }
}

/// Reads an async stream and yields text records delimited by `\n` or `\r`.
pub struct OutputRecordReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    scratch: [u8; 4096],
}

impl<R> OutputRecordReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
            scratch: [0u8; 4096],
        }
    }

    /// Next non-blank record, or `None` at end of stream.
    pub async fn next_record(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(idx) = self.pending.iter().position(|&b| is_delimiter(b)) {
                let record = decode(&self.pending[..idx]);
                let skip = self.pending[idx..]
                    .iter()
                    .take_while(|&&b| is_delimiter(b))
                    .count();
                self.pending.drain(..idx + skip);

                if record.is_empty() {
                    continue;
                }
                return Ok(Some(record));
            }

            let n = self.reader.read(&mut self.scratch).await?;
            if n == 0 {
                let record = decode(&self.pending);
                self.pending.clear();
                return Ok((!record.is_empty()).then_some(record));
            }

            self.pending.extend_from_slice(&self.scratch[..n]);
        }
    }
}

fn is_delimiter(b: u8) -> bool {
    matches!(b, b'\n' | b'\r')
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

/// Forward every record of `reader` to `sink` until the stream ends or fails.
pub(super) async fn drain<R>(
    stage: Stage,
    stream: OutputStream,
    reader: R,
    sink: std::sync::Arc<dyn OutputSink>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = OutputRecordReader::new(reader);
    loop {
        match reader.next_record().await {
            Ok(Some(line)) => sink.record(stage, stream, &line),
            Ok(None) => break,
            Err(e) => {
                sink.read_error(stage, stream, &e);
                break;
            }
        }
    }
    debug!(%stage, %stream, "Output stream closed");
}
