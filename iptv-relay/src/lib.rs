//! Relays live IPTV sources into voice rooms.
//!
//! A source URL, given directly or picked from an extended M3U playlist, is
//! pulled by ffmpeg into a rolling on-disk HLS buffer. Once the buffer is deep
//! enough, two more ffmpeg processes replay it as video and audio RTP into
//! UDP transports of the room's media router.

pub mod config;
pub mod error;
pub mod logging;
pub mod media;
pub mod pipeline;
pub mod plugin;
pub mod session;

pub use error::{Error, ErrorKind, Result};
