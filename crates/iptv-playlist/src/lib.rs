//! # IPTV Playlist
//!
//! Parsing and lookup for extended M3U channel playlists.
//!
//! A playlist is parsed into [`PlaylistEntry`] values, indexed for weighted
//! fuzzy search and cached by [`PlaylistResolver`] until the raw document
//! changes.
//!
//! ```text
//! #EXTM3U
//! #EXTINF:-1 tvg-id="bbc1.uk" tvg-logo="http://logo/bbc1.png" group-title="UK",BBC One
//! http://example.com/bbc1.m3u8
//! ```

mod entry;
mod error;
mod matcher;
mod parser;
mod resolver;

pub use entry::PlaylistEntry;
pub use error::{ParseError, ResolveError};
pub use matcher::{FuzzyIndex, MatchWeights, RELEVANCE_FLOOR};
pub use parser::{Playlist, parse_playlist};
pub use resolver::PlaylistResolver;
