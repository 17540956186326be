//! Cached playlist lookup.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::entry::PlaylistEntry;
use crate::error::{ParseError, ResolveError};
use crate::parser::{Playlist, parse_playlist};

struct CachedPlaylist {
    raw: String,
    parsed: Result<Arc<Playlist>, ParseError>,
}

/// Resolves channel names against a playlist document.
///
/// The parsed playlist (or its parse error) is kept until a call arrives with
/// a document that differs byte-for-byte from the cached one.
#[derive(Default)]
pub struct PlaylistResolver {
    cache: Mutex<Option<CachedPlaylist>>,
    rebuilds: AtomicU64,
}

impl PlaylistResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Best entry of `raw` for `query`.
    pub fn resolve(&self, raw: &str, query: &str) -> Result<PlaylistEntry, ResolveError> {
        let playlist = self.playlist(raw)?;
        if playlist.is_empty() {
            return Err(ResolveError::NotFound(query.to_string()));
        }

        playlist
            .find(query)
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(query.to_string()))
    }

    /// Parsed form of `raw`, from cache when unchanged.
    pub fn playlist(&self, raw: &str) -> Result<Arc<Playlist>, ResolveError> {
        if raw.trim().is_empty() {
            return Err(ResolveError::Empty);
        }

        let mut cache = self.cache.lock();
        let stale = cache.as_ref().is_none_or(|cached| cached.raw != raw);
        if stale {
            let parsed = parse_playlist(raw).map(Arc::new);
            match &parsed {
                Ok(playlist) => debug!(entries = playlist.len(), "Playlist changed, index rebuilt"),
                Err(e) => debug!(error = %e, "Playlist changed and failed to parse"),
            }
            *cache = Some(CachedPlaylist {
                raw: raw.to_string(),
                parsed,
            });
            self.rebuilds.fetch_add(1, Ordering::Relaxed);
        }

        match cache.as_ref().map(|cached| &cached.parsed) {
            Some(Ok(playlist)) => Ok(Arc::clone(playlist)),
            Some(Err(e)) => Err(ResolveError::Parse(e.clone())),
            None => Err(ResolveError::Empty),
        }
    }

    /// How many times a document has been parsed.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds.load(Ordering::Relaxed)
    }
}
