use serde::Serialize;

/// A single playable channel from a playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistEntry {
    /// Display name (the `#EXTINF` title).
    pub name: String,
    /// Playable media URL.
    pub url: String,
    /// `tvg-id` attribute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tvg_id: Option<String>,
    /// `tvg-name` attribute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tvg_name: Option<String>,
    /// `tvg-logo` attribute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    /// `group-title` attribute or `#EXTGRP` directive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl PlaylistEntry {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            tvg_id: None,
            tvg_name: None,
            logo: None,
            group: None,
        }
    }

    /// The secondary identifier used for matching: `tvg-id`, else `tvg-name`.
    pub fn alternate_name(&self) -> Option<&str> {
        self.tvg_id.as_deref().or(self.tvg_name.as_deref())
    }
}
