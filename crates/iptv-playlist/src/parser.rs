//! Extended M3U parser.
//!
//! Only the directives that carry channel metadata are interpreted:
//! `#EXTM3U`, `#EXTINF` and `#EXTGRP`. Everything else starting with `#` is
//! skipped. A bare URL line without a preceding `#EXTINF` becomes an entry
//! named after the URL.

use tracing::debug;

use crate::entry::PlaylistEntry;
use crate::error::ParseError;
use crate::matcher::FuzzyIndex;

const HEADER: &str = "#EXTM3U";
const INFO: &str = "#EXTINF:";
const GROUP: &str = "#EXTGRP:";

/// A parsed playlist together with its search index.
#[derive(Debug)]
pub struct Playlist {
    entries: Vec<PlaylistEntry>,
    index: FuzzyIndex,
}

impl Playlist {
    pub fn new(entries: Vec<PlaylistEntry>) -> Self {
        let index = FuzzyIndex::build(&entries);
        Self { entries, index }
    }

    pub fn entries(&self) -> &[PlaylistEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Best-scoring entry for `query`, if any clears the relevance floor.
    pub fn find(&self, query: &str) -> Option<&PlaylistEntry> {
        self.index
            .best_match(query)
            .map(|(idx, _)| &self.entries[idx])
    }
}

/// `#EXTINF` seen, waiting for its URL line.
struct PendingEntry {
    line: usize,
    entry: PlaylistEntry,
}

/// Parse an extended M3U document.
pub fn parse_playlist(raw: &str) -> Result<Playlist, ParseError> {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let mut lines = raw
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    match lines.next() {
        Some((_, first)) if first.starts_with(HEADER) => {}
        _ => return Err(ParseError::MissingHeader),
    }

    let mut entries = Vec::new();
    let mut pending: Option<PendingEntry> = None;

    for (line_no, line) in lines {
        if let Some(info) = line.strip_prefix(INFO) {
            if let Some(previous) = pending.take() {
                return Err(ParseError::MissingUrl {
                    line: previous.line,
                });
            }
            pending = Some(PendingEntry {
                line: line_no,
                entry: parse_info(info, line_no)?,
            });
        } else if let Some(group) = line.strip_prefix(GROUP) {
            if let Some(p) = pending.as_mut()
                && p.entry.group.is_none()
            {
                p.entry.group = non_empty(group);
            }
        } else if line.starts_with('#') {
            continue;
        } else {
            let entry = match pending.take() {
                Some(PendingEntry { mut entry, .. }) => {
                    entry.url = line.to_string();
                    entry
                }
                None => PlaylistEntry::new(line, line),
            };
            entries.push(entry);
        }
    }

    if let Some(dangling) = pending {
        return Err(ParseError::MissingUrl {
            line: dangling.line,
        });
    }

    debug!(entries = entries.len(), "Parsed playlist");
    Ok(Playlist::new(entries))
}

/// Parse the part after `#EXTINF:`, i.e. `<duration> key="value" ...,<title>`.
fn parse_info(info: &str, line: usize) -> Result<PlaylistEntry, ParseError> {
    let split = title_separator(info).ok_or(ParseError::MalformedInfo {
        line,
        reason: "missing ',' before the title",
    })?;
    let (head, title) = (&info[..split], info[split + 1..].trim());

    let mut entry = PlaylistEntry::new(title, "");
    // The duration is the first token; it is not used for live channels.
    let attrs = head
        .trim_start()
        .split_once(char::is_whitespace)
        .map_or("", |(_, rest)| rest);

    for (key, value) in parse_attributes(attrs, line)? {
        match key.to_ascii_lowercase().as_str() {
            "tvg-id" => entry.tvg_id = non_empty(value),
            "tvg-name" => entry.tvg_name = non_empty(value),
            "tvg-logo" => entry.logo = non_empty(value),
            "group-title" => entry.group = non_empty(value),
            _ => {}
        }
    }

    if entry.name.is_empty()
        && let Some(tvg_name) = entry.tvg_name.clone()
    {
        entry.name = tvg_name;
    }

    Ok(entry)
}

/// Index of the first comma outside double quotes.
fn title_separator(info: &str) -> Option<usize> {
    let mut quoted = false;
    for (idx, c) in info.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => return Some(idx),
            _ => {}
        }
    }
    None
}

fn parse_attributes(attrs: &str, line: usize) -> Result<Vec<(&str, &str)>, ParseError> {
    let mut out = Vec::new();
    let mut rest = attrs.trim();

    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else {
            // Stray bare words are tolerated.
            break;
        };
        let key = rest[..eq].trim();
        let after = rest[eq + 1..].trim_start();

        let (value, remainder) = if let Some(quoted) = after.strip_prefix('"') {
            let end = quoted.find('"').ok_or(ParseError::MalformedInfo {
                line,
                reason: "unterminated attribute value",
            })?;
            (&quoted[..end], &quoted[end + 1..])
        } else {
            let end = after.find(char::is_whitespace).unwrap_or(after.len());
            (&after[..end], &after[end..])
        };

        out.push((key, value));
        rest = remainder.trim_start();
    }

    Ok(out)
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}
