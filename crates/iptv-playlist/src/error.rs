use thiserror::Error;

/// A playlist document could not be parsed.
///
/// Cloneable so a resolver can keep returning the same error until the
/// document changes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("playlist does not start with #EXTM3U")]
    MissingHeader,

    #[error("malformed #EXTINF on line {line}: {reason}")]
    MalformedInfo { line: usize, reason: &'static str },

    #[error("entry declared on line {line} has no URL")]
    MissingUrl { line: usize },
}

/// Failure to resolve a query against a playlist.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("playlist is empty")]
    Empty,

    #[error("invalid playlist: {0}")]
    Parse(#[from] ParseError),

    #[error("no channel matching \"{0}\"")]
    NotFound(String),
}
