//! Crate-wide error type.
//!
//! Every failure mode of the archive, the child map, the compression streams
//! and the title index is a variant here; nothing in the library panics on
//! bad input. The CLI wraps these in `anyhow` for presentation.

use std::io;

/// Errors produced by archive building, reading, and searching.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The file is not a valid archive: bad magic, unsupported version,
    /// truncation, an offset outside the file, an invalid record type, or an
    /// unresolved link discovered at build time.
    #[error("malformed archive: {0}")]
    Malformed(String),

    /// A path, metadata key, or node id that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An underlying OS I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// LZMA encoder/decoder setup or coding failure, including trailing
    /// unprocessed input after the end of a stream.
    #[error("compression: {0}")]
    Compression(String),

    /// A link chain exceeded the hard hop limit.
    #[error("links exceed maximum depth of {0}")]
    LinkDepthExceeded(u32),

    /// The on-disk title index is self-inconsistent (cycle or out-of-range
    /// subtree offset).
    #[error("index corruption: {0}")]
    IndexCorruption(String),

    /// The caller asked for something the node cannot answer: content of a
    /// non-regular file, children of a non-directory, metadata of a
    /// non-regular file, or an empty path where one is required.
    #[error("bad input: {0}")]
    BadInput(String),
}

impl From<xz2::stream::Error> for Error {
    fn from(e: xz2::stream::Error) -> Self {
        Error::Compression(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
