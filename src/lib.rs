//! ZSR — a read-optimized archive format for directory trees.
//!
//! An archive packs files, directories, and symbolic links into one file
//! from which any member can be located, read, and decompressed at random
//! without scanning the rest. File contents are individually xz-compressed;
//! directory lookups go through an embedded hash map; an optional trailer
//! carries side data such as the title search index built by [`search`].
//!
//! Building and reading are separate one-way operations: [`Writer`] walks a
//! source tree once and emits the archive, [`Archive`] memory-maps an
//! existing archive read-only. Archives are never modified in place.

pub mod archive;
pub mod codec;
pub mod compress;
pub mod diskmap;
pub mod display;
pub mod error;
pub mod pathutil;
pub mod search;

pub use archive::{Archive, Children, FileNode, LinkPolicy, Node, NodeType, Writer};
pub use error::{Error, Result};
pub use search::{DiskTree, DiskTreeWriter};

/// Identifies an archive file; the first four bytes of the format.
pub const MAGIC: &[u8] = b"!ZSR";

/// Format version understood by this crate. Readers refuse any other value.
pub const VERSION: u16 = 1;

/// Node identifier: ids are assigned sequentially from 0 (the root) during
/// the build walk.
pub type FileCount = u64;

/// A byte position within an archive.
pub type Offset = u64;
