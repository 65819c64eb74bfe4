//! The archive format: building, reading, and member access.

pub mod node;
pub mod reader;
pub mod writer;

pub use node::{Children, Node, NodeType, MAX_LINK_DEPTH};
pub use reader::Archive;
pub use writer::{FileNode, LinkPolicy, Writer};
