//! Node records and the borrowed views handed out by the reader.
//!
//! A [`Node`] is a lightweight view decoded from one record in the body
//! region: it holds the parsed fixed fields plus offsets into the mapping
//! for the variable parts (child map, compressed content). Name and
//! metadata strings borrow from the mapping; owned strings are only
//! produced where the API demands them (`path()`, `dest()`).

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

use crate::compress::MemDecoder;
use crate::diskmap::Map;
use crate::error::{Error, Result};
use crate::pathutil::{dirname, relreduce};
use crate::FileCount;

use super::reader::Archive;

/// Hard ceiling on link-chain hops before resolution fails.
pub const MAX_LINK_DEPTH: u32 = 255;

/// The closed set of node kinds stored in an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Directory,
    Regular,
    Link,
}

impl NodeType {
    pub(crate) fn from_byte(b: u8) -> Result<NodeType> {
        match b {
            1 => Ok(NodeType::Directory),
            2 => Ok(NodeType::Regular),
            3 => Ok(NodeType::Link),
            other => Err(Error::Malformed(format!("invalid node record type {other}"))),
        }
    }

    pub(crate) fn as_byte(self) -> u8 {
        match self {
            NodeType::Directory => 1,
            NodeType::Regular => 2,
            NodeType::Link => 3,
        }
    }
}

#[derive(Clone)]
enum Payload<'a> {
    Directory {
        /// Offset of the embedded child map within the body region.
        map_at: usize,
    },
    Regular {
        meta: Vec<&'a str>,
        full_size: u64,
        compressed_len: u64,
        /// Offset of the compressed payload within the body region.
        data_at: usize,
    },
    Link {
        target: FileCount,
    },
}

/// One archive member, addressable by id.
#[derive(Clone)]
pub struct Node<'a> {
    archive: &'a Archive,
    id: FileCount,
    parent: FileCount,
    name: &'a str,
    payload: Payload<'a>,
}

impl fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type", &self.node_type())
            .finish()
    }
}

impl PartialEq for Node<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.archive, other.archive) && self.id == other.id
    }
}

impl Eq for Node<'_> {}

impl<'a> Node<'a> {
    /// Decodes the record for `id` from the body region.
    pub(crate) fn read(archive: &'a Archive, id: FileCount) -> Result<Node<'a>> {
        let body = archive.body();
        let start = archive.index_entry(id)?;
        let mut r = crate::codec::ByteReader::at(body, start)?;
        let parent = r.read_u64()?;
        let ntype = NodeType::from_byte(r.read_u8()?)?;
        let name = r.read_str16()?;
        let payload = match ntype {
            NodeType::Directory => Payload::Directory { map_at: r.pos() },
            NodeType::Link => Payload::Link {
                target: r.read_u64()?,
            },
            NodeType::Regular => {
                let nmeta = archive.node_meta_keys().len();
                let mut meta = Vec::with_capacity(nmeta);
                for _ in 0..nmeta {
                    meta.push(r.read_str16()?);
                }
                let full_size = r.read_u64()?;
                let compressed_len = r.read_u64()?;
                let data_at = r.pos();
                if compressed_len
                    .checked_add(data_at as u64)
                    .map_or(true, |end| end > body.len() as u64)
                {
                    return Err(Error::Malformed(format!(
                        "content of node {id} extends past end of body region"
                    )));
                }
                Payload::Regular {
                    meta,
                    full_size,
                    compressed_len,
                    data_at,
                }
            }
        };
        Ok(Node {
            archive,
            id,
            parent,
            name,
            payload,
        })
    }

    pub fn id(&self) -> FileCount {
        self.id
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn node_type(&self) -> NodeType {
        match self.payload {
            Payload::Directory { .. } => NodeType::Directory,
            Payload::Regular { .. } => NodeType::Regular,
            Payload::Link { .. } => NodeType::Link,
        }
    }

    /// The parent node; `None` for the root.
    pub fn parent(&self) -> Result<Option<Node<'a>>> {
        if self.id == 0 {
            return Ok(None);
        }
        Ok(Some(Node::read(self.archive, self.parent)?))
    }

    /// The `/`-separated path from the archive root; empty for the root.
    pub fn path(&self) -> Result<String> {
        if self.id == 0 {
            return Ok(String::new());
        }
        let mut parts = vec![self.name];
        let mut cur = Node::read(self.archive, self.parent)?;
        while cur.id != 0 {
            parts.push(cur.name);
            cur = Node::read(self.archive, cur.parent)?;
        }
        parts.reverse();
        Ok(parts.join("/"))
    }

    /// Follows link chains until a non-link node is reached.
    ///
    /// With `limit == 0` the chain may be up to [`MAX_LINK_DEPTH`] hops long
    /// before [`Error::LinkDepthExceeded`] is raised; a nonzero `limit`
    /// stops early and returns whatever node that many hops reached.
    pub fn follow(&self, limit: u32) -> Result<Node<'a>> {
        let mut node = self.clone();
        let mut depth = 0u32;
        while let Payload::Link { target } = node.payload {
            if limit != 0 && depth >= limit {
                return Ok(node);
            }
            depth += 1;
            if limit == 0 && depth > MAX_LINK_DEPTH {
                return Err(Error::LinkDepthExceeded(MAX_LINK_DEPTH));
            }
            node = Node::read(self.archive, target)?;
        }
        Ok(node)
    }

    pub fn is_dir(&self) -> Result<bool> {
        Ok(self.follow(0)?.node_type() == NodeType::Directory)
    }

    pub fn is_reg(&self) -> Result<bool> {
        Ok(self.follow(0)?.node_type() == NodeType::Regular)
    }

    /// A link's destination as a path relative to the link's own directory.
    pub fn dest(&self) -> Result<String> {
        if self.node_type() != NodeType::Link {
            return Err(Error::BadInput(format!(
                "node \"{}\" is not a link",
                self.name
            )));
        }
        let target = self.follow(1)?;
        Ok(relreduce(dirname(&self.path()?), &target.path()?))
    }

    /// Uncompressed size of the (followed) regular file.
    pub fn size(&self) -> Result<u64> {
        match self.follow(0)?.payload {
            Payload::Regular { full_size, .. } => Ok(full_size),
            _ => Err(Error::BadInput(format!(
                "tried to get size of non-regular file \"{}\"",
                self.name
            ))),
        }
    }

    /// The metadata value for `key` on the (followed) regular file.
    pub fn meta(&self, key: &str) -> Result<&'a str> {
        let node = self.follow(0)?;
        match node.payload {
            Payload::Regular { ref meta, .. } => {
                let idx = self.archive.meta_index(key)?;
                Ok(meta[idx])
            }
            _ => Err(Error::BadInput(format!(
                "tried to get metadata of non-regular file \"{}\"",
                self.name
            ))),
        }
    }

    fn child_map(&self) -> Result<Map<'a>> {
        match self.follow(0)?.payload {
            Payload::Directory { map_at } => Map::parse(self.archive.body(), map_at),
            _ => Err(Error::BadInput(format!(
                "tried to get children of non-directory \"{}\"",
                self.name
            ))),
        }
    }

    /// Iterates the (followed) directory's children in hash order.
    pub fn children(&self) -> Result<Children<'a>> {
        Ok(Children {
            archive: self.archive,
            map: self.child_map()?,
            idx: 0,
        })
    }

    /// Looks up one child of the (followed) directory by name.
    pub fn child(&self, name: &str) -> Result<Option<Node<'a>>> {
        let map = self.child_map()?;
        let archive = self.archive;
        match map.get(name, |id| archive.node_name_at(id))? {
            Some(id) => Ok(Some(Node::read(archive, id)?)),
            None => Ok(None),
        }
    }

    /// A seekable decompression stream over the (followed) file's content.
    pub fn content(&self) -> Result<MemDecoder<'a>> {
        match self.follow(0)?.payload {
            Payload::Regular {
                full_size,
                compressed_len,
                data_at,
                ..
            } => {
                let body = self.archive.body();
                let end = data_at + compressed_len as usize;
                MemDecoder::new(&body[data_at..end], full_size)
            }
            _ => Err(Error::BadInput(format!(
                "tried to get content of non-regular file \"{}\"",
                self.name
            ))),
        }
    }

    /// Recursively extracts this node under the existing directory `dest`.
    ///
    /// Directories become real directories, regular files are decompressed
    /// into place, and links become symlinks pointing at their in-archive
    /// destination path.
    pub fn extract(&self, dest: &Path) -> Result<()> {
        let target = if self.name.is_empty() {
            dest.to_path_buf()
        } else {
            dest.join(self.name)
        };
        match self.payload {
            Payload::Directory { .. } => {
                std::fs::create_dir_all(&target)?;
                let map = self.child_map()?;
                for i in 0..map.len() {
                    Node::read(self.archive, map.value_at(i)?)?.extract(&target)?;
                }
            }
            Payload::Regular { .. } => {
                let mut out = File::create(&target)?;
                io::copy(&mut self.content()?, &mut out)?;
            }
            Payload::Link { .. } => {
                #[cfg(unix)]
                std::os::unix::fs::symlink(self.dest()?, &target)?;
                #[cfg(not(unix))]
                return Err(Error::BadInput(format!(
                    "cannot extract symlink \"{}\" on this platform",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Forward iterator over a directory's child map.
///
/// Yields `(name, child_id)` pairs in hash order; names are borrowed from
/// the mapping.
pub struct Children<'a> {
    archive: &'a Archive,
    map: Map<'a>,
    idx: u64,
}

impl<'a> Children<'a> {
    pub fn len(&self) -> u64 {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Materializes all children as a name → id map.
    pub fn all(self) -> Result<HashMap<String, FileCount>> {
        let archive = self.archive;
        let mut out = HashMap::with_capacity(self.map.len() as usize);
        for (_, id) in self.map.entries() {
            out.insert(archive.node_name_at(id)?.to_owned(), id);
        }
        Ok(out)
    }
}

impl<'a> Iterator for Children<'a> {
    type Item = Result<(&'a str, FileCount)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.idx >= self.map.len() {
            return None;
        }
        let item = (|| {
            let id = self.map.value_at(self.idx)?;
            Ok((self.archive.node_name_at(id)?, id))
        })();
        self.idx += 1;
        Some(item)
    }
}
