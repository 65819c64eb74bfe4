//! Reading archives: memory mapping, header parsing, and path resolution.
//!
//! [`Archive::open`] maps the file read-only and validates the header; all
//! later operations are pure functions of the mapping, so a shared reference
//! to an `Archive` may be used from any number of threads. Each content
//! stream handed out by a node carries its own decoder state.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::codec::ByteReader;
use crate::error::{Error, Result};
use crate::{FileCount, MAGIC, VERSION};

use super::node::Node;

/// A read-only archive backed by a memory mapping.
pub struct Archive {
    map: Mmap,
    /// Offset of the body region (first node record).
    data_start: usize,
    /// Offset of the `size` field terminating the body.
    body_end: usize,
    /// Offset of the first index-table entry.
    index_start: usize,
    /// Offset of the opaque trailer.
    trailer_start: usize,
    size: FileCount,
    archive_meta: HashMap<String, String>,
    node_meta: Vec<String>,
}

impl Archive {
    /// Opens and validates an archive file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Archive> {
        let file = File::open(path.as_ref())?;
        let file_len = file.metadata()?.len();
        let min = (MAGIC.len() + 2 + 8) as u64;
        if file_len < min {
            return Err(Error::Malformed("file too small".into()));
        }
        let map = unsafe { Mmap::map(&file)? };

        let mut r = ByteReader::new(&map);
        if r.take(MAGIC.len())? != MAGIC {
            return Err(Error::Malformed("missing archive magic number".into()));
        }
        let version = r.read_u16()?;
        if version != VERSION {
            return Err(Error::Malformed(format!(
                "version {VERSION} reader cannot read a version {version} archive"
            )));
        }
        let body_end = r.read_u64()?;
        if body_end > map.len() as u64 {
            return Err(Error::Malformed("file too small".into()));
        }
        let body_end = body_end as usize;

        let mut archive_meta = HashMap::new();
        let nmeta = r.read_u8()?;
        for _ in 0..nmeta {
            let key = r.read_str16()?.to_owned();
            let value = r.read_str16()?.to_owned();
            archive_meta.insert(key, value);
        }
        let nmeta = r.read_u8()?;
        let mut node_meta = Vec::with_capacity(nmeta as usize);
        for _ in 0..nmeta {
            node_meta.push(r.read_str16()?.to_owned());
        }
        let data_start = r.pos();
        if body_end < data_start {
            return Err(Error::Malformed("body region overlaps header".into()));
        }

        let mut r = ByteReader::at(&map, body_end)?;
        let size = r.read_u64()?;
        let index_start = r.pos();
        let index_end = size
            .checked_mul(8)
            .and_then(|b| b.checked_add(index_start as u64))
            .filter(|&e| e <= map.len() as u64)
            .ok_or_else(|| Error::Malformed("file too small".into()))?;
        let trailer_start = index_end as usize;

        Ok(Archive {
            map,
            data_start,
            body_end,
            index_start,
            trailer_start,
            size,
            archive_meta,
            node_meta,
        })
    }

    /// Number of nodes in the archive.
    pub fn size(&self) -> FileCount {
        self.size
    }

    /// Archive-level metadata key/value pairs.
    pub fn archive_meta(&self) -> &HashMap<String, String> {
        &self.archive_meta
    }

    /// The per-regular-file metadata schema, in record order.
    pub fn node_meta_keys(&self) -> &[String] {
        &self.node_meta
    }

    /// The opaque byte region following the index table.
    pub fn trailer(&self) -> &[u8] {
        &self.map[self.trailer_start..]
    }

    /// The body region holding all node records.
    pub(crate) fn body(&self) -> &[u8] {
        &self.map[self.data_start..self.body_end]
    }

    /// The body offset of the record for node `id`.
    pub(crate) fn index_entry(&self, id: FileCount) -> Result<usize> {
        if id >= self.size {
            return Err(Error::NotFound(format!(
                "node id {id} out of range ({} nodes)",
                self.size
            )));
        }
        let at = self.index_start + (id * 8) as usize;
        let mut r = ByteReader::at(&self.map, at)?;
        let off = r.read_u64()?;
        if off > (self.body_end - self.data_start) as u64 {
            return Err(Error::Malformed(format!(
                "record offset of node {id} lies outside the body region"
            )));
        }
        Ok(off as usize)
    }

    /// Reads the name of node `id` directly from its record.
    ///
    /// Used by child-map lookups to compare candidate entries without
    /// decoding whole records.
    pub(crate) fn node_name_at(&self, id: FileCount) -> Result<&str> {
        let start = self.index_entry(id)?;
        // Skip parent id and type byte to land on the name field.
        let mut r = ByteReader::at(self.body(), start)?;
        r.take(8 + 1)?;
        r.read_str16()
    }

    pub(crate) fn meta_index(&self, key: &str) -> Result<usize> {
        self.node_meta
            .iter()
            .position(|k| k == key)
            .ok_or_else(|| Error::NotFound(format!("metadata key \"{key}\" is not in the schema")))
    }

    /// Constructs the node view for `id`.
    pub fn index(&self, id: FileCount) -> Result<Node<'_>> {
        Node::read(self, id)
    }

    /// The root node.
    pub fn root(&self) -> Result<Node<'_>> {
        self.index(0)
    }

    /// Resolves a `/`-separated path, returning `None` when a component is
    /// missing or an intermediate component is not a directory.
    ///
    /// Empty components and `.` are skipped; `..` ascends (the root's parent
    /// is the root itself). The current node must be a directory at every
    /// component boundary, including skipped ones, so a trailing `/` after a
    /// regular file does not resolve.
    pub fn try_get(&self, path: &str) -> Result<Option<Node<'_>>> {
        if self.size == 0 {
            return Ok(None);
        }
        let mut node = self.index(0)?;
        for item in path.split('/') {
            if !node.is_dir()? {
                return Ok(None);
            }
            if item.is_empty() || item == "." {
                continue;
            }
            if item == ".." {
                if let Some(parent) = node.parent()? {
                    node = parent;
                }
                continue;
            }
            match node.child(item)? {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }
        Ok(Some(node))
    }

    /// Resolves a path, failing with [`Error::NotFound`] when it is missing.
    pub fn get(&self, path: &str) -> Result<Node<'_>> {
        self.try_get(path)?
            .ok_or_else(|| Error::NotFound(format!("no such member \"{path}\"")))
    }

    /// True only when a regular file (possibly through links) exists at `path`.
    pub fn check(&self, path: &str) -> bool {
        matches!(
            self.try_get(path).map(|n| match n {
                Some(node) => node.is_reg().unwrap_or(false),
                None => false,
            }),
            Ok(true)
        )
    }
}
