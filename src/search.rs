//! Title search index: a radix tree over lowercased title suffixes.
//!
//! [`DiskTreeWriter`] builds the tree in memory. Every inserted title is
//! Unicode-lowercased, and one suffix is inserted per word-start position
//! (the beginning of the title, a non-space character after a space, or an
//! alphanumeric character after a non-alphanumeric). Prefix search on the
//! resulting tree therefore matches at any word of a title.
//!
//! The serialized form is one packed node per tree node: a child table of
//! `(label_len: u32, label, child_offset: u64)` entries followed by a value
//! table of node ids, with child offsets relative to the start of the tree
//! region and back-patched as children are written. [`DiskTree`] searches
//! that form in place; it keeps no cursor state, so any number of searches
//! may run concurrently over one region.
//!
//! Tree edges are byte strings: labels may split inside a multi-byte
//! character, and queries are matched bytewise against the lowercased
//! suffixes, exactly as they were serialized.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::{Seek, SeekFrom, Write};

use crate::codec::{write_u32, write_u64, ByteReader};
use crate::displaylevel;
use crate::error::{Error, Result};
use crate::FileCount;

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

// ── In-memory tree ───────────────────────────────────────────────────────────

#[derive(Default)]
struct TreeNode {
    children: BTreeMap<Vec<u8>, TreeNode>,
    values: BTreeSet<FileCount>,
}

impl TreeNode {
    fn insert(&mut self, key: &[u8], id: FileCount) {
        if key.is_empty() {
            self.values.insert(id);
            return;
        }
        let matched = self.children.keys().find_map(|label| {
            let common = common_prefix_len(label, key);
            (common > 0).then(|| (label.clone(), common))
        });
        match matched {
            None => {
                let mut leaf = TreeNode::default();
                leaf.values.insert(id);
                self.children.insert(key.to_vec(), leaf);
            }
            Some((label, common)) if common == label.len() => {
                self.children
                    .get_mut(&label)
                    .expect("label came from this map")
                    .insert(&key[common..], id);
            }
            Some((label, common)) => {
                // The key diverges inside the edge: split the edge at the
                // common prefix and hang both remainders off the new node.
                let existing = self
                    .children
                    .remove(&label)
                    .expect("label came from this map");
                let mut mid = TreeNode::default();
                mid.children.insert(label[common..].to_vec(), existing);
                mid.insert(&key[common..], id);
                self.children.insert(label[..common].to_vec(), mid);
            }
        }
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Builds the title index in memory and serializes it.
#[derive(Default)]
pub struct DiskTreeWriter {
    root: TreeNode,
}

impl DiskTreeWriter {
    pub fn new() -> DiskTreeWriter {
        DiskTreeWriter::default()
    }

    /// Indexes `title` under `id`: the title is lowercased and one suffix is
    /// inserted per word-start position. Empty titles are ignored.
    pub fn add(&mut self, title: &str, id: FileCount) {
        if title.is_empty() {
            return;
        }
        let lower: String = title.chars().flat_map(char::to_lowercase).collect();
        let mut prev: Option<char> = None;
        for (pos, cur) in lower.char_indices() {
            let word_start = match prev {
                None => true,
                Some(p) => {
                    (p.is_whitespace() && !cur.is_whitespace())
                        || (!p.is_alphanumeric() && cur.is_alphanumeric())
                }
            };
            if word_start {
                self.root.insert(lower[pos..].as_bytes(), id);
            }
            prev = Some(cur);
        }
    }

    /// Like [`add`](Self::add) for raw bytes; titles that are not valid
    /// UTF-8 are logged and skipped.
    pub fn add_raw(&mut self, title: &[u8], id: FileCount) {
        match std::str::from_utf8(title) {
            Ok(title) => self.add(title, id),
            Err(_) => {
                displaylevel!(1, "could not decode title {:?} as UTF-8", title);
            }
        }
    }

    /// Serializes the tree into `out`. Offsets are relative to the sink
    /// position at the time of the call, so the tree may be embedded in a
    /// larger stream.
    pub fn write<W: Write + Seek>(&self, out: &mut W) -> Result<()> {
        let tree_start = out.stream_position()?;
        Self::write_node(out, &self.root, tree_start)
    }

    fn write_node<W: Write + Seek>(out: &mut W, node: &TreeNode, tree_start: u64) -> Result<()> {
        write_u32(out, node.children.len() as u32)?;
        let mut patch_at = Vec::with_capacity(node.children.len());
        for label in node.children.keys() {
            write_u32(out, label.len() as u32)?;
            out.write_all(label)?;
            patch_at.push(out.stream_position()?);
            write_u64(out, 0)?; // placeholder for the child offset
        }
        write_u32(out, node.values.len() as u32)?;
        for &value in &node.values {
            write_u64(out, value)?;
        }
        for (child, patch) in node.children.values().zip(patch_at) {
            let child_pos = out.stream_position()?;
            out.seek(SeekFrom::Start(patch))?;
            write_u64(out, child_pos - tree_start)?;
            out.seek(SeekFrom::Start(child_pos))?;
            Self::write_node(out, child, tree_start)?;
        }
        Ok(())
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

/// Searches a serialized title index in place.
#[derive(Clone, Copy)]
pub struct DiskTree<'a> {
    base: &'a [u8],
}

impl<'a> DiskTree<'a> {
    /// Wraps a byte view of the tree region (typically the archive trailer).
    pub fn new(base: &'a [u8]) -> DiskTree<'a> {
        DiskTree { base }
    }

    fn read_node(&self, at: u64) -> Result<(Vec<(&'a [u8], u64)>, Vec<FileCount>)> {
        let corrupt = |_| Error::IndexCorruption(format!("node offset {at} is out of range"));
        let mut r = ByteReader::at(self.base, at as usize).map_err(corrupt)?;
        let nchild = r.read_u32().map_err(corrupt)?;
        let mut children = Vec::with_capacity(nchild as usize);
        for _ in 0..nchild {
            let len = r.read_u32().map_err(corrupt)?;
            let label = r.take(len as usize).map_err(corrupt)?;
            let offset = r.read_u64().map_err(corrupt)?;
            children.push((label, offset));
        }
        let nval = r.read_u32().map_err(corrupt)?;
        let mut values = Vec::with_capacity(nval as usize);
        for _ in 0..nval {
            values.push(r.read_u64().map_err(corrupt)?);
        }
        Ok((children, values))
    }

    /// Descends from the root along `query`, consuming the shared prefix of
    /// each matching edge. Returns the node where the query is exhausted.
    fn node_find(&self, query: &[u8]) -> Result<Option<u64>> {
        let mut cur = 0u64;
        let mut idx = 0usize;
        while idx < query.len() {
            let (children, _) = self.read_node(cur)?;
            let mut next = None;
            for (label, offset) in children {
                let take = label.len().min(query.len() - idx);
                if query[idx..idx + take] == label[..take] {
                    next = Some((offset, take));
                    break;
                }
            }
            match next {
                Some((offset, take)) => {
                    cur = offset;
                    idx += take;
                }
                None => return Ok(None),
            }
        }
        Ok(Some(cur))
    }

    fn subtree_closure(&self, at: u64, out: &mut HashSet<FileCount>) -> Result<()> {
        let (children, values) = self.read_node(at)?;
        out.extend(values);
        for (_, offset) in children {
            if offset == at {
                return Err(Error::IndexCorruption(
                    "loop detected in search tree".into(),
                ));
            }
            self.subtree_closure(offset, out)?;
        }
        Ok(())
    }

    /// All ids whose indexed suffixes begin with `query`.
    ///
    /// The query is matched bytewise against the lowercased index; callers
    /// lowercase it the same way titles were lowercased at build time. An
    /// empty query matches nothing.
    pub fn search(&self, query: &str) -> Result<HashSet<FileCount>> {
        let mut out = HashSet::new();
        if query.is_empty() {
            return Ok(out);
        }
        if let Some(top) = self.node_find(query.as_bytes())? {
            self.subtree_closure(top, &mut out)?;
        }
        Ok(out)
    }

    /// Only the ids stored exactly at the node `query` reaches, without the
    /// subtree closure.
    pub fn exact_search(&self, query: &str) -> Result<HashSet<FileCount>> {
        if query.is_empty() {
            return Ok(HashSet::new());
        }
        match self.node_find(query.as_bytes())? {
            Some(top) => {
                let (_, values) = self.read_node(top)?;
                Ok(values.into_iter().collect())
            }
            None => Ok(HashSet::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn build(titles: &[(&str, FileCount)]) -> Vec<u8> {
        let mut w = DiskTreeWriter::new();
        for &(title, id) in titles {
            w.add(title, id);
        }
        let mut out = Cursor::new(Vec::new());
        w.write(&mut out).unwrap();
        out.into_inner()
    }

    fn ids(set: &HashSet<FileCount>) -> Vec<FileCount> {
        let mut v: Vec<FileCount> = set.iter().copied().collect();
        v.sort_unstable();
        v
    }

    #[test]
    fn empty_index_is_two_zero_words() {
        let bytes = build(&[]);
        assert_eq!(bytes, vec![0u8; 8]);
        let tree = DiskTree::new(&bytes);
        assert!(tree.search("anything").unwrap().is_empty());
    }

    #[test]
    fn prefix_search_is_case_insensitive_on_titles() {
        let bytes = build(&[("Alpha", 1), ("apricot", 2), ("Apple pie", 3)]);
        let tree = DiskTree::new(&bytes);
        assert_eq!(ids(&tree.search("ap").unwrap()), vec![2, 3]);
        assert_eq!(ids(&tree.search("a").unwrap()), vec![1, 2, 3]);
        assert_eq!(ids(&tree.search("alpha").unwrap()), vec![1]);
        assert!(tree.search("b").unwrap().is_empty());
    }

    #[test]
    fn word_start_suffixes_are_indexed() {
        let bytes = build(&[("Apple pie", 3), ("semi-detached house", 4)]);
        let tree = DiskTree::new(&bytes);
        // Second word of a spaced title.
        assert_eq!(ids(&tree.search("pie").unwrap()), vec![3]);
        // Alphanumeric run after punctuation.
        assert_eq!(ids(&tree.search("detached").unwrap()), vec![4]);
        assert_eq!(ids(&tree.search("house").unwrap()), vec![4]);
        // Mid-word positions are not word starts.
        assert!(tree.search("pple").unwrap().is_empty());
    }

    #[test]
    fn exact_search_excludes_extensions() {
        let bytes = build(&[("Alpha", 1), ("apricot", 2), ("Apple pie", 3)]);
        let tree = DiskTree::new(&bytes);
        assert_eq!(ids(&tree.exact_search("apricot").unwrap()), vec![2]);
        assert!(tree.exact_search("ap").unwrap().is_empty());
        assert!(tree.exact_search("apricots").unwrap().is_empty());
    }

    #[test]
    fn duplicate_insertion_is_idempotent() {
        let once = build(&[("Recursion", 7)]);
        let twice = build(&[("Recursion", 7), ("Recursion", 7)]);
        assert_eq!(once, twice);
    }

    #[test]
    fn multiple_ids_per_title() {
        let bytes = build(&[("dup", 1), ("dup", 2)]);
        let tree = DiskTree::new(&bytes);
        assert_eq!(ids(&tree.search("dup").unwrap()), vec![1, 2]);
        assert_eq!(ids(&tree.exact_search("dup").unwrap()), vec![1, 2]);
    }

    #[test]
    fn unicode_titles_lowercase_and_match() {
        let bytes = build(&[("Übermaß Straße", 9)]);
        let tree = DiskTree::new(&bytes);
        assert_eq!(ids(&tree.search("übermaß").unwrap()), vec![9]);
        assert_eq!(ids(&tree.search("straße").unwrap()), vec![9]);
    }

    #[test]
    fn empty_and_blank_titles_are_skipped() {
        let bytes = build(&[("", 1)]);
        assert_eq!(bytes, vec![0u8; 8]);
    }

    #[test]
    fn invalid_utf8_raw_title_is_skipped() {
        let mut w = DiskTreeWriter::new();
        w.add_raw(&[0xFF, 0xFE, 0x61], 1);
        w.add_raw(b"ok", 2);
        let mut out = Cursor::new(Vec::new());
        w.write(&mut out).unwrap();
        let bytes = out.into_inner();
        let tree = DiskTree::new(&bytes);
        assert!(tree.search("\u{FFFD}").unwrap().is_empty());
        assert_eq!(ids(&tree.search("ok").unwrap()), vec![2]);
    }

    #[test]
    fn edge_split_keeps_both_branches() {
        let bytes = build(&[("test", 1), ("team", 2), ("te", 3)]);
        let tree = DiskTree::new(&bytes);
        assert_eq!(ids(&tree.search("te").unwrap()), vec![1, 2, 3]);
        assert_eq!(ids(&tree.search("tes").unwrap()), vec![1]);
        assert_eq!(ids(&tree.search("tea").unwrap()), vec![2]);
        assert_eq!(ids(&tree.exact_search("te").unwrap()), vec![3]);
    }

    #[test]
    fn cycle_in_tree_is_detected() {
        // Hand-craft a node whose only child offset points at itself.
        let mut bytes = Vec::new();
        write_u32(&mut bytes, 1).unwrap();
        write_u32(&mut bytes, 1).unwrap();
        bytes.push(b'a');
        write_u64(&mut bytes, 0).unwrap(); // child offset == own offset
        write_u32(&mut bytes, 0).unwrap();
        let tree = DiskTree::new(&bytes);
        assert!(matches!(
            tree.search("a"),
            Err(Error::IndexCorruption(_))
        ));
    }

    #[test]
    fn out_of_range_offset_is_corruption() {
        let mut bytes = Vec::new();
        write_u32(&mut bytes, 1).unwrap();
        write_u32(&mut bytes, 1).unwrap();
        bytes.push(b'a');
        write_u64(&mut bytes, 10_000).unwrap();
        write_u32(&mut bytes, 0).unwrap();
        let tree = DiskTree::new(&bytes);
        assert!(matches!(
            tree.search("ab"),
            Err(Error::IndexCorruption(_))
        ));
    }
}
