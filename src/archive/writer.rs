//! Building archives: tree walk, link resolution, and final assembly.
//!
//! The builder streams into three anonymous temporary files (header, body,
//! index) and combines them into the destination sink, back-patching the
//! header's body-end offset and every link record's target id once they are
//! known. Files are compressed as they are walked; nothing buffers whole
//! file contents in memory.
//!
//! Per-entry failures (an entry that cannot be stat'ed, opened, or listed)
//! are logged and omitted from the archive. A symlink that was indexed as
//! in-tree but whose record was emitted without its destination ever being
//! walked is a hard error: the archive would contain a dangling link.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::codec::{write_str16, write_u16, write_u64, write_u8};
use crate::compress::Compressor;
use crate::diskmap::{self, MapWriter};
use crate::displaylevel;
use crate::error::{Error, Result};
use crate::pathutil::is_under;
use crate::{FileCount, MAGIC, VERSION};

use super::node::NodeType;

/// What to do with symbolic links found during the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkPolicy {
    /// Links whose destination lies inside the tree are archived as links;
    /// links pointing outside are replaced by their targets.
    #[default]
    Process,
    /// Every link is replaced by the file or directory it targets.
    Follow,
    /// Links are omitted entirely.
    Skip,
}

/// The walk-time view of a file handed to the metadata extractor.
pub struct FileNode<'a> {
    pub id: FileCount,
    pub path: &'a Path,
    pub metadata: &'a fs::Metadata,
}

type MetaGen = Box<dyn FnMut(&FileNode) -> Vec<String>>;

// ── Link manager ─────────────────────────────────────────────────────────────

struct LinkInfo {
    src: PathBuf,
    resolved: bool,
    target_id: FileCount,
    patch_pos: Option<u64>,
}

/// Indexes in-tree symlinks by source and canonical destination so link
/// records can be patched once their destinations receive ids.
#[derive(Default)]
struct LinkMgr {
    infos: Vec<LinkInfo>,
    by_src: HashMap<PathBuf, usize>,
    by_dest: HashMap<PathBuf, Vec<usize>>,
}

impl LinkMgr {
    /// Pre-walk: find every symlink whose canonical target exists and stays
    /// inside `root`. Broken and outbound links are left unindexed; the
    /// main walk handles them by policy.
    ///
    /// The walk starts from `root` but does not stop at its physical edge:
    /// a symlink to an out-of-tree directory is Follow-substituted by the
    /// main walk, which then descends it under the symlink's own path, so
    /// such targets are queued and probed here under that same path. Links
    /// back into the tree found behind them are indexed like any other.
    /// Each canonical out-of-tree directory is probed once, so target
    /// cycles terminate. Unreadable entries are logged and skipped, the
    /// same tolerance the main walk applies.
    fn search(&mut self, root: &Path) -> Result<()> {
        let mut visited: HashSet<PathBuf> = HashSet::new();
        visited.insert(fs::canonicalize(root)?);
        let mut pending = vec![root.to_path_buf()];
        while let Some(start) = pending.pop() {
            for entry in WalkDir::new(&start).follow_links(false) {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        displaylevel!(1, "{}", e);
                        continue;
                    }
                };
                if !entry.path_is_symlink() {
                    continue;
                }
                let target = match fs::canonicalize(entry.path()) {
                    Ok(t) => t,
                    Err(_) => continue,
                };
                if is_under(root, &target) {
                    let idx = self.infos.len();
                    self.infos.push(LinkInfo {
                        src: entry.path().to_path_buf(),
                        resolved: false,
                        target_id: 0,
                        patch_pos: None,
                    });
                    self.by_src.insert(entry.path().to_path_buf(), idx);
                    self.by_dest.entry(target).or_default().push(idx);
                } else if target.is_dir() && visited.insert(target) {
                    pending.push(entry.path().to_path_buf());
                }
            }
        }
        Ok(())
    }

    /// Records where an emitted link record's target-id placeholder sits.
    fn handle_src(&mut self, path: &Path, pos: u64) -> Result<()> {
        let idx = *self.by_src.get(path).ok_or_else(|| {
            Error::Malformed(format!("couldn't find {} in link table", path.display()))
        })?;
        self.infos[idx].patch_pos = Some(pos);
        Ok(())
    }

    /// Resolves every indexed link whose destination is `path` to `id`.
    fn handle_dest(&mut self, path: &Path, id: FileCount) {
        if let Some(indices) = self.by_dest.get(path) {
            for &idx in indices {
                self.infos[idx].target_id = id;
                self.infos[idx].resolved = true;
            }
        }
    }

    /// Seeks back over the body and writes the real target ids. An emitted
    /// link whose destination never got an id is a hard error.
    fn patch(&mut self, body: &mut File) -> Result<()> {
        for info in &self.infos {
            let pos = match info.patch_pos {
                Some(pos) => pos,
                None => continue,
            };
            if !info.resolved {
                return Err(Error::Malformed(format!(
                    "link {} was not resolved",
                    info.src.display()
                )));
            }
            body.seek(SeekFrom::Start(pos))?;
            write_u64(body, info.target_id)?;
        }
        body.seek(SeekFrom::End(0))?;
        Ok(())
    }

    fn len(&self) -> usize {
        self.infos.len()
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Builds one archive from a source directory.
///
/// The build is staged so a trailer derived from the walk (such as the
/// title index, fed ids by the metadata extractor) can be attached between
/// the body pass and final assembly:
///
/// 1. [`write_header`](Self::write_header) — header temp file.
/// 2. [`write_body`](Self::write_body) — walk, body and index temp files.
/// 3. [`set_trailer`](Self::set_trailer) — optional, any time before combine.
/// 4. [`combine`](Self::combine) — concatenation and back-patching.
///
/// [`write`](Self::write) runs all stages for callers with a pre-computed
/// (or absent) trailer.
pub struct Writer {
    full_root: PathBuf,
    policy: LinkPolicy,
    debug: bool,
    archive_meta: BTreeMap<String, String>,
    node_meta_keys: Vec<String>,
    meta_gen: Option<MetaGen>,
    trailer: Option<Box<dyn Read>>,
    links: LinkMgr,
    nfile: FileCount,
    head: Option<File>,
    body: Option<File>,
    index: Option<File>,
}

impl Writer {
    /// Creates a builder rooted at `root`. The root is canonicalized once;
    /// `debug` raises per-entry progress to the normal display level.
    pub fn new<P: AsRef<Path>>(root: P, policy: LinkPolicy, debug: bool) -> Result<Writer> {
        let full_root = fs::canonicalize(root.as_ref())?;
        Ok(Writer {
            full_root,
            policy,
            debug,
            archive_meta: BTreeMap::new(),
            node_meta_keys: Vec::new(),
            meta_gen: None,
            trailer: None,
            links: LinkMgr::default(),
            nfile: 0,
            head: None,
            body: None,
            index: None,
        })
    }

    /// Sets archive-level metadata, written into the header.
    pub fn set_archive_meta(&mut self, meta: BTreeMap<String, String>) {
        self.archive_meta = meta;
    }

    /// Declares the per-regular-file metadata schema and its extractor. The
    /// extractor must return exactly one value per key, in key order.
    pub fn set_node_meta<F>(&mut self, keys: Vec<String>, generator: F)
    where
        F: FnMut(&FileNode) -> Vec<String> + 'static,
    {
        self.node_meta_keys = keys;
        self.meta_gen = Some(Box::new(generator));
    }

    /// Like [`set_node_meta`](Self::set_node_meta) but takes a map-returning
    /// extractor; keys the extractor omits are filled with empty strings.
    pub fn set_node_meta_map<F>(&mut self, keys: Vec<String>, mut generator: F)
    where
        F: FnMut(&FileNode) -> HashMap<String, String> + 'static,
    {
        let order = keys.clone();
        self.set_node_meta(keys, move |file| {
            let mut values = generator(file);
            order
                .iter()
                .map(|k| values.remove(k).unwrap_or_default())
                .collect()
        });
    }

    /// Supplies the opaque trailer appended after the index table.
    pub fn set_trailer<R: Read + 'static>(&mut self, data: R) {
        self.trailer = Some(Box::new(data));
    }

    /// Number of nodes emitted by the last walk.
    pub fn file_count(&self) -> FileCount {
        self.nfile
    }

    fn entry_level(&self) -> u32 {
        if self.debug {
            2
        } else {
            4
        }
    }

    /// Walks one entry, emitting its record and (for directories) its
    /// subtree. Returns the assigned id, or `None` when the entry was
    /// skipped.
    fn process_entry(
        &mut self,
        path: &Path,
        parent: FileCount,
        body: &mut File,
        index: &mut File,
    ) -> Result<Option<FileCount>> {
        // Classify the entry and acquire every OS resource that can fail
        // before an id is assigned, so skipped entries leave no trace.
        let lmeta = match fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e) => {
                displaylevel!(1, "{}: {}", path.display(), e);
                return Ok(None);
            }
        };
        let mut ntype = NodeType::Regular;
        let mut meta = lmeta;
        if meta.file_type().is_symlink() {
            if self.policy == LinkPolicy::Skip {
                return Ok(None);
            }
            let followed = match fs::metadata(path) {
                Ok(m) => m,
                Err(e) => {
                    displaylevel!(1, "broken symbolic link {}: {}", path.display(), e);
                    return Ok(None);
                }
            };
            let in_tree = fs::canonicalize(path)
                .map(|t| is_under(&self.full_root, &t))
                .unwrap_or(false);
            if in_tree && self.policy == LinkPolicy::Process {
                ntype = NodeType::Link;
            } else {
                meta = followed;
            }
        }
        let mut dir_entries = Vec::new();
        let mut input: Option<File> = None;
        if ntype != NodeType::Link {
            if meta.is_dir() {
                ntype = NodeType::Directory;
                let listing = match fs::read_dir(path) {
                    Ok(l) => l,
                    Err(e) => {
                        displaylevel!(1, "couldn't open directory {}: {}", path.display(), e);
                        return Ok(None);
                    }
                };
                for entry in listing {
                    match entry {
                        Ok(e) => dir_entries.push(e),
                        Err(err) => displaylevel!(1, "{}: {}", path.display(), err),
                    }
                }
            } else if meta.is_file() {
                input = match File::open(path) {
                    Ok(f) => Some(f),
                    Err(e) => {
                        displaylevel!(1, "couldn't open file {}: {}", path.display(), e);
                        return Ok(None);
                    }
                };
            } else {
                displaylevel!(1, "{}: not a regular file, directory, or link", path.display());
                return Ok(None);
            }
        }

        let id = self.nfile;
        self.nfile += 1;
        displaylevel!(self.entry_level(), "{} {}", id, path.display());
        if self.policy == LinkPolicy::Process {
            self.links.handle_dest(path, id);
        }

        let my_pos = body.stream_position()?;
        write_u64(index, my_pos)?;
        write_u64(body, parent)?;
        write_u8(body, ntype.as_byte())?;
        let name = if id == 0 {
            String::new()
        } else {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        };
        write_str16(body, &name)?;

        match ntype {
            NodeType::Regular => {
                let file_node = FileNode {
                    id,
                    path,
                    metadata: &meta,
                };
                let values = match self.meta_gen.as_mut() {
                    Some(generator) => generator(&file_node),
                    None => vec![String::new(); self.node_meta_keys.len()],
                };
                if values.len() != self.node_meta_keys.len() {
                    return Err(Error::BadInput(format!(
                        "metadata extractor returned {} value(s) for {} key(s)",
                        values.len(),
                        self.node_meta_keys.len()
                    )));
                }
                for value in &values {
                    write_str16(body, value)?;
                }
                write_u64(body, meta.len())?;
                let size_pos = body.stream_position()?;
                write_u64(body, 0)?; // placeholder for the compressed length
                let mut encoder = Compressor::new(BufReader::new(
                    input.expect("regular entry always has an open file"),
                ))?;
                let compressed_len = io::copy(&mut encoder, body)?;
                let end = body.stream_position()?;
                body.seek(SeekFrom::Start(size_pos))?;
                write_u64(body, compressed_len)?;
                body.seek(SeekFrom::Start(end))?;
            }
            NodeType::Link => {
                self.links.handle_src(path, body.stream_position()?)?;
                write_u64(body, 0)?; // placeholder for the target id
            }
            NodeType::Directory => {
                let max_children = if self.policy == LinkPolicy::Skip {
                    dir_entries
                        .iter()
                        .filter(|e| e.file_type().map_or(true, |t| !t.is_symlink()))
                        .count()
                } else {
                    dir_entries.len()
                } as u64;
                let child_start = body.stream_position()?;
                // Reserve the worst-case map footprint; skipped children
                // simply leave a gap that the index never points into.
                body.seek(SeekFrom::Current(diskmap::byte_size(max_children) as i64))?;
                let mut children = MapWriter::new();
                for entry in &dir_entries {
                    let child_path = entry.path();
                    if let Some(child_id) = self.process_entry(&child_path, id, body, index)? {
                        children.add(&entry.file_name().to_string_lossy(), child_id);
                    }
                }
                let end = body.stream_position()?;
                body.seek(SeekFrom::Start(child_start))?;
                children.write(body)?;
                body.seek(SeekFrom::Start(end))?;
            }
        }
        Ok(Some(id))
    }

    /// Writes the header into its temporary file: magic, version, a
    /// placeholder for the body-end offset, and both metadata sections.
    pub fn write_header(&mut self) -> Result<()> {
        let mut head = tempfile::tempfile()?;
        head.write_all(MAGIC)?;
        write_u16(&mut head, VERSION)?;
        write_u64(&mut head, 0)?; // placeholder for the body-end offset
        let nmeta = u8::try_from(self.archive_meta.len())
            .map_err(|_| Error::BadInput("more than 255 archive metadata entries".into()))?;
        write_u8(&mut head, nmeta)?;
        for (key, value) in &self.archive_meta {
            write_str16(&mut head, key)?;
            write_str16(&mut head, value)?;
        }
        let nkeys = u8::try_from(self.node_meta_keys.len())
            .map_err(|_| Error::BadInput("more than 255 node metadata keys".into()))?;
        write_u8(&mut head, nkeys)?;
        for key in &self.node_meta_keys {
            write_str16(&mut head, key)?;
        }
        self.head = Some(head);
        Ok(())
    }

    /// Walks the source tree, emitting node records into the body temp file
    /// and per-node offsets into the index temp file, then patches link
    /// targets.
    pub fn write_body(&mut self) -> Result<()> {
        let mut body = tempfile::tempfile()?;
        let mut index = tempfile::tempfile()?;
        if self.policy == LinkPolicy::Process {
            displaylevel!(3, "indexing symlinks");
            self.links.search(&self.full_root)?;
            displaylevel!(3, "{} link(s) found", self.links.len());
        }
        displaylevel!(3, "writing archive body");
        self.nfile = 0;
        let root = self.full_root.clone();
        self.process_entry(&root, 0, &mut body, &mut index)?;
        displaylevel!(3, "wrote {} entries", self.nfile);
        if self.policy == LinkPolicy::Process {
            displaylevel!(3, "resolving links");
            self.links.patch(&mut body)?;
        }
        self.body = Some(body);
        self.index = Some(index);
        Ok(())
    }

    /// Concatenates header, body, node count, index table, and trailer into
    /// `out`, back-patching the header's body-end offset. `out` must be
    /// positioned at the start of the destination file.
    pub fn combine<W: Write + Seek>(&mut self, mut out: W) -> Result<()> {
        let mut head = self
            .head
            .take()
            .ok_or_else(|| Error::BadInput("combine called before write_header".into()))?;
        let mut body = self
            .body
            .take()
            .ok_or_else(|| Error::BadInput("combine called before write_body".into()))?;
        let mut index = self
            .index
            .take()
            .ok_or_else(|| Error::BadInput("combine called before write_body".into()))?;
        displaylevel!(3, "combining archive components");
        head.rewind()?;
        body.rewind()?;
        io::copy(&mut head, &mut out)?;
        io::copy(&mut body, &mut out)?;
        let body_end = out.stream_position()?;
        out.seek(SeekFrom::Start((MAGIC.len() + 2) as u64))?;
        write_u64(&mut out, body_end)?;
        out.seek(SeekFrom::Start(body_end))?;
        write_u64(&mut out, self.nfile)?;
        index.rewind()?;
        io::copy(&mut index, &mut out)?;
        if let Some(mut trailer) = self.trailer.take() {
            io::copy(&mut trailer, &mut out)?;
        }
        out.flush()?;
        displaylevel!(3, "done writing archive");
        Ok(())
    }

    /// Runs all build stages and writes the finished archive into `out`.
    pub fn write<W: Write + Seek>(&mut self, out: W) -> Result<()> {
        self.write_header()?;
        self.write_body()?;
        self.combine(out)
    }
}
