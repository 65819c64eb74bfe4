// End-to-end title index flow: titles collected during the build walk, the
// serialized tree carried in the archive trailer, and searches answered
// from the reopened archive.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Cursor;
use std::path::Path;
use std::rc::Rc;

use tempfile::TempDir;

use zsr::{Archive, DiskTree, DiskTreeWriter, FileCount, LinkPolicy, Writer};

fn title_for(path: &Path) -> String {
    match path.file_name().unwrap().to_str().unwrap() {
        "alpha.txt" => "Alpha".to_owned(),
        "apricot.txt" => "apricot".to_owned(),
        "apple.txt" => "Apple pie".to_owned(),
        other => other.to_owned(),
    }
}

/// Builds an archive whose trailer carries a title index fed by the
/// metadata extractor during the walk.
fn build_indexed_archive(dest: &Path, src: &Path) {
    let index = Rc::new(RefCell::new(DiskTreeWriter::new()));
    let mut writer = Writer::new(src, LinkPolicy::Process, false).unwrap();
    let walk_index = Rc::clone(&index);
    writer.set_node_meta(vec!["title".to_owned()], move |file| {
        let title = title_for(file.path);
        walk_index.borrow_mut().add(&title, file.id);
        vec![title]
    });

    writer.write_header().unwrap();
    writer.write_body().unwrap();
    let mut tree = Cursor::new(Vec::new());
    index.borrow().write(&mut tree).unwrap();
    writer.set_trailer(Cursor::new(tree.into_inner()));
    writer.combine(File::create(dest).unwrap()).unwrap();
}

fn ids(set: &HashSet<FileCount>) -> Vec<FileCount> {
    let mut v: Vec<FileCount> = set.iter().copied().collect();
    v.sort_unstable();
    v
}

#[test]
fn prefix_and_exact_search_over_trailer() {
    let src = TempDir::new().unwrap();
    fs::write(src.path().join("alpha.txt"), b"a").unwrap();
    fs::write(src.path().join("apricot.txt"), b"b").unwrap();
    fs::write(src.path().join("apple.txt"), b"c").unwrap();

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("indexed.zsr");
    build_indexed_archive(&dest, src.path());

    let ar = Archive::open(&dest).unwrap();
    let alpha = ar.get("alpha.txt").unwrap().id();
    let apricot = ar.get("apricot.txt").unwrap().id();
    let apple = ar.get("apple.txt").unwrap().id();

    // Titles are also recorded as node metadata.
    assert_eq!(ar.get("apple.txt").unwrap().meta("title").unwrap(), "Apple pie");

    let tree = DiskTree::new(ar.trailer());

    let mut ap: Vec<FileCount> = vec![apricot, apple];
    ap.sort_unstable();
    assert_eq!(ids(&tree.search("ap").unwrap()), ap);

    assert_eq!(ids(&tree.search("alpha").unwrap()), vec![alpha]);
    assert_eq!(ids(&tree.exact_search("apricot").unwrap()), vec![apricot]);
    assert!(tree.exact_search("ap").unwrap().is_empty());

    // "pie" is a word-start suffix of "Apple pie".
    assert_eq!(ids(&tree.search("pie").unwrap()), vec![apple]);

    let mut all: Vec<FileCount> = vec![alpha, apricot, apple];
    all.sort_unstable();
    assert_eq!(ids(&tree.search("a").unwrap()), all);

    assert!(tree.search("zebra").unwrap().is_empty());
}

#[test]
fn searches_share_one_tree_view() {
    let src = TempDir::new().unwrap();
    fs::write(src.path().join("alpha.txt"), b"a").unwrap();
    fs::write(src.path().join("apricot.txt"), b"b").unwrap();

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("indexed.zsr");
    build_indexed_archive(&dest, src.path());

    let ar = Archive::open(&dest).unwrap();
    let tree = DiskTree::new(ar.trailer());
    // DiskTree is Copy; independent cursors over the same bytes agree.
    let a = tree;
    let b = tree;
    assert_eq!(a.search("apricot").unwrap(), b.search("apricot").unwrap());
}
