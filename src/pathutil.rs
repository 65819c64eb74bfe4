//! Lexical path manipulation for archive member paths.
//!
//! Member paths use `/` separators regardless of platform. These helpers are
//! purely lexical except where documented; they never touch the filesystem
//! when reducing or normalizing, which keeps them usable on paths that only
//! exist inside an archive.

use std::path::Path;

/// Lexically normalizes a `/`-separated path: collapses empty and `.`
/// segments and resolves `..` against preceding segments. An empty input
/// normalizes to `.`; leading `..` segments on relative paths are kept.
pub fn normalize(path: &str) -> String {
    if path.is_empty() {
        return ".".to_owned();
    }
    let absolute = path.starts_with('/');
    let mut out: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if out.last().map_or(true, |&p| p == "..") {
                    if !absolute {
                        out.push("..");
                    }
                } else {
                    out.pop();
                }
            }
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return if absolute { "/".to_owned() } else { ".".to_owned() };
    }
    let joined = out.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Resolves `path` against `base`: absolute paths stand alone, relative
/// paths are joined onto `base`. The result is normalized.
pub fn resolve(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        normalize(path)
    } else {
        normalize(&format!("{base}/{path}"))
    }
}

/// Returns everything before the final component of a member path, or `.`
/// when there is no directory part.
pub fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(i) => &path[..i],
        None => ".",
    }
}

/// Reduces `target` to a path relative to `base` by stripping their common
/// prefix and backing out of the remaining `base` components.
///
/// If one path is absolute and the other relative there is no common frame
/// of reference and `target` is returned as-is.
pub fn relreduce(base: &str, target: &str) -> String {
    let base = normalize(base);
    let target = normalize(target);
    if base == "." {
        return target;
    }
    if base.starts_with('/') != target.starts_with('/') {
        return target;
    }
    let barr: Vec<&str> = base.split('/').collect();
    let tarr: Vec<&str> = target.split('/').collect();
    let common = barr
        .iter()
        .zip(tarr.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut out: Vec<&str> = Vec::new();
    for _ in common..barr.len() {
        out.push("..");
    }
    for part in &tarr[common..] {
        if *part != "." {
            out.push(part);
        }
    }
    out.join("/")
}

/// Whether `child` lies within `parent` (or equals it), comparing path
/// components lexically. Both paths should already be canonical; no
/// filesystem access is performed.
pub fn is_under(parent: &Path, child: &Path) -> bool {
    child.starts_with(parent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_basics() {
        assert_eq!(normalize(""), ".");
        assert_eq!(normalize("a/b/c"), "a/b/c");
        assert_eq!(normalize("a//b/./c"), "a/b/c");
        assert_eq!(normalize("a/b/../c"), "a/c");
        assert_eq!(normalize("/a/../.."), "/");
        assert_eq!(normalize("../a"), "../a");
        assert_eq!(normalize("a/.."), ".");
        assert_eq!(normalize("/"), "/");
    }

    #[test]
    fn resolve_joins_relative() {
        assert_eq!(resolve("/srv/root", "x/y"), "/srv/root/x/y");
        assert_eq!(resolve("/srv/root", "../other"), "/srv/other");
        assert_eq!(resolve("/srv/root", "/abs"), "/abs");
    }

    #[test]
    fn dirname_variants() {
        assert_eq!(dirname("a/b/c"), "a/b");
        assert_eq!(dirname("file"), ".");
        assert_eq!(dirname("/file"), "/");
    }

    #[test]
    fn relreduce_common_prefix() {
        assert_eq!(relreduce("a/b", "a/b/c"), "c");
        assert_eq!(relreduce("a/b", "a/x"), "../x");
        assert_eq!(relreduce("a/b/c", "d"), "../../../d");
        assert_eq!(relreduce(".", "x/y"), "x/y");
    }

    #[test]
    fn relreduce_mixed_absolute() {
        assert_eq!(relreduce("/a/b", "x"), "x");
        assert_eq!(relreduce("a", "/x"), "/x");
    }

    #[test]
    fn is_under_component_wise() {
        assert!(is_under(Path::new("/a/b"), Path::new("/a/b/c")));
        assert!(is_under(Path::new("/a/b"), Path::new("/a/b")));
        assert!(!is_under(Path::new("/a/b"), Path::new("/a/bc")));
        assert!(!is_under(Path::new("/a/b"), Path::new("/a")));
        assert!(is_under(Path::new("/"), Path::new("/anything")));
    }
}
