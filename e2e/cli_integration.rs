// CLI integration tests: drive the `zsrutil` binary as a black box with
// std::process::Command, covering create/extract/info/list dispatch and
// exit codes.

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use tempfile::TempDir;

/// Locate the `zsrutil` binary produced by Cargo.
fn zsrutil_bin() -> PathBuf {
    // CARGO_BIN_EXE_zsrutil is set by Cargo when running integration tests.
    // Fall back to walking up from the test binary location.
    if let Ok(p) = std::env::var("CARGO_BIN_EXE_zsrutil") {
        return PathBuf::from(p);
    }
    let mut p = std::env::current_exe().unwrap();
    p.pop();
    if p.ends_with("deps") {
        p.pop();
    }
    p.push("zsrutil");
    p
}

/// A small source tree: one file, one subdirectory with a file, one link.
fn make_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::create_dir(root.join("sub")).unwrap();
    fs::write(root.join("greeting.txt"), b"hello archive\n").unwrap();
    fs::write(root.join("sub/data.bin"), (0u8..=255).collect::<Vec<u8>>()).unwrap();
    #[cfg(unix)]
    std::os::unix::fs::symlink("greeting.txt", root.join("hello_link")).unwrap();
    dir
}

fn create_archive(src: &TempDir) -> (TempDir, PathBuf) {
    let work = TempDir::new().unwrap();
    let archive = work.path().join("tree.zsr");
    let status = Command::new(zsrutil_bin())
        .args([
            "create",
            src.path().to_str().unwrap(),
            archive.to_str().unwrap(),
        ])
        .status()
        .expect("failed to run zsrutil create");
    assert!(status.success(), "create should exit 0");
    assert!(archive.exists(), "archive file should exist");
    (work, archive)
}

#[test]
fn create_then_extract_roundtrip() {
    let src = make_tree();
    let (_work, archive) = create_archive(&src);

    let out = TempDir::new().unwrap();
    let status = Command::new(zsrutil_bin())
        .args(["extract", archive.to_str().unwrap()])
        .current_dir(out.path())
        .status()
        .expect("failed to run zsrutil extract");
    assert!(status.success(), "extract should exit 0");

    assert_eq!(
        fs::read(out.path().join("greeting.txt")).unwrap(),
        b"hello archive\n"
    );
    assert_eq!(
        fs::read(out.path().join("sub/data.bin")).unwrap(),
        (0u8..=255).collect::<Vec<u8>>()
    );
    #[cfg(unix)]
    {
        let link = out.path().join("hello_link");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read(&link).unwrap(), b"hello archive\n");
    }
}

#[test]
fn extract_single_member() {
    let src = make_tree();
    let (_work, archive) = create_archive(&src);

    let out = TempDir::new().unwrap();
    let status = Command::new(zsrutil_bin())
        .args(["extract", archive.to_str().unwrap(), "sub/data.bin"])
        .current_dir(out.path())
        .status()
        .expect("failed to run zsrutil extract");
    assert!(status.success());
    assert_eq!(
        fs::read(out.path().join("data.bin")).unwrap(),
        (0u8..=255).collect::<Vec<u8>>()
    );
}

#[test]
fn list_prints_children_with_type_markers() {
    let src = make_tree();
    let (_work, archive) = create_archive(&src);

    let output = Command::new(zsrutil_bin())
        .args(["list", archive.to_str().unwrap()])
        .output()
        .expect("failed to run zsrutil list");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let mut lines: Vec<&str> = stdout.lines().collect();
    lines.sort_unstable();

    let mut expected = vec!["greeting.txt", "sub/"];
    #[cfg(unix)]
    expected.push("hello_link -> greeting.txt");
    expected.sort_unstable();
    assert_eq!(lines, expected);
}

#[test]
fn list_subdirectory() {
    let src = make_tree();
    let (_work, archive) = create_archive(&src);

    let output = Command::new(zsrutil_bin())
        .args(["list", archive.to_str().unwrap(), "sub"])
        .output()
        .expect("failed to run zsrutil list");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert_eq!(stdout.lines().collect::<Vec<_>>(), vec!["data.bin"]);
}

#[test]
fn info_prints_metadata_sections() {
    let src = make_tree();
    let (_work, archive) = create_archive(&src);

    let output = Command::new(zsrutil_bin())
        .args(["info", archive.to_str().unwrap()])
        .output()
        .expect("failed to run zsrutil info");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Archive metadata:"));
    assert!(stdout.contains("Node metadata:"));
}

#[test]
fn missing_archive_exits_one() {
    let output = Command::new(zsrutil_bin())
        .args(["list", "/no/such/archive.zsr"])
        .output()
        .expect("failed to run zsrutil");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("Error"));
}

#[test]
fn missing_member_exits_one() {
    let src = make_tree();
    let (_work, archive) = create_archive(&src);

    let output = Command::new(zsrutil_bin())
        .args(["list", archive.to_str().unwrap(), "absent"])
        .output()
        .expect("failed to run zsrutil");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn garbage_file_is_rejected() {
    let work = TempDir::new().unwrap();
    let bogus = work.path().join("bogus.zsr");
    fs::write(&bogus, b"definitely not an archive").unwrap();

    let output = Command::new(zsrutil_bin())
        .args(["info", bogus.to_str().unwrap()])
        .output()
        .expect("failed to run zsrutil");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn skip_link_policy_flag() {
    let src = make_tree();
    let work = TempDir::new().unwrap();
    let archive = work.path().join("noln.zsr");
    let status = Command::new(zsrutil_bin())
        .args([
            "create",
            "--links",
            "skip",
            src.path().to_str().unwrap(),
            archive.to_str().unwrap(),
        ])
        .status()
        .expect("failed to run zsrutil create");
    assert!(status.success());

    let output = Command::new(zsrutil_bin())
        .args(["list", archive.to_str().unwrap()])
        .output()
        .unwrap();
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(!stdout.contains("hello_link"));
    assert!(stdout.contains("greeting.txt"));
}
