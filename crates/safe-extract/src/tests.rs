use crate::{unpack, UnpackError, UnpackSummary};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_test::traced_test;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

enum Item<'a> {
    Dir(&'a str),
    File(&'a str, &'a [u8]),
}

fn make_zip_file(path: &Path, items: &[Item]) {
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    for item in items {
        match item {
            Item::Dir(name) => writer.add_directory(*name, options).unwrap(),
            Item::File(name, data) => {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
        }
    }
    writer.finish().unwrap();
}

fn list_tree(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut out = vec![];
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                let data = fs::read(&path).unwrap();
                out.push((path.strip_prefix(root).unwrap().to_path_buf(), data));
            }
        }
    }
    out.sort();
    out
}

#[test]
#[traced_test]
fn test_unpacks_nested_tree() {
    let temp = tempfile::tempdir().unwrap();
    let archive = temp.path().join("app.apk");
    make_zip_file(
        &archive,
        &[
            Item::File("a.txt", b"hello"),
            Item::Dir("b/"),
            Item::File("b/c.txt", b"nested"),
            Item::File("d/e/f.bin", &[0u8; 2048]),
        ],
    );

    let destination = temp.path().join("out");
    let summary = unpack(&destination, &archive).unwrap();

    assert_eq!(
        summary,
        UnpackSummary {
            files: 3,
            directories: 1,
            bytes: 5 + 6 + 2048,
        }
    );
    assert_eq!(fs::read(destination.join("a.txt")).unwrap(), b"hello");
    assert_eq!(fs::read(destination.join("b/c.txt")).unwrap(), b"nested");
    assert_eq!(fs::metadata(destination.join("d/e/f.bin")).unwrap().len(), 2048);
}

#[test]
#[traced_test]
fn test_rejects_traversal_and_stops() {
    let temp = tempfile::tempdir().unwrap();
    let archive = temp.path().join("evil.zip");
    make_zip_file(
        &archive,
        &[
            Item::File("first.txt", b"ok"),
            Item::File("../../evil.txt", b"gotcha"),
            Item::File("after.txt", b"never"),
        ],
    );

    let destination = temp.path().join("nested").join("out");
    let err = unpack(&destination, &archive).unwrap_err();

    match err {
        UnpackError::PathTraversal { entry, .. } => assert_eq!(entry, "../../evil.txt"),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(destination.join("first.txt").exists());
    assert!(!destination.join("after.txt").exists());
    assert!(!temp.path().join("evil.txt").exists());
    assert!(!temp.path().join("nested").join("evil.txt").exists());
}

#[test]
#[traced_test]
fn test_unpack_is_idempotent() {
    let temp = tempfile::tempdir().unwrap();
    let archive = temp.path().join("app.apk");
    make_zip_file(
        &archive,
        &[Item::File("a.txt", b"one"), Item::File("b/c.txt", b"two")],
    );
    let destination = temp.path().join("out");
    fs::create_dir_all(destination.join("stale")).unwrap();
    fs::write(destination.join("stale/old.txt"), b"left over").unwrap();
    fs::write(destination.join("a.txt"), b"previous contents").unwrap();

    unpack(&destination, &archive).unwrap();
    let first = list_tree(&destination);
    unpack(&destination, &archive).unwrap();
    let second = list_tree(&destination);

    assert_eq!(first, second);
    assert_eq!(
        second,
        vec![
            (PathBuf::from("a.txt"), b"one".to_vec()),
            (PathBuf::from("b/c.txt"), b"two".to_vec()),
        ]
    );
    assert!(!destination.join("stale").exists());
}

#[test]
#[traced_test]
fn test_relative_destination_with_parent_segments() {
    // A `..`-relative path to a directory next to the current one.
    let temp = tempfile::tempdir_in("..").unwrap();
    let name = temp.path().file_name().unwrap();
    let relative = Path::new("..").join(name);
    let archive = relative.join("app.apk");
    make_zip_file(&archive, &[Item::File("a.txt", b"one")]);

    let destination = relative.join("out");
    unpack(&destination, &archive).unwrap();

    assert_eq!(fs::read(temp.path().join("out/a.txt")).unwrap(), b"one");
    assert!(!Path::new(name).exists());
}

#[test]
#[traced_test]
fn test_replaces_file_at_destination() {
    let temp = tempfile::tempdir().unwrap();
    let archive = temp.path().join("app.apk");
    make_zip_file(&archive, &[Item::File("a.txt", b"one")]);
    let destination = temp.path().join("out");
    fs::write(&destination, b"not a directory").unwrap();

    unpack(&destination, &archive).unwrap();
    assert!(destination.is_dir());
}

#[test]
#[traced_test]
fn test_corrupt_archive() {
    let temp = tempfile::tempdir().unwrap();
    let archive = temp.path().join("broken.zip");
    fs::write(&archive, b"this is not a zip file at all").unwrap();

    let err = unpack(&temp.path().join("out"), &archive).unwrap_err();
    assert!(matches!(err, UnpackError::Archive(_)), "{err:?}");
}

#[test]
#[traced_test]
fn test_missing_archive() {
    let temp = tempfile::tempdir().unwrap();
    let missing = temp.path().join("missing.apk");

    let err = unpack(&temp.path().join("out"), &missing).unwrap_err();
    match err {
        UnpackError::Io { path, .. } => assert_eq!(path, missing),
        other => panic!("unexpected error {other:?}"),
    }
}

#[cfg(unix)]
#[test]
#[traced_test]
fn test_preserves_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let temp = tempfile::tempdir().unwrap();
    let archive = temp.path().join("app.apk");
    let options = SimpleFileOptions::default().unix_permissions(0o750);
    let mut writer = ZipWriter::new(File::create(&archive).unwrap());
    writer.start_file("bin/tool", options).unwrap();
    writer.write_all(b"#!/bin/sh\n").unwrap();
    writer.finish().unwrap();

    let destination = temp.path().join("out");
    unpack(&destination, &archive).unwrap();

    let mode = fs::metadata(destination.join("bin/tool"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o750);
}
