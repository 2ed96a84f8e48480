//! Tests for the filesystem capability of the virtual environment.
#![cfg(unix)]

use std::fs;
use std::io;
use std::os::unix::fs::{PermissionsExt, symlink};

use rstest::{fixture, rstest};

use super::support::{DiskJail, disk_jail};
use crate::{EnvError, Environment, FileSystem};

#[fixture]
fn jail() -> DiskJail {
    disk_jail()
}

fn file_names(dir: &camino::Utf8Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("list directory")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[rstest]
fn write_file_creates_parents_inside_the_jail(jail: DiskJail) {
    jail.env
        .write_file("notes/today/plan.md", b"ship it", 0o644)
        .expect("write");

    let host = jail.root.join("home/testuser/notes/today/plan.md");
    assert_eq!(fs::read(&host).expect("read host file"), b"ship it");
    assert_eq!(
        jail.env.read_file("~/notes/today/plan.md").expect("read"),
        b"ship it"
    );
}

#[rstest]
fn absolute_paths_outside_the_jail_are_rerooted(jail: DiskJail) {
    jail.env
        .write_file("/etc/app.conf", b"key = 1", 0o644)
        .expect("write");
    assert!(jail.root.join("etc/app.conf").is_file());
}

#[rstest]
fn relative_escape_is_rejected(jail: DiskJail) {
    let error = jail
        .env
        .write_file("../../../escape.txt", b"nope", 0o644)
        .expect_err("escape must fail");
    assert!(matches!(error, EnvError::EscapeAttempt { .. }));
}

#[rstest]
fn links_leaving_the_jail_are_rejected(jail: DiskJail) {
    let outside = tempfile::TempDir::new().expect("outside dir");
    fs::write(outside.path().join("secret"), b"classified").expect("seed secret");
    symlink(outside.path(), jail.root.join("exit")).expect("create link");

    let read = jail.env.read_file("/exit/secret");
    assert!(matches!(read, Err(EnvError::EscapeAttempt { .. })));

    let write = jail.env.write_file("/exit/planted", b"x", 0o644);
    assert!(matches!(write, Err(EnvError::EscapeAttempt { .. })));
    assert!(!outside.path().join("planted").exists());
}

#[rstest]
fn removing_an_escaping_link_removes_only_the_link(jail: DiskJail) {
    let outside = tempfile::TempDir::new().expect("outside dir");
    symlink(outside.path(), jail.root.join("exit")).expect("create link");

    jail.env.remove("/exit", false).expect("remove link");
    assert!(outside.path().is_dir());
    assert!(!jail.root.join("exit").exists());
}

#[rstest]
fn symlink_targets_are_checked(jail: DiskJail) {
    jail.env.mkdir("/data", 0o755, false).expect("mkdir");
    jail.env.write_file("/data/file", b"content", 0o644).expect("write");

    jail.env.symlink("data/file", "/alias").expect("relative link");
    assert_eq!(jail.env.read_file("/alias").expect("read through link"), b"content");

    let escaping = jail.env.symlink("../../outside", "/bad");
    assert!(matches!(escaping, Err(EnvError::EscapeAttempt { .. })));

    jail.env.symlink("/data", "/absolute").expect("absolute link");
    let target = fs::read_link(jail.root.join("absolute")).expect("read link");
    assert_eq!(target, jail.root.join("data").as_std_path());
}

#[rstest]
fn mkdir_stat_rename_and_read_dir(jail: DiskJail) {
    jail.env.mkdir("/work/a/b", 0o755, true).expect("mkdir -p");
    let missing_parent = jail.env.mkdir("/other/a/b", 0o755, false);
    assert_eq!(
        missing_parent.expect_err("parent missing").io_kind(),
        Some(io::ErrorKind::NotFound)
    );

    jail.env.write_file("/work/z.txt", b"z", 0o644).expect("write");
    jail.env.write_file("/work/m.txt", b"m", 0o644).expect("write");
    jail.env.rename("/work/m.txt", "/work/n.txt").expect("rename");

    let names: Vec<String> = jail
        .env
        .read_dir("/work")
        .expect("read dir")
        .iter()
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["a", "n.txt", "z.txt"]);

    assert!(jail.env.stat("/work/a", true).expect("stat").is_dir());
    assert!(jail.env.stat("/work/n.txt", false).expect("stat").is_file());
}

#[rstest]
fn remove_handles_files_and_trees(jail: DiskJail) {
    jail.env.write_file("/tree/a/b/c.txt", b"c", 0o644).expect("write");
    jail.env.write_file("/single.txt", b"s", 0o644).expect("write");

    jail.env.remove("/single.txt", false).expect("remove file");
    assert!(jail.env.remove("/tree", false).is_err());
    jail.env.remove("/tree", true).expect("remove tree");
    jail.env.remove("/tree", true).expect("removing a missing tree is fine");

    assert!(!jail.root.join("tree").exists());
    assert!(!jail.root.join("single.txt").exists());
}

// ----- Atomic writes -----

#[rstest]
fn atomic_write_creates_missing_parents(jail: DiskJail) {
    jail.env
        .atomic_write_file("/state/nested/config.json", b"{}", 0o600)
        .expect("atomic write");

    let host = jail.root.join("state/nested/config.json");
    assert_eq!(fs::read(&host).expect("read"), b"{}");
    let mode = fs::metadata(&host).expect("metadata").permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
    assert_eq!(file_names(&jail.root.join("state/nested")), ["config.json"]);
}

#[rstest]
fn atomic_write_replaces_existing_content(jail: DiskJail) {
    jail.env.atomic_write_file("/file", b"old", 0o644).expect("first write");
    jail.env.atomic_write_file("/file", b"new", 0o644).expect("second write");
    assert_eq!(jail.env.read_file("/file").expect("read"), b"new");
}

#[rstest]
fn interrupted_atomic_write_leaves_no_target(jail: DiskJail) {
    let host = jail.env.host_path("/fresh/target.txt", false).expect("host path");
    let result = crate::fs::write_atomic_with(&host, b"partial", 0o644, |_| {
        Err(io::Error::other("interrupted before rename"))
    });

    assert!(result.is_err());
    assert!(!host.exists());
    assert!(file_names(&jail.root.join("fresh")).is_empty());
}

#[rstest]
fn interrupted_atomic_write_keeps_previous_content(jail: DiskJail) {
    jail.env.write_file("/kept.txt", b"previous", 0o644).expect("seed");
    let host = jail.env.host_path("/kept.txt", false).expect("host path");

    let result = crate::fs::write_atomic_with(&host, b"replacement", 0o644, |temp| {
        assert!(temp.exists(), "temporary file should exist before rename");
        Err(io::Error::other("interrupted before rename"))
    });

    assert!(result.is_err());
    assert_eq!(fs::read(&host).expect("read"), b"previous");
    assert_eq!(file_names(&jail.root), ["kept.txt"]);
}

#[rstest]
fn host_path_requires_a_working_directory_for_relative_paths(mut jail: DiskJail) {
    jail.env.unset("PWD");
    assert!(matches!(
        jail.env.host_path("relative", false),
        Err(EnvError::NotAvailable { .. })
    ));
}
