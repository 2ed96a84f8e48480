//! Filesystem capability implemented by both environments.
//!
//! Implementations only decide how a caller path maps onto the host
//! filesystem ([`FileSystem::host_path`]); every operation is written once on
//! top of that mapping, so confinement rules apply uniformly.

mod atomic;

use std::fs::{self, DirEntry, Metadata};
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::error::EnvError;

pub(crate) use atomic::write_atomic_with;

const FS_TARGET: &str = "jailkit_env::fs";

/// File operations addressed through an environment.
pub trait FileSystem {
    /// Maps `path` to the host path an operation should touch.
    ///
    /// `follow_links` states whether the operation dereferences a symbolic
    /// link found at the leaf.
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::EscapeAttempt`] when the path cannot be confined,
    /// or [`EnvError::NotAvailable`] when resolving it needs an unset value.
    fn host_path(&self, path: &str, follow_links: bool) -> Result<Utf8PathBuf, EnvError>;

    /// Maps the target of a symbolic link about to be created at `link`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::EscapeAttempt`] when the target would point
    /// outside the environment's jail.
    fn link_target(&self, original: &str, _link: &Utf8Path) -> Result<Utf8PathBuf, EnvError> {
        Ok(Utf8PathBuf::from(original))
    }

    /// Reads the whole file at `path`.
    ///
    /// # Errors
    ///
    /// Returns confinement errors from [`FileSystem::host_path`] or
    /// [`EnvError::Io`] when the read fails.
    fn read_file(&self, path: &str) -> Result<Vec<u8>, EnvError> {
        let host = self.host_path(path, true)?;
        let data = fs::read(&host).map_err(|error| failure("read_file", &host, error))?;
        debug!(target: FS_TARGET, path = %host, bytes = data.len(), "read file");
        Ok(data)
    }

    /// Writes `data` to `path`, creating missing parent directories.
    ///
    /// `mode` applies to newly created files on Unix.
    ///
    /// # Errors
    ///
    /// Returns confinement errors or [`EnvError::Io`].
    fn write_file(&self, path: &str, data: &[u8], mode: u32) -> Result<(), EnvError> {
        let host = self.host_path(path, true)?;
        create_parent(&host, "write_file")?;
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        apply_open_mode(&mut options, mode);
        options
            .open(&host)
            .and_then(|mut file| file.write_all(data))
            .map_err(|error| failure("write_file", &host, error))?;
        debug!(target: FS_TARGET, path = %host, bytes = data.len(), "wrote file");
        Ok(())
    }

    /// Creates the directory at `path`, and its parents when `recursive`.
    ///
    /// # Errors
    ///
    /// Returns confinement errors or [`EnvError::Io`].
    fn mkdir(&self, path: &str, mode: u32, recursive: bool) -> Result<(), EnvError> {
        let host = self.host_path(path, false)?;
        let mut builder = fs::DirBuilder::new();
        builder.recursive(recursive);
        apply_dir_mode(&mut builder, mode);
        builder
            .create(&host)
            .map_err(|error| failure("mkdir", &host, error))?;
        debug!(target: FS_TARGET, path = %host, recursive, "created directory");
        Ok(())
    }

    /// Removes the file or directory at `path`.
    ///
    /// With `recursive` a directory is removed with its contents and a
    /// missing path is not an error. Links are removed, never followed.
    ///
    /// # Errors
    ///
    /// Returns confinement errors or [`EnvError::Io`].
    fn remove(&self, path: &str, recursive: bool) -> Result<(), EnvError> {
        let host = self.host_path(path, false)?;
        let metadata = match fs::symlink_metadata(&host) {
            Ok(metadata) => metadata,
            Err(error) if recursive && error.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(error) => return Err(failure("remove", &host, error)),
        };
        let outcome = match (metadata.is_dir(), recursive) {
            (true, true) => fs::remove_dir_all(&host),
            (true, false) => fs::remove_dir(&host),
            (false, _) => fs::remove_file(&host),
        };
        outcome.map_err(|error| failure("remove", &host, error))?;
        debug!(target: FS_TARGET, path = %host, recursive, "removed path");
        Ok(())
    }

    /// Moves `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns confinement errors or [`EnvError::Io`].
    fn rename(&self, from: &str, to: &str) -> Result<(), EnvError> {
        let source = self.host_path(from, false)?;
        let destination = self.host_path(to, false)?;
        fs::rename(&source, &destination).map_err(|error| failure("rename", &source, error))?;
        debug!(target: FS_TARGET, from = %source, to = %destination, "renamed path");
        Ok(())
    }

    /// Returns metadata for `path`, dereferencing a leaf link when
    /// `follow_links` is set.
    ///
    /// # Errors
    ///
    /// Returns confinement errors or [`EnvError::Io`].
    fn stat(&self, path: &str, follow_links: bool) -> Result<Metadata, EnvError> {
        let host = self.host_path(path, follow_links)?;
        let metadata = if follow_links {
            fs::metadata(&host)
        } else {
            fs::symlink_metadata(&host)
        };
        metadata.map_err(|error| failure("stat", &host, error))
    }

    /// Lists the entries of the directory at `path`, sorted by file name.
    ///
    /// # Errors
    ///
    /// Returns confinement errors or [`EnvError::Io`].
    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, EnvError> {
        let host = self.host_path(path, true)?;
        let mut entries = fs::read_dir(&host)
            .and_then(|listing| listing.collect::<io::Result<Vec<_>>>())
            .map_err(|error| failure("read_dir", &host, error))?;
        entries.sort_by_key(DirEntry::file_name);
        Ok(entries)
    }

    /// Creates a symbolic link at `link` pointing to `original`.
    ///
    /// # Errors
    ///
    /// Returns confinement errors for either side or [`EnvError::Io`].
    fn symlink(&self, original: &str, link: &str) -> Result<(), EnvError> {
        let host_link = self.host_path(link, false)?;
        let target = self.link_target(original, &host_link)?;
        create_link(&target, &host_link).map_err(|error| failure("symlink", &host_link, error))?;
        debug!(target: FS_TARGET, link = %host_link, original = %target, "created symlink");
        Ok(())
    }

    /// Replaces the file at `path` with `data` so readers observe either
    /// the previous content or the complete new content.
    ///
    /// # Errors
    ///
    /// Returns confinement errors or [`EnvError::Io`]. The temporary file is
    /// removed before an error is returned.
    fn atomic_write_file(&self, path: &str, data: &[u8], mode: u32) -> Result<(), EnvError> {
        let host = self.host_path(path, false)?;
        write_atomic_with(&host, data, mode, |_| Ok(()))
    }
}

pub(crate) fn failure(operation: &'static str, path: &Utf8Path, error: io::Error) -> EnvError {
    warn!(target: FS_TARGET, operation, path = %path, error = %error, "filesystem operation failed");
    EnvError::io(operation, path, error)
}

pub(crate) fn create_parent(path: &Utf8Path, operation: &'static str) -> Result<(), EnvError> {
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|error| failure(operation, parent, error))
        }
        _ => Ok(()),
    }
}

#[cfg(unix)]
fn apply_open_mode(options: &mut fs::OpenOptions, mode: u32) {
    use std::os::unix::fs::OpenOptionsExt;
    options.mode(mode);
}

#[cfg(not(unix))]
const fn apply_open_mode(_options: &mut fs::OpenOptions, _mode: u32) {}

#[cfg(unix)]
fn apply_dir_mode(builder: &mut fs::DirBuilder, mode: u32) {
    use std::os::unix::fs::DirBuilderExt;
    builder.mode(mode);
}

#[cfg(not(unix))]
const fn apply_dir_mode(_builder: &mut fs::DirBuilder, _mode: u32) {}

#[cfg(unix)]
fn create_link(target: &Utf8Path, link: &Utf8Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_link(target: &Utf8Path, link: &Utf8Path) -> io::Result<()> {
    let resolved = link.parent().map_or_else(|| target.to_owned(), |dir| dir.join(target));
    if resolved.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

#[cfg(not(any(unix, windows)))]
fn create_link(_target: &Utf8Path, _link: &Utf8Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symbolic links are not supported on this platform",
    ))
}
