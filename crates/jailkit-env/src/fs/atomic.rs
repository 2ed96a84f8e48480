//! All-or-nothing file replacement.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use camino::Utf8Path;
use tempfile::Builder;
use tracing::{debug, warn};

use super::{FS_TARGET, create_parent, failure};
use crate::error::EnvError;

const OPERATION: &str = "atomic_write_file";

/// Writes `data` to `path` through a temporary sibling file.
///
/// The temporary file lives in the target's parent directory so the final
/// rename never crosses a filesystem boundary. `before_rename` runs after the
/// data is synced and before the rename; an error from it aborts the write.
/// Dropping the temporary handle on any early return deletes it, so the
/// target is either untouched or fully replaced.
pub(crate) fn write_atomic_with<F>(
    path: &Utf8Path,
    data: &[u8],
    mode: u32,
    before_rename: F,
) -> Result<(), EnvError>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    create_parent(path, OPERATION)?;
    let directory = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));

    let prefix = format!(".{}.", path.file_name().unwrap_or("jailkit"));
    let mut builder = Builder::new();
    builder.prefix(&prefix).suffix(".tmp");
    let mut file = builder
        .tempfile_in(directory)
        .map_err(|error| failure(OPERATION, directory, error))?;
    file.write_all(data)
        .and_then(|()| file.as_file().sync_all())
        .map_err(|error| failure(OPERATION, path, error))?;

    set_mode(file.path(), mode);
    before_rename(file.path()).map_err(|error| failure(OPERATION, path, error))?;

    file.persist(path)
        .map_err(|error| failure(OPERATION, path, error.error))?;
    debug!(target: FS_TARGET, path = %path, bytes = data.len(), "atomically replaced file");
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(error) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        warn!(
            target: FS_TARGET,
            path = %path.display(),
            mode,
            error = %error,
            "could not apply permissions to temporary file"
        );
    }
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) {
    let read_only = (mode & 0o200) == 0;
    let outcome = fs::metadata(path).and_then(|metadata| {
        let mut permissions = metadata.permissions();
        permissions.set_readonly(read_only);
        fs::set_permissions(path, permissions)
    });
    if let Err(error) = outcome {
        warn!(
            target: FS_TARGET,
            path = %path.display(),
            error = %error,
            "could not apply permissions to temporary file"
        );
    }
}
