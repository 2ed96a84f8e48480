//! The environment capability shared by the virtual and OS environments.

mod os_env;
mod virtual_env;

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::EnvError;
use crate::platform::PlatformConvention;

pub use os_env::OsEnvironment;
pub use virtual_env::{DEFAULT_USER, EnvironmentOptions, VirtualEnvironment};

/// Operations every environment implementation supports.
///
/// Callers that depend only on this trait observe identical semantics from
/// [`VirtualEnvironment`] and [`OsEnvironment`]. Implementations are passed
/// explicitly; there is no process-wide default.
pub trait Environment: fmt::Debug + Send + Sync {
    /// Short identifier used in log records (`"virtual"` or `"os"`).
    fn name(&self) -> &'static str;

    /// Jail root confining every path; empty when unconfined.
    fn jail(&self) -> &Utf8Path;

    /// Directory convention the environment emulates.
    fn convention(&self) -> PlatformConvention {
        PlatformConvention::current()
    }

    /// Returns the value of `key`, or `None` when unset.
    fn get(&self, key: &str) -> Option<String>;

    /// Assigns `value` to `key`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::InvalidKey`] when `key` is empty or contains `=`
    /// or NUL.
    fn set(&mut self, key: &str, value: &str) -> Result<(), EnvError>;

    /// Reports whether `key` is set.
    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Removes `key`. Unsetting an absent key is a no-op.
    fn unset(&mut self, key: &str);

    /// Lists every variable as `KEY=VALUE`, sorted by key.
    fn environ(&self) -> Vec<String>;

    /// Returns the home directory.
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::NotAvailable`] when no home directory is known.
    fn home(&self) -> Result<Utf8PathBuf, EnvError>;

    /// Replaces the home directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the value cannot be stored.
    fn set_home(&mut self, home: &Utf8Path) -> Result<(), EnvError>;

    /// Returns the current user name.
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::NotAvailable`] when no user is known.
    fn user(&self) -> Result<String, EnvError>;

    /// Replaces the current user name.
    ///
    /// # Errors
    ///
    /// Returns an error when the value cannot be stored.
    fn set_user(&mut self, user: &str) -> Result<(), EnvError>;

    /// Returns the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::NotAvailable`] when no working directory is known.
    fn working_directory(&self) -> Result<Utf8PathBuf, EnvError>;

    /// Changes the working directory. Relative paths are taken from the
    /// current working directory.
    fn set_working_directory(&mut self, dir: &Utf8Path);

    /// Returns the directory for temporary files.
    fn temp_dir(&self) -> Utf8PathBuf;

    /// Expands a leading `~`, `~/` or `~\` to the home directory.
    ///
    /// Other tilde forms such as `~alice/notes` and paths without a leading
    /// tilde are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::NotAvailable`] when expansion needs a home
    /// directory that is not set.
    fn expand_path(&self, path: &str) -> Result<Utf8PathBuf, EnvError> {
        let Some(rest) = path.strip_prefix('~') else {
            return Ok(Utf8PathBuf::from(path));
        };
        if rest.is_empty() {
            return self.home();
        }
        match rest.strip_prefix(['/', '\\']) {
            Some("") => self.home(),
            Some(tail) => Ok(self.home()?.join(tail)),
            None => Ok(Utf8PathBuf::from(path)),
        }
    }

    /// Resolves `path` to an absolute path.
    ///
    /// An empty path resolves to the working directory. Tildes are expanded
    /// and relative paths are joined onto the working directory. Symbolic
    /// links are followed when the path exists on disk.
    ///
    /// # Errors
    ///
    /// Returns [`EnvError::NotAvailable`] when home or the working directory
    /// is needed but unset.
    fn resolve_path(&self, path: &str) -> Result<Utf8PathBuf, EnvError>;
}

/// Returns `key` when it is set to a non-empty value, otherwise `fallback`.
#[must_use]
pub fn get_or<E: Environment + ?Sized>(env: &E, key: &str, fallback: &str) -> String {
    env.get(key)
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| fallback.to_owned())
}

/// Expands `$NAME` and `${NAME}` references in `text` using `env`.
///
/// Unset variables expand to the empty string. A `$` that does not start a
/// reference is kept literally.
#[must_use]
pub fn expand_variables<E: Environment + ?Sized>(env: &E, text: &str) -> String {
    let mut expanded = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(offset) = rest.find('$') {
        let (before, from_dollar) = rest.split_at(offset);
        expanded.push_str(before);
        let after = from_dollar.get(1..).unwrap_or_default();
        match variable_reference(after) {
            Some((name, consumed)) => {
                expanded.push_str(&env.get(name).unwrap_or_default());
                rest = after.get(consumed..).unwrap_or_default();
            }
            None => {
                expanded.push('$');
                rest = after;
            }
        }
    }
    expanded.push_str(rest);
    expanded
}

/// Parses a variable reference following a `$`, returning the name and the
/// number of bytes consumed.
fn variable_reference(text: &str) -> Option<(&str, usize)> {
    if let Some(braced) = text.strip_prefix('{') {
        let end = braced.find('}')?;
        let name = braced.get(..end)?;
        return (!name.is_empty()).then_some((name, end + 2));
    }
    let end = text
        .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
        .unwrap_or(text.len());
    let name = text.get(..end)?;
    (!name.is_empty()).then_some((name, end))
}

pub(crate) fn validate_key(key: &str) -> Result<(), EnvError> {
    if key.is_empty() || key.contains(['=', '\0']) {
        return Err(EnvError::InvalidKey {
            key: key.to_owned(),
        });
    }
    Ok(())
}
