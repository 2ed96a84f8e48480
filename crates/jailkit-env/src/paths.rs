//! Path helpers taking an explicit environment.
//!
//! [`absolute`] and [`relative`] never fail: when expansion needs a value the
//! environment lacks they fall back to the literal input. Use [`resolve`] to
//! surface those failures instead.

use camino::Utf8PathBuf;

use crate::environment::Environment;
use crate::error::EnvError;
use crate::jail;

/// Expands a leading tilde in `path` using the environment's home.
///
/// # Errors
///
/// Returns [`EnvError::NotAvailable`] when the tilde form needs an unset
/// home directory.
pub fn expand<E: Environment + ?Sized>(env: &E, path: &str) -> Result<Utf8PathBuf, EnvError> {
    env.expand_path(path)
}

/// Returns `path` as a cleaned absolute path confined to the environment's
/// jail.
///
/// Relative paths are taken from the working directory. When expansion or
/// the working directory is unavailable the literal input is confined
/// instead.
#[must_use]
pub fn absolute<E: Environment + ?Sized>(env: &E, path: &str) -> Utf8PathBuf {
    let anchored = anchor(env, path).unwrap_or_else(|_| Utf8PathBuf::from(path));
    jail::ensure_contained(env.jail(), &jail::clean(&anchored))
}

/// Returns the path leading from `base` to `target`.
///
/// Both sides are made absolute first. When no relative path exists, for
/// example across drives, the absolute target is returned.
#[must_use]
pub fn relative<E: Environment + ?Sized>(env: &E, base: &str, target: &str) -> Utf8PathBuf {
    let from = absolute(env, base);
    let to = absolute(env, target);
    jail::relative(&from, &to).unwrap_or(to)
}

/// Resolves `path` through the environment, following symbolic links where
/// the environment supports it.
///
/// # Errors
///
/// Returns [`EnvError::NotAvailable`] when home or the working directory is
/// needed but unset.
pub fn resolve<E: Environment + ?Sized>(env: &E, path: &str) -> Result<Utf8PathBuf, EnvError> {
    env.resolve_path(path)
}

fn anchor<E: Environment + ?Sized>(env: &E, path: &str) -> Result<Utf8PathBuf, EnvError> {
    if path.is_empty() {
        return env.working_directory();
    }
    let expanded = env.expand_path(path)?;
    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Ok(env.working_directory()?.join(expanded))
    }
}
