//! Platform directory conventions and per-user directory lookup.
//!
//! Lookups read the injected [`Environment`] only. Config and cache lookups
//! degrade to a subdirectory of home when no override variable is set; data
//! and state lookups under the Windows convention require `LOCALAPPDATA` and
//! fail with [`EnvError::MissingVariable`] without it.

use camino::{Utf8Path, Utf8PathBuf};

use crate::environment::Environment;
use crate::error::EnvError;
use crate::jail;

/// Unix config directory override.
pub const XDG_CONFIG_HOME: &str = "XDG_CONFIG_HOME";
/// Unix cache directory override.
pub const XDG_CACHE_HOME: &str = "XDG_CACHE_HOME";
/// Unix data directory override.
pub const XDG_DATA_HOME: &str = "XDG_DATA_HOME";
/// Unix state directory override.
pub const XDG_STATE_HOME: &str = "XDG_STATE_HOME";
/// Windows roaming application data directory.
pub const APPDATA: &str = "APPDATA";
/// Windows local application data directory.
pub const LOCALAPPDATA: &str = "LOCALAPPDATA";

/// Family of directory conventions an environment emulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformConvention {
    /// XDG base directories beneath home, temporary files under `/tmp`.
    Unix,
    /// `APPDATA` and `LOCALAPPDATA` beneath the user profile.
    Windows,
}

impl PlatformConvention {
    /// Returns the convention of the build target.
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }
}

/// Returns the per-user configuration directory.
///
/// Precedence: `XDG_CONFIG_HOME`, `APPDATA`, then `home/.config`.
///
/// # Errors
///
/// Returns [`EnvError::NotAvailable`] when the fallback needs a home
/// directory that is not set.
pub fn config_dir<E: Environment + ?Sized>(env: &E) -> Result<Utf8PathBuf, EnvError> {
    let dir = first_set(env, &[XDG_CONFIG_HOME, APPDATA])
        .map_or_else(|| env.home().map(|home| home.join(".config")), Ok)?;
    Ok(confine(env, &dir))
}

/// Returns the per-user cache directory.
///
/// Precedence: `XDG_CACHE_HOME`, `LOCALAPPDATA`, then `home/.cache`.
///
/// # Errors
///
/// Returns [`EnvError::NotAvailable`] when the fallback needs a home
/// directory that is not set.
pub fn cache_dir<E: Environment + ?Sized>(env: &E) -> Result<Utf8PathBuf, EnvError> {
    let dir = first_set(env, &[XDG_CACHE_HOME, LOCALAPPDATA])
        .map_or_else(|| env.home().map(|home| home.join(".cache")), Ok)?;
    Ok(confine(env, &dir))
}

/// Returns the per-user data directory.
///
/// # Errors
///
/// Under the Windows convention returns [`EnvError::MissingVariable`] when
/// `LOCALAPPDATA` is unset. Under the Unix convention returns
/// [`EnvError::NotAvailable`] when the `home/.local/share` fallback is needed
/// but home is not set.
pub fn data_dir<E: Environment + ?Sized>(env: &E) -> Result<Utf8PathBuf, EnvError> {
    local_dir(env, XDG_DATA_HOME, "share", "data")
}

/// Returns the per-user state directory.
///
/// # Errors
///
/// Fails the same way as [`data_dir`], with `home/.local/state` as the Unix
/// fallback.
pub fn state_dir<E: Environment + ?Sized>(env: &E) -> Result<Utf8PathBuf, EnvError> {
    local_dir(env, XDG_STATE_HOME, "state", "state")
}

fn local_dir<E: Environment + ?Sized>(
    env: &E,
    xdg_key: &str,
    unix_leaf: &str,
    windows_leaf: &str,
) -> Result<Utf8PathBuf, EnvError> {
    let dir = match env.convention() {
        PlatformConvention::Windows => first_set(env, &[LOCALAPPDATA])
            .ok_or_else(|| EnvError::MissingVariable {
                key: LOCALAPPDATA.to_owned(),
            })?
            .join(windows_leaf),
        PlatformConvention::Unix => first_set(env, &[xdg_key]).map_or_else(
            || env.home().map(|home| home.join(".local").join(unix_leaf)),
            Ok,
        )?,
    };
    Ok(confine(env, &dir))
}

fn first_set<E: Environment + ?Sized>(env: &E, keys: &[&str]) -> Option<Utf8PathBuf> {
    keys.iter()
        .filter_map(|key| env.get(key))
        .find(|value| !value.is_empty())
        .map(Utf8PathBuf::from)
}

fn confine<E: Environment + ?Sized>(env: &E, dir: &Utf8Path) -> Utf8PathBuf {
    jail::ensure_contained(env.jail(), &jail::clean(dir))
}
