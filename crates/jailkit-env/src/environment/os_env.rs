//! Environment backed by the real process.

use std::env;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use super::{Environment, validate_key};
use crate::error::{EnvError, utf8_path};
use crate::fs::FileSystem;
use crate::jail;
use crate::platform::PlatformConvention;

const OS_TARGET: &str = "jailkit_env::os";

/// Environment that delegates every operation to the operating system.
///
/// It carries no jail. Mutations change the process environment and working
/// directory, which are shared by every thread; callers serialise such
/// changes themselves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OsEnvironment;

impl OsEnvironment {
    /// Creates a handle to the process environment.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn mirrors_windows(self) -> bool {
        self.convention() == PlatformConvention::Windows
    }

    fn absolute(self, path: &str) -> Result<Utf8PathBuf, EnvError> {
        if path.is_empty() {
            return self.working_directory();
        }
        let expanded = self.expand_path(path)?;
        if expanded.is_absolute() {
            return Ok(jail::clean(&expanded));
        }
        Ok(jail::clean(&self.working_directory()?.join(expanded)))
    }
}

impl Environment for OsEnvironment {
    fn name(&self) -> &'static str {
        "os"
    }

    fn jail(&self) -> &Utf8Path {
        Utf8Path::new("")
    }

    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), EnvError> {
        validate_key(key)?;
        // Environment mutation is unsafe under edition 2024 because other
        // threads may read the environment concurrently.
        unsafe { env::set_var(key, value) };
        Ok(())
    }

    fn unset(&mut self, key: &str) {
        if validate_key(key).is_ok() {
            unsafe { env::remove_var(key) };
        }
    }

    fn environ(&self) -> Vec<String> {
        let mut entries: Vec<(String, String)> = env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .collect();
        entries.sort();
        entries
            .into_iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect()
    }

    fn home(&self) -> Result<Utf8PathBuf, EnvError> {
        let home = dirs::home_dir().ok_or(EnvError::NotAvailable {
            what: "home directory",
        })?;
        utf8_path(home)
    }

    fn set_home(&mut self, home: &Utf8Path) -> Result<(), EnvError> {
        if self.mirrors_windows() {
            self.set("USERPROFILE", home.as_str())?;
        }
        self.set("HOME", home.as_str())
    }

    fn user(&self) -> Result<String, EnvError> {
        ["USER", "USERNAME"]
            .into_iter()
            .filter_map(|key| self.get(key))
            .find(|name| !name.is_empty())
            .or_else(account_name)
            .ok_or(EnvError::NotAvailable { what: "user" })
    }

    fn set_user(&mut self, user: &str) -> Result<(), EnvError> {
        if self.mirrors_windows() {
            self.set("USERNAME", user)?;
        }
        self.set("USER", user)
    }

    fn working_directory(&self) -> Result<Utf8PathBuf, EnvError> {
        let dir = env::current_dir().map_err(|error| EnvError::io("current_dir", ".", error))?;
        utf8_path(dir)
    }

    fn set_working_directory(&mut self, dir: &Utf8Path) {
        let target = self.absolute(dir.as_str()).unwrap_or_else(|_| dir.to_owned());
        match env::set_current_dir(&target) {
            Ok(()) => debug!(target: OS_TARGET, dir = %target, "working directory changed"),
            Err(error) => warn!(
                target: OS_TARGET,
                dir = %target,
                error = %error,
                "failed to change working directory"
            ),
        }
    }

    fn temp_dir(&self) -> Utf8PathBuf {
        utf8_path(env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
    }

    fn resolve_path(&self, path: &str) -> Result<Utf8PathBuf, EnvError> {
        let absolute = self.absolute(path)?;
        Ok(absolute.canonicalize_utf8().unwrap_or(absolute))
    }
}

impl FileSystem for OsEnvironment {
    fn host_path(&self, path: &str, _follow_links: bool) -> Result<Utf8PathBuf, EnvError> {
        self.absolute(path)
    }
}

#[cfg(unix)]
fn account_name() -> Option<String> {
    use nix::unistd::{User, geteuid};

    User::from_uid(geteuid())
        .ok()
        .flatten()
        .map(|account| account.name)
}

#[cfg(not(unix))]
const fn account_name() -> Option<String> {
    None
}
