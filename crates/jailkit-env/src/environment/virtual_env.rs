//! In-memory environment confined to a jail directory.

use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use super::{Environment, validate_key};
use crate::error::EnvError;
use crate::fs::FileSystem;
use crate::jail;
use crate::platform::{
    APPDATA, LOCALAPPDATA, PlatformConvention, XDG_CACHE_HOME, XDG_CONFIG_HOME, XDG_DATA_HOME,
    XDG_STATE_HOME,
};

/// User name assumed when none is supplied.
pub const DEFAULT_USER: &str = "testuser";

const VIRTUAL_TARGET: &str = "jailkit_env::virtual";

/// Optional overrides applied when constructing a [`VirtualEnvironment`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentOptions {
    home: Option<Utf8PathBuf>,
    user: Option<String>,
    convention: Option<PlatformConvention>,
}

impl EnvironmentOptions {
    /// Sets the home directory, confined to the jail on construction.
    #[must_use]
    pub fn with_home(mut self, home: impl Into<Utf8PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Sets the user name.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Selects the directory convention instead of the build target's.
    #[must_use]
    pub const fn with_convention(mut self, convention: PlatformConvention) -> Self {
        self.convention = Some(convention);
        self
    }
}

/// Environment held entirely in memory and confined to a jail.
///
/// `HOME`, `USER` and `PWD` live in dedicated fields and are surfaced through
/// the variable operations, so reading or writing either view always agrees.
/// Mutations never reach the real process environment. Cloning produces an
/// independent copy suitable for isolating one run from another.
#[derive(Debug, Clone)]
pub struct VirtualEnvironment {
    jail: Utf8PathBuf,
    convention: PlatformConvention,
    home: Option<Utf8PathBuf>,
    user: Option<String>,
    working_directory: Option<Utf8PathBuf>,
    variables: HashMap<String, String>,
}

impl VirtualEnvironment {
    /// Creates an environment rooted at `jail`.
    ///
    /// The user defaults to [`DEFAULT_USER`] and home defaults to
    /// `/home/<user>` (`/.root` for `root`), both confined to the jail. The
    /// working directory starts at home and the platform directory variables
    /// of the selected convention are populated.
    #[must_use]
    pub fn new(jail: impl AsRef<Utf8Path>, options: EnvironmentOptions) -> Self {
        let requested = jail.as_ref();
        let root = if requested.as_str().is_empty() {
            Utf8PathBuf::new()
        } else {
            jail::clean(requested)
        };
        let convention = options
            .convention
            .unwrap_or_else(PlatformConvention::current);
        let user = options
            .user
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_USER.to_owned());
        let home = jail::ensure_contained(
            &root,
            &options.home.unwrap_or_else(|| default_home(&user)),
        );

        let mut env = Self {
            jail: root,
            convention,
            home: Some(home.clone()),
            user: Some(user),
            working_directory: Some(home.clone()),
            variables: HashMap::new(),
        };
        env.populate_convention(&home);
        debug!(
            target: VIRTUAL_TARGET,
            jail = %env.jail,
            home = %home,
            convention = ?env.convention,
            "virtual environment created"
        );
        env
    }

    /// Creates an environment rooted at `jail` with default options.
    #[must_use]
    pub fn jailed(jail: impl AsRef<Utf8Path>) -> Self {
        Self::new(jail, EnvironmentOptions::default())
    }

    fn populate_convention(&mut self, home: &Utf8Path) {
        let entries = match self.convention {
            PlatformConvention::Unix => vec![
                (XDG_CONFIG_HOME, home.join(".config")),
                (XDG_CACHE_HOME, home.join(".cache")),
                (XDG_DATA_HOME, home.join(".local").join("share")),
                (XDG_STATE_HOME, home.join(".local").join("state")),
                ("TMPDIR", jail::ensure_contained(&self.jail, Utf8Path::new("/tmp"))),
            ],
            PlatformConvention::Windows => {
                let local = home.join("AppData").join("Local");
                vec![
                    (APPDATA, home.join("AppData").join("Roaming")),
                    ("TMPDIR", local.join("Temp")),
                    (LOCALAPPDATA, local),
                ]
            }
        };
        self.variables.extend(
            entries
                .into_iter()
                .map(|(key, value)| (key.to_owned(), value.into_string())),
        );
    }

    fn variable(&self, key: &str) -> Option<&str> {
        self.variables
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Anchors `path` to the working directory without touching the disk.
    ///
    /// Returns the cleaned absolute path and whether the caller supplied a
    /// relative path.
    fn anchor(&self, path: &str) -> Result<(Utf8PathBuf, bool), EnvError> {
        if path.is_empty() {
            return Ok((self.working_directory()?, true));
        }
        let expanded = self.expand_path(path)?;
        if expanded.is_absolute() {
            return Ok((jail::clean(&expanded), false));
        }
        let joined = self.working_directory()?.join(expanded);
        Ok((jail::clean(&joined), true))
    }

    /// Follows symbolic links for paths that exist on disk, mapping the
    /// canonical result back beneath the jail.
    fn follow_links(&self, path: Utf8PathBuf) -> Utf8PathBuf {
        let Ok(canonical) = path.canonicalize_utf8() else {
            return path;
        };
        if self.jail.as_str().is_empty() {
            return canonical;
        }
        let root = self
            .jail
            .canonicalize_utf8()
            .unwrap_or_else(|_| self.jail.clone());
        match jail::relative(&root, &canonical) {
            Some(rel) if jail::is_contained(&root, &canonical) => jail::clean(&self.jail.join(rel)),
            _ => jail::ensure_contained(&self.jail, &canonical),
        }
    }

    /// Rejects host paths whose nearest existing ancestor, or the leaf itself
    /// when links are followed, canonicalises outside the jail.
    fn check_on_disk(&self, requested: &str, host: &Utf8Path, follow: bool) -> Result<(), EnvError> {
        let Ok(root) = self.jail.canonicalize_utf8() else {
            return Ok(());
        };
        let start = if follow { Some(host) } else { host.parent() };
        let Some(existing) = start
            .into_iter()
            .flat_map(Utf8Path::ancestors)
            .find(|candidate| candidate.exists())
        else {
            return Ok(());
        };
        let canonical = existing
            .canonicalize_utf8()
            .map_err(|error| crate::fs::failure("canonicalize", existing, error))?;
        if jail::is_contained(&root, &canonical) {
            Ok(())
        } else {
            Err(EnvError::escape(requested, &self.jail))
        }
    }
}

fn default_home(user: &str) -> Utf8PathBuf {
    if user == "root" {
        Utf8PathBuf::from("/.root")
    } else {
        Utf8PathBuf::from("/home").join(user)
    }
}

impl Environment for VirtualEnvironment {
    fn name(&self) -> &'static str {
        "virtual"
    }

    fn jail(&self) -> &Utf8Path {
        &self.jail
    }

    fn convention(&self) -> PlatformConvention {
        self.convention
    }

    fn get(&self, key: &str) -> Option<String> {
        match key {
            "HOME" => self.home.as_ref().map(|home| home.as_str().to_owned()),
            "USER" => self.user.clone(),
            "PWD" => self
                .working_directory
                .as_ref()
                .map(|dir| dir.as_str().to_owned()),
            _ => self.variables.get(key).cloned(),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), EnvError> {
        validate_key(key)?;
        match key {
            "HOME" => self.set_home(Utf8Path::new(value))?,
            "USER" => self.set_user(value)?,
            "PWD" => self.set_working_directory(Utf8Path::new(value)),
            _ => {
                self.variables.insert(key.to_owned(), value.to_owned());
            }
        }
        Ok(())
    }

    fn unset(&mut self, key: &str) {
        match key {
            "HOME" => self.home = None,
            "USER" => self.user = None,
            "PWD" => self.working_directory = None,
            _ => {
                self.variables.remove(key);
            }
        }
    }

    fn environ(&self) -> Vec<String> {
        let mut entries: Vec<(String, String)> = self
            .variables
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        for key in ["HOME", "USER", "PWD"] {
            if let Some(value) = self.get(key) {
                entries.push((key.to_owned(), value));
            }
        }
        entries.sort();
        entries
            .into_iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect()
    }

    fn home(&self) -> Result<Utf8PathBuf, EnvError> {
        self.home
            .clone()
            .ok_or(EnvError::NotAvailable { what: "home directory" })
    }

    fn set_home(&mut self, home: &Utf8Path) -> Result<(), EnvError> {
        let target = self
            .anchor(home.as_str())
            .map_or_else(|_| home.to_owned(), |(absolute, _)| absolute);
        let confined = jail::ensure_contained(&self.jail, &target);
        debug!(target: VIRTUAL_TARGET, home = %confined, "home directory changed");
        self.home = Some(confined);
        Ok(())
    }

    fn user(&self) -> Result<String, EnvError> {
        self.user
            .clone()
            .ok_or(EnvError::NotAvailable { what: "user" })
    }

    fn set_user(&mut self, user: &str) -> Result<(), EnvError> {
        self.user = Some(user.to_owned());
        Ok(())
    }

    fn working_directory(&self) -> Result<Utf8PathBuf, EnvError> {
        self.working_directory
            .clone()
            .ok_or(EnvError::NotAvailable {
                what: "working directory",
            })
    }

    fn set_working_directory(&mut self, dir: &Utf8Path) {
        let target = self
            .anchor(dir.as_str())
            .map_or_else(|_| dir.to_owned(), |(absolute, _)| absolute);
        let confined = jail::ensure_contained(&self.jail, &target);
        debug!(target: VIRTUAL_TARGET, dir = %confined, "working directory changed");
        self.working_directory = Some(confined);
    }

    fn temp_dir(&self) -> Utf8PathBuf {
        let explicit = ["TMPDIR", "TEMP", "TMP"]
            .into_iter()
            .find_map(|key| self.variable(key))
            .map(Utf8PathBuf::from);
        let chosen = explicit.or_else(|| match self.convention {
            PlatformConvention::Windows => [LOCALAPPDATA, APPDATA, "USERPROFILE"]
                .into_iter()
                .find_map(|key| self.variable(key))
                .map(|base| Utf8Path::new(base).join("Temp"))
                .or_else(|| {
                    self.home
                        .as_ref()
                        .map(|home| home.join("AppData").join("Local").join("Temp"))
                }),
            PlatformConvention::Unix => None,
        });
        let fallback = || Utf8PathBuf::from("/tmp");
        jail::ensure_contained(&self.jail, &chosen.unwrap_or_else(fallback))
    }

    fn resolve_path(&self, path: &str) -> Result<Utf8PathBuf, EnvError> {
        let (absolute, _) = self.anchor(path)?;
        let contained = jail::ensure_contained(&self.jail, &absolute);
        Ok(self.follow_links(contained))
    }
}

impl FileSystem for VirtualEnvironment {
    fn host_path(&self, path: &str, follow_links: bool) -> Result<Utf8PathBuf, EnvError> {
        let (absolute, relative_input) = self.anchor(path)?;
        if self.jail.as_str().is_empty() {
            return Ok(absolute);
        }
        if relative_input && !jail::is_contained(&self.jail, &absolute) {
            return Err(EnvError::escape(path, &self.jail));
        }
        let host = jail::ensure_contained(&self.jail, &absolute);
        self.check_on_disk(path, &host, follow_links)?;
        Ok(host)
    }

    fn link_target(&self, original: &str, link: &Utf8Path) -> Result<Utf8PathBuf, EnvError> {
        let target = Utf8Path::new(original);
        if target.is_absolute() || original.starts_with('~') {
            return self.host_path(original, false);
        }
        if self.jail.as_str().is_empty() {
            return Ok(target.to_owned());
        }
        let parent = link.parent().unwrap_or(self.jail.as_path());
        if jail::is_contained(&self.jail, &jail::clean(&parent.join(target))) {
            Ok(target.to_owned())
        } else {
            Err(EnvError::escape(original, &self.jail))
        }
    }
}
