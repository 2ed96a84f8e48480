//! Per-application directory discovery.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::environment::Environment;
use crate::error::EnvError;
use crate::fs::FileSystem;
use crate::jail;
use crate::platform;

const APP_PATHS_TARGET: &str = "jailkit_env::app_paths";

/// Directories an application reads and writes, derived from an environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// Application name appended to every per-user directory.
    pub app_name: String,
    /// Project root: the working directory, or the repository root.
    pub root: Utf8PathBuf,
    /// Per-user configuration directory.
    pub config_root: Utf8PathBuf,
    /// Per-user data directory.
    pub data_root: Utf8PathBuf,
    /// Per-user state directory.
    pub state_root: Utf8PathBuf,
    /// Per-user cache directory.
    pub cache_root: Utf8PathBuf,
    /// Project-local configuration override, `root/.<app_name>`.
    pub local_config_root: Utf8PathBuf,
}

impl AppPaths {
    /// Derives the directories for `app_name` rooted at the working
    /// directory.
    ///
    /// # Errors
    ///
    /// Propagates failures from the working directory and platform
    /// directory lookups.
    pub fn discover<E: Environment + ?Sized>(env: &E, app_name: &str) -> Result<Self, EnvError> {
        let root = env.working_directory()?;
        Self::with_root(env, app_name, root)
    }

    /// Like [`AppPaths::discover`] but roots the paths at the nearest
    /// ancestor of the working directory containing a `.git` entry, without
    /// leaving the environment's jail. Falls back to the working directory.
    ///
    /// # Errors
    ///
    /// Propagates failures from the working directory and platform
    /// directory lookups.
    pub fn discover_repository<E>(env: &E, app_name: &str) -> Result<Self, EnvError>
    where
        E: Environment + FileSystem + ?Sized,
    {
        let cwd = env.working_directory()?;
        let root = repository_root(env, &cwd).unwrap_or(cwd);
        Self::with_root(env, app_name, root)
    }

    fn with_root<E: Environment + ?Sized>(
        env: &E,
        app_name: &str,
        root: Utf8PathBuf,
    ) -> Result<Self, EnvError> {
        let paths = Self {
            app_name: app_name.to_owned(),
            config_root: platform::config_dir(env)?.join(app_name),
            data_root: platform::data_dir(env)?.join(app_name),
            state_root: platform::state_dir(env)?.join(app_name),
            cache_root: platform::cache_dir(env)?.join(app_name),
            local_config_root: root.join(format!(".{app_name}")),
            root,
        };
        debug!(target: APP_PATHS_TARGET, app = app_name, root = %paths.root, "discovered application paths");
        Ok(paths)
    }
}

fn repository_root<E>(env: &E, start: &Utf8Path) -> Option<Utf8PathBuf>
where
    E: Environment + FileSystem + ?Sized,
{
    start
        .ancestors()
        .take_while(|dir| jail::is_contained(env.jail(), dir))
        .find(|dir| {
            env.host_path(dir.join(".git").as_str(), false)
                .is_ok_and(|marker| marker.symlink_metadata().is_ok())
        })
        .map(Utf8Path::to_path_buf)
}
