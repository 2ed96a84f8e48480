//! Shared helpers for environment tests.

use std::sync::{Mutex, MutexGuard, OnceLock};

use camino::Utf8PathBuf;
use tempfile::TempDir;

use crate::{EnvironmentOptions, PlatformConvention, VirtualEnvironment};

static ENV_MUTEX: OnceLock<Mutex<()>> = OnceLock::new();

/// Serialises tests that touch the real process environment.
pub(crate) fn lock_env() -> MutexGuard<'static, ()> {
    ENV_MUTEX
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// A temporary jail on disk together with an environment rooted in it.
pub(crate) struct DiskJail {
    pub(crate) _dir: TempDir,
    pub(crate) root: Utf8PathBuf,
    pub(crate) env: VirtualEnvironment,
}

pub(crate) fn disk_jail() -> DiskJail {
    let dir = TempDir::new().expect("failed to allocate temporary jail");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("temp dir is not UTF-8");
    let env = VirtualEnvironment::new(
        &root,
        EnvironmentOptions::default().with_convention(PlatformConvention::Unix),
    );
    DiskJail {
        _dir: dir,
        root,
        env,
    }
}

/// A lexical environment rooted at `/jail`, never touching the disk.
pub(crate) fn lexical_env(convention: PlatformConvention) -> VirtualEnvironment {
    VirtualEnvironment::new(
        "/jail",
        EnvironmentOptions::default().with_convention(convention),
    )
}
