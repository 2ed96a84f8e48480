//! Self-cleaning test fixture bundling a jail with its collaborators.
//!
//! A [`Sandbox`] owns a temporary directory used as the jail, a
//! [`VirtualEnvironment`] rooted there, a [`TestClock`] and a content hasher.
//! Stages and pipelines run against a clone of the environment, so a run can
//! change variables or the working directory without affecting the next one.
//!
//! Runs started through the sandbox emit their tracing events into a
//! [`LogCapture`] owned by the sandbox, so tests can assert on them.

use std::fs;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use jailkit_env::{
    EnvError, Environment, EnvironmentOptions, FileSystem, OsEnvironment, PlatformConvention,
    VirtualEnvironment, paths,
};
use tempfile::TempDir;
use time::{Duration, OffsetDateTime};
use tracing::{Dispatch, debug, dispatcher};

use crate::clock::{Clock, DEFAULT_TEST_TIME, TestClock};
use crate::config::HarnessConfig;
use crate::context::RunContext;
use crate::error::{HarnessError, io};
use crate::hasher::{ContentHasher, Sha256Hasher};
use crate::logs::LogCapture;
use crate::pipeline::{Pipeline, PipelineResult};
use crate::stage::{Outcome, ProcessResult, ProcessStage};
use crate::stream::Stream;
use crate::telemetry;

const SANDBOX_TARGET: &str = "jailkit_harness::sandbox";

/// Mode used by [`Sandbox::mkdir`].
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Construction options for a [`Sandbox`].
#[derive(Debug, Default, Clone)]
pub struct SandboxOptions {
    home: Option<Utf8PathBuf>,
    user: Option<String>,
    convention: Option<PlatformConvention>,
    variables: Vec<(String, String)>,
    working_directory: Option<String>,
    clock_start: Option<OffsetDateTime>,
    fixtures: Vec<(Utf8PathBuf, String)>,
    config: Option<HarnessConfig>,
}

impl SandboxOptions {
    /// Sets the home directory, interpreted inside the jail.
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

    /// Selects the platform convention instead of the build target's.
    #[must_use]
    pub const fn with_convention(mut self, convention: PlatformConvention) -> Self {
        self.convention = Some(convention);
        self
    }

    /// Seeds one environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.push((key.into(), value.into()));
        self
    }

    /// Seeds several environment variables.
    #[must_use]
    pub fn with_env_map<I, K, V>(mut self, variables: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.variables.extend(
            variables
                .into_iter()
                .map(|(key, value)| (key.into(), value.into())),
        );
        self
    }

    /// Starts in `dir`, resolved like any other sandbox path.
    #[must_use]
    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Starts the test clock at `start`.
    #[must_use]
    pub const fn with_clock(mut self, start: OffsetDateTime) -> Self {
        self.clock_start = Some(start);
        self
    }

    /// Copies the host directory `source` to `destination` inside the jail.
    #[must_use]
    pub fn with_fixture(
        mut self,
        source: impl Into<Utf8PathBuf>,
        destination: impl Into<String>,
    ) -> Self {
        self.fixtures.push((source.into(), destination.into()));
        self
    }

    /// Uses `config` instead of reading `JAILKIT_*` variables from the
    /// process environment.
    #[must_use]
    pub fn with_config(mut self, config: HarnessConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Reads the configuration from `JAILKIT_*` variables in `env`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidConfig`] when a variable is malformed.
    pub fn with_config_from<E>(self, env: &E) -> Result<Self, HarnessError>
    where
        E: Environment + ?Sized,
    {
        Ok(self.with_config(HarnessConfig::from_environment(env)?))
    }
}

/// Temporary jail plus environment, clock and hasher for one test.
///
/// The jail directory is removed when the sandbox is dropped.
#[derive(Debug)]
pub struct Sandbox {
    env: VirtualEnvironment,
    clock: Arc<TestClock>,
    hasher: Arc<dyn ContentHasher>,
    config: HarnessConfig,
    logs: LogCapture,
    dispatch: Dispatch,
    _dir: TempDir,
}

impl Sandbox {
    /// Creates a sandbox with default options.
    ///
    /// # Errors
    ///
    /// Returns an error when the jail cannot be created.
    pub fn new() -> Result<Self, HarnessError> {
        Self::with_options(SandboxOptions::default())
    }

    /// Creates a sandbox from `options`.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration or telemetry cannot be set up,
    /// the jail cannot be created, a variable is rejected, a fixture cannot
    /// be copied, or the working directory cannot be resolved.
    pub fn with_options(options: SandboxOptions) -> Result<Self, HarnessError> {
        let SandboxOptions {
            home: home_override,
            user,
            convention: convention_override,
            variables,
            working_directory,
            clock_start,
            fixtures,
            config: supplied_config,
        } = options;
        let config = match supplied_config {
            Some(supplied) => supplied,
            None => HarnessConfig::from_environment(&OsEnvironment::new())?,
        };
        telemetry::initialise(&config)?;
        let logs = LogCapture::new();
        let dispatch = telemetry::capturing_dispatch(&config, logs.clone())?;

        let dir = tempfile::Builder::new()
            .prefix("jailkit-")
            .tempdir()
            .map_err(|error| io("create jail", Utf8Path::new("<temp>"), error))?;
        let root = jail_root(&dir)?;

        let user_name = user.unwrap_or_else(|| config.default_user().to_owned());
        let mut env_options = EnvironmentOptions::default().with_user(user_name);
        if let Some(home) = home_override {
            env_options = env_options.with_home(home);
        }
        if let Some(convention) = convention_override {
            env_options = env_options.with_convention(convention);
        }
        let mut env = VirtualEnvironment::new(&root, env_options);

        for (key, value) in &variables {
            env.set(key, value)?;
        }
        for (source, destination) in &fixtures {
            let target = env.host_path(destination, false)?;
            copy_tree(source, &target)?;
            debug!(target: SANDBOX_TARGET, %source, destination = %target, "fixture copied");
        }
        if let Some(start) = working_directory {
            let resolved = env.resolve_path(&start)?;
            env.set_working_directory(&resolved);
        }

        debug!(target: SANDBOX_TARGET, jail = %root, "sandbox ready");
        Ok(Self {
            env,
            clock: Arc::new(TestClock::new(clock_start.unwrap_or(DEFAULT_TEST_TIME))),
            hasher: Arc::new(Sha256Hasher),
            config,
            logs,
            dispatch,
            _dir: dir,
        })
    }

    /// Host path of the jail root.
    #[must_use]
    pub fn jail(&self) -> &Utf8Path {
        self.env.jail()
    }

    /// The template environment.
    #[must_use]
    pub const fn env(&self) -> &VirtualEnvironment {
        &self.env
    }

    /// Mutable access to the template environment.
    pub const fn env_mut(&mut self) -> &mut VirtualEnvironment {
        &mut self.env
    }

    /// Configuration the sandbox was built with.
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Events emitted while the sandbox ran stages, pipelines or
    /// [`Sandbox::traced`] closures.
    #[must_use]
    pub const fn logs(&self) -> &LogCapture {
        &self.logs
    }

    /// Runs `work` with tracing events routed into [`Sandbox::logs`].
    pub fn traced<T>(&self, work: impl FnOnce() -> T) -> T {
        dispatcher::with_default(&self.dispatch, work)
    }

    /// Content hasher handed to runners.
    #[must_use]
    pub fn hasher(&self) -> &dyn ContentHasher {
        self.hasher.as_ref()
    }

    /// Builds a run context over a fresh clone of the environment.
    #[must_use]
    pub fn context(&self) -> RunContext {
        RunContext::new(self.env.clone())
            .with_clock(Arc::clone(&self.clock) as Arc<dyn Clock>)
            .with_hasher(Arc::clone(&self.hasher))
    }

    /// Reads a file inside the jail.
    ///
    /// # Errors
    ///
    /// Returns an error when the path escapes the jail or cannot be read.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>, HarnessError> {
        Ok(self.env.read_file(path)?)
    }

    /// Writes a file inside the jail, creating missing parents.
    ///
    /// # Errors
    ///
    /// Returns an error when the path escapes the jail or cannot be written.
    pub fn write_file(&self, path: &str, data: &[u8], mode: u32) -> Result<(), HarnessError> {
        Ok(self.env.write_file(path, data, mode)?)
    }

    /// Atomically replaces a file inside the jail.
    ///
    /// # Errors
    ///
    /// Returns an error when the path escapes the jail or the write fails.
    pub fn atomic_write_file(
        &self,
        path: &str,
        data: &[u8],
        mode: u32,
    ) -> Result<(), HarnessError> {
        Ok(self.env.atomic_write_file(path, data, mode)?)
    }

    /// Creates a directory inside the jail with [`DEFAULT_DIR_MODE`].
    ///
    /// # Errors
    ///
    /// Returns an error when the path escapes the jail or cannot be created.
    pub fn mkdir(&self, path: &str, recursive: bool) -> Result<(), HarnessError> {
        Ok(self.env.mkdir(path, DEFAULT_DIR_MODE, recursive)?)
    }

    /// Returns `path` as an absolute host path confined to the jail.
    #[must_use]
    pub fn absolute(&self, path: &str) -> Utf8PathBuf {
        paths::absolute(&self.env, path)
    }

    /// Resolves `path`, following symbolic links that exist under the jail.
    ///
    /// # Errors
    ///
    /// Returns an error when home or the working directory is unavailable.
    pub fn resolve(&self, path: &str) -> Result<Utf8PathBuf, HarnessError> {
        Ok(paths::resolve(&self.env, path)?)
    }

    /// Home directory of the sandbox user.
    ///
    /// # Errors
    ///
    /// Returns an error when home is unset.
    pub fn home(&self) -> Result<Utf8PathBuf, HarnessError> {
        Ok(self.env.home()?)
    }

    /// Current working directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the working directory is unset.
    pub fn working_directory(&self) -> Result<Utf8PathBuf, HarnessError> {
        Ok(self.env.working_directory()?)
    }

    /// Changes the working directory; `dir` is resolved first.
    ///
    /// # Errors
    ///
    /// Returns an error when `dir` cannot be resolved.
    pub fn set_working_directory(&mut self, dir: &str) -> Result<(), HarnessError> {
        let resolved = self.env.resolve_path(dir)?;
        self.env.set_working_directory(&resolved);
        Ok(())
    }

    /// Moves the test clock forward.
    pub fn advance(&self, step: Duration) {
        self.clock.advance(step);
    }

    /// Current test clock time.
    #[must_use]
    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// Builds a stage using the configured pipe capacity.
    #[must_use]
    pub fn stage<F>(&self, name: impl Into<String>, runner: F) -> ProcessStage
    where
        F: FnOnce(&RunContext, &mut Stream) -> Outcome + Send + 'static,
    {
        ProcessStage::new(name, runner).with_pipe_capacity(self.config.pipe_capacity())
    }

    /// Runs one stage against a clone of the environment.
    #[must_use]
    pub fn run_stage(&self, stage: ProcessStage) -> ProcessResult {
        self.traced(|| stage.run(&self.context()))
    }

    /// Runs a pipeline against a clone of the environment.
    #[must_use]
    pub fn run_pipeline(&self, pipeline: Pipeline) -> PipelineResult {
        self.traced(|| pipeline.run(&self.context()))
    }

    /// Lists files and leaf directories in the jail as paths rooted at `/`.
    ///
    /// Directories carry a trailing `/`. Entries deeper than `max_depth`
    /// segments are omitted; 0 means no limit.
    ///
    /// # Errors
    ///
    /// Returns an error when a directory cannot be read.
    pub fn jail_tree(&self, max_depth: usize) -> Result<Vec<String>, HarnessError> {
        let mut listing = Vec::new();
        walk_tree(
            &TreeWalk {
                max_depth,
                host: self.jail(),
                inside: Utf8Path::new("/"),
                depth: 0,
            },
            &mut listing,
        )?;
        Ok(listing)
    }
}

fn jail_root(dir: &TempDir) -> Result<Utf8PathBuf, HarnessError> {
    let host = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
        .map_err(|path| EnvError::NonUtf8Path { path })?;
    host.canonicalize_utf8()
        .map_err(|error| io("canonicalise jail", &host, error))
}

fn copy_tree(source: &Utf8Path, target: &Utf8Path) -> Result<(), HarnessError> {
    fs::create_dir_all(target).map_err(|error| io("create fixture directory", target, error))?;
    let entries = source
        .read_dir_utf8()
        .map_err(|error| io("read fixture directory", source, error))?;
    for item in entries {
        let entry = item.map_err(|error| io("read fixture entry", source, error))?;
        let destination = target.join(entry.file_name());
        let kind = entry
            .file_type()
            .map_err(|error| io("inspect fixture entry", entry.path(), error))?;
        if kind.is_dir() {
            copy_tree(entry.path(), &destination)?;
        } else {
            fs::copy(entry.path(), &destination)
                .map_err(|error| io("copy fixture file", entry.path(), error))?;
        }
    }
    Ok(())
}

struct TreeWalk<'a> {
    max_depth: usize,
    host: &'a Utf8Path,
    inside: &'a Utf8Path,
    depth: usize,
}

fn walk_tree(walk: &TreeWalk<'_>, listing: &mut Vec<String>) -> Result<(), HarnessError> {
    let mut entries = walk
        .host
        .read_dir_utf8()
        .map_err(|error| io("read jail directory", walk.host, error))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| io("read jail entry", walk.host, error))?;
    entries.sort_by(|left, right| left.file_name().cmp(right.file_name()));

    let before = listing.len();
    let depth = walk.depth + 1;
    if walk.max_depth == 0 || depth <= walk.max_depth {
        for entry in &entries {
            let inside = walk.inside.join(entry.file_name());
            let is_dir = entry
                .file_type()
                .map_err(|error| io("inspect jail entry", entry.path(), error))?
                .is_dir();
            if is_dir {
                let child = TreeWalk {
                    max_depth: walk.max_depth,
                    host: entry.path(),
                    inside: &inside,
                    depth,
                };
                walk_tree(&child, listing)?;
            } else {
                listing.push(inside.into_string());
            }
        }
    }
    if listing.len() == before && walk.depth > 0 {
        listing.push(format!("{}/", walk.inside));
    }
    Ok(())
}
