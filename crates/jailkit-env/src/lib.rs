//! Jail-confined environments for exercising command-line programs.
//!
//! A [`VirtualEnvironment`] presents home, user, working directory, variables
//! and filesystem access as seen from inside a private root directory, the
//! jail. Every path it hands out stays within the jail: relative paths are
//! anchored to a confined working directory and absolute paths outside the
//! jail are re-rooted beneath it. [`OsEnvironment`] implements the same
//! [`Environment`] and [`FileSystem`] traits against the real process, so
//! code written against the traits runs unchanged in tests and production.
//!
//! ```rust
//! use jailkit_env::{Environment, VirtualEnvironment, jail};
//!
//! # fn main() -> Result<(), jailkit_env::EnvError> {
//! let env = VirtualEnvironment::jailed("/jail/root");
//! assert_eq!(env.home()?, "/jail/root/home/testuser");
//!
//! let inside = jail::ensure_contained(env.jail(), "/etc/passwd".as_ref());
//! assert!(jail::is_contained(env.jail(), &inside));
//! # Ok(()) }
//! ```

mod app_paths;
mod environment;
mod error;
mod fs;
pub mod jail;
pub mod paths;
pub mod platform;

pub use app_paths::AppPaths;
pub use environment::{
    DEFAULT_USER, Environment, EnvironmentOptions, OsEnvironment, VirtualEnvironment,
    expand_variables, get_or,
};
pub use error::EnvError;
pub use fs::FileSystem;
pub use platform::PlatformConvention;

#[cfg(test)]
mod tests;
