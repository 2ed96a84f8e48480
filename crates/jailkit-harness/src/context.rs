//! Cancellation and dependency carrier passed to every runner.
//!
//! Cancellation is advisory. A runner observes [`RunContext::is_cancelled`]
//! and returns early on its own; nothing in the harness interrupts a runner
//! blocked on a pipe.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use jailkit_env::Environment;

use crate::clock::{Clock, SystemClock};
use crate::hasher::{ContentHasher, Sha256Hasher};

/// Environment shared between a context and its children.
pub type SharedEnvironment = Arc<RwLock<dyn Environment>>;

/// Per-run context: cancellation state plus injected collaborators.
#[derive(Clone)]
pub struct RunContext {
    cancel_flags: Vec<Arc<AtomicBool>>,
    deadline: Option<Instant>,
    env: SharedEnvironment,
    clock: Arc<dyn Clock>,
    hasher: Arc<dyn ContentHasher>,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.deadline)
            .field("clock", &self.clock)
            .field("hasher", &self.hasher)
            .finish_non_exhaustive()
    }
}

impl RunContext {
    /// Creates a root context owning `env`, with the system clock and a
    /// SHA-256 hasher.
    #[must_use]
    pub fn new<E: Environment + 'static>(env: E) -> Self {
        Self::from_shared(Arc::new(RwLock::new(env)))
    }

    /// Creates a root context over an already shared environment.
    #[must_use]
    pub fn from_shared(env: SharedEnvironment) -> Self {
        Self {
            cancel_flags: vec![Arc::new(AtomicBool::new(false))],
            deadline: None,
            env,
            clock: Arc::new(SystemClock),
            hasher: Arc::new(Sha256Hasher),
        }
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the content hasher.
    #[must_use]
    pub fn with_hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Derives a context that is cancelled with this one but can also be
    /// cancelled on its own without affecting the parent.
    #[must_use]
    pub fn child(&self) -> Self {
        let mut child = self.clone();
        child.cancel_flags.push(Arc::new(AtomicBool::new(false)));
        child
    }

    /// Derives a child whose deadline is at most `timeout` from now.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut child = self.child();
        let candidate = Instant::now().checked_add(timeout);
        child.deadline = match (self.deadline, candidate) {
            (Some(existing), Some(proposed)) => Some(existing.min(proposed)),
            (existing, proposed) => existing.or(proposed),
        };
        child
    }

    /// Cancels this context and every context derived from it.
    pub fn cancel(&self) {
        if let Some(own) = self.cancel_flags.last() {
            own.store(true, Ordering::SeqCst);
        }
    }

    /// Reports whether this context or an ancestor was cancelled, or the
    /// deadline has passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_flags
            .iter()
            .any(|flag| flag.load(Ordering::SeqCst))
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Returns the time left before the deadline, if one is set.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns the deadline, if one is set.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Locks the environment for reading.
    pub fn env(&self) -> RwLockReadGuard<'_, dyn Environment + 'static> {
        self.env.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the environment for writing.
    pub fn env_mut(&self) -> RwLockWriteGuard<'_, dyn Environment + 'static> {
        self.env.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the shared environment handle.
    #[must_use]
    pub fn environment(&self) -> SharedEnvironment {
        Arc::clone(&self.env)
    }

    /// Returns the clock.
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Returns the content hasher.
    #[must_use]
    pub fn hasher(&self) -> &dyn ContentHasher {
        self.hasher.as_ref()
    }
}
