//! Unit and behavioural tests for `jailkit-env`.

mod fs;
mod support;
