//! Unit and behavioural tests for `jailkit-harness`.

mod context;
mod sandbox;
mod stage;
mod support;
