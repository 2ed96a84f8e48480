//! Shared stage builders for harness tests.

use std::io::{BufRead, BufReader, Write};

use jailkit_env::VirtualEnvironment;

use crate::{HarnessError, Outcome, ProcessStage, RunContext};

pub(super) fn context() -> RunContext {
    RunContext::new(VirtualEnvironment::jailed("/jail"))
}

/// Reads lines and writes each one upper-cased with a `C:` prefix.
pub(super) fn uppercase_consumer(name: &str) -> ProcessStage {
    ProcessStage::new(name, |_, stream| {
        for line in BufReader::new(&mut stream.stdin).lines() {
            let text = match line {
                Ok(text) => text,
                Err(error) => return Outcome::fail(1, error),
            };
            if let Err(error) = writeln!(stream.stdout, "C:{}", text.to_uppercase()) {
                return Outcome::fail(1, error);
            }
        }
        Outcome::ok()
    })
}

/// Copies stdin to stdout unchanged.
pub(super) fn passthrough(name: &str) -> ProcessStage {
    ProcessStage::new(name, |_, stream| {
        match std::io::copy(&mut stream.stdin, &mut stream.stdout) {
            Ok(_) => Outcome::ok(),
            Err(error) => Outcome::fail(1, error),
        }
    })
}

/// Fails immediately with `message`.
pub(super) fn failing(name: &str, reason: &str) -> ProcessStage {
    let message = reason.to_owned();
    ProcessStage::new(name, move |_, stream| {
        let _written = writeln!(stream.stderr, "{message}");
        Outcome::fail(2, message)
    })
}

pub(super) fn is_stage_panic(error: &HarnessError) -> bool {
    matches!(error, HarnessError::StagePanicked { .. })
}
