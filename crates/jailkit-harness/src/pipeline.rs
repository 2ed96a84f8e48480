//! Ordered chains of stages connected through in-memory pipes.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{Dispatch, debug, dispatcher, warn};

use crate::context::RunContext;
use crate::error::{HarnessError, StageFailure, panic_message};
use crate::pipe::PipeReader;
use crate::stage::{ProcessResult, ProcessStage};
use crate::stream::SharedBuffer;

const PIPELINE_TARGET: &str = "jailkit_harness::pipeline";

/// Stages run concurrently, each reading the previous stage's stdout.
#[derive(Debug, Default)]
pub struct Pipeline {
    stages: Vec<ProcessStage>,
    stdout: SharedBuffer,
    stderr: SharedBuffer,
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `stage` and returns the pipeline.
    #[must_use]
    pub fn stage(mut self, stage: ProcessStage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Appends `stage`.
    pub fn push(&mut self, stage: ProcessStage) {
        self.stages.push(stage);
    }

    /// Number of stages.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.stages.len()
    }

    /// Reports whether the pipeline has no stages.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns the buffer receiving the final stage's stdout.
    #[must_use]
    pub fn capture_stdout(&self) -> SharedBuffer {
        self.stdout.clone()
    }

    /// Returns the buffer receiving the final stage's stderr.
    #[must_use]
    pub fn capture_stderr(&self) -> SharedBuffer {
        self.stderr.clone()
    }

    /// Runs every stage concurrently and waits for all of them.
    ///
    /// An empty pipeline fails with [`HarnessError::EmptyPipeline`] without
    /// launching anything. Stage errors are joined in launch order into
    /// [`HarnessError::Aggregate`].
    #[must_use]
    pub fn run(self, ctx: &RunContext) -> PipelineResult {
        let Self {
            mut stages,
            stdout,
            stderr,
        } = self;
        if stages.is_empty() {
            warn!(target: PIPELINE_TARGET, "refusing to run an empty pipeline");
            return PipelineResult::rejected(HarnessError::EmptyPipeline, &stdout, &stderr);
        }
        if let Err(error) = wire(&mut stages, &stdout, &stderr) {
            warn!(target: PIPELINE_TARGET, %error, "pipeline wiring failed");
            return PipelineResult::rejected(error, &stdout, &stderr);
        }

        debug!(target: PIPELINE_TARGET, stages = stages.len(), "pipeline started");
        let results = execute(stages, ctx);

        let mut failures = Vec::new();
        let mut summaries = Vec::with_capacity(results.len());
        for result in results {
            summaries.push(StageSummary {
                name: result.name.clone(),
                exit_code: result.exit_code,
            });
            if let Some(error) = result.error {
                failures.push(StageFailure {
                    stage: result.name,
                    error,
                });
            }
        }

        let (error, exit_code) = if failures.is_empty() {
            (None, 0)
        } else {
            (Some(HarnessError::Aggregate { failures }), 1)
        };
        debug!(target: PIPELINE_TARGET, exit_code, "pipeline finished");
        PipelineResult {
            error,
            exit_code,
            stdout: stdout.contents(),
            stderr: stderr.contents(),
            stages: summaries,
        }
    }

    /// Runs the pipeline under a context that expires after `timeout`.
    ///
    /// The deadline is advisory: runners that ignore cancellation keep
    /// running and this call still waits for them.
    #[must_use]
    pub fn run_with_timeout(self, ctx: &RunContext, timeout: Duration) -> PipelineResult {
        let bounded = ctx.with_timeout(timeout);
        self.run(&bounded)
    }
}

fn wire(
    stages: &mut [ProcessStage],
    stdout: &SharedBuffer,
    stderr: &SharedBuffer,
) -> Result<(), HarnessError> {
    let mut upstream: Option<PipeReader> = None;
    let mut remaining = stages.iter_mut().peekable();
    while let Some(stage) = remaining.next() {
        if let Some(reader) = upstream.take() {
            stage.set_stdin(reader)?;
        }
        if remaining.peek().is_some() {
            upstream = Some(stage.stdout_pipe());
        } else {
            stage.capture_into(stdout, stderr);
        }
    }
    Ok(())
}

fn execute(stages: Vec<ProcessStage>, ctx: &RunContext) -> Vec<ProcessResult> {
    let dispatch = dispatcher::get_default(Dispatch::clone);
    thread::scope(|scope| {
        let launched: Vec<_> = stages
            .into_iter()
            .map(|stage| {
                let name = stage.name().to_owned();
                debug!(target: PIPELINE_TARGET, stage = %name, "launching stage");
                let handle = thread::Builder::new()
                    .name(format!("stage-{name}"))
                    .spawn_scoped(scope, || {
                        dispatcher::with_default(&dispatch, move || stage.run(ctx))
                    });
                (name, handle)
            })
            .collect();

        launched
            .into_iter()
            .map(|(name, handle)| match handle {
                Ok(running) => running
                    .join()
                    .unwrap_or_else(|payload| {
                        ProcessResult::panicked(name, panic_message(payload.as_ref()))
                    }),
                Err(source) => {
                    let error = HarnessError::Spawn {
                        stage: name.clone(),
                        source: Arc::new(source),
                    };
                    ProcessResult::harness_failure(name, error)
                }
            })
            .collect()
    })
}

/// Name and exit code of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSummary {
    /// Stage name.
    pub name: String,
    /// Exit code the stage finished with.
    pub exit_code: i32,
}

/// Aggregate outcome of a pipeline run.
#[derive(Debug)]
pub struct PipelineResult {
    /// Joined stage failures, or the configuration error that prevented the
    /// run.
    pub error: Option<HarnessError>,
    /// 0 when no stage failed, otherwise 1.
    pub exit_code: i32,
    /// Bytes the final stage wrote to stdout.
    pub stdout: Vec<u8>,
    /// Bytes the final stage wrote to stderr.
    pub stderr: Vec<u8>,
    /// Per-stage exit codes in launch order.
    pub stages: Vec<StageSummary>,
}

impl PipelineResult {
    fn rejected(error: HarnessError, stdout: &SharedBuffer, stderr: &SharedBuffer) -> Self {
        Self {
            error: Some(error),
            exit_code: 1,
            stdout: stdout.contents(),
            stderr: stderr.contents(),
            stages: Vec::new(),
        }
    }

    /// Reports whether every stage succeeded.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.error.is_none()
    }

    /// Captured stdout as text.
    #[must_use]
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Captured stderr as text.
    #[must_use]
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}
