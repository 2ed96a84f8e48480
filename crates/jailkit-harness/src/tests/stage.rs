//! Tests for standalone stage execution.

use std::io::{Read, Write};
use std::time::Duration;

use rstest::rstest;

use super::support::{context, is_stage_panic, uppercase_consumer};
use crate::{HarnessError, Outcome, ProcessStage, SharedBuffer, StageState};

#[rstest]
fn a_stage_without_input_reads_nothing_and_captures_output() {
    let stage = ProcessStage::new("echo", |_, stream| {
        let mut input = Vec::new();
        let _read = stream.stdin.read_to_end(&mut input);
        let _written = write!(
            stream.stdout,
            "piped={} tty={} bytes={}",
            stream.is_piped,
            stream.is_tty,
            input.len()
        );
        let _warned = write!(stream.stderr, "warning");
        Outcome::ok()
    });

    let result = stage.run(&context());
    assert!(result.success());
    assert_eq!(result.stdout_text(), "piped=false tty=false bytes=0");
    assert_eq!(result.stderr_text(), "warning");
}

#[rstest]
fn explicit_input_marks_the_stream_as_piped() {
    let mut stage = ProcessStage::new("flags", |_, stream| {
        let _written = write!(stream.stdout, "{} {}", stream.is_piped, stream.is_tty);
        Outcome::ok()
    })
    .with_tty(true);
    stage.set_stdin(&b"input"[..]).expect("stdin");

    assert_eq!(stage.run(&context()).stdout_text(), "true true");
}

#[rstest]
fn input_can_only_be_wired_once() {
    let mut stage = uppercase_consumer("consumer");
    stage.set_stdin(&b"first"[..]).expect("first stdin");
    let error = stage.set_stdin(&b"second"[..]).expect_err("second stdin");
    assert!(matches!(error, HarnessError::StdinConfigured { stage: ref name } if name == "consumer"));
}

#[rstest]
fn stdout_pipe_is_created_once() {
    let mut stage = uppercase_consumer("consumer");
    assert_eq!(stage.state(), StageState::Configured);
    let first = stage.stdout_pipe();
    let second = stage.stdout_pipe();
    assert!(first.same_pipe(&second));
    assert_eq!(stage.state(), StageState::Wired);
}

#[rstest]
fn piped_output_reaches_the_reader_and_ends_with_eof() {
    let mut stage = ProcessStage::producer("producer", ["x", "y"], Duration::ZERO);
    let mut reader = stage.stdout_pipe();
    let running = stage.spawn(&context()).expect("spawn");

    let mut text = String::new();
    reader.read_to_string(&mut text).expect("read pipe");
    let result = running.wait();

    assert_eq!(text, "x\ny\n");
    assert!(result.success());
    assert!(result.stdout.is_empty());
}

#[rstest]
fn an_explicit_sink_wins_over_capture_and_pipe() {
    let sink = SharedBuffer::new();
    let mut stage = ProcessStage::producer("producer", ["line"], Duration::ZERO);
    let mut reader = stage.stdout_pipe();
    stage.set_stdout(sink.clone());
    let captured = stage.capture_stdout();

    let result = stage.run(&context());
    let mut piped = Vec::new();
    reader.read_to_end(&mut piped).expect("pipe at eof");

    assert_eq!(sink.text(), "line\n");
    assert!(captured.contents().is_empty());
    assert!(piped.is_empty());
    assert!(result.stdout.is_empty());
}

#[rstest]
fn capture_replaces_a_pipe() {
    let mut stage = ProcessStage::producer("producer", ["line"], Duration::ZERO);
    let _reader = stage.stdout_pipe();
    let captured = stage.capture_stdout();
    assert!(captured.same_buffer(&stage.capture_stdout()));

    let result = stage.run(&context());
    assert_eq!(captured.text(), "line\n");
    assert_eq!(result.stdout_text(), "line\n");
}

#[rstest]
#[case::error_with_zero_exit(Outcome::fail(0, "boom"), 1, true)]
#[case::error_with_code(Outcome::fail(4, "boom"), 4, true)]
#[case::plain_exit(Outcome::exit(3), 3, false)]
#[case::success(Outcome::ok(), 0, false)]
fn exit_codes_follow_the_outcome(
    #[case] outcome: Outcome,
    #[case] expected: i32,
    #[case] failed: bool,
) {
    let stage = ProcessStage::new("exit", move |_, _| outcome);
    let result = stage.run(&context());
    assert_eq!(result.exit_code, expected);
    assert_eq!(result.error.is_some(), failed);
}

#[rstest]
fn input_can_be_fed_incrementally() {
    let mut stage = uppercase_consumer("consumer");
    let mut writer = stage.stdin_writer().expect("stdin writer");
    let mut running = stage.spawn(&context()).expect("spawn");

    writer.write_all(b"first\n").expect("write");
    assert!(running.wait_timeout(Duration::from_millis(20)).is_none());
    assert_eq!(running.state(), StageState::Running);
    writer.write_all(b"second\n").expect("write");
    writer.close();

    let finished = running
        .wait_timeout(Duration::from_secs(5))
        .expect("stage finished");
    assert_eq!(finished.stdout_text(), "C:FIRST\nC:SECOND\n");
    assert_eq!(running.state(), StageState::Finished);
    assert!(running.try_result().is_some());
}

#[rstest]
fn a_panicking_runner_still_closes_its_pipe() {
    let mut stage = ProcessStage::new("explodes", |_, stream| {
        let _written = writeln!(stream.stdout, "partial");
        panic!("runner exploded");
    });
    let mut reader = stage.stdout_pipe();
    let running = stage.spawn(&context()).expect("spawn");

    let mut text = String::new();
    reader.read_to_string(&mut text).expect("pipe reaches eof");
    let result = running.wait();

    assert_eq!(text, "partial\n");
    assert_eq!(result.exit_code, 1);
    let error = result.error.expect("panic reported");
    let harness = error.downcast_ref::<HarnessError>().expect("harness error");
    assert!(is_stage_panic(harness));
    assert!(harness.to_string().contains("runner exploded"));
}

#[rstest]
fn a_cancelled_producer_stops_early() {
    let ctx = context();
    ctx.cancel();
    let result = ProcessStage::producer("producer", ["never"], Duration::ZERO).run(&ctx);

    assert_eq!(result.exit_code, 1);
    assert!(result.stdout.is_empty());
    let error = result.error.expect("cancellation reported");
    assert!(matches!(
        error.downcast_ref::<HarnessError>(),
        Some(HarnessError::Cancelled { .. })
    ));
}
