//! Tests for the sandbox fixture.
#![cfg(unix)]

use std::fs;
use std::io::Write;

use camino::Utf8PathBuf;
use jailkit_env::{EnvError, Environment, OsEnvironment, PlatformConvention, VirtualEnvironment};
use rstest::{fixture, rstest};
use time::Duration;
use time::macros::datetime;
use tracing::{Level, debug, info};

use super::support::uppercase_consumer;
use crate::{
    DEFAULT_TEST_TIME, HarnessConfig, HarnessError, Outcome, Pipeline, ProcessStage, Sandbox,
    SandboxOptions, telemetry,
};

#[fixture]
fn sandbox() -> Sandbox {
    Sandbox::new().expect("sandbox")
}

#[rstest]
fn defaults_describe_a_fresh_user(sandbox: Sandbox) {
    let home = sandbox.home().expect("home");
    assert_eq!(home, sandbox.jail().join("home/testuser"));
    assert_eq!(sandbox.working_directory().expect("wd"), home);
    assert_eq!(sandbox.now(), DEFAULT_TEST_TIME);
    assert!(sandbox.jail().is_dir());
}

#[rstest]
fn options_shape_the_environment() {
    let start = datetime!(2024-02-29 08:00 UTC);
    let sandbox = Sandbox::with_options(
        SandboxOptions::default()
            .with_user("alice")
            .with_convention(PlatformConvention::Windows)
            .with_env("EDITOR", "vi")
            .with_env_map([("PAGER", "less"), ("LANG", "C")])
            .with_working_directory("/srv/app")
            .with_clock(start),
    )
    .expect("sandbox");

    let env = sandbox.env();
    assert_eq!(env.user().expect("user"), "alice");
    assert_eq!(env.get("EDITOR").as_deref(), Some("vi"));
    assert_eq!(env.get("PAGER").as_deref(), Some("less"));
    assert!(env.has("LOCALAPPDATA"));
    assert_eq!(
        sandbox.working_directory().expect("wd"),
        sandbox.jail().join("srv/app")
    );
    assert_eq!(sandbox.now(), start);
}

#[rstest]
fn root_gets_a_dot_root_home() {
    let sandbox = Sandbox::with_options(SandboxOptions::default().with_user("root"))
        .expect("sandbox");
    assert_eq!(sandbox.home().expect("home"), sandbox.jail().join(".root"));
}

#[rstest]
fn file_helpers_stay_inside_the_jail(sandbox: Sandbox) {
    sandbox
        .write_file("~/notes/today.md", b"plan", 0o644)
        .expect("write");
    sandbox
        .atomic_write_file("/etc/app.toml", b"key = 1", 0o600)
        .expect("atomic write");
    sandbox.mkdir("/var/empty", true).expect("mkdir");

    assert_eq!(sandbox.read_file("notes/today.md").expect("read"), b"plan");
    assert_eq!(
        fs::read(sandbox.jail().join("etc/app.toml")).expect("host read"),
        b"key = 1"
    );
    assert!(sandbox.jail().join("var/empty").is_dir());
}

#[rstest]
fn relative_escapes_surface_as_environment_errors(sandbox: Sandbox) {
    let error = sandbox
        .write_file("../../../../outside.txt", b"nope", 0o644)
        .expect_err("escape");
    assert!(matches!(
        error,
        HarnessError::Env(EnvError::EscapeAttempt { .. })
    ));
}

#[rstest]
fn path_helpers_resolve_against_the_working_directory(mut sandbox: Sandbox) {
    sandbox
        .set_working_directory("projects")
        .expect("change directory");
    let wd = sandbox.working_directory().expect("wd");
    assert_eq!(wd, sandbox.jail().join("home/testuser/projects"));
    assert_eq!(sandbox.absolute("src/main.rs"), wd.join("src/main.rs"));
    assert_eq!(sandbox.resolve("~").expect("resolve"), sandbox.home().expect("home"));
    assert_eq!(sandbox.absolute("/etc"), sandbox.jail().join("etc"));
}

#[rstest]
fn the_jail_tree_lists_files_and_leaf_directories(sandbox: Sandbox) {
    sandbox
        .write_file("~/notes/a.txt", b"a", 0o644)
        .expect("write");
    sandbox.mkdir("/empty", false).expect("mkdir");

    assert_eq!(
        sandbox.jail_tree(0).expect("tree"),
        ["/empty/", "/home/testuser/notes/a.txt"]
    );
    assert_eq!(
        sandbox.jail_tree(2).expect("tree"),
        ["/empty/", "/home/testuser/"]
    );
}

#[rstest]
fn fixtures_are_copied_into_the_jail() {
    let source = tempfile::TempDir::new().expect("fixture dir");
    fs::create_dir_all(source.path().join("nested")).expect("nested dir");
    fs::write(source.path().join("top.txt"), b"top").expect("top file");
    fs::write(source.path().join("nested/inner.txt"), b"inner").expect("inner file");
    let root = Utf8PathBuf::from_path_buf(source.path().to_path_buf()).expect("utf8 path");

    let sandbox =
        Sandbox::with_options(SandboxOptions::default().with_fixture(root, "~/project"))
            .expect("sandbox");

    assert_eq!(sandbox.read_file("~/project/top.txt").expect("top"), b"top");
    assert_eq!(
        sandbox
            .read_file("~/project/nested/inner.txt")
            .expect("inner"),
        b"inner"
    );
}

#[rstest]
fn runs_never_leak_into_the_template_environment() {
    let sandbox = Sandbox::with_options(SandboxOptions::default().with_env("MODE", "template"))
        .expect("sandbox");
    let stage = sandbox.stage("mutator", |ctx, stream| {
        let seen = ctx.env().get("MODE").unwrap_or_default();
        if let Err(error) = ctx.env_mut().set("MODE", "changed") {
            return Outcome::fail(1, error);
        }
        let _written = write!(stream.stdout, "{seen}");
        Outcome::ok()
    });

    let result = sandbox.run_stage(stage);

    assert_eq!(result.stdout_text(), "template");
    assert_eq!(sandbox.env().get("MODE").as_deref(), Some("template"));
}

#[rstest]
fn runners_receive_the_sandbox_clock_and_hasher(sandbox: Sandbox) {
    sandbox.advance(Duration::minutes(5));
    let stage = ProcessStage::new("stamp", |ctx, stream| {
        let stamp = ctx.clock().now().unix_timestamp();
        let digest = ctx.hasher().hash(b"fixture");
        let _written = write!(stream.stdout, "{stamp} {digest}");
        Outcome::ok()
    });

    let result = sandbox.run_stage(stage);

    let expected = format!(
        "{} {}",
        (DEFAULT_TEST_TIME + Duration::minutes(5)).unix_timestamp(),
        sandbox.hasher().hash(b"fixture")
    );
    assert_eq!(result.stdout_text(), expected);
}

#[rstest]
fn pipelines_run_inside_the_sandbox(sandbox: Sandbox) {
    let pipeline = Pipeline::new()
        .stage(ProcessStage::producer(
            "producer",
            ["one", "two"],
            std::time::Duration::ZERO,
        ))
        .stage(uppercase_consumer("consumer"));

    let result = sandbox.run_pipeline(pipeline);
    assert_eq!(result.stdout_text(), "C:ONE\nC:TWO\n");
}

#[rstest]
fn telemetry_initialisation_is_idempotent() {
    let config = HarnessConfig::default();
    telemetry::initialise(&config).expect("first initialisation");
    telemetry::initialise(&config).expect("second initialisation");
}

#[rstest]
fn stage_events_are_captured_by_the_sandbox(sandbox: Sandbox) {
    let stage = ProcessStage::new("build", |_, _| {
        debug!(target: "build", step = 3, "compiling");
        Outcome::ok()
    });

    let result = sandbox.run_stage(stage);

    assert!(result.success());
    let records = sandbox.logs().matching("compiling");
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.level, Level::DEBUG);
    assert_eq!(record.target, "build");
    assert_eq!(record.field("step"), Some("3"));
}

#[rstest]
fn pipeline_threads_report_into_the_same_capture(sandbox: Sandbox) {
    let pipeline = Pipeline::new()
        .stage(ProcessStage::new("first", |_, stream| {
            info!(stage = "first", "started");
            let _written = writeln!(stream.stdout, "x");
            Outcome::ok()
        }))
        .stage(ProcessStage::new("second", |_, _| {
            info!(stage = "second", "started");
            Outcome::ok()
        }));

    let result = sandbox.run_pipeline(pipeline);

    assert!(result.success());
    let mut stages: Vec<String> = sandbox
        .logs()
        .matching("started")
        .iter()
        .filter_map(|record| record.field("stage").map(str::to_owned))
        .collect();
    stages.sort();
    assert_eq!(stages, ["first", "second"]);
}

#[rstest]
fn captures_are_private_to_each_sandbox(sandbox: Sandbox) {
    let other = Sandbox::new().expect("second sandbox");

    sandbox.traced(|| debug!("only here"));

    assert_eq!(sandbox.logs().matching("only here").len(), 1);
    assert!(other.logs().matching("only here").is_empty());
    sandbox.logs().clear();
    assert!(sandbox.logs().records().is_empty());
}

#[rstest]
fn configuration_is_read_from_an_injected_environment() {
    let mut source = VirtualEnvironment::jailed("/jail");
    source.set("JAILKIT_USER", "dana").expect("set user");
    source.set("JAILKIT_PIPE_CAPACITY", "4").expect("set capacity");

    let sandbox = Sandbox::with_options(
        SandboxOptions::default()
            .with_config_from(&source)
            .expect("config"),
    )
    .expect("sandbox");

    assert_eq!(sandbox.config().pipe_capacity(), 4);
    assert_eq!(sandbox.config().default_user(), "dana");
    assert_eq!(sandbox.home().expect("home"), sandbox.jail().join("home/dana"));
}

#[rstest]
fn malformed_injected_configuration_is_rejected() {
    let mut source = VirtualEnvironment::jailed("/jail");
    source.set("JAILKIT_PIPE_CAPACITY", "lots").expect("set capacity");

    let outcome = SandboxOptions::default().with_config_from(&source);

    assert!(matches!(outcome, Err(HarnessError::InvalidConfig { .. })));
}

#[rstest]
fn default_configuration_comes_from_the_process_environment(sandbox: Sandbox) {
    let expected = HarnessConfig::from_environment(&OsEnvironment::new()).expect("process config");
    assert_eq!(sandbox.config(), &expected);
}
