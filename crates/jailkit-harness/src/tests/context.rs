//! Tests for cancellation and collaborator injection through `RunContext`.

use std::sync::Arc;
use std::time::Duration;

use jailkit_env::VirtualEnvironment;
use rstest::{fixture, rstest};

use crate::{DEFAULT_TEST_TIME, RunContext, TestClock};

#[fixture]
fn ctx() -> RunContext {
    RunContext::new(VirtualEnvironment::jailed("/jail"))
}

#[rstest]
fn cancelling_a_parent_cancels_its_children(ctx: RunContext) {
    let child = ctx.child();
    let grandchild = child.child();
    assert!(!grandchild.is_cancelled());

    ctx.cancel();
    assert!(child.is_cancelled());
    assert!(grandchild.is_cancelled());
}

#[rstest]
fn cancelling_a_child_leaves_the_parent_running(ctx: RunContext) {
    let child = ctx.child();
    child.cancel();
    assert!(child.is_cancelled());
    assert!(!ctx.is_cancelled());
}

#[rstest]
fn an_elapsed_deadline_reads_as_cancelled(ctx: RunContext) {
    assert_eq!(ctx.remaining(), None);
    let expired = ctx.with_timeout(Duration::ZERO);
    assert!(expired.is_cancelled());
    assert_eq!(expired.remaining(), Some(Duration::ZERO));
    assert!(!ctx.is_cancelled());
}

#[rstest]
fn nested_timeouts_keep_the_earliest_deadline(ctx: RunContext) {
    let outer = ctx.with_timeout(Duration::from_secs(10));
    let inner = outer.with_timeout(Duration::from_secs(60));
    assert_eq!(inner.deadline(), outer.deadline());

    let tighter = outer.with_timeout(Duration::from_millis(1));
    assert!(tighter.deadline() < outer.deadline());
}

#[rstest]
fn children_share_the_environment(ctx: RunContext) {
    let child = ctx.child();
    child.env_mut().set("GREETING", "hello").expect("set");
    assert_eq!(ctx.env().get("GREETING").as_deref(), Some("hello"));
    assert!(Arc::ptr_eq(&ctx.environment(), &child.environment()));
}

#[rstest]
fn the_injected_clock_and_hasher_are_used(ctx: RunContext) {
    let clock = Arc::new(TestClock::default());
    let configured = ctx.with_clock(clock);
    assert_eq!(configured.clock().now(), DEFAULT_TEST_TIME);
    assert_eq!(configured.hasher().hash(b"abc").len(), 64);
}
