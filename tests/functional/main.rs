// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Functional tests for the Unit reconcile engine.
//!
//! These tests drive [`ReconcileEngine`] end to end against the in-process
//! `MemoryStore`, which enforces resource versions, applies server defaults
//! and cascades deletion through owner references. Port health comes from a
//! scripted probe unless a test binds a real socket.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_second_pass_issues_no_writes
//! ```
//!
//! ## Test Categories
//!
//! - **Convergence tests**: idempotence, replica convergence, drift repair
//! - **Lifecycle tests**: finalizer ordering, delete flow, pre-delete retries
//! - **Failure tests**: validation, partial adapter failure, write conflicts
//! - **Scenario tests**: full passes with service health and endpoints
//!
//! [`ReconcileEngine`]: unit_operator::controller::reconciler::ReconcileEngine

#[path = "../common/mod.rs"]
mod common;

mod convergence_tests;
mod lifecycle_tests;
mod scenario_tests;

use unit_operator::controller::reconciler::ReconcileOutcome;

use common::fixtures::TestEngine;

/// Register the finalizer and run the first full pass.
pub async fn settle(engine: &TestEngine, name: &str) -> ReconcileOutcome {
    let first = engine.reconcile("default", name).await.unwrap();
    assert_eq!(first, ReconcileOutcome::Deferred);
    engine.reconcile("default", name).await.unwrap()
}
