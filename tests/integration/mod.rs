//! Integration test suite for queuepilot.
//!
//! These tests run the scheduler over real ledger files in temporary
//! directories, with a scripted fake agent standing in for the browser.
//!
//! # Test Categories
//!
//! - `workflow_e2e`: full runs, ordering, idempotence, reporting
//! - `recovery`: per-task failures, timeouts and fatal session errors
//!
//! # CI Compatibility
//!
//! No browser is started and no network is used. Time-driven tests run on
//! tokio's paused clock.

mod fixtures;

mod recovery;
mod workflow_e2e;
