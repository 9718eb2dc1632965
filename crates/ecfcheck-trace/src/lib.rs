//! VM-agnostic instrumentation event logs for the ECF checker.
//!
//! This crate provides three small building blocks that are deliberately
//! independent of any specific VM:
//!
//! - `format`: a minimal, versioned event-log envelope (`EventLog`).
//! - `generator`: a deterministic synthetic log generator for tests/demos.
//! - `replay`: a driver that feeds a recorded log through a
//!   `Checker`'s instrumentation hooks in order.
//! - `io`: JSON/CBOR read/write helpers for `EventLog`.
//!
//! The intent is to keep the pipeline simple, testable, and easy to replace
//! with production sources later (a real VM adapter emitting hook calls
//! directly).
//!
//! We intentionally avoid broad re-exports so callers use stable paths like
//! `ecfcheck_trace::replay::replay_log`.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]

/// Versioned, VM-neutral event-log envelope.
pub mod format;
/// Deterministic synthetic log generator (for sims/tests).
pub mod generator;
/// JSON/CBOR I/O helpers for `EventLog`.
pub mod io;
/// Replay a recorded log through a `Checker`.
pub mod replay;
