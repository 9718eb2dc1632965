// crates/ecfcheck-trace/src/replay.rs

//! Feed a recorded event log through a checker's instrumentation hooks.
//!
//! Replaying is observationally identical to the checker having been embedded
//! in the host VM at record time: events dispatch to the same five hooks, in
//! the same order, with the recorded transaction context.

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

use crate::format::{EventLog, VmEvent, EVENT_LOG_VERSION};
use anyhow::{ensure, Result};
use ecfcheck_core::{Checker, ReportSink};

/// Totals from one replay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Transactions fed to the checker.
    pub txs: u64,
    /// Events dispatched.
    pub events: u64,
}

/// Replay `log` through `checker`, transaction by transaction.
///
/// # Errors
/// Fails only on an unsupported log version; per-event processing cannot
/// fail (hooks are fire-and-forget by design).
pub fn replay_log<S: ReportSink>(log: &EventLog, checker: &mut Checker<S>) -> Result<ReplayStats> {
    ensure!(
        log.version == EVENT_LOG_VERSION,
        "unsupported event log version {} (expected {})",
        log.version,
        EVENT_LOG_VERSION
    );

    let mut stats = ReplayStats::default();
    for tx in &log.txs {
        for ev in &tx.events {
            match *ev {
                VmEvent::CallInit => checker.on_call_initiated(),
                VmEvent::ExecStart { contract } => checker.on_execution_start(contract, &tx.env),
                VmEvent::ExecEnd { contract } => checker.on_execution_end(contract),
                VmEvent::Read { key } => checker.on_storage_read(key),
                VmEvent::Write { key } => checker.on_storage_write(key),
            }
            stats.events += 1;
        }
        stats.txs += 1;
    }
    Ok(stats)
}
