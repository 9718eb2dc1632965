// crates/ecfcheck-trace/src/format.rs

//! VM-agnostic event-log envelope consumed by the replay driver.
//!
//! An [`EventLog`] records, per transaction, the exact sequence of
//! instrumentation points a host VM would fire: call initiations, interpreter
//! entries/exits, and storage accesses. Replaying a log through a checker is
//! observationally identical to the checker having been embedded in the host
//! at record time.

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

use ecfcheck_core::{ContractId, StorageKey, TxEnv};
use serde::{Deserialize, Serialize};

/// Current wire version of [`EventLog`].
pub const EVENT_LOG_VERSION: u16 = 1;

/// One instrumentation event, in host-execution order.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum VmEvent {
    /// A call opcode was seen; the next `ExecStart` is a genuine sub-call.
    CallInit,
    /// The interpreter loop (re-)entered for `contract`.
    ExecStart {
        /// Contract being executed.
        contract: ContractId,
    },
    /// The interpreter loop for `contract` returned.
    ExecEnd {
        /// Contract that finished executing.
        contract: ContractId,
    },
    /// The active frame read a storage location.
    Read {
        /// Location read.
        key: StorageKey,
    },
    /// The active frame wrote a storage location.
    Write {
        /// Location written.
        key: StorageKey,
    },
}

/// One transaction's context and event sequence.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxRecord {
    /// Origin/block/time context, as the host saw it at transaction start.
    pub env: TxEnv,
    /// Instrumentation events, in order. Well-formed records nest
    /// `ExecStart`/`ExecEnd` like matched brackets.
    pub events: Vec<VmEvent>,
}

/// Event-log envelope.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventLog {
    /// Format/version tag for forward-compat.
    pub version: u16,
    /// Transactions, in execution order.
    pub txs: Vec<TxRecord>,
    /// Optional metadata (generator parameters, host id, …).
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

impl EventLog {
    /// Number of transactions.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.txs.len()
    }

    /// Whether the log holds no transactions.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// Total number of events across all transactions.
    #[inline]
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.txs.iter().map(|t| t.events.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts() {
        let log = EventLog {
            version: EVENT_LOG_VERSION,
            txs: vec![TxRecord {
                env: TxEnv::default(),
                events: vec![
                    VmEvent::ExecStart {
                        contract: ContractId(1),
                    },
                    VmEvent::Write { key: StorageKey(2) },
                    VmEvent::ExecEnd {
                        contract: ContractId(1),
                    },
                ],
            }],
            meta: None,
        };
        assert_eq!(log.len(), 1);
        assert!(!log.is_empty());
        assert_eq!(log.event_count(), 3);
    }

    #[test]
    fn event_serialization_is_tagged() {
        let ev = VmEvent::Write { key: StorageKey(7) };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(r#""op":"write""#));
        let back: VmEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }
}
