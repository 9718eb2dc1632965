//! ecfcheck-core — runtime detection of Effectively-Callback-Free traces.
//!
//! This crate defines the **stable boundary** used across ecfcheck crates:
//! - canonical data types ([`Segment`], [`ContractId`], [`StorageKey`], …),
//! - pure call-structure navigation over a segment trace,
//! - the reentrancy **resolver** (omittable elision, cutpoint search,
//!   iterative reduction), and
//! - the stateful [`Checker`] a host VM drives through its instrumentation
//!   hooks, plus the [`ReportSink`] boundary for violation reports.
//!
//! A trace is *Effectively Callback Free* (ECF) when it is observationally
//! equivalent, with respect to storage read/write ordering, to some trace
//! with no re-entrant interleaving. The determination is purely dynamic — no
//! bytecode is ever inspected — and conservative: value-dependent control
//! flow is not modeled, so a semantically-safe transaction may still be
//! flagged.
//!
//! ```
//! use ecfcheck_core::{Checker, CheckerConfig, ContractId, MemorySink, StorageKey, TxEnv};
//!
//! let mut checker = Checker::new(CheckerConfig::default(), MemorySink::new());
//! let env = TxEnv::default();
//! checker.on_execution_start(ContractId(1), &env);
//! checker.on_storage_write(StorageKey(7));
//! checker.on_execution_end(ContractId(1));
//! assert!(checker.sink().reports().is_empty());
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Small, explicit allowlist to keep docs readable and APIs ergonomic.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::doc_markdown
)]

/// Stateful trace recorder driven by the host VM's hooks.
pub mod checker;
/// Pure call-structure queries over a segment trace.
pub mod navigator;
/// Violation reports and the best-effort sink boundary.
pub mod report;
/// Reentrancy resolution over one contract's projected trace.
pub mod resolver;
/// Canonical core data types shared across the workspace.
pub mod types;

// ---- Re-exports for workspace compatibility ----
pub use checker::{Checker, CheckerConfig};
pub use report::{JsonlSink, MemorySink, ReportSink, ViolationReport};
pub use resolver::{resolve, Resolution};
pub use types::{ContractId, KeySet, Segment, StorageKey, TxEnv};

/// Commonly-used items for quick imports.
///
/// ```rust
/// use ecfcheck_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::checker::{Checker, CheckerConfig};
    pub use crate::report::{MemorySink, ReportSink, ViolationReport};
    pub use crate::resolver::{resolve, Resolution};
    pub use crate::types::{ContractId, KeySet, Segment, StorageKey, TxEnv};
}
