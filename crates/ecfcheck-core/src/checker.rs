//! Stateful trace recorder driven by the host VM's instrumentation points.
//!
//! The host calls the five hooks at precise points of its interpreter loop:
//! execution start/end, storage read/write, and call initiation. The checker
//! builds the per-transaction segment trace incrementally, and at transaction
//! end (call stack back to quiescence) resolves every touched contract's
//! projection independently, handing proven violations to the report sink.
//!
//! Hooks are fire-and-forget: they never return errors and never panic, so
//! the checker cannot crash transaction execution. Internal invariant
//! breaches and sink failures are logged and swallowed.
//!
//! The checker holds plain mutable state with no synchronization and assumes
//! at most one transaction is being traced at a time; give each concurrent
//! execution lane its own `Checker` instance.

use crate::report::{ReportSink, ViolationReport};
use crate::resolver::{resolve, Resolution};
use crate::types::{ContractId, Segment, StorageKey, TxEnv};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, error, info, trace};

/// Checker construction parameters.
///
/// Injected explicitly; the core performs no environment lookups.
#[derive(Clone, Copy, Debug)]
pub struct CheckerConfig {
    /// Master switch; when false every hook is a no-op.
    pub enabled: bool,
    /// Last transaction id of a previous run; ids continue from here.
    pub tx_id_seed: u64,
    /// Emit a progress line every this many transactions (0 disables).
    pub progress_interval: u64,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tx_id_seed: 0,
            progress_interval: 10_000,
        }
    }
}

/// One genuine (non-delegated) call frame.
#[derive(Clone, Copy, Debug)]
struct Frame {
    contract: ContractId,
    depth: u32,
    /// Times control has returned into this frame so far.
    hit_count: u32,
    /// Index of this frame's opening segment in the trace, kept in sync with
    /// `hit_count`.
    open_index: u32,
}

/// Runtime ECF monitor for one sequential execution lane.
#[derive(Debug)]
pub struct Checker<S> {
    cfg: CheckerConfig,
    sink: S,

    /// Per-transaction segment trace, in global-index order.
    segments: Vec<Segment>,
    /// Open genuine call frames, innermost last.
    frames: Vec<Frame>,
    /// Genuine-call flag per VM execution start; depth always equals the VM
    /// call-stack depth, unlike `frames` which skips delegated re-entries.
    call_flags: Vec<bool>,
    /// Set by `on_call_initiated`, consumed by the next `on_execution_start`.
    pending_call: bool,

    tx_id: u64,
    env: Option<TxEnv>,
    tx_started: Option<Instant>,
    txs_processed: u64,
}

impl<S: ReportSink> Checker<S> {
    /// Construct a checker with the given configuration and report sink.
    #[must_use]
    pub fn new(cfg: CheckerConfig, sink: S) -> Self {
        Self {
            cfg,
            sink,
            segments: Vec::new(),
            frames: Vec::new(),
            call_flags: Vec::new(),
            pending_call: false,
            tx_id: cfg.tx_id_seed,
            env: None,
            tx_started: None,
            txs_processed: 0,
        }
    }

    /// Current transaction id (the embedder persists this across runs).
    #[inline]
    #[must_use]
    pub fn transaction_id(&self) -> u64 {
        self.tx_id
    }

    /// Transactions processed by this instance.
    #[inline]
    #[must_use]
    pub fn transactions_processed(&self) -> u64 {
        self.txs_processed
    }

    /// Borrow the report sink.
    #[inline]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Consume the checker, yielding its sink.
    #[inline]
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Mark the next `on_execution_start` as a genuine sub-call (the host
    /// saw a call opcode), as opposed to a delegated re-entry into the same
    /// frame's code.
    pub fn on_call_initiated(&mut self) {
        if !self.cfg.enabled {
            return;
        }
        self.pending_call = true;
    }

    /// The host VM (re-)entered its interpreter loop for `contract`.
    pub fn on_execution_start(&mut self, contract: ContractId, env: &TxEnv) {
        if !self.cfg.enabled {
            return;
        }

        // Quiescence exit: a fresh transaction begins.
        if self.call_flags.is_empty() {
            self.tx_id += 1;
            self.txs_processed += 1;
            if self.cfg.progress_interval > 0 && self.txs_processed % self.cfg.progress_interval == 0
            {
                info!(
                    transactions = self.txs_processed,
                    "checked transactions so far in this run"
                );
            }
            self.env = Some(*env);
            self.tx_started = Some(Instant::now());
        }

        let genuine = self.call_flags.is_empty() || self.pending_call;
        if genuine {
            self.open_segment(contract);
        }
        self.call_flags.push(genuine);
        self.pending_call = false;
    }

    /// The host VM's interpreter loop for `contract` returned.
    pub fn on_execution_end(&mut self, contract: ContractId) {
        if !self.cfg.enabled {
            return;
        }

        let Some(genuine) = self.call_flags.pop() else {
            error!(%contract, "execution end on an empty call stack; ignoring");
            return;
        };

        if genuine {
            match self.frames.len() {
                0 => error!(%contract, "genuine return with no open frame; ignoring"),
                1 => {
                    // Outermost frame: the transaction is complete.
                    self.frames.pop();
                    self.finish_transaction();
                }
                _ => {
                    self.frames.pop();
                    self.open_continuation();
                }
            }
        }

        if self.call_flags.is_empty() {
            // Back to quiescence: drop transaction-scoped context.
            self.env = None;
            self.tx_started = None;
            self.segments.clear();
        }
    }

    /// The live segment wrote `key`.
    pub fn on_storage_write(&mut self, key: StorageKey) {
        if !self.cfg.enabled {
            return;
        }
        match self.segments.last_mut() {
            Some(seg) => {
                trace!(%key, segment = seg.global_index, "storage write");
                seg.write_set.insert(key);
            }
            None => error!(%key, "storage write outside any segment; ignoring"),
        }
    }

    /// The live segment read `key`.
    ///
    /// A read of a key already in the segment's write set is logged but still
    /// recorded: the in-segment dependency must stay visible to the
    /// commutativity check.
    pub fn on_storage_read(&mut self, key: StorageKey) {
        if !self.cfg.enabled {
            return;
        }
        match self.segments.last_mut() {
            Some(seg) => {
                if seg.write_set.contains(&key) {
                    debug!(%key, segment = seg.global_index, "read of a location already written in this segment");
                }
                seg.read_set.insert(key);
            }
            None => error!(%key, "storage read outside any segment; ignoring"),
        }
    }

    fn open_segment(&mut self, contract: ContractId) {
        if self.frames.is_empty() {
            self.segments.clear();
        }
        let depth = self.frames.last().map_or(1, |f| f.depth + 1);
        let prev = self.last_segment_index();
        let idx = self.segments.len() as u32;
        trace!(%contract, depth, idx, "opening segment");
        self.segments.push(Segment::opening(contract, depth, idx, prev));
        self.frames.push(Frame {
            contract,
            depth,
            hit_count: 0,
            open_index: idx,
        });
    }

    fn open_continuation(&mut self) {
        let prev = self.last_segment_index();
        let idx = self.segments.len() as u32;
        let Some(top) = self.frames.last_mut() else {
            error!("continuation with no open frame; ignoring");
            return;
        };
        top.hit_count += 1;
        let (contract, depth, hit_count, open_index) =
            (top.contract, top.depth, top.hit_count, top.open_index);
        let seg = Segment::continuation(contract, depth, idx, hit_count, prev);
        trace!(%contract, depth, idx, "opening continuation segment");
        self.segments.push(seg);
        // Keep the opening segment's view of its call current.
        if let Some(open) = self.segments.get_mut(open_index as usize) {
            open.hit_count = hit_count;
        }
    }

    fn last_segment_index(&self) -> Option<u32> {
        self.segments.len().checked_sub(1).map(|i| i as u32)
    }

    fn finish_transaction(&mut self) {
        debug!(
            tx_id = self.tx_id,
            segments = self.segments.len(),
            "transaction ended; checking ECF for all touched contracts"
        );
        let check_started = Instant::now();
        self.check_all_contracts();
        let check_elapsed = check_started.elapsed();
        let total_elapsed = self.tx_started.map(|t| t.elapsed());
        debug!(
            tx_id = self.tx_id,
            ?check_elapsed,
            ?total_elapsed,
            "reentrancy check finished"
        );
    }

    /// Resolve each distinct contract's projection exactly once, in
    /// first-touch order.
    fn check_all_contracts(&mut self) {
        // A single-segment transaction cannot interleave anything.
        if self.segments.len() <= 1 {
            return;
        }

        let mut checked: HashSet<ContractId> = HashSet::new();
        for i in 0..self.segments.len() {
            let contract = self.segments[i].contract;
            if !checked.insert(contract) {
                continue;
            }
            let projection: Vec<Segment> = self
                .segments
                .iter()
                .filter(|s| s.contract == contract)
                .cloned()
                .collect();
            debug!(%contract, segments = projection.len(), "checking projected trace");

            match resolve(projection) {
                Ok(Resolution::Ecf) => {}
                Ok(Resolution::NotEcf {
                    contract,
                    depth,
                    start_index,
                    length,
                }) => {
                    let env = self.env.unwrap_or_default();
                    let report = ViolationReport {
                        tx_id: self.tx_id,
                        origin: env.origin,
                        block_number: env.block_number,
                        timestamp: env.timestamp,
                        contract,
                        depth,
                        start_index,
                        length,
                    };
                    error!(
                        tx_id = self.tx_id,
                        %contract,
                        depth,
                        start_index,
                        length,
                        "transaction is not ECF"
                    );
                    if let Err(e) = self.sink.record(&report) {
                        error!(error = %e, "failed to record violation report");
                    }
                }
                Err(e) => {
                    error!(%contract, error = %e, "resolver invariant failure; skipping contract");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::MemorySink;

    const A: ContractId = ContractId(0xa);
    const B: ContractId = ContractId(0xb);
    const X: StorageKey = StorageKey(1);

    fn checker() -> Checker<MemorySink> {
        Checker::new(CheckerConfig::default(), MemorySink::new())
    }

    fn env() -> TxEnv {
        TxEnv {
            origin: ContractId(0xee),
            block_number: 42,
            timestamp: 1_700_000_000,
        }
    }

    /// Drive the classic reentrancy attack: A writes x, calls B, B calls back
    /// into A, and after the callback A reads x. With `reentry_conflicts` the
    /// callback reads and writes x (a stale-balance withdraw); otherwise it
    /// touches nothing and the whole pattern serializes.
    fn run_attack(checker: &mut Checker<MemorySink>, reentry_conflicts: bool) {
        let e = env();
        checker.on_execution_start(A, &e);
        checker.on_storage_write(X);
        checker.on_call_initiated();
        checker.on_execution_start(B, &e);
        checker.on_call_initiated();
        checker.on_execution_start(A, &e);
        if reentry_conflicts {
            checker.on_storage_read(X);
            checker.on_storage_write(X);
        }
        checker.on_execution_end(A);
        checker.on_execution_end(B);
        checker.on_storage_read(X);
        checker.on_execution_end(A);
    }

    #[test]
    fn clean_reentry_is_not_reported() {
        let mut c = checker();
        run_attack(&mut c, false);
        // The reentrant A segment writes nothing and is elided.
        assert!(c.sink().reports().is_empty());
        assert_eq!(c.transaction_id(), 1);
    }

    #[test]
    fn conflicting_reentry_is_reported() {
        let mut c = checker();
        run_attack(&mut c, true);
        let reports = c.sink().reports();
        assert_eq!(reports.len(), 1);
        let r = &reports[0];
        assert_eq!(r.contract, A);
        assert_eq!(r.depth, 1);
        assert_eq!(r.start_index, 0);
        assert_eq!(r.length, 3);
        assert_eq!(r.tx_id, 1);
        assert_eq!(r.origin, ContractId(0xee));
        assert_eq!(r.block_number, 42);
    }

    #[test]
    fn single_segment_transaction_is_clean() {
        let mut c = checker();
        let e = env();
        c.on_execution_start(A, &e);
        c.on_storage_write(X);
        c.on_storage_read(X);
        c.on_execution_end(A);
        assert!(c.sink().reports().is_empty());
    }

    #[test]
    fn delegated_reentry_is_transparent() {
        // An execution start without a preceding call initiation re-enters
        // the same frame's code: no new segment, no continuation on return.
        let mut c = checker();
        let e = env();
        c.on_execution_start(A, &e);
        c.on_storage_write(X);
        c.on_execution_start(A, &e); // delegated
        c.on_storage_read(X);
        c.on_execution_end(A);
        c.on_execution_end(A);
        assert!(c.sink().reports().is_empty());
        // Both accesses landed in the one segment of the one frame.
        assert_eq!(c.transactions_processed(), 1);
    }

    #[test]
    fn transaction_id_increments_per_transaction() {
        let mut c = checker();
        let e = env();
        for _ in 0..3 {
            c.on_execution_start(A, &e);
            c.on_call_initiated();
            c.on_execution_start(B, &e);
            c.on_execution_end(B);
            c.on_execution_end(A);
        }
        assert_eq!(c.transaction_id(), 3);
        assert_eq!(c.transactions_processed(), 3);
    }

    #[test]
    fn seed_offsets_transaction_ids() {
        let cfg = CheckerConfig {
            tx_id_seed: 100,
            ..CheckerConfig::default()
        };
        let mut c = Checker::new(cfg, MemorySink::new());
        run_attack(&mut c, true);
        assert_eq!(c.sink().reports()[0].tx_id, 101);
    }

    #[test]
    fn disabled_checker_records_nothing() {
        let cfg = CheckerConfig {
            enabled: false,
            ..CheckerConfig::default()
        };
        let mut c = Checker::new(cfg, MemorySink::new());
        run_attack(&mut c, true);
        assert!(c.sink().reports().is_empty());
        assert_eq!(c.transaction_id(), 0);
    }

    #[test]
    fn unbalanced_end_is_ignored() {
        let mut c = checker();
        c.on_execution_end(A);
        c.on_storage_read(X);
        // Still usable afterwards.
        run_attack(&mut c, true);
        assert_eq!(c.sink().reports().len(), 1);
    }

    #[test]
    fn readonly_callee_collapses_before_cutpoint_search() {
        // A calls B, B re-enters A; only B's opening segment touches storage,
        // with a read of a disjoint location. Every call is elidable and the
        // whole pattern collapses without a cutpoint search.
        let mut c = checker();
        let e = env();
        c.on_execution_start(A, &e);
        c.on_call_initiated();
        c.on_execution_start(B, &e);
        c.on_storage_read(StorageKey(9));
        c.on_call_initiated();
        c.on_execution_start(A, &e);
        c.on_execution_end(A);
        c.on_execution_end(B);
        c.on_execution_end(A);
        assert!(c.sink().reports().is_empty());
    }

    #[test]
    fn both_contracts_checked_independently() {
        // B's projection is a single segment between the two A segments; it
        // must be checked (and found clean) even though A violates.
        let mut c = checker();
        run_attack(&mut c, true);
        assert_eq!(c.sink().reports().len(), 1);
        assert_eq!(c.sink().reports()[0].contract, A);
    }
}
