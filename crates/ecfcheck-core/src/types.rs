//! Canonical core types used across the ecfcheck workspace.
//!
//! The checker is deliberately VM-agnostic: contract identities and storage
//! locations are opaque, totally-ordered, hashable newtypes. A host adapter
//! maps its concrete address/slot representation (20-byte addresses, 32-byte
//! slots, whatever) onto these before driving the hooks.
//!
//! Serialized forms are kept conservative and portable (serde).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Opaque contract identity (totally ordered, hashable).
#[derive(
    Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct ContractId(pub u64);

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{:#x}", self.0)
    }
}

/// Opaque storage location (totally ordered, hashable).
#[derive(
    Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct StorageKey(pub u64);

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "k{:#x}", self.0)
    }
}

/// Set of storage locations touched by one segment.
///
/// A `BTreeSet` keeps iteration (and hence serialization and `Debug` output)
/// deterministic, which matters for reproducible reports and tests.
pub type KeySet = BTreeSet<StorageKey>;

/// Host-provided transaction context, captured when the call stack leaves
/// the quiescent (empty) state.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxEnv {
    /// Externally-owned account that initiated the transaction.
    pub origin: ContractId,
    /// Block the transaction executes in.
    pub block_number: u64,
    /// Block timestamp (seconds).
    pub timestamp: u64,
}

/// A maximal run of consecutive storage accesses within one call frame,
/// uninterrupted by a nested call.
///
/// Segments are stored densely per transaction: `global_index` is the
/// segment's position in the whole trace and is strictly increasing with no
/// gaps. `index_in_call` is 0 for a call's *opening* segment and `n` for the
/// segment created when control returns into the frame for the n-th time.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Segment {
    /// Contract executing this segment.
    pub contract: ContractId,
    /// Call-stack depth (root call = 1).
    pub depth: u32,
    /// Position in the per-transaction trace (dense, 0-based).
    pub global_index: u32,
    /// Position within the enclosing call (0 = opening segment).
    pub index_in_call: u32,
    /// Locations read while this segment was active.
    pub read_set: KeySet,
    /// Locations written while this segment was active.
    pub write_set: KeySet,
    /// Number of continuation segments of this call so far.
    ///
    /// Meaningful only on opening segments.
    pub hit_count: u32,
    /// Global index of the segment most recently closed before this one
    /// opened. Diagnostics only; no resolution path reads it.
    pub prev: Option<u32>,
}

impl Segment {
    /// Construct a call's opening segment.
    #[inline]
    #[must_use]
    pub fn opening(contract: ContractId, depth: u32, global_index: u32, prev: Option<u32>) -> Self {
        Self {
            contract,
            depth,
            global_index,
            index_in_call: 0,
            read_set: KeySet::new(),
            write_set: KeySet::new(),
            hit_count: 0,
            prev,
        }
    }

    /// Construct a continuation segment (control returned into the frame).
    #[inline]
    #[must_use]
    pub fn continuation(
        contract: ContractId,
        depth: u32,
        global_index: u32,
        index_in_call: u32,
        prev: Option<u32>,
    ) -> Self {
        Self {
            contract,
            depth,
            global_index,
            index_in_call,
            read_set: KeySet::new(),
            write_set: KeySet::new(),
            hit_count: 0,
            prev,
        }
    }

    /// Whether this segment opens its call.
    #[inline]
    #[must_use]
    pub fn is_opening(&self) -> bool {
        self.index_in_call == 0
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{} d{} g{} i{} R{:?} W{:?}}}",
            self.contract, self.depth, self.global_index, self.index_in_call, self.read_set,
            self.write_set
        )
    }
}
