//! Pure call-structure queries over a segment trace.
//!
//! A **call** is the maximal contiguous run starting at an opening segment
//! (`index_in_call == 0`) and ending at the last segment at the same depth
//! before either the depth drops below the opening depth or another opening
//! appears at that depth. These functions are stateless; they never mutate
//! the trace.
//!
//! Public entry points validate their arguments and return explicit `Err`
//! values on contract violations (out-of-range index, non-opening segment)
//! instead of sentinel indices, so callers can tell "nothing found" apart
//! from "the invariant is broken". The `pub(crate)` cores assume the
//! invariant and are used where it holds by construction.

use crate::types::Segment;
use anyhow::{ensure, Result};

/// Closing bound of the call opened at `open_idx`.
///
/// Precondition (not checked): `open_idx` is in range and refers to an
/// opening segment.
pub(crate) fn close_bound(trace: &[Segment], open_idx: usize) -> usize {
    let opening = &trace[open_idx];
    let mut candidate = open_idx;
    for (i, seg) in trace.iter().enumerate().skip(open_idx + 1) {
        if seg.depth < opening.depth {
            break;
        }
        if seg.depth == opening.depth {
            if seg.is_opening() {
                break;
            }
            candidate = i;
        }
    }
    candidate
}

/// Indices of every segment belonging to the call opened at `open_idx`:
/// the opening segment plus each later same-depth continuation, stopping at
/// the next same-depth opening.
///
/// Precondition (not checked): `open_idx` is in range and refers to an
/// opening segment.
pub(crate) fn call_indices(trace: &[Segment], open_idx: usize) -> Vec<usize> {
    let opening = &trace[open_idx];
    let mut call = vec![open_idx];
    for (i, seg) in trace.iter().enumerate().skip(open_idx + 1) {
        if seg.depth == opening.depth {
            if seg.is_opening() {
                break;
            }
            call.push(i);
        }
    }
    call
}

/// Index of the closing segment of the call opened at `open_idx`.
///
/// Returns `open_idx` itself when the call has no continuation segments.
///
/// # Errors
/// Returns an error if `open_idx` is out of range or does not refer to an
/// opening segment.
pub fn matching_close(trace: &[Segment], open_idx: usize) -> Result<usize> {
    ensure!(
        open_idx < trace.len(),
        "matching_close: index {} out of range (trace length {})",
        open_idx,
        trace.len()
    );
    ensure!(
        trace[open_idx].is_opening(),
        "matching_close: segment {} is not an opening segment",
        open_idx
    );
    Ok(close_bound(trace, open_idx))
}

/// Indices of every segment of the call opened at `open_idx`.
///
/// # Errors
/// Returns an error if `open_idx` is out of range or does not refer to an
/// opening segment.
pub fn call_segments(trace: &[Segment], open_idx: usize) -> Result<Vec<usize>> {
    ensure!(
        open_idx < trace.len(),
        "call_segments: index {} out of range (trace length {})",
        open_idx,
        trace.len()
    );
    ensure!(
        trace[open_idx].is_opening(),
        "call_segments: segment {} is not an opening segment",
        open_idx
    );
    Ok(call_indices(trace, open_idx))
}

/// Whether some call's span strictly contains an opening segment at greater
/// depth, i.e. the call chain re-enters one of its own frames.
#[must_use]
pub fn has_recursion(trace: &[Segment]) -> bool {
    for (i, seg) in trace.iter().enumerate() {
        if !seg.is_opening() {
            continue;
        }
        let close = close_bound(trace, i);
        if trace[i..=close]
            .iter()
            .any(|s| s.is_opening() && s.depth > seg.depth)
        {
            return true;
        }
    }
    false
}

/// Index of the first opening segment strictly after position 0, or `None`
/// if the trace contains no further opening.
#[must_use]
pub fn next_opening(trace: &[Segment]) -> Option<usize> {
    trace
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, s)| s.is_opening())
        .map(|(i, _)| i)
}

/// Opening index of the smallest call span that itself contains recursion
/// while every proper inner call of it is recursion-free — the deepest-first
/// recursive unit. `Ok(None)` when the trace is recursion-free.
///
/// Worst case O(n²) from repeated span scans.
///
/// # Errors
/// Returns an error if the trace is empty, does not start at an opening
/// segment, or a recursive span turns out to contain no nested opening
/// (which a well-formed trace cannot produce).
pub fn minimal_recursive_subtrace(trace: &[Segment]) -> Result<Option<usize>> {
    ensure!(
        !trace.is_empty(),
        "minimal_recursive_subtrace: trace must be non-empty"
    );
    ensure!(
        trace[0].is_opening(),
        "minimal_recursive_subtrace: trace must start at an opening segment"
    );

    let close = close_bound(trace, 0);
    let candidate = &trace[..=close];

    if has_recursion(candidate) {
        // Descend into the next nested call inside the candidate span.
        let next = next_opening(candidate).ok_or_else(|| {
            anyhow::anyhow!("minimal_recursive_subtrace: recursive span without a nested opening")
        })?;
        let next_close = matching_close(trace, next)?;
        let sub = &trace[next..=next_close];
        return match minimal_recursive_subtrace(sub)? {
            // The nested span is recursion-free, so the candidate itself is
            // the minimal recursive unit.
            None => Ok(Some(0)),
            Some(idx) => Ok(Some(next + idx)),
        };
    }

    // Candidate is clean; recursion, if any, lives in later calls.
    if candidate.len() == trace.len() {
        return Ok(None);
    }
    let suffix = &trace[candidate.len()..];
    Ok(minimal_recursive_subtrace(suffix)?.map(|idx| candidate.len() + idx))
}
