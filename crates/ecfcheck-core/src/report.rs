//! Violation reports and the best-effort sink boundary.
//!
//! A report is a plain record; where it goes (file, database, test buffer)
//! is the embedder's choice behind [`ReportSink`]. Sinks are *best effort*:
//! the checker logs a failed `record` and moves on — persistence trouble
//! must never disturb the host VM or the in-memory resolution result.

use crate::types::ContractId;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// One contract-call span proven non-ECF within a transaction.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViolationReport {
    /// Monotonic transaction identifier.
    pub tx_id: u64,
    /// Transaction origin.
    pub origin: ContractId,
    /// Block the transaction executed in.
    pub block_number: u64,
    /// Block timestamp (seconds).
    pub timestamp: u64,
    /// Contract whose projected trace could not be serialized.
    pub contract: ContractId,
    /// Depth of the offending span's outermost call.
    pub depth: u32,
    /// Global index of the span's first segment in the transaction trace.
    pub start_index: u32,
    /// Number of segments in the offending span.
    pub length: u32,
}

/// Destination for violation reports.
pub trait ReportSink {
    /// Record one report.
    ///
    /// # Errors
    /// Implementations may fail (I/O, serialization); callers treat failures
    /// as best-effort and must not let them affect resolution.
    fn record(&mut self, report: &ViolationReport) -> Result<()>;
}

/// Vec-backed sink for tests and in-process embedding.
#[derive(Debug, Default)]
pub struct MemorySink {
    reports: Vec<ViolationReport>,
}

impl MemorySink {
    /// Construct an empty sink.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports recorded so far.
    #[inline]
    #[must_use]
    pub fn reports(&self) -> &[ViolationReport] {
        &self.reports
    }

    /// Consume the sink, yielding its reports.
    #[inline]
    #[must_use]
    pub fn into_reports(self) -> Vec<ViolationReport> {
        self.reports
    }
}

impl ReportSink for MemorySink {
    fn record(&mut self, report: &ViolationReport) -> Result<()> {
        self.reports.push(report.clone());
        Ok(())
    }
}

/// JSON Lines file sink: one report object per line, flushed per record so a
/// crash of the host loses at most the in-flight line.
#[derive(Debug)]
pub struct JsonlSink {
    w: BufWriter<File>,
    written: usize,
}

impl JsonlSink {
    /// Create (truncate) the report file at `path`.
    ///
    /// # Errors
    /// Fails if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = File::create(path.as_ref())
            .with_context(|| format!("create {}", path.as_ref().display()))?;
        Ok(Self {
            w: BufWriter::new(f),
            written: 0,
        })
    }

    /// Number of reports written so far.
    #[inline]
    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }
}

impl ReportSink for JsonlSink {
    fn record(&mut self, report: &ViolationReport) -> Result<()> {
        serde_json::to_writer(&mut self.w, report).context("serialize report to json")?;
        self.w.write_all(b"\n").context("write newline")?;
        self.w.flush().context("flush report writer")?;
        self.written += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(tx_id: u64) -> ViolationReport {
        ViolationReport {
            tx_id,
            origin: ContractId(1),
            block_number: 7,
            timestamp: 1_700_000_000,
            contract: ContractId(0xaa),
            depth: 1,
            start_index: 0,
            length: 3,
        }
    }

    #[test]
    fn memory_sink_accumulates() {
        let mut sink = MemorySink::new();
        sink.record(&sample(1)).unwrap();
        sink.record(&sample(2)).unwrap();
        assert_eq!(sink.reports().len(), 2);
        assert_eq!(sink.into_reports()[1].tx_id, 2);
    }

    #[test]
    fn jsonl_sink_writes_one_line_per_report() {
        let mut p = std::env::temp_dir();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!("ecfcheck_reports_{nanos}.jsonl"));

        let mut sink = JsonlSink::create(&p).unwrap();
        sink.record(&sample(1)).unwrap();
        sink.record(&sample(2)).unwrap();
        assert_eq!(sink.written(), 2);
        drop(sink);

        let body = std::fs::read_to_string(&p).unwrap();
        let lines: Vec<_> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        let back: ViolationReport = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(back, sample(1));
        let _ = std::fs::remove_file(p);
    }
}
