//! I/O helpers for the `EventLog` envelope (format-level).
//!
//! Supports JSON/CBOR and extension-based auto-detection. These routines do
//! not impose checker semantics; they only move the `EventLog` struct across
//! the wire.

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

use crate::format::EventLog;
use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/* ---------------- JSON ---------------- */

/// Read an `EventLog` from **JSON**.
///
/// Errors include file open, decoding, or malformed structure.
pub fn read_log_json<P: AsRef<Path>>(path: P) -> Result<EventLog> {
    let path_ref = path.as_ref();
    let f = File::open(path_ref).with_context(|| format!("open {}", display(path_ref)))?;
    let rdr = BufReader::new(f);
    let v: EventLog = serde_json::from_reader(rdr).with_context(|| "deserialize JSON event log")?;
    Ok(v)
}

/// Write an `EventLog` to **JSON** (pretty).
pub fn write_log_json<P: AsRef<Path>>(path: P, v: &EventLog) -> Result<()> {
    let path_ref = path.as_ref();
    let f = File::create(path_ref).with_context(|| format!("create {}", display(path_ref)))?;
    let mut w = BufWriter::new(f);
    serde_json::to_writer_pretty(&mut w, v).with_context(|| "serialize JSON event log")?;
    w.flush().with_context(|| "flush JSON writer")?;
    Ok(())
}

/* ---------------- CBOR ---------------- */

/// Read an `EventLog` from **CBOR**.
///
/// Uses `ciborium` for streaming-friendly decoding.
pub fn read_log_cbor<P: AsRef<Path>>(path: P) -> Result<EventLog> {
    let path_ref = path.as_ref();
    let f = File::open(path_ref).with_context(|| format!("open {}", display(path_ref)))?;
    let mut rdr = BufReader::new(f);
    let v: EventLog =
        ciborium::de::from_reader(&mut rdr).with_context(|| "deserialize CBOR event log")?;
    Ok(v)
}

/// Write an `EventLog` to **CBOR**.
pub fn write_log_cbor<P: AsRef<Path>>(path: P, v: &EventLog) -> Result<()> {
    let path_ref = path.as_ref();
    let f = File::create(path_ref).with_context(|| format!("create {}", display(path_ref)))?;
    let mut w = BufWriter::new(f);
    ciborium::ser::into_writer(v, &mut w).with_context(|| "serialize CBOR event log")?;
    w.flush().with_context(|| "flush CBOR writer")?;
    Ok(())
}

/* --------------- Auto-detect by extension --------------- */

/// Auto-detect **read** by extension (`.json` / `.cbor`, case-insensitive).
///
/// Returns a helpful error if the extension is missing or unsupported.
pub fn read_log_auto<P: AsRef<Path>>(path: P) -> Result<EventLog> {
    match ext_lower(path.as_ref()).as_deref() {
        Some("json") => read_log_json(path),
        Some("cbor") => read_log_cbor(path),
        Some(other) => Err(anyhow!(
            "unsupported log extension: {} (supported: .json, .cbor)",
            other
        )),
        None => Err(anyhow!("path has no extension (expected .json or .cbor)")),
    }
}

/// Auto-detect **write** (defaults to JSON if unknown/missing).
pub fn write_log_auto<P: AsRef<Path>>(path: P, v: &EventLog) -> Result<()> {
    match ext_lower(path.as_ref()).as_deref() {
        Some("json") => write_log_json(path, v),
        Some("cbor") => write_log_cbor(path, v),
        _ => write_log_json(path, v),
    }
}

/* ---------------- Small helpers ---------------- */

#[inline]
fn ext_lower(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_ascii_lowercase())
}

#[inline]
fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{generate_log, GeneratorConfig};

    fn tmp_path(name: &str, ext: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        p.push(format!("ecfcheck_trace_io_{name}_{nanos}.{ext}"));
        p
    }

    #[test]
    fn json_roundtrip() {
        let log = generate_log(&GeneratorConfig::default());
        let path = tmp_path("log", "json");
        write_log_auto(&path, &log).expect("write json");
        let back = read_log_auto(&path).expect("read json");
        assert_eq!(back, log);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn cbor_roundtrip() {
        let log = generate_log(&GeneratorConfig::default());
        let path = tmp_path("log", "cbor");
        write_log_auto(&path, &log).expect("write cbor");
        let back = read_log_auto(&path).expect("read cbor");
        assert_eq!(back, log);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn unknown_extension_is_rejected_on_read() {
        assert!(read_log_auto("log.parquet").is_err());
        assert!(read_log_auto("log").is_err());
    }
}
