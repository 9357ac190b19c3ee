//! Transfer trace capture and replay
//!
//! Records every transfer of a run so a failure seen on hardware can be
//! re-examined offline, and replays recorded traces as a transport.
//!
//! # File Format
//!
//! A trace is a sequence of records, all integers little-endian:
//! ```text
//! [u64: timestamp_us][u32: length][u8: endpoint][data bytes]...
//! ```
//! The endpoint byte is the bulk pipe address: `0x02` for data the host sent
//! (OUT), `0x82` for data the host received (IN). Metadata lives in a
//! companion JSON file with the same base name and a `.json` extension.
//!
//! # Example
//!
//! ```rust,ignore
//! let recorder = Arc::new(TraceRecorder::new());
//! recorder.start(TraceMetadata::default())?;
//!
//! let transport = RecordingTransport::new(usb, Arc::clone(&recorder));
//! // ... run the validator ...
//!
//! let summary = recorder.finish(Path::new("run.trace"))?;
//! let verdict = verify_trace(Path::new("run.trace"))?;
//! ```

use std::collections::VecDeque;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{FT60X_EP_IN, FT60X_EP_OUT};
use crate::sample::SAMPLE_WIDTH;
use crate::transport::{self, Received, Transport};
use crate::verifier::StreamVerifier;

/// Largest record accepted when reading a trace
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Size of the fixed record header
const RECORD_HEADER_LEN: u64 = 8 + 4 + 1;

/// Errors that can occur while recording, reading, or verifying a trace.
#[derive(Error, Debug)]
pub enum TraceError {
    /// Recording is not active when trying to record or finish.
    #[error("trace recording is not active")]
    NotActive,

    /// Recording is already active when trying to start.
    #[error("trace recording is already active")]
    AlreadyActive,

    /// Failed to acquire lock on internal state.
    #[error("failed to acquire lock: {0}")]
    LockError(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or corrupted record in the trace file.
    #[error("invalid trace record at offset {offset}: {message}")]
    InvalidRecord {
        /// Byte offset in the trace file where the record starts.
        offset: u64,
        /// Description of the error.
        message: String,
    },

    /// A recorded receive broke the counter sequence.
    #[error(
        "trace record {record}: data not in order at sample {index}: \
         expected {expected:#018x}, observed {observed:#018x}"
    )]
    OutOfOrder {
        /// Index of the offending record in the trace
        record: usize,
        /// Position of the sample among those decoded from the record
        index: usize,
        /// Value the sequence called for
        expected: u64,
        /// Value that arrived
        observed: u64,
    },
}

/// Result type alias for trace operations.
pub type Result<T> = std::result::Result<T, TraceError>;

/// Direction of a recorded transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Host to device
    Out,
    /// Device to host
    In,
}

impl Direction {
    /// Classify an endpoint address by its direction bit
    pub fn from_endpoint(endpoint: u8) -> Self {
        if endpoint & 0x80 != 0 {
            Self::In
        } else {
            Self::Out
        }
    }
}

/// A single recorded transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    /// Time since recording started (microseconds).
    pub timestamp_us: u64,
    /// Bulk endpoint address.
    pub endpoint: u8,
    /// Bytes actually transferred.
    pub data: Vec<u8>,
}

impl TraceRecord {
    /// Direction of this transfer
    pub fn direction(&self) -> Direction {
        Direction::from_endpoint(self.endpoint)
    }
}

/// Metadata about a recorded run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceMetadata {
    /// USB vendor ID of the device (0 for loopback).
    #[serde(default)]
    pub vendor_id: u16,
    /// USB product ID of the device (0 for loopback).
    #[serde(default)]
    pub product_id: u16,
    /// OUT endpoint address used for sends.
    pub endpoint_out: u8,
    /// IN endpoint address used for receives.
    pub endpoint_in: u8,
    /// Bytes per sample.
    pub sample_width: usize,
    /// Round policy seed.
    #[serde(default)]
    pub seed: u64,
    /// Configured round count.
    #[serde(default)]
    pub rounds: u64,
    /// Total records written.
    #[serde(default)]
    pub total_records: u64,
    /// Bytes sent (OUT records).
    #[serde(default)]
    pub bytes_out: u64,
    /// Bytes received (IN records).
    #[serde(default)]
    pub bytes_in: u64,
    /// Recording duration in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
    /// Optional notes about the run.
    #[serde(default)]
    pub description: String,
}

impl Default for TraceMetadata {
    fn default() -> Self {
        Self {
            vendor_id: 0,
            product_id: 0,
            endpoint_out: FT60X_EP_OUT,
            endpoint_in: FT60X_EP_IN,
            sample_width: SAMPLE_WIDTH,
            seed: 0,
            rounds: 0,
            total_records: 0,
            bytes_out: 0,
            bytes_in: 0,
            duration_ms: 0,
            description: String::new(),
        }
    }
}

/// Files written when recording finishes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceFiles {
    /// Path to the binary trace.
    pub trace_path: PathBuf,
    /// Path to the metadata JSON.
    pub metadata_path: PathBuf,
    /// Final metadata.
    pub metadata: TraceMetadata,
}

/// Thread-safe recorder for transfers.
///
/// Counters are atomics so progress can be polled from another thread
/// without taking the record lock.
pub struct TraceRecorder {
    /// Whether recording is currently active.
    is_recording: AtomicBool,
    /// Recorded transfers.
    records: Mutex<Vec<TraceRecord>>,
    /// When recording started.
    start_time: Mutex<Option<Instant>>,
    /// Metadata about the run.
    metadata: Mutex<TraceMetadata>,
    /// Total records (fast path).
    record_count: AtomicU64,
    /// Bytes sent (fast path).
    bytes_out: AtomicU64,
    /// Bytes received (fast path).
    bytes_in: AtomicU64,
}

impl TraceRecorder {
    /// Creates a recorder with no active recording.
    #[must_use]
    pub fn new() -> Self {
        Self {
            is_recording: AtomicBool::new(false),
            records: Mutex::new(Vec::new()),
            start_time: Mutex::new(None),
            metadata: Mutex::new(TraceMetadata::default()),
            record_count: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
        }
    }

    /// Returns whether recording is active.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.is_recording.load(Ordering::Acquire)
    }

    /// Returns the number of records so far.
    #[must_use]
    pub fn record_count(&self) -> u64 {
        self.record_count.load(Ordering::Relaxed)
    }

    /// Returns `(bytes_out, bytes_in)` recorded so far.
    #[must_use]
    pub fn byte_counts(&self) -> (u64, u64) {
        (
            self.bytes_out.load(Ordering::Relaxed),
            self.bytes_in.load(Ordering::Relaxed),
        )
    }

    /// Starts a new recording.
    ///
    /// # Errors
    ///
    /// Returns `TraceError::AlreadyActive` if a recording is in progress.
    /// Returns `TraceError::LockError` if the internal mutex cannot be acquired.
    pub fn start(&self, metadata: TraceMetadata) -> Result<()> {
        if self
            .is_recording
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TraceError::AlreadyActive);
        }

        self.records
            .lock()
            .map_err(|e| TraceError::LockError(e.to_string()))?
            .clear();

        self.record_count.store(0, Ordering::Release);
        self.bytes_out.store(0, Ordering::Release);
        self.bytes_in.store(0, Ordering::Release);

        *self
            .start_time
            .lock()
            .map_err(|e| TraceError::LockError(e.to_string()))? = Some(Instant::now());

        *self
            .metadata
            .lock()
            .map_err(|e| TraceError::LockError(e.to_string()))? = metadata;

        log::info!("Trace recording started");
        Ok(())
    }

    /// Records a transfer.
    ///
    /// Silently ignored when recording is not active or `data` is empty.
    pub fn record(&self, endpoint: u8, data: &[u8]) {
        if !self.is_recording.load(Ordering::Acquire) || data.is_empty() {
            return;
        }

        let timestamp_us = self
            .start_time
            .lock()
            .ok()
            .and_then(|t| t.map(|s| s.elapsed().as_micros() as u64))
            .unwrap_or(0);

        self.record_count.fetch_add(1, Ordering::Relaxed);
        let counter = match Direction::from_endpoint(endpoint) {
            Direction::Out => &self.bytes_out,
            Direction::In => &self.bytes_in,
        };
        counter.fetch_add(data.len() as u64, Ordering::Relaxed);

        if let Ok(mut records) = self.records.lock() {
            records.push(TraceRecord {
                timestamp_us,
                endpoint,
                data: data.to_vec(),
            });
        } else {
            log::warn!("Failed to acquire lock for trace recording");
        }
    }

    /// Stops recording and writes the trace plus its metadata.
    ///
    /// The metadata goes next to `path` with a `.json` extension.
    ///
    /// # Errors
    ///
    /// Returns `TraceError::NotActive` if no recording is in progress.
    /// Returns `TraceError::Io` or `TraceError::Json` if writing fails.
    pub fn finish(&self, path: &Path) -> Result<TraceFiles> {
        if self
            .is_recording
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TraceError::NotActive);
        }

        let duration_ms = self
            .start_time
            .lock()
            .map_err(|e| TraceError::LockError(e.to_string()))?
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        let metadata = {
            let mut meta = self
                .metadata
                .lock()
                .map_err(|e| TraceError::LockError(e.to_string()))?;
            meta.duration_ms = duration_ms;
            meta.total_records = self.record_count.load(Ordering::Acquire);
            meta.bytes_out = self.bytes_out.load(Ordering::Acquire);
            meta.bytes_in = self.bytes_in.load(Ordering::Acquire);
            meta.clone()
        };

        {
            let records = self
                .records
                .lock()
                .map_err(|e| TraceError::LockError(e.to_string()))?;
            write_trace(path, &records)?;
        }

        let metadata_path = path.with_extension("json");
        let json = serde_json::to_string_pretty(&metadata)?;
        std::fs::write(&metadata_path, json)?;

        log::info!(
            "Trace saved: {} records, {} B out, {} B in, {} ms to {}",
            metadata.total_records,
            metadata.bytes_out,
            metadata.bytes_in,
            duration_ms,
            path.display()
        );

        Ok(TraceFiles {
            trace_path: path.to_path_buf(),
            metadata_path,
            metadata,
        })
    }
}

impl Default for TraceRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes records in the trace format.
///
/// # Errors
///
/// Returns `TraceError::Io` if the file cannot be written.
pub fn write_trace(path: &Path, records: &[TraceRecord]) -> Result<()> {
    let mut file = BufWriter::new(std::fs::File::create(path)?);
    for record in records {
        file.write_all(&record.timestamp_us.to_le_bytes())?;
        file.write_all(&(record.data.len() as u32).to_le_bytes())?;
        file.write_all(&[record.endpoint])?;
        file.write_all(&record.data)?;
    }
    file.flush()?;
    log::debug!("Wrote {} trace records to {}", records.len(), path.display());
    Ok(())
}

fn read_first_byte(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    loop {
        match reader.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TraceError::Io(e)),
        }
    }
}

/// Reads every record of a trace file.
///
/// # Errors
///
/// Returns `TraceError::Io` if the file cannot be opened.
/// Returns `TraceError::InvalidRecord` if a record is truncated or oversized.
pub fn read_trace(path: &Path) -> Result<Vec<TraceRecord>> {
    let mut file = std::io::BufReader::new(std::fs::File::open(path)?);
    let mut records = Vec::new();
    let mut offset = 0u64;

    loop {
        // Clean end of file only on a record boundary
        let mut timestamp_bytes = [0u8; 8];
        if read_first_byte(&mut file, &mut timestamp_bytes[..1])? == 0 {
            break;
        }
        file.read_exact(&mut timestamp_bytes[1..])
            .map_err(|_| TraceError::InvalidRecord {
                offset,
                message: "unexpected EOF reading timestamp".to_string(),
            })?;
        let timestamp_us = u64::from_le_bytes(timestamp_bytes);

        let mut len_bytes = [0u8; 4];
        file.read_exact(&mut len_bytes)
            .map_err(|_| TraceError::InvalidRecord {
                offset,
                message: "unexpected EOF reading record length".to_string(),
            })?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_RECORD_LEN {
            return Err(TraceError::InvalidRecord {
                offset,
                message: format!("record length {} exceeds 16 MiB limit", len),
            });
        }

        let mut endpoint = [0u8; 1];
        file.read_exact(&mut endpoint)
            .map_err(|_| TraceError::InvalidRecord {
                offset,
                message: "unexpected EOF reading endpoint".to_string(),
            })?;

        let mut data = vec![0u8; len];
        file.read_exact(&mut data)
            .map_err(|_| TraceError::InvalidRecord {
                offset,
                message: format!("unexpected EOF reading {} bytes of data", len),
            })?;

        records.push(TraceRecord {
            timestamp_us,
            endpoint: endpoint[0],
            data,
        });
        offset += RECORD_HEADER_LEN + len as u64;
    }

    Ok(records)
}

/// Reads trace metadata from a JSON file.
///
/// # Errors
///
/// Returns `TraceError::Io` if the file cannot be read.
/// Returns `TraceError::Json` if the JSON is invalid.
pub fn read_metadata(path: &Path) -> Result<TraceMetadata> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

/// Loads the companion metadata of a trace, if present and valid.
pub fn try_load_metadata(trace_path: &Path) -> Option<TraceMetadata> {
    let json_path = trace_path.with_extension("json");
    if !json_path.exists() {
        return None;
    }
    match read_metadata(&json_path) {
        Ok(meta) => Some(meta),
        Err(e) => {
            log::warn!("Ignoring unreadable metadata {}: {}", json_path.display(), e);
            None
        }
    }
}

/// Transport wrapper that records every transfer of an inner transport
pub struct RecordingTransport<T: Transport> {
    inner: T,
    recorder: Arc<TraceRecorder>,
    endpoint_out: u8,
    endpoint_in: u8,
}

impl<T: Transport> RecordingTransport<T> {
    /// Wrap `inner`, recording into `recorder` on the FT60x endpoints
    pub fn new(inner: T, recorder: Arc<TraceRecorder>) -> Self {
        Self::with_endpoints(inner, recorder, FT60X_EP_OUT, FT60X_EP_IN)
    }

    /// Wrap `inner` and tag records with the given endpoint addresses
    pub fn with_endpoints(
        inner: T,
        recorder: Arc<TraceRecorder>,
        endpoint_out: u8,
        endpoint_in: u8,
    ) -> Self {
        Self {
            inner,
            recorder,
            endpoint_out,
            endpoint_in,
        }
    }

    /// Borrow the wrapped transport
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Transport> Transport for RecordingTransport<T> {
    fn send(&mut self, data: &[u8]) -> transport::Result<usize> {
        let written = self.inner.send(data)?;
        self.recorder
            .record(self.endpoint_out, &data[..written.min(data.len())]);
        Ok(written)
    }

    fn recv(&mut self, max_length: usize) -> transport::Result<Received> {
        let received = self.inner.recv(max_length)?;
        let delivered = received.read.min(received.data.len());
        self.recorder
            .record(self.endpoint_in, &received.data[..delivered]);
        Ok(received)
    }

    fn close(self) -> transport::Result<()> {
        self.inner.close()
    }
}

/// Transport that plays a recorded trace back
///
/// Receives drain the IN records in order, splitting a record across calls
/// when the request is smaller than the record. Sends consume OUT records and
/// accept as many bytes as the recording shows were accepted; once the OUT
/// records run out every send is accepted in full.
#[derive(Debug, Default)]
pub struct ReplayTransport {
    inbound: VecDeque<Vec<u8>>,
    outbound: VecDeque<usize>,
}

impl ReplayTransport {
    /// Build a replay from in-memory records
    pub fn from_records(records: Vec<TraceRecord>) -> Self {
        let mut replay = Self::default();
        for record in records {
            match record.direction() {
                Direction::In => replay.inbound.push_back(record.data),
                Direction::Out => replay.outbound.push_back(record.data.len()),
            }
        }
        replay
    }

    /// Load a trace file for replay
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or holds invalid records.
    pub fn load(path: &Path) -> Result<Self> {
        let records = read_trace(path)?;
        log::info!("Loaded {} trace records from {}", records.len(), path.display());
        Ok(Self::from_records(records))
    }

    /// IN bytes not yet delivered
    pub fn remaining_in(&self) -> usize {
        self.inbound.iter().map(Vec::len).sum()
    }
}

impl Transport for ReplayTransport {
    fn send(&mut self, data: &[u8]) -> transport::Result<usize> {
        Ok(self
            .outbound
            .pop_front()
            .map_or(data.len(), |n| n.min(data.len())))
    }

    fn recv(&mut self, max_length: usize) -> transport::Result<Received> {
        let Some(front) = self.inbound.front_mut() else {
            return Ok(Received::empty());
        };
        if front.len() <= max_length {
            let data = self.inbound.pop_front().unwrap_or_default();
            return Ok(Received::new(data));
        }
        let rest = front.split_off(max_length);
        let data = std::mem::replace(front, rest);
        Ok(Received::new(data))
    }

    fn close(self) -> transport::Result<()> {
        Ok(())
    }
}

/// Outcome of verifying a trace offline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TraceSummary {
    /// IN records examined
    pub records_in: usize,
    /// OUT records present
    pub records_out: usize,
    /// IN bytes examined
    pub bytes_in: u64,
    /// Samples verified
    pub samples_verified: u64,
    /// Anchor value of the receive sequence
    pub anchor: Option<u64>,
    /// Value the sequence would continue at
    pub next_expected: Option<u64>,
    /// Bytes of an incomplete sample left at the end
    pub trailing_bytes: usize,
}

/// Re-verify the receive stream of a recorded trace.
///
/// # Errors
///
/// Returns `TraceError::OutOfOrder` at the first sample that breaks the
/// sequence, or an I/O / format error if the trace cannot be read.
pub fn verify_trace(path: &Path) -> Result<TraceSummary> {
    verify_records(&read_trace(path)?)
}

/// Re-verify the receive stream of in-memory records.
///
/// # Errors
///
/// Returns `TraceError::OutOfOrder` at the first sample that breaks the
/// sequence.
pub fn verify_records(records: &[TraceRecord]) -> Result<TraceSummary> {
    let mut verifier = StreamVerifier::new();
    let mut summary = TraceSummary::default();

    for (record_index, record) in records.iter().enumerate() {
        if record.direction() == Direction::Out {
            summary.records_out += 1;
            continue;
        }

        summary.records_in += 1;
        summary.bytes_in += record.data.len() as u64;

        match verifier.verify_chunk(&record.data) {
            Ok(report) => {
                if report.anchored {
                    summary.anchor = report.first;
                }
            }
            Err(mismatch) => {
                return Err(TraceError::OutOfOrder {
                    record: record_index,
                    index: mismatch.index,
                    expected: mismatch.expected,
                    observed: mismatch.observed,
                })
            }
        }
    }

    summary.samples_verified = verifier.samples_verified();
    summary.next_expected = verifier.expected();
    summary.trailing_bytes = verifier.carried();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::encode_run;
    use crate::test_utils::StreamGenerator;
    use tempfile::tempdir;

    fn in_record(data: Vec<u8>) -> TraceRecord {
        TraceRecord {
            timestamp_us: 0,
            endpoint: FT60X_EP_IN,
            data,
        }
    }

    fn out_record(data: Vec<u8>) -> TraceRecord {
        TraceRecord {
            timestamp_us: 0,
            endpoint: FT60X_EP_OUT,
            data,
        }
    }

    #[test]
    fn test_direction_from_endpoint() {
        assert_eq!(Direction::from_endpoint(0x82), Direction::In);
        assert_eq!(Direction::from_endpoint(0x02), Direction::Out);
    }

    #[test]
    fn test_write_and_read_trace() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.trace");
        let records = vec![
            TraceRecord {
                timestamp_us: 10,
                endpoint: FT60X_EP_OUT,
                data: vec![1, 2, 3],
            },
            TraceRecord {
                timestamp_us: 2000,
                endpoint: FT60X_EP_IN,
                data: vec![0xAA; 40],
            },
        ];

        write_trace(&path, &records).unwrap();
        let read = read_trace(&path).unwrap();

        assert_eq!(read, records);
    }

    #[test]
    fn test_read_empty_trace() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.trace");
        std::fs::File::create(&path).unwrap();
        assert!(read_trace(&path).unwrap().is_empty());
    }

    #[test]
    fn test_oversized_record_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.trace");

        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&0u64.to_le_bytes()).unwrap();
        file.write_all(&(32 * 1024 * 1024u32).to_le_bytes()).unwrap();

        let result = read_trace(&path);
        assert!(matches!(
            result,
            Err(TraceError::InvalidRecord { message, .. }) if message.contains("exceeds")
        ));
    }

    #[test]
    fn test_truncated_record_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("truncated.trace");

        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&0u64.to_le_bytes()).unwrap();
        file.write_all(&100u32.to_le_bytes()).unwrap();
        file.write_all(&[FT60X_EP_IN]).unwrap();
        file.write_all(&[0u8; 10]).unwrap();

        assert!(matches!(
            read_trace(&path),
            Err(TraceError::InvalidRecord { offset: 0, .. })
        ));
    }

    #[test]
    fn test_recorder_lifecycle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.trace");
        let recorder = TraceRecorder::new();

        recorder.record(FT60X_EP_IN, &[1, 2, 3]);
        assert_eq!(recorder.record_count(), 0);

        recorder
            .start(TraceMetadata {
                seed: 7,
                rounds: 100,
                ..Default::default()
            })
            .unwrap();
        assert!(matches!(
            recorder.start(TraceMetadata::default()),
            Err(TraceError::AlreadyActive)
        ));

        recorder.record(FT60X_EP_OUT, &[0u8; 16]);
        recorder.record(FT60X_EP_IN, &[0u8; 24]);
        recorder.record(FT60X_EP_IN, &[]);
        assert_eq!(recorder.record_count(), 2);
        assert_eq!(recorder.byte_counts(), (16, 24));

        let files = recorder.finish(&path).unwrap();
        assert!(!recorder.is_recording());
        assert_eq!(files.metadata.total_records, 2);
        assert_eq!(files.metadata.seed, 7);
        assert!(files.trace_path.exists());
        assert!(files.metadata_path.exists());

        let meta = try_load_metadata(&path).unwrap();
        assert_eq!(meta.rounds, 100);
        assert_eq!(meta.bytes_in, 24);

        assert!(matches!(recorder.finish(&path), Err(TraceError::NotActive)));
    }

    #[test]
    fn test_replay_splits_records_to_request() {
        let mut replay = ReplayTransport::from_records(vec![
            in_record(vec![1, 2, 3, 4, 5]),
            out_record(vec![0; 6]),
            in_record(vec![6, 7]),
        ]);

        assert_eq!(replay.recv(3).unwrap().data, vec![1, 2, 3]);
        assert_eq!(replay.recv(8).unwrap().data, vec![4, 5]);
        assert_eq!(replay.recv(8).unwrap().data, vec![6, 7]);
        assert_eq!(replay.recv(8).unwrap(), Received::empty());

        assert_eq!(replay.send(&[0; 10]).unwrap(), 6);
        assert_eq!(replay.send(&[0; 10]).unwrap(), 10);
    }

    #[test]
    fn test_verify_records_passes_fragmented_stream() {
        let mut gen = StreamGenerator::starting_at(0xFFFF_FFFF_FFFF_FFF0);
        let mut records: Vec<TraceRecord> =
            gen.chunks(64, &[13, 8, 3]).into_iter().map(in_record).collect();
        records.insert(2, out_record(encode_run(0, 4)));

        let summary = verify_records(&records).unwrap();

        assert_eq!(summary.records_out, 1);
        assert_eq!(summary.samples_verified, 64);
        assert_eq!(summary.anchor, Some(0xFFFF_FFFF_FFFF_FFF0));
        assert_eq!(summary.next_expected, Some(0x30));
        assert_eq!(summary.trailing_bytes, 0);
    }

    #[test]
    fn test_verify_records_reports_record_and_sample() {
        let mut gen = StreamGenerator::default();
        let records = vec![
            in_record(gen.run(4)),
            in_record(gen.corrupted_chunk(8, 5, 1)),
        ];

        match verify_records(&records) {
            Err(TraceError::OutOfOrder {
                record,
                index,
                expected,
                observed,
            }) => {
                assert_eq!(record, 1);
                assert_eq!(index, 5);
                assert_eq!(expected, 9);
                assert_eq!(observed, 10);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }
}
