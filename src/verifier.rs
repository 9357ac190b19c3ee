//! Receive-side ordering check
//!
//! [`StreamVerifier`] consumes received chunks in arrival order and checks
//! that the decoded samples form one continuous wraparound counter. The first
//! decoded sample anchors the sequence: the peer's starting value is not
//! known in advance.
//!
//! The verifier is independent of any transport so the same check runs live
//! inside the validator and offline over a recorded trace.

use crate::sample::SampleDecoder;

/// First sample that broke the sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    /// Position of the sample among those decoded from this chunk
    pub index: usize,
    /// Number of samples decoded from this chunk
    pub samples: usize,
    /// Value the sequence called for
    pub expected: u64,
    /// Value that arrived
    pub observed: u64,
}

/// Summary of one verified chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkReport {
    /// Complete samples decoded (and verified) from this chunk
    pub samples: usize,
    /// First verified value, if any
    pub first: Option<u64>,
    /// Last verified value, if any
    pub last: Option<u64>,
    /// Whether this chunk anchored the sequence
    pub anchored: bool,
    /// Bytes held back for an incomplete trailing sample
    pub carried: usize,
}

/// Continuous-counter checker with anchor and trailing-byte carry
#[derive(Debug, Default)]
pub struct StreamVerifier {
    decoder: SampleDecoder,
    expected: Option<u64>,
    samples_verified: u64,
    bytes_seen: u64,
}

impl StreamVerifier {
    /// Create an unanchored verifier
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a verifier that expects the sequence to continue at `next`
    pub fn anchored_at(next: u64) -> Self {
        Self {
            expected: Some(next),
            ..Self::default()
        }
    }

    /// Next value the sequence calls for (`None` until anchored)
    pub fn expected(&self) -> Option<u64> {
        self.expected
    }

    /// Total samples verified so far
    pub fn samples_verified(&self) -> u64 {
        self.samples_verified
    }

    /// Total bytes fed in so far, including carried bytes
    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    /// Bytes currently held for an incomplete sample
    pub fn carried(&self) -> usize {
        self.decoder.carried()
    }

    /// Verify a chunk of received bytes
    ///
    /// On success the expected value advances by the number of samples
    /// decoded. On mismatch the expected value is left where the sequence
    /// broke.
    ///
    /// # Errors
    ///
    /// Returns the first [`Mismatch`] among the decoded samples.
    pub fn verify_chunk(&mut self, chunk: &[u8]) -> Result<ChunkReport, Mismatch> {
        self.bytes_seen += chunk.len() as u64;
        let samples = self.decoder.push(chunk);

        let mut report = ChunkReport {
            samples: samples.len(),
            carried: self.decoder.carried(),
            ..ChunkReport::default()
        };

        let Some(&first) = samples.first() else {
            return Ok(report);
        };

        let start = match self.expected {
            Some(expected) => expected,
            None => {
                log::info!("Receive sequence anchored at {:#018x}", first);
                report.anchored = true;
                first
            }
        };

        let mut expected = start;
        for (index, &observed) in samples.iter().enumerate() {
            if observed != expected {
                self.expected = Some(expected);
                return Err(Mismatch {
                    index,
                    samples: samples.len(),
                    expected,
                    observed,
                });
            }
            expected = expected.wrapping_add(1);
        }

        self.expected = Some(expected);
        self.samples_verified += samples.len() as u64;
        report.first = Some(first);
        report.last = samples.last().copied();
        Ok(report)
    }
}
