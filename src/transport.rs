//! Bulk transfer link abstraction
//!
//! The validator talks to the device through [`Transport`]: a blocking,
//! byte-oriented, possibly-partial bidirectional channel. A send may accept
//! fewer bytes than offered and a receive may deliver fewer bytes than
//! requested (zero on timeout) without either being an error.
//!
//! [`LoopbackTransport`] is an in-memory implementation that behaves like a
//! device looping OUT data back to IN through a bounded FIFO. It fragments
//! deliveries and refuses bytes beyond its capacity, which makes it a useful
//! stress target when no hardware is attached.

use std::collections::VecDeque;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Errors raised by a transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// The device or handle could not be opened, or went away.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// A transfer failed for a reason other than a timeout.
    #[error("transfer failed on endpoint {endpoint:#04x}: {message}")]
    Transfer {
        /// Endpoint address the transfer was issued on.
        endpoint: u8,
        /// Description of the failure.
        message: String,
    },

    /// Releasing the handle failed.
    #[error("failed to close transport: {0}")]
    Close(String),

    /// I/O error from a file-backed transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// One receive: the delivered bytes plus the count the transport reported
///
/// A well-behaved transport reports `read == data.len()`. The two are kept
/// separate because a malformed transfer shows up as a disagreement between
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Received {
    /// Bytes delivered by the transport
    pub data: Vec<u8>,
    /// Byte count reported by the transport
    pub read: usize,
}

impl Received {
    /// A consistent receive of `data`
    pub fn new(data: Vec<u8>) -> Self {
        let read = data.len();
        Self { data, read }
    }

    /// A zero-byte receive (timeout, nothing available)
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Blocking bidirectional byte channel to the device under test
pub trait Transport {
    /// Write `data`, returning how many bytes the device accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer fails for a reason other than a
    /// timeout. A timeout is reported as a short (possibly zero) count.
    fn send(&mut self, data: &[u8]) -> Result<usize>;

    /// Read up to `max_length` bytes, blocking until data arrives or the
    /// configured timeout expires.
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer fails for a reason other than a
    /// timeout. A timeout is reported as an empty [`Received`].
    fn recv(&mut self, max_length: usize) -> Result<Received>;

    /// Release the underlying handle.
    ///
    /// Consumes the transport, so a handle can be closed at most once.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Close`] if the handle could not be released.
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// Configuration for [`LoopbackTransport`]
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// FIFO capacity in bytes; sends beyond this are partially accepted.
    pub capacity: usize,
    /// Upper bound on bytes returned by one receive (`None` = no extra cap).
    pub max_fragment: Option<usize>,
    /// Whether receives return a random length between 1 and the cap.
    pub random_fragments: bool,
    /// Seed for fragment sizing.
    pub seed: u64,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            // 32 KiB, the FT600 FIFO depth
            capacity: 32 * 1024,
            max_fragment: None,
            random_fragments: true,
            seed: 0,
        }
    }
}

/// In-memory loopback: everything sent comes back out of `recv` in order
#[derive(Debug)]
pub struct LoopbackTransport {
    fifo: VecDeque<u8>,
    config: LoopbackConfig,
    rng: SmallRng,
    bytes_in: u64,
    bytes_out: u64,
}

impl LoopbackTransport {
    /// Create a loopback with the given configuration
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            fifo: VecDeque::with_capacity(config.capacity),
            rng: SmallRng::seed_from_u64(config.seed),
            config,
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    /// Bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.fifo.len()
    }

    /// Total bytes accepted by `send`
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Total bytes delivered by `recv`
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    fn fragment_len(&mut self, max_length: usize) -> usize {
        let cap = self
            .config
            .max_fragment
            .map_or(max_length, |f| f.min(max_length))
            .min(self.fifo.len());
        if cap == 0 {
            return 0;
        }
        if self.config.random_fragments {
            self.rng.gen_range(1..=cap)
        } else {
            cap
        }
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new(LoopbackConfig::default())
    }
}

impl Transport for LoopbackTransport {
    fn send(&mut self, data: &[u8]) -> Result<usize> {
        let room = self.config.capacity.saturating_sub(self.fifo.len());
        let accepted = data.len().min(room);
        self.fifo.extend(&data[..accepted]);
        self.bytes_in += accepted as u64;
        if accepted < data.len() {
            log::debug!(
                "Loopback FIFO full: accepted {} of {} bytes",
                accepted,
                data.len()
            );
        }
        Ok(accepted)
    }

    fn recv(&mut self, max_length: usize) -> Result<Received> {
        let len = self.fragment_len(max_length);
        let data: Vec<u8> = self.fifo.drain(..len).collect();
        self.bytes_out += data.len() as u64;
        Ok(Received::new(data))
    }

    fn close(self) -> Result<()> {
        log::debug!(
            "Loopback closed: {} bytes in, {} bytes out, {} left buffered",
            self.bytes_in,
            self.bytes_out,
            self.fifo.len()
        );
        Ok(())
    }
}
