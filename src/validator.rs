//! Continuous-stream integrity validator
//!
//! Randomly interleaves sends of a monotonically increasing 64-bit counter
//! with receives, and checks that every received sample is exactly the next
//! value of the counter. The transport is free to fragment, coalesce, or
//! partially deliver chunks; only sample order must survive.
//!
//! # State machine
//!
//! ```text
//!            step()                 mismatch / short read / transport error
//! Running ──────────▶ Running ─────────────────────────────────────────▶ Failed
//!    │                                                                    (sticky)
//!    └── rounds exhausted ──▶ Completed (sticky)
//! ```
//!
//! # Counters
//!
//! - `tx_next` is the next value to transmit. It advances by the samples the
//!   transport actually accepted, never by the samples requested. A write
//!   that ends inside a sample commits that sample; its unwritten tail is
//!   queued and goes out first on the next send.
//! - `rx_expected` is unset until the first decoded sample anchors it.
//!
//! Both counters wrap modulo 2^64 and are never decremented or reset.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut validator = SequenceValidator::new(transport, RandomPolicy::default(), 9999);
//! let report = validator.run_with(|outcome| println!("{}", outcome));
//! ```

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::config::ValidatorConfig;
use crate::policy::{Operation, RandomPolicy, RoundPolicy};
use crate::sample::{encode_run_into, wire_len, SAMPLE_WIDTH};
use crate::transport::Transport;
use crate::verifier::StreamVerifier;

/// Failure class, independent of diagnostic detail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    /// A receive reported a length the delivered data cannot back
    ShortRead,
    /// A received sample broke the counter sequence
    OutOfOrder,
    /// The device could not be reached
    TransportUnavailable,
}

/// Fatal run failure with full diagnostic context
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Malformed receive: reported byte count exceeds what was delivered
    /// or what was requested.
    #[error(
        "round {round}: recv length not met: requested {requested} B, \
         transport reported {reported} B, delivered {delivered} B"
    )]
    ShortRead {
        /// 1-based round index
        round: u64,
        /// Bytes requested
        requested: usize,
        /// Bytes the transport claimed to read
        reported: usize,
        /// Bytes actually present in the returned buffer
        delivered: usize,
    },

    /// A decoded sample did not equal the expected counter value.
    #[error(
        "round {round}: recv data not in order at sample {index} of {samples} \
         ({bytes} B received): expected {expected:#018x}, observed {observed:#018x}"
    )]
    OutOfOrder {
        /// 1-based round index
        round: u64,
        /// Position of the offending sample among those decoded this round
        index: usize,
        /// Samples decoded this round
        samples: usize,
        /// Bytes delivered this round
        bytes: usize,
        /// Value the sequence called for
        expected: u64,
        /// Value that arrived
        observed: u64,
    },

    /// A transfer failed outright.
    #[error("round {round}: transport unavailable during {operation:?}: {message}")]
    TransportUnavailable {
        /// 1-based round index
        round: u64,
        /// Operation in progress
        operation: Operation,
        /// Underlying error
        message: String,
    },
}

impl ValidationError {
    /// Failure class of this error
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::ShortRead { .. } => FailureReason::ShortRead,
            Self::OutOfOrder { .. } => FailureReason::OutOfOrder,
            Self::TransportUnavailable { .. } => FailureReason::TransportUnavailable,
        }
    }

    /// Round in which the failure occurred
    pub fn round(&self) -> u64 {
        match self {
            Self::ShortRead { round, .. }
            | Self::OutOfOrder { round, .. }
            | Self::TransportUnavailable { round, .. } => *round,
        }
    }
}

/// Validator run state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    /// More rounds to go
    Running,
    /// Stopped on a fatal error
    Failed(ValidationError),
    /// All rounds passed
    Completed,
}

impl RunState {
    /// Whether no further rounds will execute
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// What happened in one round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundEvent {
    /// A run of samples was offered to the transport
    Sent {
        /// First value of the freshly encoded run
        first: u64,
        /// Samples requested by the policy
        requested: usize,
        /// Samples committed to the wire
        committed: usize,
        /// Bytes offered, including any queued tail
        offered: usize,
        /// Bytes the transport accepted
        written: usize,
    },
    /// Data arrived and verified
    Received {
        /// Bytes delivered
        bytes: usize,
        /// Complete samples verified
        samples: usize,
        /// First verified value, if any
        first: Option<u64>,
        /// Last verified value, if any
        last: Option<u64>,
        /// Bytes held for an incomplete trailing sample
        carried: usize,
    },
    /// Receive returned nothing (timeout)
    Idle {
        /// Bytes requested
        requested: usize,
    },
    /// The round ended the run with a failure
    Failed,
    /// Nothing executed: the validator was already terminal
    Halted,
}

/// Result of stepping the validator once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundOutcome {
    /// 1-based index of the round just executed
    pub round: u64,
    /// Configured round count
    pub total: u64,
    /// What the round did
    pub event: RoundEvent,
    /// State after the round
    pub state: RunState,
}

impl fmt::Display for RoundOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.total.to_string().len().max(4);
        write!(f, "[{:>width$}/{:>width$}]  ", self.round, self.total)?;

        match &self.event {
            RoundEvent::Sent {
                first,
                committed,
                written,
                offered,
                ..
            } => {
                if *committed > 0 {
                    let last = first.wrapping_add(*committed as u64 - 1);
                    write!(f, "send {:#x}~{:#x}, {} B", first, last, written)?;
                } else {
                    write!(f, "send nothing new, {} B", written)?;
                }
                if written < offered {
                    write!(f, " (partial, {} B offered)", offered)?;
                }
                Ok(())
            }
            RoundEvent::Received { bytes, carried, .. } => {
                write!(f, "recv {:>4} B, validation okay", bytes)?;
                if *carried > 0 {
                    write!(f, " ({} B carried)", carried)?;
                }
                Ok(())
            }
            RoundEvent::Idle { .. } => write!(f, "recv    0 B, nothing available"),
            RoundEvent::Failed => match &self.state {
                RunState::Failed(err) => write!(f, "*** {}", err),
                _ => write!(f, "*** failed"),
            },
            RoundEvent::Halted => write!(f, "halted"),
        }
    }
}

/// Running totals for a validation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Send rounds executed
    pub sends: u64,
    /// Sends the transport only partially accepted
    pub partial_sends: u64,
    /// Receive rounds that delivered data
    pub receives: u64,
    /// Receive rounds that delivered nothing
    pub idle_rounds: u64,
    /// Bytes accepted by the transport
    pub bytes_sent: u64,
    /// Bytes delivered by the transport
    pub bytes_received: u64,
    /// Samples committed to the wire
    pub samples_sent: u64,
    /// Samples received and verified
    pub samples_verified: u64,
}

/// Final report of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Whether all rounds passed
    pub passed: bool,
    /// Rounds executed
    pub rounds_executed: u64,
    /// Configured round count
    pub rounds_total: u64,
    /// Failure class, if any
    pub failure: Option<FailureReason>,
    /// Failure diagnostics, if any
    pub failure_message: Option<String>,
    /// Next value that would have been sent
    pub tx_next: u64,
    /// Next value expected on receive, if anchored
    pub rx_expected: Option<u64>,
    /// Running totals
    pub stats: RunStats,
}

/// The core validator: two counters, a transport, and a round policy
pub struct SequenceValidator<T: Transport, P: RoundPolicy> {
    transport: T,
    policy: P,
    rounds: u64,
    round: u64,
    tx_next: u64,
    /// Unwritten tail of a sample a previous send split
    tx_tail: Vec<u8>,
    verifier: StreamVerifier,
    state: RunState,
    stats: RunStats,
}

impl<T: Transport> SequenceValidator<T, RandomPolicy> {
    /// Create a validator with a [`RandomPolicy`] built from `config`
    pub fn from_config(transport: T, config: &ValidatorConfig) -> Self {
        Self::new(
            transport,
            RandomPolicy::new(config.policy.clone()),
            config.rounds,
        )
    }
}

impl<T: Transport, P: RoundPolicy> SequenceValidator<T, P> {
    /// Create a validator that runs `rounds` rounds
    pub fn new(transport: T, policy: P, rounds: u64) -> Self {
        Self {
            transport,
            policy,
            rounds,
            round: 0,
            tx_next: 0,
            tx_tail: Vec::with_capacity(SAMPLE_WIDTH),
            verifier: StreamVerifier::new(),
            state: RunState::Running,
            stats: RunStats::default(),
        }
    }

    /// Next value to transmit
    pub fn tx_next(&self) -> u64 {
        self.tx_next
    }

    /// Next value expected on receive (`None` until anchored)
    pub fn rx_expected(&self) -> Option<u64> {
        self.verifier.expected()
    }

    /// Bytes of a split sample still waiting to be written
    pub fn pending_tx_bytes(&self) -> usize {
        self.tx_tail.len()
    }

    /// Bytes of an incomplete received sample held for the next receive
    pub fn carried_rx_bytes(&self) -> usize {
        self.verifier.carried()
    }

    /// Current state
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Rounds executed so far
    pub fn rounds_executed(&self) -> u64 {
        self.round
    }

    /// Running totals
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Borrow the transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Tear down the validator, handing back the transport for closing
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Execute one round
    ///
    /// Once the state is terminal this returns [`RoundEvent::Halted`] without
    /// touching the transport or the counters.
    pub fn step(&mut self) -> RoundOutcome {
        if self.state.is_terminal() {
            return self.outcome(RoundEvent::Halted);
        }
        if self.round >= self.rounds {
            self.finish();
            return self.outcome(RoundEvent::Halted);
        }

        self.round += 1;
        let event = match self.policy.choose_operation() {
            Operation::Send => self.send_round(),
            Operation::Receive => self.receive_round(),
        };

        if !self.state.is_terminal() && self.round >= self.rounds {
            self.finish();
        }

        self.outcome(event)
    }

    /// Step until a terminal state, returning the final report
    pub fn run(&mut self) -> RunReport {
        self.run_with(|_| {})
    }

    /// Step until a terminal state, handing every outcome to `observer`
    pub fn run_with<F>(&mut self, mut observer: F) -> RunReport
    where
        F: FnMut(&RoundOutcome),
    {
        while !self.state.is_terminal() {
            let outcome = self.step();
            observer(&outcome);
        }
        self.report()
    }

    /// Snapshot of the run so far
    pub fn report(&self) -> RunReport {
        let (failure, failure_message) = match &self.state {
            RunState::Failed(err) => (Some(err.reason()), Some(err.to_string())),
            _ => (None, None),
        };
        RunReport {
            passed: self.state == RunState::Completed,
            rounds_executed: self.round,
            rounds_total: self.rounds,
            failure,
            failure_message,
            tx_next: self.tx_next,
            rx_expected: self.verifier.expected(),
            stats: self.stats,
        }
    }

    fn outcome(&self, event: RoundEvent) -> RoundOutcome {
        RoundOutcome {
            round: self.round,
            total: self.rounds,
            event,
            state: self.state.clone(),
        }
    }

    fn finish(&mut self) {
        log::info!(
            "Validation completed: {} rounds, {} samples verified, {} samples sent",
            self.round,
            self.stats.samples_verified,
            self.stats.samples_sent
        );
        self.state = RunState::Completed;
    }

    fn fail(&mut self, err: ValidationError) -> RoundEvent {
        log::error!("{}", err);
        self.state = RunState::Failed(err);
        RoundEvent::Failed
    }

    fn send_round(&mut self) -> RoundEvent {
        let requested = self.policy.choose_send_samples().max(1);
        let first = self.tx_next;
        let tail_len = self.tx_tail.len();

        let mut buffer = Vec::with_capacity(tail_len + wire_len(requested));
        buffer.extend_from_slice(&self.tx_tail);
        encode_run_into(&mut buffer, first, requested);

        let written = match self.transport.send(&buffer) {
            Ok(n) if n > buffer.len() => {
                log::warn!(
                    "Transport reported {} B written for a {} B send, clamping",
                    n,
                    buffer.len()
                );
                buffer.len()
            }
            Ok(n) => n,
            Err(e) => {
                return self.fail(ValidationError::TransportUnavailable {
                    round: self.round,
                    operation: Operation::Send,
                    message: e.to_string(),
                })
            }
        };

        let committed = if written <= tail_len {
            self.tx_tail.drain(..written);
            0
        } else {
            self.tx_tail.clear();
            let fresh = written - tail_len;
            let committed = fresh.div_ceil(SAMPLE_WIDTH);
            let split = fresh % SAMPLE_WIDTH;
            if split != 0 {
                let sample_end = tail_len + committed * SAMPLE_WIDTH;
                self.tx_tail
                    .extend_from_slice(&buffer[tail_len + fresh..sample_end]);
            }
            committed
        };

        self.tx_next = self.tx_next.wrapping_add(committed as u64);
        self.stats.sends += 1;
        self.stats.bytes_sent += written as u64;
        self.stats.samples_sent += committed as u64;
        if written < buffer.len() {
            self.stats.partial_sends += 1;
        }

        log::debug!(
            "Round {}: sent {} of {} B, {} of {} samples committed, tx_next={:#x}",
            self.round,
            written,
            buffer.len(),
            committed,
            requested,
            self.tx_next
        );

        RoundEvent::Sent {
            first,
            requested,
            committed,
            offered: buffer.len(),
            written,
        }
    }

    fn receive_round(&mut self) -> RoundEvent {
        let requested = self.policy.choose_recv_bytes().max(1);

        let received = match self.transport.recv(requested) {
            Ok(received) => received,
            Err(e) => {
                return self.fail(ValidationError::TransportUnavailable {
                    round: self.round,
                    operation: Operation::Receive,
                    message: e.to_string(),
                })
            }
        };

        if received.read > received.data.len() || received.read > requested {
            return self.fail(ValidationError::ShortRead {
                round: self.round,
                requested,
                reported: received.read,
                delivered: received.data.len(),
            });
        }

        if received.read == 0 {
            self.stats.idle_rounds += 1;
            log::debug!("Round {}: recv timed out with 0 B", self.round);
            return RoundEvent::Idle { requested };
        }

        let chunk = &received.data[..received.read];
        self.stats.receives += 1;
        self.stats.bytes_received += chunk.len() as u64;

        match self.verifier.verify_chunk(chunk) {
            Ok(report) => {
                self.stats.samples_verified += report.samples as u64;
                log::debug!(
                    "Round {}: recv {} B, {} samples ok, {} B carried",
                    self.round,
                    chunk.len(),
                    report.samples,
                    report.carried
                );
                RoundEvent::Received {
                    bytes: chunk.len(),
                    samples: report.samples,
                    first: report.first,
                    last: report.last,
                    carried: report.carried,
                }
            }
            Err(mismatch) => self.fail(ValidationError::OutOfOrder {
                round: self.round,
                index: mismatch.index,
                samples: mismatch.samples,
                bytes: chunk.len(),
                expected: mismatch.expected,
                observed: mismatch.observed,
            }),
        }
    }
}
