//! Scripted transport and round policy
//!
//! Deterministic stand-ins for the device and for
//! [`RandomPolicy`](crate::policy::RandomPolicy) so tests can pin down
//! exactly which operation runs each round and what the link does in
//! response.
//!
//! # Example
//!
//! ```rust,ignore
//! use ft245_validator_lib::test_utils::{ScriptedPolicy, ScriptedTransport};
//!
//! let transport = ScriptedTransport::new()
//!     .accept(24)                                  // first send: 3 samples
//!     .deliver(Received::new(encode_run(0, 4)));   // first recv: 4 samples
//!
//! let policy = ScriptedPolicy::new().send(5).receive(64);
//! ```

use std::collections::VecDeque;

use crate::policy::{Operation, RoundPolicy};
use crate::transport::{Received, Result, Transport, TransportError};

/// Scripted response to one receive
#[derive(Debug, Clone)]
enum RecvStep {
    Deliver(Received),
    Fail(String),
}

/// Scripted response to one send
#[derive(Debug, Clone)]
enum SendStep {
    Accept(usize),
    Fail(String),
}

/// Transport whose responses are queued up front
///
/// Once a queue runs dry, sends accept everything and receives time out
/// with zero bytes.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    sends: VecDeque<SendStep>,
    recvs: VecDeque<RecvStep>,
    sent: Vec<u8>,
    send_calls: usize,
    recv_calls: usize,
    recv_requests: Vec<usize>,
}

impl ScriptedTransport {
    /// Create a transport with empty scripts
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a send that accepts at most `bytes` bytes
    pub fn accept(mut self, bytes: usize) -> Self {
        self.sends.push_back(SendStep::Accept(bytes));
        self
    }

    /// Queue a send that fails
    pub fn fail_send(mut self, message: &str) -> Self {
        self.sends.push_back(SendStep::Fail(message.to_string()));
        self
    }

    /// Queue a receive result
    pub fn deliver(mut self, received: Received) -> Self {
        self.recvs.push_back(RecvStep::Deliver(received));
        self
    }

    /// Queue a consistent receive of `data`
    pub fn deliver_bytes(self, data: Vec<u8>) -> Self {
        self.deliver(Received::new(data))
    }

    /// Queue every chunk as its own receive
    pub fn deliver_chunks<I>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        for chunk in chunks {
            self = self.deliver_bytes(chunk);
        }
        self
    }

    /// Queue `count` zero-byte receives
    pub fn time_out(mut self, count: usize) -> Self {
        for _ in 0..count {
            self.recvs.push_back(RecvStep::Deliver(Received::empty()));
        }
        self
    }

    /// Queue a receive that fails
    pub fn fail_recv(mut self, message: &str) -> Self {
        self.recvs.push_back(RecvStep::Fail(message.to_string()));
        self
    }

    /// Concatenation of every byte the transport accepted
    pub fn sent_bytes(&self) -> Vec<u8> {
        self.sent.clone()
    }

    /// Number of `send` calls so far
    pub fn send_calls(&self) -> usize {
        self.send_calls
    }

    /// Number of `recv` calls so far
    pub fn recv_calls(&self) -> usize {
        self.recv_calls
    }

    /// `max_length` of every `recv` call so far
    pub fn recv_requests(&self) -> &[usize] {
        &self.recv_requests
    }

    /// Scripted receives not yet consumed
    pub fn pending_recvs(&self) -> usize {
        self.recvs.len()
    }
}

impl Transport for ScriptedTransport {
    fn send(&mut self, data: &[u8]) -> Result<usize> {
        self.send_calls += 1;
        let accepted = match self.sends.pop_front() {
            Some(SendStep::Accept(limit)) => limit.min(data.len()),
            Some(SendStep::Fail(message)) => {
                return Err(TransportError::Transfer {
                    endpoint: 0x02,
                    message,
                })
            }
            None => data.len(),
        };
        self.sent.extend_from_slice(&data[..accepted]);
        Ok(accepted)
    }

    fn recv(&mut self, max_length: usize) -> Result<Received> {
        self.recv_calls += 1;
        self.recv_requests.push(max_length);
        match self.recvs.pop_front() {
            Some(RecvStep::Deliver(received)) => Ok(received),
            Some(RecvStep::Fail(message)) => Err(TransportError::Transfer {
                endpoint: 0x82,
                message,
            }),
            None => Ok(Received::empty()),
        }
    }

    fn close(self) -> Result<()> {
        Ok(())
    }
}

/// One scripted round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStep {
    /// Send this many samples
    Send(usize),
    /// Receive up to this many bytes
    Receive(usize),
}

/// Round policy that replays a fixed list of steps
///
/// When the list runs out every further round is a receive of the fallback
/// size.
#[derive(Debug, Clone)]
pub struct ScriptedPolicy {
    steps: VecDeque<ScriptStep>,
    fallback: ScriptStep,
    current: ScriptStep,
}

impl Default for ScriptedPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPolicy {
    /// Empty script falling back to 8-byte receives
    pub fn new() -> Self {
        Self {
            steps: VecDeque::new(),
            fallback: ScriptStep::Receive(8),
            current: ScriptStep::Receive(8),
        }
    }

    /// Every round receives up to `bytes` bytes
    pub fn receive_only(bytes: usize) -> Self {
        let mut policy = Self::new();
        policy.fallback = ScriptStep::Receive(bytes);
        policy
    }

    /// Append a send round
    pub fn send(mut self, samples: usize) -> Self {
        self.steps.push_back(ScriptStep::Send(samples));
        self
    }

    /// Append a receive round
    pub fn receive(mut self, bytes: usize) -> Self {
        self.steps.push_back(ScriptStep::Receive(bytes));
        self
    }
}

impl RoundPolicy for ScriptedPolicy {
    fn choose_operation(&mut self) -> Operation {
        self.current = self.steps.pop_front().unwrap_or(self.fallback);
        match self.current {
            ScriptStep::Send(_) => Operation::Send,
            ScriptStep::Receive(_) => Operation::Receive,
        }
    }

    fn choose_send_samples(&mut self) -> usize {
        match self.current {
            ScriptStep::Send(samples) => samples,
            ScriptStep::Receive(_) => 1,
        }
    }

    fn choose_recv_bytes(&mut self) -> usize {
        match self.current {
            ScriptStep::Receive(bytes) => bytes,
            ScriptStep::Send(_) => 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_transport_defaults() {
        let mut transport = ScriptedTransport::new();
        assert_eq!(transport.send(&[1, 2, 3]).unwrap(), 3);
        assert_eq!(transport.recv(16).unwrap(), Received::empty());
        assert_eq!(transport.sent_bytes(), vec![1, 2, 3]);
        assert_eq!(transport.recv_requests(), &[16]);
    }

    #[test]
    fn test_scripted_transport_accept_limit() {
        let mut transport = ScriptedTransport::new().accept(2);
        assert_eq!(transport.send(&[1, 2, 3]).unwrap(), 2);
        assert_eq!(transport.send(&[4]).unwrap(), 1);
        assert_eq!(transport.sent_bytes(), vec![1, 2, 4]);
    }

    #[test]
    fn test_scripted_transport_failures() {
        let mut transport = ScriptedTransport::new().fail_send("stall").fail_recv("gone");
        assert!(transport.send(&[0]).is_err());
        assert!(transport.recv(8).is_err());
    }

    #[test]
    fn test_scripted_policy_sequence_then_fallback() {
        let mut policy = ScriptedPolicy::receive_only(32).send(3).receive(16);

        assert_eq!(policy.choose_operation(), Operation::Send);
        assert_eq!(policy.choose_send_samples(), 3);

        assert_eq!(policy.choose_operation(), Operation::Receive);
        assert_eq!(policy.choose_recv_bytes(), 16);

        assert_eq!(policy.choose_operation(), Operation::Receive);
        assert_eq!(policy.choose_recv_bytes(), 32);
    }
}
