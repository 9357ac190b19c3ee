//! `ft245-validator` - continuous-stream integrity checker for FIFO bulk links
//!
//! Drives an FT245-style synchronous FIFO bridge (FT600/FT601 in 245 mode)
//! with randomly interleaved sends and receives of a 64-bit wraparound
//! counter, and fails the moment a received sample is not the next value of
//! the sequence. Every transfer can be recorded to a trace and re-verified
//! offline.
//!
//! # Modules
//!
//! - [`transport`]: the link abstraction plus an in-memory loopback
//! - [`usb`]: libusb bulk transport (feature `usb`, on by default)
//! - [`validator`]: the round-driven state machine
//! - [`verifier`]: receive-side ordering check shared with trace replay
//! - [`trace`]: capture and replay of transfer traces
//! - [`cli`]: command-line front end

pub mod cli;
pub mod config;
pub mod policy;
pub mod sample;
pub mod trace;
pub mod transport;
pub mod validator;
pub mod verifier;

#[cfg(feature = "usb")]
pub mod usb;

/// Test doubles and stream generators
pub mod test_utils;

pub use config::{DeviceConfig, ValidatorConfig};
pub use policy::{Operation, PolicyConfig, RandomPolicy, RoundPolicy};
pub use transport::{LoopbackTransport, Received, Transport, TransportError};
pub use validator::{
    FailureReason, RoundEvent, RoundOutcome, RunReport, RunState, SequenceValidator,
    ValidationError,
};

/// Initialize logging, run the command line and return the exit code
pub fn run() -> i32 {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::debug!("ft245-validator {} starting", env!("CARGO_PKG_VERSION"));

    cli::main_with_args(std::env::args_os())
}
