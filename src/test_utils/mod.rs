//! Test utilities for the validator
//!
//! Provides scripted transports, scripted round policies, and synthetic
//! counter-stream generation for exercising the validator without a device
//! attached.

pub mod scripted;
pub mod stream_generator;

pub use scripted::*;
pub use stream_generator::*;
