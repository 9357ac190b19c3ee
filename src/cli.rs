//! Command-line front end
//!
//! ```bash
//! # Stress the link for 9999 rounds against the FT600 on its default pipes
//! ft245-validator validate
//!
//! # Reproducible hardware-free run, recorded for later inspection
//! ft245-validator validate --loopback --seed 7 --rounds 500 --record run.trace
//!
//! # Re-check a recorded trace offline
//! ft245-validator verify-trace run.trace
//!
//! # One-shot transfers
//! ft245-validator send --data hello
//! ft245-validator recv --length 64
//! ```
//!
//! Exit codes: 0 pass, 1 usage or configuration error, 2 transport
//! unavailable, 3 short read, 4 data out of order, 5 trace I/O error.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::config::{parse_number, DeviceConfig, ValidatorConfig, FT60X_PID, FT60X_VID};
use crate::policy::MAX_SEND_MULTIPLIER;
use crate::sample::SAMPLE_WIDTH;
use crate::trace::{
    self, RecordingTransport, TraceError, TraceMetadata, TraceRecorder, TraceSummary,
};
use crate::transport::{LoopbackConfig, LoopbackTransport, Transport, TransportError};
use crate::validator::{FailureReason, RoundEvent, RunReport, SequenceValidator};

/// Process exit codes
pub mod exit_code {
    /// Run passed
    pub const PASS: i32 = 0;
    /// Bad arguments or configuration
    pub const USAGE: i32 = 1;
    /// Device could not be opened or went away
    pub const TRANSPORT_UNAVAILABLE: i32 = 2;
    /// A receive reported more bytes than it delivered or was asked for
    pub const SHORT_READ: i32 = 3;
    /// Received data broke the counter sequence
    pub const OUT_OF_ORDER: i32 = 4;
    /// A trace file could not be read or written
    pub const TRACE_IO: i32 = 5;
}

/// Continuous-stream integrity validator for FT245-style FIFO bulk links.
#[derive(Parser, Debug)]
#[command(name = "ft245-validator")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the randomized send/receive stress test.
    Validate(ValidateArgs),

    /// Perform a single write and report how many bytes went out.
    Send {
        #[command(flatten)]
        device: DeviceArgs,

        /// Payload to send.
        #[arg(long, default_value = "0123456789abcdef")]
        data: String,
    },

    /// Perform a single read and dump what arrived.
    Recv {
        #[command(flatten)]
        device: DeviceArgs,

        /// Maximum bytes to read.
        #[arg(long, default_value_t = 64)]
        length: usize,
    },

    /// Re-verify the receive stream of a recorded trace.
    VerifyTrace {
        /// Path to the trace file.
        path: PathBuf,

        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Clone)]
struct DeviceArgs {
    /// USB vendor ID.
    #[arg(long, value_parser = parse_arg::<u16>, default_value_t = FT60X_VID)]
    vid: u16,

    /// USB product ID.
    #[arg(long, value_parser = parse_arg::<u16>, default_value_t = FT60X_PID)]
    pid: u16,

    /// Interface carrying the FIFO pipes.
    #[arg(long, value_parser = parse_arg::<u8>, default_value_t = 0)]
    interface: u8,

    /// Bulk OUT endpoint address.
    #[arg(long, value_parser = parse_arg::<u8>, default_value = "0x02")]
    ep_out: u8,

    /// Bulk IN endpoint address.
    #[arg(long, value_parser = parse_arg::<u8>, default_value = "0x82")]
    ep_in: u8,

    /// Per-transfer timeout in milliseconds.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u32,
}

impl From<&DeviceArgs> for DeviceConfig {
    fn from(args: &DeviceArgs) -> Self {
        Self {
            vendor_id: args.vid,
            product_id: args.pid,
            interface: args.interface,
            endpoint_out: args.ep_out,
            endpoint_in: args.ep_in,
            timeout_ms: args.timeout_ms,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct ValidateArgs {
    #[command(flatten)]
    device: DeviceArgs,

    /// Number of rounds [env: FT245_VALIDATOR_ROUNDS, default 9999].
    #[arg(long, value_parser = parse_arg::<u64>)]
    rounds: Option<u64>,

    /// Round policy seed [env: FT245_VALIDATOR_SEED, default 0].
    #[arg(long, value_parser = parse_arg::<u64>)]
    seed: Option<u64>,

    /// Send with probability 1/K [env: FT245_VALIDATOR_SEND_ONE_IN, default 10].
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    send_one_in: Option<u32>,

    /// Scale factor applied to drawn send run lengths (1 to 1024).
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=MAX_SEND_MULTIPLIER as u64))]
    send_multiplier: Option<u64>,

    /// Run against an in-memory loopback instead of the device.
    #[arg(long)]
    loopback: bool,

    /// Record every transfer to this trace file. Transfers are held in
    /// memory until the run ends, so keep --rounds modest when recording.
    #[arg(long)]
    record: Option<PathBuf>,

    /// Suppress per-round output.
    #[arg(short, long)]
    quiet: bool,

    /// Print the final report as JSON (implies --quiet).
    #[arg(long)]
    json: bool,
}

impl ValidateArgs {
    /// Environment overlaid with command-line overrides
    fn validator_config(&self) -> ValidatorConfig {
        let mut config = ValidatorConfig::from_env();
        if let Some(rounds) = self.rounds {
            config.rounds = rounds;
        }
        if let Some(seed) = self.seed {
            config.policy.seed = seed;
        }
        if let Some(one_in) = self.send_one_in {
            config.policy.send_one_in = one_in;
        }
        if let Some(multiplier) = self.send_multiplier {
            config.policy.send_multiplier = multiplier as usize;
        }
        config
    }

    fn per_round_output(&self) -> bool {
        !self.quiet && !self.json
    }
}

fn parse_arg<T: std::str::FromStr>(s: &str) -> std::result::Result<T, String> {
    parse_number(s.trim()).ok_or_else(|| format!("invalid number '{}'", s))
}

/// Parse `args`, execute the command and return the process exit code
pub fn main_with_args<I, S>(args: I) -> i32
where
    I: IntoIterator<Item = S>,
    S: Into<std::ffi::OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                exit_code::USAGE
            } else {
                exit_code::PASS
            };
        }
    };

    match execute(cli) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            eprintln!("error: {:#}", e);
            exit_code_for_error(&e)
        }
    }
}

/// Run a parsed command
///
/// # Errors
///
/// Returns an error if the device cannot be opened, a transfer fails
/// outside a validation run, or a trace cannot be read or written.
pub fn execute(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Validate(args) => validate(&args),
        Commands::Send { device, data } => send_once(&DeviceConfig::from(&device), &data),
        Commands::Recv { device, length } => recv_once(&DeviceConfig::from(&device), length),
        Commands::VerifyTrace { path, json } => verify(&path, json),
    }
}

/// Exit code for a validation failure class
pub fn exit_code_for(reason: FailureReason) -> i32 {
    match reason {
        FailureReason::TransportUnavailable => exit_code::TRANSPORT_UNAVAILABLE,
        FailureReason::ShortRead => exit_code::SHORT_READ,
        FailureReason::OutOfOrder => exit_code::OUT_OF_ORDER,
    }
}

/// Exit code for an error that escaped a command
pub fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    if let Some(trace_err) = err.downcast_ref::<TraceError>() {
        return match trace_err {
            TraceError::OutOfOrder { .. } => exit_code::OUT_OF_ORDER,
            _ => exit_code::TRACE_IO,
        };
    }
    if err.downcast_ref::<TransportError>().is_some() {
        return exit_code::TRANSPORT_UNAVAILABLE;
    }
    exit_code::USAGE
}

#[cfg(feature = "usb")]
type DeviceTransport = crate::usb::BulkTransport;

#[cfg(not(feature = "usb"))]
type DeviceTransport = LoopbackTransport;

fn open_device(config: &DeviceConfig) -> Result<DeviceTransport> {
    #[cfg(feature = "usb")]
    {
        crate::usb::BulkTransport::open(config).map_err(anyhow::Error::from)
    }

    #[cfg(not(feature = "usb"))]
    {
        Err(TransportError::Unavailable(format!(
            "built without USB support, cannot open {:04x}:{:04x}",
            config.vendor_id, config.product_id
        ))
        .into())
    }
}

fn validate(args: &ValidateArgs) -> Result<i32> {
    let config = args.validator_config();
    log::info!(
        "Validating for {} rounds (seed {}, send 1 in {})",
        config.rounds,
        config.policy.seed,
        config.policy.send_one_in
    );

    let device = DeviceConfig::from(&args.device);
    let report = if args.loopback {
        let loopback = LoopbackTransport::new(LoopbackConfig {
            seed: config.policy.seed,
            ..LoopbackConfig::default()
        });
        run_validation(loopback, &config, args, &TraceMetadata {
            endpoint_out: device.endpoint_out,
            endpoint_in: device.endpoint_in,
            description: "loopback".to_string(),
            ..trace_metadata(&config)
        })?
    } else {
        let transport = match open_device(&device) {
            Ok(transport) => transport,
            Err(e) => {
                eprintln!("*** {:#}", e);
                return Ok(exit_code::TRANSPORT_UNAVAILABLE);
            }
        };
        run_validation(transport, &config, args, &TraceMetadata {
            vendor_id: device.vendor_id,
            product_id: device.product_id,
            endpoint_out: device.endpoint_out,
            endpoint_in: device.endpoint_in,
            ..trace_metadata(&config)
        })?
    };

    print_report(&report, args.json)?;
    Ok(report.failure.map_or(exit_code::PASS, exit_code_for))
}

fn trace_metadata(config: &ValidatorConfig) -> TraceMetadata {
    TraceMetadata {
        sample_width: SAMPLE_WIDTH,
        seed: config.policy.seed,
        rounds: config.rounds,
        ..TraceMetadata::default()
    }
}

/// Run the validator, wrapping the transport in a recorder when asked to
fn run_validation<T: Transport>(
    transport: T,
    config: &ValidatorConfig,
    args: &ValidateArgs,
    metadata: &TraceMetadata,
) -> Result<RunReport> {
    let Some(path) = &args.record else {
        return drive(transport, config, args.per_round_output());
    };

    let recorder = Arc::new(TraceRecorder::new());
    recorder.start(metadata.clone())?;
    let recording = RecordingTransport::with_endpoints(
        transport,
        Arc::clone(&recorder),
        metadata.endpoint_out,
        metadata.endpoint_in,
    );

    let report = drive(recording, config, args.per_round_output())?;
    let files = recorder
        .finish(path)
        .with_context(|| format!("writing trace {}", path.display()))?;
    if !args.json {
        println!(
            "trace: {} records written to {}",
            files.metadata.total_records,
            files.trace_path.display()
        );
    }
    Ok(report)
}

fn drive<T: Transport>(transport: T, config: &ValidatorConfig, verbose: bool) -> Result<RunReport> {
    let mut validator = SequenceValidator::from_config(transport, config);
    let report = validator.run_with(|outcome| {
        if verbose && outcome.event != RoundEvent::Halted {
            println!("{}", outcome);
        }
    });

    if let Err(e) = validator.into_transport().close() {
        log::warn!("Failed to close transport after run: {}", e);
    }
    Ok(report)
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let stats = &report.stats;
    match &report.failure_message {
        None => println!(
            "PASS: {} rounds, {} samples sent, {} samples verified",
            report.rounds_executed, stats.samples_sent, stats.samples_verified
        ),
        Some(message) => println!("FAIL: {}", message),
    }
    println!(
        "      {} sends ({} partial), {} receives, {} idle; {} B out, {} B in",
        stats.sends,
        stats.partial_sends,
        stats.receives,
        stats.idle_rounds,
        stats.bytes_sent,
        stats.bytes_received
    );
    Ok(())
}

fn send_once(device: &DeviceConfig, data: &str) -> Result<i32> {
    let mut transport = open_device(device)?;
    let written = transport
        .send(data.as_bytes())
        .context("bulk OUT transfer")?;
    println!("sent {} of {} B", written, data.len());
    transport.close()?;
    Ok(exit_code::PASS)
}

fn recv_once(device: &DeviceConfig, length: usize) -> Result<i32> {
    let mut transport = open_device(device)?;
    let received = transport.recv(length).context("bulk IN transfer")?;
    let delivered = received.read.min(received.data.len());
    println!("received {} B", received.read);
    if delivered > 0 {
        println!("{}", format_hex(&received.data[..delivered]));
    }
    transport.close()?;
    Ok(exit_code::PASS)
}

/// Space-separated lowercase hex, 16 bytes per line
pub fn format_hex(bytes: &[u8]) -> String {
    bytes
        .chunks(16)
        .map(|line| {
            line.iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn verify(path: &Path, json: bool) -> Result<i32> {
    if let Some(meta) = trace::try_load_metadata(path) {
        log::info!(
            "Trace metadata: seed {}, {} rounds, {} records, {} B out, {} B in",
            meta.seed,
            meta.rounds,
            meta.total_records,
            meta.bytes_out,
            meta.bytes_in
        );
    }

    match trace::verify_trace(path) {
        Ok(summary) => {
            print_trace_summary(&summary, json)?;
            Ok(exit_code::PASS)
        }
        Err(e @ TraceError::OutOfOrder { .. }) => {
            println!("FAIL: {}", e);
            Ok(exit_code::OUT_OF_ORDER)
        }
        Err(e) => Err(e).with_context(|| format!("reading trace {}", path.display())),
    }
}

fn print_trace_summary(summary: &TraceSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }
    println!(
        "PASS: {} IN records ({} B), {} samples verified, {} OUT records",
        summary.records_in, summary.bytes_in, summary.samples_verified, summary.records_out
    );
    if let (Some(anchor), Some(next)) = (summary.anchor, summary.next_expected) {
        println!("      sequence {:#x} .. {:#x}", anchor, next);
    }
    if summary.trailing_bytes > 0 {
        println!(
            "      {} B of an incomplete sample at end of trace",
            summary.trailing_bytes
        );
    }
    Ok(())
}
