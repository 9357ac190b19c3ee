//! End-to-end validator scenarios.
//!
//! Drives the full round loop against scripted and loopback transports:
//! ```text
//! RoundPolicy → SequenceValidator → Transport → StreamVerifier → RunReport
//! ```
//!
//! None of these tests need USB hardware.

use ft245_validator_lib::config::ValidatorConfig;
use ft245_validator_lib::policy::{PolicyConfig, RandomPolicy};
use ft245_validator_lib::sample::{decode_sample, SAMPLE_WIDTH};
use ft245_validator_lib::test_utils::{ScriptedPolicy, ScriptedTransport, StreamGenerator};
use ft245_validator_lib::transport::{LoopbackConfig, LoopbackTransport};
use ft245_validator_lib::validator::{
    FailureReason, RoundEvent, RunState, SequenceValidator, ValidationError,
};

fn decode_all(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks_exact(SAMPLE_WIDTH)
        .filter_map(decode_sample)
        .collect()
}

// ============================================================================
// Receive scenarios
// ============================================================================

#[test]
fn test_exact_length_one_sample_per_round_completes() {
    let mut gen = StreamGenerator::default();
    let transport = ScriptedTransport::new().deliver_chunks(gen.one_per_chunk(50));
    let mut validator = SequenceValidator::new(transport, ScriptedPolicy::receive_only(8), 50);

    let report = validator.run();

    assert!(report.passed);
    assert_eq!(*validator.state(), RunState::Completed);
    assert_eq!(report.rounds_executed, 50);
    assert_eq!(report.stats.samples_verified, 50);
    assert_eq!(report.rx_expected, Some(50));
}

#[test]
fn test_altered_sample_fails_out_of_order() {
    let mut gen = StreamGenerator::starting_at(0x1000);
    let transport = ScriptedTransport::new()
        .deliver_bytes(gen.corrupted_chunk(8, 5, 1))
        .deliver_bytes(gen.run(8));
    let mut validator = SequenceValidator::new(transport, ScriptedPolicy::receive_only(64), 10);

    let outcome = validator.step();

    assert_eq!(outcome.event, RoundEvent::Failed);
    match &outcome.state {
        RunState::Failed(ValidationError::OutOfOrder {
            round,
            index,
            samples,
            bytes,
            expected,
            observed,
        }) => {
            assert_eq!(*round, 1);
            assert_eq!(*index, 5);
            assert_eq!(*samples, 8);
            assert_eq!(*bytes, 64);
            assert_eq!(*expected, 0x1005);
            assert_eq!(*observed, 0x1006);
        }
        other => panic!("unexpected state {:?}", other),
    }

    // No further round advances the counters or touches the transport
    let again = validator.step();
    assert_eq!(again.event, RoundEvent::Halted);
    assert_eq!(validator.rounds_executed(), 1);
    assert_eq!(validator.transport().recv_calls(), 1);
    assert_eq!(validator.transport().pending_recvs(), 1);

    let report = validator.report();
    assert!(!report.passed);
    assert_eq!(report.failure, Some(FailureReason::OutOfOrder));
}

#[test]
fn test_altered_sample_in_later_round() {
    let mut gen = StreamGenerator::default();
    let mut chunks = gen.one_per_chunk(5);
    gen.skip(1);
    chunks.extend(gen.one_per_chunk(3));
    let transport = ScriptedTransport::new().deliver_chunks(chunks);
    let mut validator = SequenceValidator::new(transport, ScriptedPolicy::receive_only(8), 20);

    let report = validator.run();

    assert_eq!(report.failure, Some(FailureReason::OutOfOrder));
    assert_eq!(report.rounds_executed, 6);
    assert_eq!(report.rx_expected, Some(5));
    let message = report.failure_message.unwrap();
    assert!(message.contains("round 6"));
    assert!(message.contains("0x0000000000000005"));
    assert!(message.contains("0x0000000000000006"));
}

#[test]
fn test_repeated_empty_receives_complete() {
    let transport = ScriptedTransport::new().time_out(25);
    let mut validator = SequenceValidator::new(transport, ScriptedPolicy::receive_only(256), 25);

    let report = validator.run();

    assert!(report.passed);
    assert_eq!(report.stats.idle_rounds, 25);
    assert_eq!(report.stats.receives, 0);
    assert_eq!(report.rx_expected, None);
}

#[test]
fn test_straddling_chunks_do_not_false_positive() {
    let mut gen = StreamGenerator::starting_at(u64::MAX - 20);
    let chunks = gen.chunks(64, &[13, 3, 21, 1, 7]);
    let rounds = chunks.len() as u64;
    let transport = ScriptedTransport::new().deliver_chunks(chunks);
    let mut validator = SequenceValidator::new(transport, ScriptedPolicy::receive_only(64), rounds);

    let report = validator.run();

    assert!(report.passed, "{:?}", report.failure_message);
    assert_eq!(report.stats.samples_verified, 64);
    assert_eq!(report.stats.bytes_received, 64 * 8);
    assert_eq!(report.rx_expected, Some((u64::MAX - 20).wrapping_add(64)));
    assert_eq!(validator.carried_rx_bytes(), 0);
}

#[test]
fn test_anchor_follows_peer_start() {
    let mut gen = StreamGenerator::starting_at(0xDEAD_BEEF);
    let transport = ScriptedTransport::new().deliver_chunks(gen.chunks(32, &[40]));
    let mut validator = SequenceValidator::new(transport, ScriptedPolicy::receive_only(64), 10);

    let report = validator.run();

    assert!(report.passed);
    assert_eq!(report.rx_expected, Some(0xDEAD_BEEF + 32));
}

// ============================================================================
// Send accounting
// ============================================================================

#[test]
fn test_partial_writes_keep_wire_stream_contiguous() {
    let transport = ScriptedTransport::new()
        .accept(19)
        .accept(5)
        .accept(0)
        .accept(3)
        .accept(61);
    let policy = ScriptedPolicy::new()
        .send(4)
        .send(2)
        .send(3)
        .send(1)
        .send(8)
        .send(2);
    let mut validator = SequenceValidator::new(transport, policy, 6);

    let report = validator.run();
    assert!(report.passed);

    let wire = validator.transport().sent_bytes();
    let pending = validator.pending_tx_bytes();
    assert_eq!(wire.len() + pending, validator.tx_next() as usize * SAMPLE_WIDTH);

    let values = decode_all(&wire);
    let expected: Vec<u64> = (0..values.len() as u64).collect();
    assert_eq!(values, expected);
    assert_eq!(report.stats.bytes_sent, wire.len() as u64);
}

#[test]
fn test_tx_next_counts_committed_not_requested() {
    let transport = ScriptedTransport::new().accept(8).accept(0);
    let policy = ScriptedPolicy::new().send(100).send(100);
    let mut validator = SequenceValidator::new(transport, policy, 2);

    validator.step();
    assert_eq!(validator.tx_next(), 1);

    let outcome = validator.step();
    assert_eq!(validator.tx_next(), 1);
    assert!(matches!(
        outcome.event,
        RoundEvent::Sent {
            requested: 100,
            committed: 0,
            written: 0,
            ..
        }
    ));
    assert_eq!(validator.stats().partial_sends, 2);
}

#[test]
fn test_send_failure_is_transport_unavailable() {
    let transport = ScriptedTransport::new().fail_send("pipe stalled");
    let mut validator = SequenceValidator::new(transport, ScriptedPolicy::new().send(4), 5);

    let report = validator.run();

    assert_eq!(report.failure, Some(FailureReason::TransportUnavailable));
    assert_eq!(report.tx_next, 0);
    assert_eq!(report.rounds_executed, 1);
}

// ============================================================================
// Randomized runs against the loopback
// ============================================================================

fn loopback_run(seed: u64, rounds: u64) -> SequenceValidator<LoopbackTransport, RandomPolicy> {
    let config = ValidatorConfig {
        rounds,
        policy: PolicyConfig {
            seed,
            send_one_in: 3,
            ..PolicyConfig::default()
        },
    };
    let transport = LoopbackTransport::new(LoopbackConfig {
        seed,
        ..LoopbackConfig::default()
    });
    SequenceValidator::from_config(transport, &config)
}

#[test]
fn test_random_policy_against_loopback_completes() {
    let mut validator = loopback_run(42, 3000);

    let report = validator.run();

    assert!(report.passed, "{:?}", report.failure_message);
    assert_eq!(report.rounds_executed, 3000);
    assert!(report.stats.sends > 0);
    assert!(report.stats.receives > 0);

    let loopback = validator.transport();
    assert_eq!(report.stats.bytes_sent, loopback.bytes_in());
    assert_eq!(report.stats.bytes_received, loopback.bytes_out());
    assert!(report.stats.samples_verified <= report.stats.samples_sent);

    // Everything sent is either verified, still buffered, or carried
    let in_flight = loopback.buffered() as u64 + validator.carried_rx_bytes() as u64;
    assert_eq!(
        report.stats.samples_verified * SAMPLE_WIDTH as u64 + in_flight,
        report.stats.bytes_sent
    );
}

#[test]
fn test_same_seed_reproduces_run() {
    let first = loopback_run(7, 500).run();
    let second = loopback_run(7, 500).run();

    assert_eq!(first.stats, second.stats);
    assert_eq!(first.tx_next, second.tx_next);
    assert_eq!(first.rx_expected, second.rx_expected);
}

#[test]
fn test_run_with_observes_every_round() {
    let mut validator = loopback_run(1, 100);
    let mut seen = Vec::new();

    let report = validator.run_with(|outcome| seen.push(outcome.round));

    assert!(report.passed);
    assert_eq!(seen, (1..=100).collect::<Vec<u64>>());
}
