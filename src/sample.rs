//! Sample encoding for the counter stream
//!
//! Every counter value travels as one fixed-width sample: an unsigned 64-bit
//! integer in native byte order, concatenated with no framing. Transport
//! chunk boundaries carry no meaning, so a sample may be split across two
//! reads. [`SampleDecoder`] keeps the trailing bytes of an incomplete sample
//! and prefixes them to the next chunk.
//!
//! # Usage
//!
//! ```rust,ignore
//! use ft245_validator_lib::sample::{encode_run, SampleDecoder};
//!
//! let wire = encode_run(100, 4); // 32 bytes: 100, 101, 102, 103
//!
//! let mut decoder = SampleDecoder::new();
//! assert_eq!(decoder.push(&wire[..12]), vec![100]); // 4 bytes carried
//! assert_eq!(decoder.push(&wire[12..]), vec![101, 102, 103]);
//! ```

/// Width of one encoded sample in bytes
pub const SAMPLE_WIDTH: usize = 8;

/// Encode a single counter value
#[inline]
pub fn encode_sample(value: u64) -> [u8; SAMPLE_WIDTH] {
    value.to_ne_bytes()
}

/// Decode a single sample from exactly [`SAMPLE_WIDTH`] bytes
///
/// Returns `None` if `bytes` is not exactly one sample wide.
#[inline]
pub fn decode_sample(bytes: &[u8]) -> Option<u64> {
    let raw: [u8; SAMPLE_WIDTH] = bytes.try_into().ok()?;
    Some(u64::from_ne_bytes(raw))
}

/// Encode `count` consecutive counter values starting at `start`
///
/// The run wraps modulo 2^64, so a run starting at `u64::MAX` continues at 0.
/// The result is always exactly `count * SAMPLE_WIDTH` bytes long.
pub fn encode_run(start: u64, count: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(count * SAMPLE_WIDTH);
    encode_run_into(&mut bytes, start, count);
    bytes
}

/// Append `count` consecutive counter values starting at `start` to `out`
pub fn encode_run_into(out: &mut Vec<u8>, start: u64, count: usize) {
    out.reserve(count * SAMPLE_WIDTH);
    let mut value = start;
    for _ in 0..count {
        out.extend_from_slice(&encode_sample(value));
        value = value.wrapping_add(1);
    }
}

/// Number of bytes `count` samples occupy on the wire
#[inline]
pub fn wire_len(count: usize) -> usize {
    count * SAMPLE_WIDTH
}

/// Streaming sample decoder with trailing-byte carry
///
/// Decodes every complete sample present in the concatenation of the
/// carried bytes and the new chunk. Bytes of an incomplete trailing sample
/// are retained for the next [`push`](Self::push).
#[derive(Debug, Default)]
pub struct SampleDecoder {
    /// Leading bytes of a sample whose remainder has not arrived yet
    carry: Vec<u8>,
}

impl SampleDecoder {
    /// Create a decoder with an empty carry
    pub fn new() -> Self {
        Self {
            carry: Vec::with_capacity(SAMPLE_WIDTH),
        }
    }

    /// Feed a received chunk, returning the complete samples it finishes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<u64> {
        if chunk.is_empty() {
            return Vec::new();
        }

        let mut samples = Vec::with_capacity((self.carry.len() + chunk.len()) / SAMPLE_WIDTH);
        let mut rest = chunk;

        // Complete the carried sample first
        if !self.carry.is_empty() {
            let missing = SAMPLE_WIDTH - self.carry.len();
            if rest.len() < missing {
                self.carry.extend_from_slice(rest);
                return samples;
            }
            self.carry.extend_from_slice(&rest[..missing]);
            rest = &rest[missing..];
            if let Some(value) = decode_sample(&self.carry) {
                samples.push(value);
            }
            self.carry.clear();
        }

        let mut whole = rest.chunks_exact(SAMPLE_WIDTH);
        samples.extend(whole.by_ref().filter_map(decode_sample));
        self.carry.extend_from_slice(whole.remainder());

        samples
    }

    /// Number of bytes currently held for an incomplete sample
    pub fn carried(&self) -> usize {
        self.carry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_run_length() {
        assert_eq!(encode_run(0, 0).len(), 0);
        assert_eq!(encode_run(7, 1).len(), 8);
        assert_eq!(encode_run(7, 513).len(), 513 * SAMPLE_WIDTH);
    }

    #[test]
    fn test_encode_run_native_order() {
        let bytes = encode_run(0x0102_0304_0506_0708, 1);
        assert_eq!(bytes, 0x0102_0304_0506_0708u64.to_ne_bytes().to_vec());
    }

    #[test]
    fn test_encode_run_wraps() {
        let bytes = encode_run(u64::MAX - 1, 3);
        let values: Vec<u64> = bytes
            .chunks_exact(SAMPLE_WIDTH)
            .filter_map(decode_sample)
            .collect();
        assert_eq!(values, vec![u64::MAX - 1, u64::MAX, 0]);
    }

    #[test]
    fn test_decode_sample_rejects_wrong_width() {
        assert_eq!(decode_sample(&[0u8; 7]), None);
        assert_eq!(decode_sample(&[0u8; 9]), None);
        assert_eq!(decode_sample(&[0u8; 8]), Some(0));
    }

    #[test]
    fn test_decoder_whole_chunk() {
        let mut decoder = SampleDecoder::new();
        assert_eq!(decoder.push(&encode_run(40, 3)), vec![40, 41, 42]);
        assert_eq!(decoder.carried(), 0);
    }

    #[test]
    fn test_decoder_carries_partial_sample() {
        let wire = encode_run(1000, 2);
        let mut decoder = SampleDecoder::new();

        assert_eq!(decoder.push(&wire[..5]), Vec::<u64>::new());
        assert_eq!(decoder.carried(), 5);

        assert_eq!(decoder.push(&wire[5..13]), vec![1000]);
        assert_eq!(decoder.carried(), 5);

        assert_eq!(decoder.push(&wire[13..]), vec![1001]);
        assert_eq!(decoder.carried(), 0);
    }

    #[test]
    fn test_decoder_byte_at_a_time() {
        let wire = encode_run(u64::MAX, 3);
        let mut decoder = SampleDecoder::new();
        let mut values = Vec::new();
        for byte in &wire {
            values.extend(decoder.push(std::slice::from_ref(byte)));
        }
        assert_eq!(values, vec![u64::MAX, 0, 1]);
    }

    #[test]
    fn test_decoder_carry_smaller_than_gap() {
        // Carry of 3 bytes, next chunk only 2 bytes: still incomplete
        let wire = encode_run(9, 1);
        let mut decoder = SampleDecoder::new();
        decoder.push(&wire[..3]);
        assert!(decoder.push(&wire[3..5]).is_empty());
        assert_eq!(decoder.carried(), 5);
        assert_eq!(decoder.push(&wire[5..]), vec![9]);
    }
}
