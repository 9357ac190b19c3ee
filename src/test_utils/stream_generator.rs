//! Synthetic counter streams for testing
//!
//! Generates the byte stream a correct device would produce, cut into
//! receive-sized chunks, with optional single-sample corruption for
//! negative tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use ft245_validator_lib::test_utils::StreamGenerator;
//!
//! let mut gen = StreamGenerator::starting_at(1000);
//!
//! // 64 samples delivered in 13-byte pieces, straddling sample boundaries
//! let chunks = gen.chunks(64, &[13]);
//!
//! // 16 samples where sample 5 is off by one
//! let corrupt = gen.corrupted_chunk(16, 5, 1);
//! ```

use crate::sample::{encode_run, encode_sample, SAMPLE_WIDTH};

/// Produces consecutive counter samples and slices them into chunks
#[derive(Debug, Clone)]
pub struct StreamGenerator {
    next: u64,
}

impl Default for StreamGenerator {
    fn default() -> Self {
        Self::starting_at(0)
    }
}

impl StreamGenerator {
    /// Start the stream at `first`
    pub fn starting_at(first: u64) -> Self {
        Self { next: first }
    }

    /// Next value the generator will emit
    pub fn next_value(&self) -> u64 {
        self.next
    }

    /// Emit `count` samples as one contiguous buffer
    pub fn run(&mut self, count: usize) -> Vec<u8> {
        let bytes = encode_run(self.next, count);
        self.next = self.next.wrapping_add(count as u64);
        bytes
    }

    /// Emit `count` samples, one sample per chunk
    pub fn one_per_chunk(&mut self, count: usize) -> Vec<Vec<u8>> {
        (0..count).map(|_| self.run(1)).collect()
    }

    /// Emit `count` samples cut into chunks whose sizes cycle through `sizes`
    ///
    /// Sizes are in bytes and need not be multiples of the sample width. The
    /// last chunk holds whatever remains.
    pub fn chunks(&mut self, count: usize, sizes: &[usize]) -> Vec<Vec<u8>> {
        let stream = self.run(count);
        split_cycling(&stream, sizes)
    }

    /// Emit `count` samples in one chunk with sample `index` shifted by `delta`
    pub fn corrupted_chunk(&mut self, count: usize, index: usize, delta: u64) -> Vec<u8> {
        let start = self.next;
        let mut bytes = self.run(count);
        if index < count {
            let value = start.wrapping_add(index as u64).wrapping_add(delta);
            let offset = index * SAMPLE_WIDTH;
            bytes[offset..offset + SAMPLE_WIDTH].copy_from_slice(&encode_sample(value));
        }
        bytes
    }

    /// Skip `count` values, as if the link dropped them
    pub fn skip(&mut self, count: u64) {
        self.next = self.next.wrapping_add(count);
    }
}

/// Split `bytes` into pieces whose sizes cycle through `sizes`
///
/// Zero sizes are skipped; an empty or all-zero `sizes` yields one chunk.
pub fn split_cycling(bytes: &[u8], sizes: &[usize]) -> Vec<Vec<u8>> {
    let sizes: Vec<usize> = sizes.iter().copied().filter(|&s| s > 0).collect();
    if sizes.is_empty() {
        return vec![bytes.to_vec()];
    }

    let mut chunks = Vec::new();
    let mut rest = bytes;
    let mut i = 0;
    while !rest.is_empty() {
        let take = sizes[i % sizes.len()].min(rest.len());
        chunks.push(rest[..take].to_vec());
        rest = &rest[take..];
        i += 1;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::decode_sample;

    #[test]
    fn test_run_advances() {
        let mut gen = StreamGenerator::starting_at(10);
        assert_eq!(gen.run(3).len(), 24);
        assert_eq!(gen.next_value(), 13);
    }

    #[test]
    fn test_chunks_reassemble() {
        let mut gen = StreamGenerator::default();
        let chunks = gen.chunks(10, &[13, 5]);
        assert_eq!(chunks[0].len(), 13);
        assert_eq!(chunks[1].len(), 5);

        let joined: Vec<u8> = chunks.concat();
        assert_eq!(joined, encode_run(0, 10));
    }

    #[test]
    fn test_corrupted_chunk() {
        let mut gen = StreamGenerator::starting_at(100);
        let bytes = gen.corrupted_chunk(8, 5, 1);
        let values: Vec<u64> = bytes
            .chunks_exact(SAMPLE_WIDTH)
            .filter_map(decode_sample)
            .collect();
        assert_eq!(values, vec![100, 101, 102, 103, 104, 106, 106, 107]);
    }

    #[test]
    fn test_split_cycling_degenerate_sizes() {
        assert_eq!(split_cycling(&[1, 2, 3], &[]), vec![vec![1, 2, 3]]);
        assert_eq!(split_cycling(&[1, 2, 3], &[0]), vec![vec![1, 2, 3]]);
        assert!(split_cycling(&[], &[4]).is_empty());
    }
}
