//! Streaming XOR chunk
//!
//! Timestamps are encoded delta-of-delta with a variable-length selector,
//! values as XOR against the previous value with leading/trailing-zero
//! windows. Appends encode immediately, so a chunk is always in a
//! readable state and cloning it yields a consistent snapshot.

use super::bitstream::{BitReader, BitWriter};
use crate::types::Sample;

/// A compressed append-only chunk of samples.
///
/// Timestamps must be appended in non-decreasing order.
#[derive(Debug, Clone, Default)]
pub struct XorChunk {
    stream: BitWriter,
    count: usize,

    // Timestamp state
    prev_t: i64,
    prev_delta: i64,

    // Value state
    prev_v_bits: u64,
    leading: u32,
    trailing: u32,
}

impl XorChunk {
    /// Create an empty chunk
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample
    pub fn append(&mut self, t: i64, v: f64) {
        if self.count == 0 {
            self.stream.write_bits(t as u64, 64);
            self.stream.write_bits(v.to_bits(), 64);
            self.prev_t = t;
            self.prev_v_bits = v.to_bits();
        } else {
            self.append_timestamp(t);
            self.append_value(v);
        }
        self.count += 1;
    }

    /// Number of samples in the chunk
    pub fn num_samples(&self) -> usize {
        self.count
    }

    /// Encoded bytes, including the partial tail byte
    pub fn bytes(&self) -> &[u8] {
        self.stream.bytes()
    }

    /// Iterate over a snapshot of the chunk
    pub fn iter(&self) -> XorIter {
        XorIter::new(self.stream.bytes().to_vec(), self.count)
    }

    fn append_timestamp(&mut self, t: i64) {
        let delta = t - self.prev_t;
        let dod = delta - self.prev_delta;

        // Regular scrape intervals make the delta-of-delta zero almost
        // always, so it gets the one-bit encoding.
        if dod == 0 {
            self.stream.write_bit(false);
        } else if (-63..=64).contains(&dod) {
            self.stream.write_bits(0b10, 2);
            self.stream.write_bits((dod + 63) as u64, 7);
        } else if (-255..=256).contains(&dod) {
            self.stream.write_bits(0b110, 3);
            self.stream.write_bits((dod + 255) as u64, 9);
        } else if (-2047..=2048).contains(&dod) {
            self.stream.write_bits(0b1110, 4);
            self.stream.write_bits((dod + 2047) as u64, 12);
        } else {
            self.stream.write_bits(0b1111, 4);
            self.stream.write_bits(dod as u64, 64);
        }

        self.prev_delta = delta;
        self.prev_t = t;
    }

    fn append_value(&mut self, v: f64) {
        let v_bits = v.to_bits();
        let xor = v_bits ^ self.prev_v_bits;
        self.prev_v_bits = v_bits;

        if xor == 0 {
            self.stream.write_bit(false);
            return;
        }
        self.stream.write_bit(true);

        // The leading-zero count is stored in 5 bits, so cap it at 31.
        let leading = xor.leading_zeros().min(31);
        let trailing = xor.trailing_zeros();

        let window_set = self.leading > 0 || self.trailing > 0;
        if window_set && leading >= self.leading && trailing >= self.trailing {
            // Meaningful bits fit the previous window.
            self.stream.write_bit(false);
            let meaningful = 64 - self.leading - self.trailing;
            self.stream
                .write_bits(xor >> self.trailing, meaningful as usize);
        } else {
            self.stream.write_bit(true);
            self.stream.write_bits(leading as u64, 5);

            // 64 meaningful bits cannot be told apart from 0 in 6 bits;
            // 0 never occurs, so it stands in for 64.
            let meaningful = 64 - leading - trailing;
            self.stream.write_bits((meaningful & 0x3f) as u64, 6);
            self.stream.write_bits(xor >> trailing, meaningful as usize);

            self.leading = leading;
            self.trailing = trailing;
        }
    }
}

/// Decoding iterator over a chunk snapshot
#[derive(Debug, Clone)]
pub struct XorIter {
    reader: BitReader,
    total: usize,
    read: usize,

    prev_t: i64,
    prev_delta: i64,
    prev_v_bits: u64,
    leading: u32,
    trailing: u32,
}

impl XorIter {
    pub(crate) fn new(data: Vec<u8>, total: usize) -> Self {
        Self {
            reader: BitReader::new(data),
            total,
            read: 0,
            prev_t: 0,
            prev_delta: 0,
            prev_v_bits: 0,
            leading: 0,
            trailing: 0,
        }
    }

    fn next_timestamp(&mut self) -> Option<i64> {
        let dod = if !self.reader.read_bit()? {
            0
        } else if !self.reader.read_bit()? {
            self.reader.read_bits(7)? as i64 - 63
        } else if !self.reader.read_bit()? {
            self.reader.read_bits(9)? as i64 - 255
        } else if !self.reader.read_bit()? {
            self.reader.read_bits(12)? as i64 - 2047
        } else {
            self.reader.read_bits(64)? as i64
        };

        self.prev_delta += dod;
        self.prev_t += self.prev_delta;
        Some(self.prev_t)
    }

    fn next_value(&mut self) -> Option<f64> {
        if !self.reader.read_bit()? {
            return Some(f64::from_bits(self.prev_v_bits));
        }

        if self.reader.read_bit()? {
            // New window.
            self.leading = self.reader.read_bits(5)? as u32;
            let mut meaningful = self.reader.read_bits(6)? as u32;
            if meaningful == 0 {
                meaningful = 64;
            }
            self.trailing = 64 - self.leading - meaningful;
        }

        let meaningful = 64 - self.leading - self.trailing;
        let bits = self.reader.read_bits(meaningful as usize)?;
        self.prev_v_bits ^= bits << self.trailing;
        Some(f64::from_bits(self.prev_v_bits))
    }
}

impl Iterator for XorIter {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        if self.read >= self.total {
            return None;
        }

        if self.read == 0 {
            self.prev_t = self.reader.read_bits(64)? as i64;
            self.prev_v_bits = self.reader.read_bits(64)?;
            self.read = 1;
            return Some(Sample::new(self.prev_t, f64::from_bits(self.prev_v_bits)));
        }

        let t = self.next_timestamp()?;
        let v = self.next_value()?;
        self.read += 1;
        Some(Sample::new(t, v))
    }
}
