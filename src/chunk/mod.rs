//! Compressed chunk storage for samples
//!
//! Implements the XOR/delta-of-delta compression family from Facebook's
//! Gorilla paper, restructured for streaming appends: samples are
//! encoded as they arrive and the chunk can be snapshotted for reading
//! at any time.

mod bitstream;
mod xor;

pub use bitstream::{BitReader, BitWriter};
pub use xor::{XorChunk, XorIter};
