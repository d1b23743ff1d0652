// Copyright 2019 CoreOS, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Block Hasher (C1): turns a byte stream into a sequence of 32-bit
//! MurmurHash3 values, one per fixed-size block. The hash is purely a
//! candidate filter; collisions are expected and are resolved downstream by
//! byte verification, never treated as errors here.

use anyhow::{Context, Result};
use std::io::Read;

/// One block's MurmurHash3 x86_32 digest, seed 0, read as unsigned.
pub type Hash = u32;

/// The ordered hash of every block of a stream, including a possibly-short final block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashSequence {
    hashes: Vec<Hash>,
    block_size: u32,
    stream_len: u64,
}

impl HashSequence {
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn as_slice(&self) -> &[Hash] {
        &self.hashes
    }

    /// Total length in bytes of the stream this was hashed from.
    pub fn stream_len(&self) -> u64 {
        self.stream_len
    }
}

/// Hashes `reader` in `block_size`-byte blocks, emitting `ceil(len/block_size)` hashes. The final
/// block may be shorter than `block_size`; it is hashed over exactly the bytes read.
pub fn hash_stream(mut reader: impl Read, block_size: u32) -> Result<HashSequence> {
    assert!(block_size > 0, "block_size must be > 0");

    let mut hashes = Vec::new();
    // buf is exactly one block so a short read at EOF is unambiguous.
    let mut buf = vec![0u8; block_size as usize];
    let mut stream_len: u64 = 0;

    loop {
        let n = read_fill(&mut reader, &mut buf).context("reading block")?;
        if n == 0 {
            break;
        }
        let hash = murmur3_x86_32(&buf[..n]);
        hashes.push(hash);
        stream_len += n as u64;
        if n < buf.len() {
            // short read means EOF was reached mid-block
            break;
        }
    }

    Ok(HashSequence {
        hashes,
        block_size,
        stream_len,
    })
}

/// Reads until `buf` is full or the stream ends, returning the number of bytes read. Unlike
/// `Read::read`, this loops past short reads that aren't EOF (as regular files never return
/// those, but pipes can).
fn read_fill(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = reader.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

/// MurmurHash3 x86_32, seed 0, treated as unsigned.
fn murmur3_x86_32(data: &[u8]) -> Hash {
    murmur3::murmur3_32(&mut &data[..], 0).expect("hashing an in-memory slice cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_count() {
        let data = vec![0u8; 4096 * 3 + 10];
        let seq = hash_stream(&data[..], 4096).unwrap();
        assert_eq!(seq.len(), 4);
        assert_eq!(seq.stream_len(), data.len() as u64);
    }

    #[test]
    fn test_exact_multiple() {
        let data = vec![1u8; 4096 * 2];
        let seq = hash_stream(&data[..], 4096).unwrap();
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn test_empty_stream() {
        let seq = hash_stream(&b""[..], 4096).unwrap();
        assert_eq!(seq.len(), 0);
        assert_eq!(seq.stream_len(), 0);
    }

    #[test]
    fn test_same_bytes_same_hash() {
        let a = hash_stream(&vec![0x42u8; 4096][..], 4096).unwrap();
        let b = hash_stream(&vec![0x42u8; 4096][..], 4096).unwrap();
        assert_eq!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn test_different_bytes_likely_different_hash() {
        let a = hash_stream(&vec![0x41u8; 4096][..], 4096).unwrap();
        let b = hash_stream(&vec![0x42u8; 4096][..], 4096).unwrap();
        assert_ne!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn test_partial_final_block_differs_from_padded() {
        // A short final block must not hash the same as if it were zero-padded to a full block.
        let short = hash_stream(&vec![0xffu8; 10][..], 4096).unwrap();
        let mut padded = vec![0xffu8; 10];
        padded.resize(4096, 0);
        let full = hash_stream(&padded[..], 4096).unwrap();
        assert_ne!(short.as_slice(), full.as_slice());
    }
}
