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

//! Small streaming-I/O helpers shared by the hasher, matcher, and packager.
//! None of these buffer more than a fixed-size chunk: images in this crate's
//! domain can be tens of GiB.

use anyhow::{bail, Result};
use std::io::{ErrorKind, Read, Write};

// The default BufReader/BufWriter buffer size is 8 KiB, which isn't large
// enough to fully amortize system call overhead.
// https://github.com/rust-lang/rust/issues/49921
// https://github.com/coreutils/coreutils/blob/6a3d2883/src/ioblksize.h
pub const BUFFER_SIZE: usize = 256 * 1024;

/// Chunk size used by the extent matcher's byte-for-byte verification pass.
pub const VERIFY_CHUNK_SIZE: usize = 64 * 1024;

/// Like `std::io::copy()`, but limits the number of bytes copied and reuses a caller-supplied
/// buffer instead of allocating one per call.
pub fn copy_n(
    reader: &mut (impl Read + ?Sized),
    writer: &mut (impl Write + ?Sized),
    mut n: u64,
    buf: &mut [u8],
) -> Result<u64> {
    let mut written = 0;
    loop {
        if n == 0 {
            return Ok(written);
        }
        let bufn = if n < (buf.len() as u64) {
            &mut buf[..n as usize]
        } else {
            &mut *buf
        };
        let len = match reader.read(bufn) {
            Ok(0) => return Ok(written),
            Ok(len) => len,
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        assert!(len as u64 <= n);
        writer.write_all(&bufn[..len])?;
        written += len as u64;
        n -= len as u64;
    }
}

/// Like `copy_n()`, but errors if the number of bytes copied is less than expected (a premature
/// EOF partway through a planned segment is always a fatal error in this crate).
pub fn copy_exactly_n(
    reader: &mut (impl Read + ?Sized),
    writer: &mut (impl Write + ?Sized),
    n: u64,
    buf: &mut [u8],
) -> Result<u64> {
    let bytes_copied = copy_n(reader, writer, n, buf)?;
    if bytes_copied != n {
        bail!(
            "expected to copy {} bytes but instead copied {} bytes",
            n,
            bytes_copied
        );
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_n() {
        let mut sink = std::io::sink();
        let mut buf = [0u8; 50];

        let data = [0u8; 30];
        assert_eq!(copy_n(&mut &data[..], &mut sink, 0, &mut buf).unwrap(), 0);
        assert_eq!(copy_n(&mut &data[..], &mut sink, 1, &mut buf).unwrap(), 1);
        assert_eq!(copy_n(&mut &data[..], &mut sink, 29, &mut buf).unwrap(), 29);
        // reader is shorter than requested n
        assert_eq!(copy_n(&mut &data[..], &mut sink, 31, &mut buf).unwrap(), 30);
    }

    #[test]
    fn test_copy_exactly_n_short_read() {
        let mut sink = std::io::sink();
        let mut buf = [0u8; 50];
        let data = [0u8; 10];
        assert!(copy_exactly_n(&mut &data[..], &mut sink, 11, &mut buf).is_err());
    }

    #[test]
    fn test_copy_exactly_n_small_buffer() {
        // exercise the chunked path where buf is smaller than n
        let mut out = Vec::new();
        let mut buf = [0u8; 4];
        let data: Vec<u8> = (0..20u8).collect();
        let n = copy_exactly_n(&mut &data[..], &mut out, 20, &mut buf).unwrap();
        assert_eq!(n, 20);
        assert_eq!(out, data);
    }
}
