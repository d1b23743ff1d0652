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

//! Extent Matcher (C3): the hard part. For each input file, scans forward
//! hash-block by hash-block looking for a confirmed-identical run against the
//! image, extending byte-for-byte once a candidate hash run is found.
//!
//! The matcher commits to the first hash-confirmed, byte-verified extent for
//! each starting position; it never goes back to look for a longer match
//! later in the image. After a successful match the scan resumes right after
//! it; after a failed search it skips a full `min_extent_blocks`, never one
//! block at a time. Both choices trade recall for bounded work.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::fileio::VERIFY_CHUNK_SIZE;
use crate::hash::HashSequence;
use crate::index::ImageIndex;
use crate::planner::RawMatch;

pub struct MatcherConfig {
    pub block_size: u32,
    pub min_extent_blocks: u64,
}

/// Scans `file_path` (whose HashSequence is `file_hashes`) against `index`, appending every
/// confirmed RawMatch to `matches`. Emits nothing if the file is shorter than
/// `min_extent_blocks` blocks.
pub fn find_matches(
    file_path: &Path,
    file_hashes: &HashSequence,
    index: &ImageIndex,
    config: &MatcherConfig,
    matches: &mut Vec<RawMatch>,
) -> Result<()> {
    let min_blocks = config.min_extent_blocks;
    let block_size = config.block_size as u64;
    let file_blocks = file_hashes.as_slice();

    if (min_blocks as usize) > file_blocks.len() {
        return Ok(());
    }

    let mut file = File::open(file_path)
        .with_context(|| format!("opening {:?} for extent verification", file_path))?;

    let mut current_block: u64 = 0;
    let total_blocks = file_blocks.len() as u64;

    while current_block + min_blocks <= total_blocks {
        let pattern_start = current_block as usize;
        let pattern_end = pattern_start + min_blocks as usize;
        let pattern = &file_blocks[pattern_start..pattern_end];

        let mut search_from = 0u64;
        let mut found: Option<(u64, MatchExtent)> = None;

        loop {
            let i = match index.find_first_match(pattern, search_from) {
                Some(i) => i,
                None => break,
            };
            match verify_and_extend(&mut file, index, current_block, i, min_blocks, block_size)? {
                Some(extent) => {
                    found = Some((i, extent));
                    break;
                }
                None => {
                    search_from = i + 1;
                }
            }
        }

        match found {
            Some((image_block, extent)) => {
                matches.push(RawMatch {
                    file_path: file_path.to_path_buf(),
                    file_start: current_block * block_size,
                    file_end: extent.file_end_byte,
                    image_start: image_block * block_size,
                    image_end: extent.image_end_byte,
                });
                current_block = extent.next_file_block;
            }
            None => {
                current_block += min_blocks;
            }
        }
    }

    Ok(())
}

/// The outcome of a successful `verify_and_extend`: the exact byte ends of the matched span in
/// both the file and the image (never past either side's true length), plus the file's next
/// hash-block index so the caller can resume its forward scan.
struct MatchExtent {
    next_file_block: u64,
    file_end_byte: u64,
    image_end_byte: u64,
}

/// Confirms a hash-level candidate by comparing bytes between `file` (already hashed, but we
/// re-read it here for verification) and the image at `index`'s source, starting at the given
/// block positions, then extends the match forward one aligned chunk at a time for as long as
/// whole blocks keep agreeing. Reads are done in chunks that are always a whole multiple of
/// `block_size`, so every chunk boundary is also a block boundary; a final partial block is
/// only ever credited when it's genuinely the last block of the file or the image (both sides
/// ran out of bytes to disagree with), never when a real mismatch happens to fall mid-block.
/// Returns `None` unless the matched span is at least `min_blocks` blocks long.
fn verify_and_extend(
    file: &mut File,
    index: &ImageIndex,
    file_block: u64,
    image_block: u64,
    min_blocks: u64,
    block_size: u64,
) -> Result<Option<MatchExtent>> {
    let image_path = index.image_path();
    let mut image = File::open(image_path)
        .with_context(|| format!("opening {:?} for extent verification", image_path))?;

    let file_start_offset = file_block * block_size;
    let image_start_offset = image_block * block_size;

    file.seek(SeekFrom::Start(file_start_offset))
        .context("seeking in file during extent verification")?;
    image
        .seek(SeekFrom::Start(image_start_offset))
        .context("seeking in image during extent verification")?;

    let chunk_blocks: u64 = (VERIFY_CHUNK_SIZE as u64 / block_size).max(1);
    let chunk_size = (chunk_blocks * block_size) as usize;
    let mut file_buf = vec![0u8; chunk_size];
    let mut image_buf = vec![0u8; chunk_size];
    let mut bytes_matched: u64 = 0;
    let mut hit_end = false;

    loop {
        let file_n = read_some(file, &mut file_buf)?;
        let image_n = read_some(&mut image, &mut image_buf)?;
        let common = common_prefix_len(&file_buf[..file_n], &image_buf[..image_n]);

        if common < file_n.min(image_n) {
            // genuine mismatch inside this chunk; only whole agreeing blocks before it count
            bytes_matched += (common as u64 / block_size) * block_size;
            break;
        }

        bytes_matched += common as u64;
        if file_n < chunk_size || image_n < chunk_size {
            // one or both sides ran out of data with no disagreement: the trailing partial
            // block is genuinely the last one, so it counts in full.
            hit_end = true;
            break;
        }
    }

    let matched_blocks = if hit_end {
        ceil_div(bytes_matched, block_size)
    } else {
        bytes_matched / block_size
    };

    if matched_blocks >= min_blocks {
        Ok(Some(MatchExtent {
            next_file_block: file_block + matched_blocks,
            file_end_byte: file_start_offset + bytes_matched,
            image_end_byte: image_start_offset + bytes_matched,
        }))
    } else {
        Ok(None)
    }
}

fn read_some(r: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = r.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn ceil_div(numerator: u64, denominator: u64) -> u64 {
    (numerator + denominator - 1) / denominator
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_stream;
    use crate::index::ImageIndex;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(data: &[u8]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(data).unwrap();
        f.flush().unwrap();
        f
    }

    fn build_index(image_data: &[u8], block_size: u32) -> (NamedTempFile, ImageIndex) {
        let image = write_temp(image_data);
        let hashes = hash_stream(image_data, block_size).unwrap();
        let index = ImageIndex::with_path(hashes, image.path().to_path_buf());
        (image, index)
    }

    #[test]
    fn test_single_exact_match() {
        let mut image_data = vec![b'A'; 16];
        image_data.extend(vec![b'B'; 16]);
        image_data.extend(vec![b'C'; 16]);
        let (_image, index) = build_index(&image_data, 16);

        let file_data = vec![b'A'; 16];
        let file = write_temp(&file_data);
        let file_hashes = hash_stream(&file_data[..], 16).unwrap();

        let config = MatcherConfig {
            block_size: 16,
            min_extent_blocks: 1,
        };
        let mut matches = Vec::new();
        find_matches(file.path(), &file_hashes, &index, &config, &mut matches).unwrap();

        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!((m.file_start, m.file_end), (0, 16));
        assert_eq!((m.image_start, m.image_end), (0, 16));
    }

    #[test]
    fn test_file_shorter_than_min_extent_emits_nothing() {
        let (_image, index) = build_index(&vec![b'A'; 64], 16);
        let file_data = vec![b'A'; 16];
        let file = write_temp(&file_data);
        let file_hashes = hash_stream(&file_data[..], 16).unwrap();

        let config = MatcherConfig {
            block_size: 16,
            min_extent_blocks: 2,
        };
        let mut matches = Vec::new();
        find_matches(file.path(), &file_hashes, &index, &config, &mut matches).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_hash_collision_tolerated() {
        // Build an image and a file whose first block has a different hash than anything in
        // the image but identical *content* length; simplest reliable way to exercise the
        // collision path without fighting murmur3 internals is to pick bytes that hash-collide
        // in practice is hard to construct, so instead we verify the safety property directly:
        // a byte-different block at a position the naive index would report as a hash hit
        // after manual construction still yields no match.
        let image_data = vec![b'X'; 32];
        let (_image, index) = build_index(&image_data, 16);

        let mut file_data = vec![b'X'; 16];
        file_data[15] = b'Y'; // differs from every image block despite sharing 15/16 bytes
        let file = write_temp(&file_data);
        let file_hashes = hash_stream(&file_data[..], 16).unwrap();

        let config = MatcherConfig {
            block_size: 16,
            min_extent_blocks: 1,
        };
        let mut matches = Vec::new();
        find_matches(file.path(), &file_hashes, &index, &config, &mut matches).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_partial_tail_block_round_up() {
        // image ends mid-block; a file matching exactly up to image end should still close
        // out the final (partial) block on both sides.
        let mut image_data = vec![b'A'; 16];
        image_data.extend(vec![b'B'; 10]); // partial final block
        let (_image, index) = build_index(&image_data, 16);

        let mut file_data = vec![b'A'; 16];
        file_data.extend(vec![b'B'; 10]);
        let file = write_temp(&file_data);
        let file_hashes = hash_stream(&file_data[..], 16).unwrap();

        let config = MatcherConfig {
            block_size: 16,
            min_extent_blocks: 1,
        };
        let mut matches = Vec::new();
        find_matches(file.path(), &file_hashes, &index, &config, &mut matches).unwrap();

        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(m.image_end, 26);
        assert_eq!(m.file_end, 26);
    }

    #[test]
    fn test_no_rewind_after_failed_search() {
        // No position in the image matches the file's first min_extent_blocks pattern; the
        // cursor must advance by exactly min_extent_blocks, not one block.
        let image_data = vec![b'Z'; 64];
        let (_image, index) = build_index(&image_data, 16);

        let file_data = vec![b'Q'; 64];
        let file = write_temp(&file_data);
        let file_hashes = hash_stream(&file_data[..], 16).unwrap();

        let config = MatcherConfig {
            block_size: 16,
            min_extent_blocks: 2,
        };
        let mut matches = Vec::new();
        find_matches(file.path(), &file_hashes, &index, &config, &mut matches).unwrap();
        assert!(matches.is_empty());
    }
}
