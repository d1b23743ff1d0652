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

//! Image Index (C2): holds the image's HashSequence in memory and answers
//! "where's the next run of blocks matching this pattern" queries for the
//! Extent Matcher. No persistence across runs; a correct naive scan is all
//! that's required.

use std::path::{Path, PathBuf};

use crate::hash::{Hash, HashSequence};

pub struct ImageIndex {
    hashes: HashSequence,
    image_path: PathBuf,
}

impl ImageIndex {
    /// Builds an index with no backing file path; only usable for pure hash-sequence queries
    /// (tests, or callers that track the image path separately).
    pub fn new(hashes: HashSequence) -> Self {
        Self {
            hashes,
            image_path: PathBuf::new(),
        }
    }

    /// Builds an index that also remembers the image file it was hashed from, so the Extent
    /// Matcher can reopen it for byte-level verification without threading the path through
    /// every call.
    pub fn with_path(hashes: HashSequence, image_path: PathBuf) -> Self {
        Self { hashes, image_path }
    }

    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    pub fn block_size(&self) -> u32 {
        self.hashes.block_size()
    }

    pub fn block_count(&self) -> usize {
        self.hashes.len()
    }

    pub fn image_len(&self) -> u64 {
        self.hashes.stream_len()
    }

    /// Returns the smallest `i >= from` such that `image_hashes[i..i+pattern.len()] == pattern`,
    /// or `None` if no such position exists. `pattern` must be non-empty.
    pub fn find_first_match(&self, pattern: &[Hash], from: u64) -> Option<u64> {
        assert!(!pattern.is_empty());
        let image = self.hashes.as_slice();
        let m = pattern.len();
        if m > image.len() {
            return None;
        }
        let from = from as usize;
        let last_start = image.len() - m;
        for i in from..=last_start {
            if image[i..i + m] == *pattern {
                return Some(i as u64);
            }
        }
        None
    }
}
