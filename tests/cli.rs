// Copyright 2020 CoreOS, Inc.
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

//! End-to-end run of the full reconstruction pipeline: a file list is read exactly as the
//! binary reads it, matched against an image, planned, and packed, then the packed artifact is
//! checked for a patched `data_offset=` placeholder and an embedded region sized to the Plan's
//! IMAGE byte total.

use std::fs;
use std::io::Cursor;

use librebuild::cmdline::{read_file_list, validate_entry};
use librebuild::hash::hash_stream;
use librebuild::index::ImageIndex;
use librebuild::matcher::{self, MatcherConfig};
use librebuild::metadata::{self, CollectConfig};
use librebuild::offset::OffsetMapper;
use librebuild::planner::{self, RawMatch};
use librebuild::script::{self, PackConfig};

const BLOCK_SIZE: u32 = 16;

#[test]
fn test_full_pipeline_patches_offset_and_sizes_embedded_region() {
    let dir = tempfile::tempdir().unwrap();

    let mut image_data = Vec::new();
    image_data.extend(vec![b'A'; 16]);
    image_data.extend(vec![b'B'; 16]);
    image_data.extend(vec![b'C'; 16]);
    image_data.extend(vec![b'D'; 16]);
    let image_path = dir.path().join("image.raw");
    fs::write(&image_path, &image_data).unwrap();

    // Matches the image's two middle blocks; the two outer blocks stay embedded in the script.
    let mut file_data = Vec::new();
    file_data.extend(vec![b'B'; 16]);
    file_data.extend(vec![b'C'; 16]);
    let candidate_path = dir.path().join("candidate.bin");
    fs::write(&candidate_path, &file_data).unwrap();

    let file_list = read_file_list(Cursor::new(b"candidate.bin\n".to_vec()), false).unwrap();
    assert_eq!(file_list, vec!["candidate.bin"]);

    let image_file = fs::File::open(&image_path).unwrap();
    let image_hashes = hash_stream(&image_file, BLOCK_SIZE).unwrap();
    let index = ImageIndex::with_path(image_hashes, image_path.clone());

    let matcher_config = MatcherConfig {
        block_size: BLOCK_SIZE,
        min_extent_blocks: 1,
    };
    let mut matches: Vec<RawMatch> = Vec::new();
    for entry in &file_list {
        let path = validate_entry(entry, dir.path()).unwrap();
        let file = fs::File::open(&path).unwrap();
        let hashes = hash_stream(&file, BLOCK_SIZE).unwrap();
        matcher::find_matches(&path, &hashes, &index, &matcher_config, &mut matches).unwrap();
    }
    assert_eq!(matches.len(), 1, "expected exactly one matched extent");

    let plan = planner::plan_reconstruction(matches, image_data.len() as u64);
    let mapper = OffsetMapper::from_plan(&plan);
    assert_eq!(mapper.embedded_len(), 32, "the two unmatched blocks stay embedded");

    let info = metadata::collect(&image_path, &CollectConfig { skip_acl: true }).unwrap();
    let pack_config = PackConfig {
        write_chunk_size: 16,
    };

    let mut out = Vec::new();
    script::pack(&plan, &mapper, &image_path, &info, &pack_config, &mut out).unwrap();

    let marker = b"data_offset=";
    let marker_at = out
        .windows(marker.len())
        .position(|w| w == marker)
        .expect("data_offset= marker present in packed output");
    let digits_start = marker_at + marker.len();
    let digits: String = out[digits_start..digits_start + 20]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .map(|b| *b as char)
        .collect();
    assert_ne!(
        digits, "00000000000000000000",
        "placeholder must be patched with the real wrapper length"
    );
    let data_offset: usize = digits.parse().unwrap();

    let embedded = &out[data_offset..];
    assert_eq!(embedded.len() as u64, mapper.embedded_len());
    assert_eq!(embedded, &[vec![b'A'; 16], vec![b'D'; 16]].concat()[..]);
}
