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

//! Script Packager (C6): assembles the final self-extracting artifact out of the wrapper
//! prologue, the rendered reconstruction program, and the concatenated embedded-bytes region.

mod body;

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::errors::CoreError;
use crate::fileio::copy_exactly_n;
use crate::metadata::ImageInfo;
use crate::offset::OffsetMapper;
use crate::planner::Plan;

/// Width, in ASCII digits, of the `data_offset=` placeholder. Fixed so the wrapper's total byte
/// length never changes between measurement and patching.
const PLACEHOLDER_WIDTH: usize = 20;
const PLACEHOLDER: &str = "00000000000000000000";

pub struct PackConfig {
    /// Chunk size used when streaming each IMAGE segment's bytes from the source image into the
    /// artifact.
    pub write_chunk_size: usize,
}

/// Writes the complete artifact (wrapper + reconstruction program + embedded image bytes) to
/// `sink`.
pub fn pack(
    plan: &Plan,
    mapper: &OffsetMapper,
    image_path: &Path,
    info: &ImageInfo,
    config: &PackConfig,
    sink: &mut impl Write,
) -> Result<()> {
    let program = body::render(plan, mapper, info)?;

    let mut wrapper = String::new();
    wrapper.push_str("#!/bin/sh\n");
    wrapper.push_str("set -e\n");
    wrapper.push_str("data_offset=");
    wrapper.push_str(PLACEHOLDER);
    wrapper.push('\n');
    wrapper.push_str("script_file=\"$0\"\n");
    wrapper.push_str(&program);
    wrapper.push('\n');
    wrapper.push_str("exit 0\n");

    let data_offset = wrapper.len() as u64;
    let patched = patch_placeholder(&wrapper, data_offset)?;

    sink.write_all(patched.as_bytes())
        .context("writing wrapper and reconstruction program")?;

    let mut image =
        File::open(image_path).with_context(|| format!("opening {:?}", image_path))?;
    let mut buf = vec![0u8; config.write_chunk_size.max(1)];
    for (start, end) in mapper.ranges() {
        if start == end {
            continue;
        }
        image
            .seek(SeekFrom::Start(start))
            .with_context(|| format!("seeking to image offset {}", start))?;
        copy_exactly_n(&mut image, sink, end - start, &mut buf)
            .with_context(|| format!("copying embedded image range [{}, {})", start, end))?;
    }

    sink.flush().context("flushing packaged artifact")?;
    Ok(())
}

/// Replaces the first occurrence of the placeholder with `value`, left-justified and padded with
/// trailing spaces to `PLACEHOLDER_WIDTH` characters, preserving the wrapper's total byte length.
/// A legitimate copy of the placeholder string inside the reconstruction program body (e.g. in a
/// comment) is left untouched, since it can only ever appear after the header's occurrence.
fn patch_placeholder(wrapper: &str, value: u64) -> Result<String> {
    let idx = wrapper
        .find(PLACEHOLDER)
        .ok_or(CoreError::PlaceholderMissing)?;

    let digits = value.to_string();
    if digits.len() > PLACEHOLDER_WIDTH {
        anyhow::bail!(
            "embedded region offset {} does not fit in {} digits",
            value,
            PLACEHOLDER_WIDTH
        );
    }
    let mut padded = digits;
    padded.push_str(&" ".repeat(PLACEHOLDER_WIDTH - padded.len()));

    let mut out = String::with_capacity(wrapper.len());
    out.push_str(&wrapper[..idx]);
    out.push_str(&padded);
    out.push_str(&wrapper[idx + PLACEHOLDER.len()..]);
    Ok(out)
}
