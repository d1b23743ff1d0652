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

//! Reconstruction Planner (C4): turns the unordered set of RawMatches the
//! Extent Matcher produced into an ordered Plan that covers `[0, image_size)`
//! exactly once, preferring file sources over embedded image bytes.

use std::path::PathBuf;

/// A validated file<->image extent, as emitted by the Extent Matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMatch {
    pub file_path: PathBuf,
    pub file_start: u64,
    pub file_end: u64,
    pub image_start: u64,
    pub image_end: u64,
}

impl RawMatch {
    pub fn len(&self) -> u64 {
        self.image_end - self.image_start
    }
}

/// Where a Plan entry's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Image,
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub source: Source,
    pub src_start: u64,
    pub src_end: u64,
}

impl PlanEntry {
    pub fn len(&self) -> u64 {
        self.src_end - self.src_start
    }

    fn image(start: u64, end: u64) -> Self {
        PlanEntry {
            source: Source::Image,
            src_start: start,
            src_end: end,
        }
    }
}

pub type Plan = Vec<PlanEntry>;

/// Builds a Plan covering `[0, image_size)` from the accumulated set of RawMatches.
///
/// Matches are sorted by `(image_start asc, image_end desc)` so that, among matches sharing a
/// start, the longest is considered first; shorter matches fully contained within it are then
/// discarded by the sweep below. A match that only partially overlaps the previous one is
/// trimmed at the front rather than dropped, since it still contributes unique image bytes.
pub fn plan_reconstruction(mut matches: Vec<RawMatch>, image_size: u64) -> Plan {
    if image_size == 0 {
        return vec![PlanEntry::image(0, 0)];
    }

    if matches.is_empty() {
        return vec![PlanEntry::image(0, image_size)];
    }

    matches.sort_by(|a, b| {
        a.image_start
            .cmp(&b.image_start)
            .then_with(|| b.image_end.cmp(&a.image_end))
    });

    let mut trimmed: Vec<RawMatch> = Vec::with_capacity(matches.len());
    let mut last_end: u64 = 0;
    for m in matches {
        if m.image_end <= last_end {
            // fully covered by a previous (longer, or equal and earlier) match
            continue;
        }
        let mut m = m;
        if m.image_start < last_end {
            let advance = last_end - m.image_start;
            m.image_start += advance;
            m.file_start += advance;
        }
        last_end = m.image_end;
        trimmed.push(m);
    }

    let mut plan = Vec::with_capacity(trimmed.len() * 2 + 1);
    let mut cursor: u64 = 0;
    for m in &trimmed {
        if cursor < m.image_start {
            plan.push(PlanEntry::image(cursor, m.image_start));
        }
        plan.push(PlanEntry {
            source: Source::File(m.file_path.clone()),
            src_start: m.file_start,
            src_end: m.file_end,
        });
        cursor = m.image_end;
    }
    if cursor < image_size {
        plan.push(PlanEntry::image(cursor, image_size));
    }

    plan
}
