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

//! Offset Mapper (C5): maps an image-byte offset that falls within one of the
//! Plan's IMAGE segments to its offset in the concatenated embedded-data
//! region. Segment counts are O(matches) -- dozens to thousands -- so binary
//! search is preferred over a per-byte table, which would be infeasible for
//! multi-GiB images.

use anyhow::Result;

use crate::errors::CoreError;
use crate::planner::{Plan, PlanEntry, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    image_start: u64,
    image_end: u64,
    cumulative_offset: u64,
}

pub struct OffsetMapper {
    segments: Vec<Segment>,
}

impl OffsetMapper {
    /// Builds the mapper from the IMAGE-sourced entries of a Plan, in appearance order.
    pub fn from_plan(plan: &Plan) -> Self {
        let mut segments = Vec::new();
        let mut cumulative_offset = 0u64;
        for entry in plan {
            if matches!(entry.source, Source::Image) {
                segments.push(Segment {
                    image_start: entry.src_start,
                    image_end: entry.src_end,
                    cumulative_offset,
                });
                cumulative_offset += entry.len();
            }
        }
        Self { segments }
    }

    /// Total length of the concatenated embedded-data region.
    pub fn embedded_len(&self) -> u64 {
        self.segments
            .last()
            .map(|s| s.cumulative_offset + (s.image_end - s.image_start))
            .unwrap_or(0)
    }

    /// Maps `image_offset` (which must lie within some IMAGE segment) to its offset in the
    /// concatenated embedded-data region.
    pub fn map(&self, image_offset: u64) -> Result<u64> {
        let idx = match self
            .segments
            .binary_search_by(|s| s.image_start.cmp(&image_offset))
        {
            Ok(i) => i,
            Err(0) => return Err(CoreError::OffsetNotMapped(image_offset).into()),
            Err(i) => i - 1,
        };
        let seg = &self.segments[idx];
        if image_offset < seg.image_start || image_offset >= seg.image_end {
            return Err(CoreError::OffsetNotMapped(image_offset).into());
        }
        Ok(seg.cumulative_offset + (image_offset - seg.image_start))
    }

    /// The IMAGE segments in Plan order, as `(image_start, image_end)` pairs -- used by the
    /// packager to know what ranges of the original image file to stream into the embedded
    /// region.
    pub fn ranges(&self) -> Vec<(u64, u64)> {
        self.segments
            .iter()
            .map(|s| (s.image_start, s.image_end))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn plan_entry_image(start: u64, end: u64) -> PlanEntry {
        PlanEntry {
            source: Source::Image,
            src_start: start,
            src_end: end,
        }
    }

    fn file_entry(path: &str, start: u64, end: u64) -> PlanEntry {
        PlanEntry {
            source: Source::File(PathBuf::from(path)),
            src_start: start,
            src_end: end,
        }
    }

    #[test]
    fn test_single_segment() {
        let plan = vec![plan_entry_image(0, 100)];
        let mapper = OffsetMapper::from_plan(&plan);
        assert_eq!(mapper.map(0).unwrap(), 0);
        assert_eq!(mapper.map(99).unwrap(), 99);
        assert!(mapper.map(100).is_err());
        assert_eq!(mapper.embedded_len(), 100);
    }

    #[test]
    fn test_multiple_segments_with_file_gaps() {
        let plan = vec![
            plan_entry_image(0, 100),
            file_entry("f", 0, 200),
            plan_entry_image(300, 1000),
        ];
        let mapper = OffsetMapper::from_plan(&plan);
        assert_eq!(mapper.map(0).unwrap(), 0);
        assert_eq!(mapper.map(99).unwrap(), 99);
        assert_eq!(mapper.map(300).unwrap(), 100);
        assert_eq!(mapper.map(999).unwrap(), 799);
        assert!(mapper.map(150).is_err(), "150 falls in the file-sourced gap");
        assert_eq!(mapper.embedded_len(), 100 + 700);
    }

    #[test]
    fn test_monotonicity() {
        let plan = vec![
            plan_entry_image(0, 50),
            file_entry("f", 0, 10),
            plan_entry_image(60, 120),
        ];
        let mapper = OffsetMapper::from_plan(&plan);
        let points: Vec<u64> = vec![0, 10, 49, 60, 61, 119];
        for w in points.windows(2) {
            let a = mapper.map(w[0]).unwrap();
            let b = mapper.map(w[1]).unwrap();
            assert!(a <= b, "map not monotonic: {} -> {}, {} -> {}", w[0], a, w[1], b);
        }
    }

    #[test]
    fn test_no_segments() {
        let mapper = OffsetMapper::from_plan(&vec![]);
        assert_eq!(mapper.embedded_len(), 0);
        assert!(mapper.map(0).is_err());
    }

    #[test]
    fn test_miss_is_matchable_as_core_error() {
        let plan = vec![plan_entry_image(0, 100)];
        let mapper = OffsetMapper::from_plan(&plan);
        let err = mapper.map(150).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::OffsetNotMapped(150))
        ));
    }
}
