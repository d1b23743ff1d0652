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

//! Structured error kinds the core needs to distinguish programmatically. Everything else in
//! the crate propagates through `anyhow::Error`; these two are internal-invariant violations
//! wrapped in `thiserror` only because callers (and their tests) match on the kind, not just the
//! message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("offset {0} does not fall within any embedded segment")]
    OffsetNotMapped(u64),

    #[error("reconstruction program placeholder not found in wrapper")]
    PlaceholderMissing,
}
