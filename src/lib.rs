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

//! Library half of the reconstruction-script generator: hashing and indexing the source image,
//! matching candidate files against it, planning the covering sequence, and packaging the
//! self-extracting artifact. `main.rs` is a thin driver over these modules.

pub mod cmdline;
pub mod errors;
pub mod fileio;
pub mod hash;
pub mod index;
pub mod matcher;
pub mod metadata;
pub mod offset;
pub mod planner;
pub mod quote;
pub mod script;
pub mod util;
