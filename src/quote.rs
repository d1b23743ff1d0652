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

//! POSIX `sh` single-quoting, used everywhere a path or other untrusted string is rendered into
//! the reconstruction program body.

use std::path::Path;

/// Wraps `s` in single quotes, escaping embedded single quotes as `'"'"'` so the result is safe
/// to splice into a POSIX `sh` command line. Every other byte, including newlines, backslashes,
/// and non-UTF8-adjacent punctuation, survives literally inside single quotes.
pub fn shell_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\"'\"'");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Shell-quotes a path's display form. Non-UTF8 paths are lossily converted; the reconstruction
/// program only ever needs to echo the path back, not round-trip arbitrary bytes through it.
pub fn shell_quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}
