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

//! Command line parsing (A1) and the file-list reading / path-validation logic that sits
//! between argument parsing and the reconstruction pipeline.

use anyhow::{bail, Context, Result};
use clap::{AppSettings, Parser};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};

// Args are listed in --help in the order declared here.
// Please keep the entire help text to 80 columns.

#[derive(Debug, Parser)]
#[clap(version)]
#[clap(global_setting(AppSettings::DeriveDisplayOrder))]
#[clap(help_expected = true)]
pub struct Cmd {
    /// Image file to reconstruct
    #[clap(value_name = "IMAGE")]
    pub image: String,

    /// Block size for the content hash index, in bytes
    #[clap(short = 'b', long, value_name = "BYTES", default_value = "4096")]
    pub block_size: u32,

    /// Minimum length of a matched extent, in bytes (must be a multiple of --block-size)
    #[clap(short = 'm', long, value_name = "BYTES", default_value = "1048576")]
    pub min_extent_size: u64,

    /// Chunk size used when streaming embedded image bytes into the artifact
    #[clap(long, value_name = "BYTES", default_value = "16777216")]
    pub write_chunk_size: usize,

    /// Write the generated script to FILE instead of stdout
    #[clap(short, long, value_name = "FILE")]
    pub output: Option<String>,

    /// Read the candidate file list from FILE instead of stdin
    #[clap(short, long, value_name = "FILE")]
    pub input: Option<String>,

    /// File list is NUL-separated instead of newline-separated
    #[clap(short = '0', long)]
    pub null: bool,

    /// Permit writing the (binary-tailed) script to an interactive terminal
    #[clap(long)]
    pub force_terminal_output: bool,

    /// Don't invoke getfacl when collecting image metadata
    #[clap(long)]
    pub skip_acl: bool,
}

impl Cmd {
    /// `min_extent_size` expressed in whole blocks; fails if it isn't an exact multiple of
    /// `block_size`.
    pub fn min_extent_blocks(&self) -> Result<u64> {
        if self.block_size == 0 {
            bail!("--block-size must be nonzero");
        }
        let block_size = self.block_size as u64;
        if self.min_extent_size % block_size != 0 {
            bail!(
                "--min-extent-size ({}) must be a multiple of --block-size ({})",
                self.min_extent_size,
                block_size
            );
        }
        Ok(self.min_extent_size / block_size)
    }
}

/// Reads the candidate file list from `reader`, splitting on NUL bytes if `null_separated`,
/// otherwise on newlines. Blank entries are skipped.
pub fn read_file_list(reader: impl Read, null_separated: bool) -> Result<Vec<String>> {
    let mut buf = BufReader::new(reader);
    let mut entries = Vec::new();
    if null_separated {
        let mut raw = Vec::new();
        buf.read_to_end(&mut raw).context("reading file list")?;
        for piece in raw.split(|b| *b == 0) {
            if piece.is_empty() {
                continue;
            }
            let s = std::str::from_utf8(piece)
                .context("file list entry is not valid UTF-8")?
                .to_string();
            entries.push(s);
        }
    } else {
        for line in buf.lines() {
            let line = line.context("reading file list")?;
            if line.is_empty() {
                continue;
            }
            entries.push(line);
        }
    }
    Ok(entries)
}

/// Opens the file list source named by `-i`/`--input`, or stdin if absent.
pub fn open_file_list_source(input: &Option<String>) -> Result<Box<dyn Read>> {
    match input {
        Some(path) => {
            let f = File::open(path).with_context(|| format!("opening file list {:?}", path))?;
            Ok(Box::new(f))
        }
        None => Ok(Box::new(std::io::stdin())),
    }
}

/// Validates that `entry`, resolved against `cwd`, is an existing regular file that doesn't
/// escape the current working directory tree: no `..` components that climb above `cwd`, and
/// no absolute path pointing outside it. Violations are fatal, not silently skipped.
pub fn validate_entry(entry: &str, cwd: &Path) -> Result<PathBuf> {
    let candidate = Path::new(entry);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        cwd.join(candidate)
    };

    let mut depth: i64 = 0;
    for component in joined.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::ParentDir => depth -= 1,
            Component::RootDir | Component::Prefix(_) => depth = 0,
            Component::CurDir => {}
        }
        if depth < 0 {
            bail!("{:?} escapes the current working directory tree", entry);
        }
    }

    if !joined.starts_with(cwd) {
        bail!("{:?} escapes the current working directory tree", entry);
    }

    let meta =
        std::fs::symlink_metadata(&joined).with_context(|| format!("statting {:?}", entry))?;
    if !meta.file_type().is_file() {
        bail!("{:?} is not a regular file", entry);
    }

    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_min_extent_blocks_exact_multiple() {
        let cmd = Cmd {
            image: "img".into(),
            block_size: 4096,
            min_extent_size: 4096 * 8,
            write_chunk_size: 1024,
            output: None,
            input: None,
            null: false,
            force_terminal_output: false,
            skip_acl: false,
        };
        assert_eq!(cmd.min_extent_blocks().unwrap(), 8);
    }

    #[test]
    fn test_min_extent_blocks_rejects_non_multiple() {
        let cmd = Cmd {
            image: "img".into(),
            block_size: 4096,
            min_extent_size: 4097,
            write_chunk_size: 1024,
            output: None,
            input: None,
            null: false,
            force_terminal_output: false,
            skip_acl: false,
        };
        assert!(cmd.min_extent_blocks().is_err());
    }

    #[test]
    fn test_read_file_list_newline_separated() {
        let input = Cursor::new(b"a/b\nc/d\n\ne/f".to_vec());
        let entries = read_file_list(input, false).unwrap();
        assert_eq!(entries, vec!["a/b", "c/d", "e/f"]);
    }

    #[test]
    fn test_read_file_list_null_separated() {
        let input = Cursor::new(b"a/b\0c/d\0\0e/f\0".to_vec());
        let entries = read_file_list(input, true).unwrap();
        assert_eq!(entries, vec!["a/b", "c/d", "e/f"]);
    }

    #[test]
    fn test_validate_entry_rejects_parent_escape() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_entry("../escaped", dir.path()).unwrap_err();
        assert!(err.to_string().contains("escapes"));
    }

    #[test]
    fn test_validate_entry_accepts_file_within_tree() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("sub").join("file.txt");
        std::fs::create_dir_all(file_path.parent().unwrap()).unwrap();
        std::fs::write(&file_path, b"hi").unwrap();

        let resolved = validate_entry("sub/file.txt", dir.path()).unwrap();
        assert_eq!(resolved, file_path);
    }

    #[test]
    fn test_validate_entry_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let err = validate_entry("sub", dir.path()).unwrap_err();
        assert!(err.to_string().contains("not a regular file"));
    }

    #[test]
    fn test_validate_entry_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_entry("nope", dir.path()).is_err());
    }
}
