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

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{BufWriter, Write};

use librebuild::cmdline::{self, Cmd};
use librebuild::hash::hash_stream;
use librebuild::index::ImageIndex;
use librebuild::matcher::{self, MatcherConfig};
use librebuild::metadata::{self, CollectConfig};
use librebuild::offset::OffsetMapper;
use librebuild::planner::{self, RawMatch};
use librebuild::script::{self, PackConfig};

fn main() -> Result<()> {
    let cmd = Cmd::parse();
    run(cmd)
}

fn run(cmd: Cmd) -> Result<()> {
    let min_extent_blocks = cmd.min_extent_blocks()?;
    let image_path = &cmd.image;

    eprintln!("Hashing {} ...", image_path);
    let image_file =
        File::open(image_path).with_context(|| format!("opening image {:?}", image_path))?;
    let image_hashes = hash_stream(&image_file, cmd.block_size)
        .with_context(|| format!("hashing image {:?}", image_path))?;
    let index = ImageIndex::with_path(image_hashes, std::path::PathBuf::from(image_path));

    let cwd = std::env::current_dir().context("getting current working directory")?;
    let list_source = cmdline::open_file_list_source(&cmd.input)?;
    let entries = cmdline::read_file_list(list_source, cmd.null)?;

    let matcher_config = MatcherConfig {
        block_size: cmd.block_size,
        min_extent_blocks,
    };
    let mut matches: Vec<RawMatch> = Vec::new();
    for entry in &entries {
        let path = cmdline::validate_entry(entry, &cwd)?;
        eprintln!("Matching {} ...", path.display());
        let file = File::open(&path).with_context(|| format!("opening {:?}", path))?;
        let file_hashes =
            hash_stream(&file, cmd.block_size).with_context(|| format!("hashing {:?}", path))?;
        matcher::find_matches(&path, &file_hashes, &index, &matcher_config, &mut matches)
            .with_context(|| format!("matching {:?}", path))?;
    }

    eprintln!("Planning reconstruction ...");
    let plan = planner::plan_reconstruction(matches, index.image_len());
    let mapper = OffsetMapper::from_plan(&plan);

    eprintln!("Collecting image metadata ...");
    let info = metadata::collect(
        image_path.as_ref(),
        &CollectConfig {
            skip_acl: cmd.skip_acl,
        },
    )?;

    let pack_config = PackConfig {
        write_chunk_size: cmd.write_chunk_size,
    };

    eprintln!("Writing reconstruction script ...");
    match &cmd.output {
        Some(path) => {
            let f = File::create(path).with_context(|| format!("creating {:?}", path))?;
            let mut out = BufWriter::new(f);
            script::pack(
                &plan,
                &mapper,
                image_path.as_ref(),
                &info,
                &pack_config,
                &mut out,
            )?;
            out.flush().context("flushing output file")?;
        }
        None => {
            check_stdout_destination(atty_stdout(), cmd.force_terminal_output)?;
            let stdout = std::io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            script::pack(
                &plan,
                &mapper,
                image_path.as_ref(),
                &info,
                &pack_config,
                &mut out,
            )?;
            out.flush().context("flushing stdout")?;
        }
    }

    Ok(())
}

fn atty_stdout() -> bool {
    unsafe { libc::isatty(libc::STDOUT_FILENO) != 0 }
}

/// Refuses a binary-tailed script destined for an interactive terminal unless the caller opted
/// in with `--force-terminal-output`. Split out from `run()`'s `None =>` arm so the refusal logic
/// can be exercised without a real tty.
fn check_stdout_destination(is_terminal: bool, force: bool) -> Result<()> {
    if is_terminal && !force {
        anyhow::bail!(
            "refusing to write a binary-tailed script to a terminal; \
             use -o FILE, redirect stdout, or pass --force-terminal-output"
        );
    }
    Ok(())
}
