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

//! Script body renderer (A3): produces the text of the POSIX `sh` reconstruction program that
//! gets wrapped into the final artifact by the packager (C6). The body never runs inside this
//! process; it only gets written out as text, so everything here is string assembly.

use anyhow::Result;
use std::collections::HashSet;
use std::fmt::Write as _;

use crate::metadata::ImageInfo;
use crate::offset::OffsetMapper;
use crate::planner::{Plan, Source};
use crate::quote::{shell_quote, shell_quote_path};

/// `dd`'s block size when copying ranges out of `$0` or a source file. Independent of the
/// packager's own `write_chunk_size`, which governs how the Rust side streams the embedded
/// region into the artifact.
const DD_BLOCK_SIZE: u64 = 1024 * 1024;

/// Renders the full reconstruction program text (everything between `script_file="$0"` and the
/// trailing `exit 0` of the wrapper).
pub fn render(plan: &Plan, mapper: &OffsetMapper, info: &ImageInfo) -> Result<String> {
    let mut out = String::new();

    render_header(&mut out, info);
    render_usage(&mut out);
    render_option_parsing(&mut out);
    render_info_mode(&mut out, plan, info);
    render_output_target_selection(&mut out);
    render_copy_helpers(&mut out);
    render_copy_directives(&mut out, plan, mapper)?;
    render_verification(&mut out);
    render_metadata_restoration(&mut out);
    render_finish(&mut out);

    Ok(out)
}

fn render_header(out: &mut String, info: &ImageInfo) {
    writeln!(out, "IMAGE_SIZE={}", info.size).unwrap();
    writeln!(out, "PERMISSIONS={:o}", info.permissions).unwrap();
    writeln!(out, "OWNER={}", shell_quote(&info.owner)).unwrap();
    writeln!(out, "GROUP_NAME={}", shell_quote(&info.group)).unwrap();
    writeln!(out, "MD5={}", shell_quote(&info.md5)).unwrap();
    writeln!(out, "SHA256={}", shell_quote(&info.sha256)).unwrap();
    writeln!(out, "MTIME_EPOCH={}", info.mtime as i64).unwrap();
    match &info.acl {
        Some(acl) => writeln!(out, "ACL_TEXT={}", shell_quote(acl)).unwrap(),
        None => writeln!(out, "ACL_TEXT=").unwrap(),
    }
    writeln!(out).unwrap();
}

fn render_usage(out: &mut String) {
    out.push_str(
        "usage() {\n\
         \tcat <<'USAGE' >&2\n\
         Usage: $0 [-i] [-M] [-S] [-T] [-v] [-o FILE]\n\
         \t-i          print image information and source file list, then exit\n\
         \t-M          skip MD5 verification\n\
         \t-S          skip SHA-256 verification\n\
         \t-T          write through a temporary file, then rename into place\n\
         \t-v          verbose progress messages\n\
         \t-o FILE     write output to FILE instead of stdout\n\
         USAGE\n\
         }\n\n",
    );
}

fn render_option_parsing(out: &mut String) {
    out.push_str(
        "info_mode=0\n\
         skip_md5=0\n\
         skip_sha256=0\n\
         use_tempfile=0\n\
         verbose=0\n\
         output_file=\n\n\
         while getopts \"iMSTvo:h\" opt; do\n\
         \tcase \"$opt\" in\n\
         \t\ti) info_mode=1 ;;\n\
         \t\tM) skip_md5=1 ;;\n\
         \t\tS) skip_sha256=1 ;;\n\
         \t\tT) use_tempfile=1 ;;\n\
         \t\tv) verbose=1 ;;\n\
         \t\to) output_file=\"$OPTARG\" ;;\n\
         \t\th) usage; exit 0 ;;\n\
         \t\t*) usage >&2; exit 1 ;;\n\
         \tesac\n\
         done\n\n",
    );
}

fn render_info_mode(out: &mut String, plan: &Plan, info: &ImageInfo) {
    out.push_str("if [ \"$info_mode\" -eq 1 ]; then\n");
    out.push_str("\techo \"Image Information:\"\n");
    out.push_str("\techo \"  Size: $IMAGE_SIZE bytes\"\n");
    out.push_str("\techo \"  Permissions: $PERMISSIONS\"\n");
    writeln!(
        out,
        "\techo \"  Owner: $OWNER:$GROUP_NAME\""
    )
    .unwrap();
    if !info.md5.is_empty() {
        out.push_str("\techo \"  MD5: $MD5\"\n");
    }
    if !info.sha256.is_empty() {
        out.push_str("\techo \"  SHA256: $SHA256\"\n");
    }
    out.push_str("\tif [ -n \"$ACL_TEXT\" ]; then\n");
    out.push_str("\t\techo \"ACL:\"\n");
    out.push_str("\t\techo \"$ACL_TEXT\"\n");
    out.push_str("\tfi\n");
    out.push_str("\techo \"Source Files:\"\n");
    for path in distinct_source_files(plan) {
        writeln!(out, "\techo {}", shell_quote_path(&path)).unwrap();
    }
    out.push_str("\texit 0\n");
    out.push_str("fi\n\n");
}

fn render_output_target_selection(out: &mut String) {
    out.push_str(
        "if [ -n \"$output_file\" ]; then\n\
         \ttarget_file=\"$output_file\"\n\
         else\n\
         \tif [ -t 1 ]; then\n\
         \t\techo \"Refusing to write image data to a terminal; use -o FILE or redirect stdout\" >&2\n\
         \t\texit 1\n\
         \tfi\n\
         \ttarget_file=/dev/stdout\n\
         fi\n\n\
         if [ \"$use_tempfile\" -eq 1 ] && [ \"$target_file\" != /dev/stdout ]; then\n\
         \ttarget_dir=$(dirname \"$target_file\")\n\
         \ttemp_file=\"$target_dir/.reconstruct.$$\"\n\
         \twrite_target=\"$temp_file\"\n\
         else\n\
         \twrite_target=\"$target_file\"\n\
         fi\n\n\
         : > \"$write_target\"\n\n",
    );
}

fn render_copy_helpers(out: &mut String) {
    writeln!(
        out,
        "copy_from_script() {{\n\
         \tdd if=\"$script_file\" of=\"$write_target\" bs={block} \\\n\
         \t\tiflag=skip_bytes,count_bytes skip=$((data_offset + $1)) count=\"$2\" \\\n\
         \t\toflag=append conv=notrunc 2>/dev/null\n\
         }}\n\n\
         copy_from_file() {{\n\
         \tdd if=\"$1\" of=\"$write_target\" bs={block} \\\n\
         \t\tiflag=skip_bytes,count_bytes skip=\"$2\" count=\"$3\" \\\n\
         \t\toflag=append conv=notrunc 2>/dev/null\n\
         }}\n\n",
        block = DD_BLOCK_SIZE,
    )
    .unwrap();
}

fn render_copy_directives(out: &mut String, plan: &Plan, mapper: &OffsetMapper) -> Result<()> {
    out.push_str("[ \"$verbose\" -eq 1 ] && echo \"Reconstructing image...\" >&2\n\n");
    for entry in plan {
        let length = entry.len();
        if length == 0 {
            continue;
        }
        match &entry.source {
            Source::Image => {
                let concatenated_offset = mapper.map(entry.src_start)?;
                writeln!(out, "copy_from_script {} {}", concatenated_offset, length).unwrap();
            }
            Source::File(path) => {
                writeln!(
                    out,
                    "copy_from_file {} {} {}",
                    shell_quote_path(path),
                    entry.src_start,
                    length
                )
                .unwrap();
            }
        }
    }
    out.push('\n');
    Ok(())
}

fn render_verification(out: &mut String) {
    out.push_str(
        "bytes_written=$(wc -c < \"$write_target\")\n\
         if [ \"$bytes_written\" -ne \"$IMAGE_SIZE\" ]; then\n\
         \techo \"Reconstruction failed: expected $IMAGE_SIZE bytes, got $bytes_written\" >&2\n\
         \texit 1\n\
         fi\n\
         echo \"Successfully reconstructed: $bytes_written bytes\" >&2\n\n\
         if [ \"$skip_md5\" -ne 1 ] && [ -n \"$MD5\" ]; then\n\
         \t[ \"$verbose\" -eq 1 ] && echo \"Verifying MD5 hash...\" >&2\n\
         \tif command -v md5sum >/dev/null 2>&1; then\n\
         \t\tactual_md5=$(md5sum < \"$write_target\" | cut -d' ' -f1)\n\
         \telse\n\
         \t\tactual_md5=$(md5 -q \"$write_target\")\n\
         \tfi\n\
         \tif [ \"$actual_md5\" != \"$MD5\" ]; then\n\
         \t\techo \"MD5 verification failed: expected $MD5, got $actual_md5\" >&2\n\
         \t\texit 1\n\
         \tfi\n\
         \t[ \"$verbose\" -eq 1 ] && echo \"MD5 verification passed\" >&2\n\
         fi\n\n\
         if [ \"$skip_sha256\" -ne 1 ] && [ -n \"$SHA256\" ]; then\n\
         \t[ \"$verbose\" -eq 1 ] && echo \"Verifying SHA-256 hash...\" >&2\n\
         \tif command -v sha256sum >/dev/null 2>&1; then\n\
         \t\tactual_sha256=$(sha256sum < \"$write_target\" | cut -d' ' -f1)\n\
         \telse\n\
         \t\tactual_sha256=$(shasum -a 256 \"$write_target\" | cut -d' ' -f1)\n\
         \tfi\n\
         \tif [ \"$actual_sha256\" != \"$SHA256\" ]; then\n\
         \t\techo \"SHA-256 verification failed: expected $SHA256, got $actual_sha256\" >&2\n\
         \t\texit 1\n\
         \tfi\n\
         \t[ \"$verbose\" -eq 1 ] && echo \"SHA-256 verification passed\" >&2\n\
         fi\n\n",
    );
}

fn render_metadata_restoration(out: &mut String) {
    out.push_str(
        "if [ \"$target_file\" != /dev/stdout ]; then\n\
         \techo \"Restore permissions\" >&2\n\
         \tchmod \"$PERMISSIONS\" \"$write_target\" || echo \"warning: chmod failed\" >&2\n\n\
         \tif [ \"$(id -u)\" -eq 0 ]; then\n\
         \t\techo \"Restore ownership\" >&2\n\
         \t\tchown \"$OWNER:$GROUP_NAME\" \"$write_target\" || echo \"warning: chown failed\" >&2\n\
         \telse\n\
         \t\techo \"warning: not running as root, skipping ownership restore\" >&2\n\
         \tfi\n\n\
         \techo \"Restore timestamps\" >&2\n\
         \tif ! touch -d \"@$MTIME_EPOCH\" \"$write_target\" 2>/dev/null; then\n\
         \t\ttouch_arg=$(date -r \"$MTIME_EPOCH\" +%Y%m%d%H%M.%S 2>/dev/null) || true\n\
         \t\tif [ -n \"$touch_arg\" ]; then\n\
         \t\t\ttouch -t \"$touch_arg\" \"$write_target\" || echo \"warning: touch failed\" >&2\n\
         \t\tfi\n\
         \tfi\n\n\
         \tif [ -n \"$ACL_TEXT\" ]; then\n\
         \t\tif command -v setfacl >/dev/null 2>&1 && command -v getfacl >/dev/null 2>&1; then\n\
         \t\t\techo \"Restore ACL\" >&2\n\
         \t\t\tacl_tmp=$(mktemp)\n\
         \t\t\tprintf '%s\\n' \"$ACL_TEXT\" > \"$acl_tmp\"\n\
         \t\t\tsetfacl --restore=\"$acl_tmp\" || echo \"warning: ACL restore failed\" >&2\n\
         \t\t\trm -f \"$acl_tmp\"\n\
         \t\telse\n\
         \t\t\techo \"warning: getfacl/setfacl not found, skipping ACL restore\" >&2\n\
         \t\tfi\n\
         \tfi\n\
         fi\n\n",
    );
}

fn render_finish(out: &mut String) {
    out.push_str(
        "if [ \"$use_tempfile\" -eq 1 ] && [ \"$target_file\" != /dev/stdout ]; then\n\
         \techo \"Move temp file to final location\" >&2\n\
         \tmv \"$temp_file\" \"$target_file\"\n\
         fi\n",
    );
}

/// Distinct non-IMAGE source paths in the Plan, in order of first appearance.
fn distinct_source_files(plan: &Plan) -> Vec<std::path::PathBuf> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for entry in plan {
        if let Source::File(path) = &entry.source {
            if seen.insert(path.clone()) {
                out.push(path.clone());
            }
        }
    }
    out
}
