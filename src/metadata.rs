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

//! Metadata collector (A2): builds the `ImageInfo` record rendered verbatim into the
//! reconstruction program. The core matcher/planner/packager only ever look at `size`; everything
//! else here exists purely to be echoed back by the emitted script.

use anyhow::{Context, Result};
use nix::unistd::{Gid, Group, Uid, User};
use openssl::hash::{Hasher, MessageDigest};
use std::fs::File;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::thread;

use crate::runcmd_output;
use crate::util;

/// Metadata about the image file, rendered verbatim into the reconstruction program by the
/// script body renderer. Only `size` is consumed by the core pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    pub size: u64,
    pub permissions: u32,
    pub uid: u32,
    pub gid: u32,
    pub owner: String,
    pub group: String,
    pub atime: f64,
    pub mtime: f64,
    pub ctime: f64,
    pub md5: String,
    pub sha256: String,
    pub acl: Option<String>,
}

pub struct CollectConfig {
    pub skip_acl: bool,
}

/// Collects the full `ImageInfo` for `image_path`: `stat()`, owner/group name resolution, the
/// two digest passes (run concurrently, see below), and a best-effort ACL capture.
pub fn collect(image_path: &Path, config: &CollectConfig) -> Result<ImageInfo> {
    let meta = std::fs::metadata(image_path)
        .with_context(|| format!("statting {:?}", image_path))?;

    let uid = meta.uid();
    let gid = meta.gid();
    let owner = resolve_owner(uid);
    let group = resolve_group(gid);

    // The only mandated concurrency in the system: two independent read-only passes over the
    // image computing MD5 and SHA-256, joined before returning.
    let (md5, sha256) = thread::scope(|scope| -> Result<(String, String)> {
        let md5_handle = scope.spawn(|| digest_file(image_path, MessageDigest::md5()));
        let sha256_handle = scope.spawn(|| digest_file(image_path, MessageDigest::sha256()));
        let md5 = md5_handle.join().expect("md5 digest thread panicked")?;
        let sha256 = sha256_handle
            .join()
            .expect("sha256 digest thread panicked")?;
        Ok((md5, sha256))
    })?;

    let acl = if config.skip_acl {
        None
    } else {
        capture_acl(image_path)
    };

    Ok(ImageInfo {
        size: meta.len(),
        permissions: meta.mode() & 0o7777,
        uid,
        gid,
        owner,
        group,
        atime: meta.atime() as f64 + meta.atime_nsec() as f64 / 1e9,
        mtime: meta.mtime() as f64 + meta.mtime_nsec() as f64 / 1e9,
        ctime: meta.ctime() as f64 + meta.ctime_nsec() as f64 / 1e9,
        md5,
        sha256,
        acl,
    })
}

fn resolve_owner(uid: u32) -> String {
    match User::from_uid(Uid::from_raw(uid)) {
        Ok(Some(user)) => user.name,
        _ => String::new(),
    }
}

fn resolve_group(gid: u32) -> String {
    match Group::from_gid(Gid::from_raw(gid)) {
        Ok(Some(group)) => group.name,
        _ => String::new(),
    }
}

/// Hashes the whole of `path` with `digest`, hinting the kernel for sequential access.
fn digest_file(path: &Path, digest: MessageDigest) -> Result<String> {
    let mut f = File::open(path).with_context(|| format!("opening {:?} for digesting", path))?;

    if unsafe { libc::posix_fadvise(f.as_raw_fd(), 0, 0, libc::POSIX_FADV_SEQUENTIAL) } < 0 {
        eprintln!(
            "posix_fadvise(SEQUENTIAL) failed on {:?} -- ignoring",
            path
        );
    }

    let mut hasher = Hasher::new(digest).context("creating hasher")?;
    io::copy(&mut f, &mut hasher).with_context(|| format!("digesting {:?}", path))?;
    let bytes = hasher.finish().context("finishing digest")?;
    Ok(hex::encode(bytes.as_ref()))
}

/// Best-effort `getfacl` capture; returns `None` if the tool is missing or the filesystem
/// doesn't support ACLs, never a fatal error.
fn capture_acl(path: &Path) -> Option<String> {
    if !util::tool_on_path("getfacl") {
        return None;
    }
    runcmd_output!("getfacl", "-p", path).ok()
}
