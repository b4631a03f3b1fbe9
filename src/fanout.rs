//! Download-directory fan-out: which subdirectory a staged file lives in.
//!
//! The hash must match the one the scheduler and file servers use, or jobs
//! will reference files they cannot find.

use std::io;
use std::path::{Path, PathBuf};

/// Subdirectory name for `name`: hex digits 1..8 of md5(name), taken as an
/// integer, modulo `fanout`, written in lowercase hex.
pub fn filename_hash(name: &str, fanout: u32) -> String {
    let d = md5::compute(name.as_bytes()).0;
    let n = (u32::from(d[0] & 0x0f) << 24)
        | (u32::from(d[1]) << 16)
        | (u32::from(d[2]) << 8)
        | u32::from(d[3]);
    format!("{:x}", n % fanout.max(1))
}

/// Path of `name` in the fanned-out tree under `root`, creating the bucket
/// directory if needed.
pub async fn dir_hier_path(name: &str, root: &Path, fanout: u32) -> io::Result<PathBuf> {
    let dir = root.join(filename_hash(name, fanout));
    tokio::fs::create_dir_all(&dir).await?;
    Ok(dir.join(name))
}
