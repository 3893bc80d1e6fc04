//! Zero-overwrite of plaintext files before deletion
//!
//! A single pass of zeros over the file's existing bytes. This is basic
//! hygiene only: journaling filesystems, copy-on-write snapshots and SSD
//! wear-leveling can all keep older copies of the data.

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use fd_lock::RwLock;
use tracing::debug;

use crate::error::{ErrorCategory, ErrorKind, LockboxError, Result};

const WIPE_BUF_LEN: usize = 64 * 1024;

/// Overwrite every byte of the file at `path` with zeros.
///
/// The file is never truncated, so its length afterwards equals its length
/// before. Fails with `ResourceBusy` if another handle holds a lock on it.
pub fn wipe(path: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(path)
        .map_err(|e| LockboxError::from_io(format!("failed to stat {}", path.display()), e))?;
    if !meta.is_file() {
        return Err(LockboxError::with_kind(
            ErrorCategory::User,
            ErrorKind::InvalidTarget,
            format!("{} is not a regular file", path.display()),
        ));
    }

    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| LockboxError::from_io(format!("failed to open {}", path.display()), e))?;
    let mut lock = RwLock::new(file);
    let mut guard = lock
        .try_write()
        .map_err(|e| LockboxError::from_io(format!("{} is in use", path.display()), e))?;

    let len = guard
        .metadata()
        .map_err(|e| LockboxError::from_io(format!("failed to stat {}", path.display()), e))?
        .len();

    let write_err =
        |e| LockboxError::from_io(format!("failed to overwrite {}", path.display()), e);

    guard.seek(SeekFrom::Start(0)).map_err(write_err)?;
    let zeros = [0u8; WIPE_BUF_LEN];
    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(WIPE_BUF_LEN as u64) as usize;
        guard.write_all(&zeros[..n]).map_err(write_err)?;
        remaining -= n as u64;
    }
    guard.flush().map_err(write_err)?;
    guard.sync_all().map_err(write_err)?;

    debug!(path = %path.display(), bytes = len, "overwrote file with zeros");
    Ok(())
}

/// [`wipe`] the file, then unlink it.
pub fn wipe_and_remove(path: &Path) -> Result<()> {
    wipe(path)?;
    fs::remove_file(path)
        .map_err(|e| LockboxError::from_io(format!("failed to remove {}", path.display()), e))?;
    debug!(path = %path.display(), "removed wiped file");
    Ok(())
}
