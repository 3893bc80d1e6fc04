//! Collision-free output naming
//!
//! New files never replace existing ones. When `report.pdf.lockbox` is
//! taken the next candidates are `report.pdf (1).lockbox`,
//! `report.pdf (2).lockbox` and so on, the way file managers name copies.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};

/// First path of the form `dir/base + suffix`, `dir/base (n) + suffix`
/// that does not exist yet.
///
/// A dangling symlink counts as taken.
pub fn resolve(dir: &Path, base: &OsStr, suffix: &OsStr) -> PathBuf {
    let first = dir.join(join_name(base, None, suffix));
    if !is_taken(&first) {
        return first;
    }
    let mut n: u64 = 1;
    loop {
        let candidate = dir.join(join_name(base, Some(n), suffix));
        if !is_taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Destination for encrypting `source`: `<source name><extension>` next to it.
pub fn encrypted_destination(source: &Path, extension: &str) -> PathBuf {
    let name = source.file_name().unwrap_or(source.as_os_str());
    resolve(parent_dir(source), name, OsStr::new(extension))
}

/// Destination for decrypting `artifact`: its name with `extension` removed,
/// numbered before the remaining file extension on collision
/// (`report (1).pdf`).
///
/// A copy number left over from encryption (`report.pdf (1).lockbox`) is
/// dropped first, so numbering restarts from the original name.
pub fn decrypted_destination(artifact: &Path, extension: &str) -> PathBuf {
    let name = artifact.file_name().unwrap_or(artifact.as_os_str());
    let plain_name = strip_copy_number(&strip_extension(name, extension));
    let plain = Path::new(&plain_name);

    match (plain.file_stem(), plain.extension()) {
        (Some(stem), Some(ext)) => {
            let mut suffix = OsString::from(".");
            suffix.push(ext);
            resolve(parent_dir(artifact), stem, &suffix)
        }
        _ => resolve(parent_dir(artifact), &plain_name, OsStr::new("")),
    }
}

fn strip_extension(name: &OsStr, extension: &str) -> OsString {
    if let Some(s) = name.to_str() {
        if let Some(stripped) = s.strip_suffix(extension) {
            if !stripped.is_empty() {
                return OsString::from(stripped);
            }
        }
    }
    name.to_os_string()
}

/// `name (n)` becomes `name`; anything else is returned as is.
fn strip_copy_number(name: &OsStr) -> OsString {
    let stripped = name.to_str().and_then(|s| {
        let inner = s.strip_suffix(')')?;
        let (base, digits) = inner.rsplit_once(" (")?;
        let numbered = !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit());
        (numbered && !base.is_empty()).then_some(base)
    });
    match stripped {
        Some(base) => OsString::from(base),
        None => name.to_os_string(),
    }
}

/// Directory holding `path`, `.` for a bare file name.
pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

fn join_name(base: &OsStr, n: Option<u64>, suffix: &OsStr) -> OsString {
    let mut name = base.to_os_string();
    if let Some(n) = n {
        name.push(format!(" ({})", n));
    }
    name.push(suffix);
    name
}

fn is_taken(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}
