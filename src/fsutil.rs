//! Filesystem primitives: atomic symlink replacement, symlink resolution,
//! and explicit permission tightening for sensitive files.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Mode for sensitive files: config, logs, the history database.
pub const MODE_SENSITIVE_FILE: u32 = 0o640;
/// Mode for private key material.
pub const MODE_PRIVATE_KEY: u32 = 0o600;
/// Mode for executables and regular directories.
pub const MODE_EXECUTABLE: u32 = 0o750;
/// Mode for shared directories written by multiple releases.
pub const MODE_SHARED_DIR: u32 = 0o770;

/// Atomically repoints a symlink: create `<link>.tmp` pointing at the new
/// target, then rename over the old link. Rename is atomic on a POSIX local
/// filesystem, so readers observe either the old target or the new one and
/// never a broken link.
pub fn update_symlink_atomic(link: &Path, target: &Path) -> std::io::Result<()> {
    let mut tmp = link.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    // A stale temp link may remain from a previously interrupted swap.
    let _ = fs::remove_file(&tmp);

    std::os::unix::fs::symlink(target, &tmp)?;

    if let Err(err) = fs::rename(&tmp, link) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }

    Ok(())
}

/// Follows the entire symlink chain to the final target.
pub fn resolve_symlink(path: &Path) -> std::io::Result<PathBuf> {
    path.canonicalize()
}

/// True only when a symlink exists at `path` (a regular file does not count).
pub fn symlink_exists(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

pub fn dir_exists(path: &Path) -> bool {
    path.is_dir()
}

/// Explicitly chmods a path after creation. File creation modes are subject
/// to the process umask, so sensitive files are re-tightened here.
pub fn set_secure_permissions(path: &Path, mode: u32) -> std::io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}
