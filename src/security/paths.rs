use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("failed to resolve path '{}': {source}", .path.display())]
    Canonicalize {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("path traversal detected: target '{}' is outside base '{}'", .target.display(), .base.display())]
    Traversal { base: PathBuf, target: PathBuf },
    #[error("path must be absolute: {}", .0.display())]
    NotAbsolute(PathBuf),
    #[error("path contains traversal elements: {}", .0.display())]
    ContainsTraversal(PathBuf),
}

/// Resolves both paths to their canonical form (following symlinks) and
/// fails unless `target` is contained within `base`. Returns the canonical
/// target path.
pub fn sanitize_path_for_symlink(base: &Path, target: &Path) -> Result<PathBuf, PathError> {
    let clean_base = base.canonicalize().map_err(|source| PathError::Canonicalize {
        path: base.to_path_buf(),
        source,
    })?;
    let clean_target = target
        .canonicalize()
        .map_err(|source| PathError::Canonicalize {
            path: target.to_path_buf(),
            source,
        })?;

    if !clean_target.starts_with(&clean_base) {
        return Err(PathError::Traversal {
            base: clean_base,
            target: clean_target,
        });
    }

    Ok(clean_target)
}

/// Validates a path is absolute and free of `..` components, without
/// touching the filesystem.
pub fn sanitize_path(path: &Path) -> Result<PathBuf, PathError> {
    if !path.is_absolute() {
        return Err(PathError::NotAbsolute(path.to_path_buf()));
    }
    if path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(PathError::ContainsTraversal(path.to_path_buf()));
    }

    // Normalize away `.` components.
    let cleaned: PathBuf = path
        .components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect();
    Ok(cleaned)
}
