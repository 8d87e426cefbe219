//! Relative-path validation shared by the manifest tree and the builders.
//!
//! §3 reserves `.manifest`, `.xbit`, and `.symlink` as path components that
//! may never appear in a manifest, forbids the byte `\n` anywhere in a
//! path, and (for on-disk builders) forbids any path whose normalized form
//! would resolve outside the implementation root.

use crate::errors::{Error, PathRejection};
use std::path::{Path, PathBuf};

const RESERVED_NAMES: [&str; 3] = [".manifest", ".xbit", ".symlink"];

/// Normalize a path into Unix-style, forward-slash, relative form and
/// validate it against §3's reserved-name/newline rules.
///
/// Does not check root-escape — that depends on a builder's root and is
/// checked separately by `resolve_under_root`.
pub fn validate_relative_path(path: &Path) -> Result<String, Error> {
    let unix_path = to_unix_path(path);

    if unix_path.as_bytes().contains(&b'\n') {
        return Err(Error::InvalidPath {
            path: path.to_path_buf(),
            reason: PathRejection::ContainsNewline,
        });
    }

    for component in unix_path.split('/') {
        if RESERVED_NAMES.contains(&component) {
            let reserved = RESERVED_NAMES
                .iter()
                .find(|&&name| name == component)
                .unwrap();
            return Err(Error::InvalidPath {
                path: path.to_path_buf(),
                reason: PathRejection::ReservedName(reserved),
            });
        }
    }

    Ok(unix_path)
}

/// Translate a native path into `a/b/c` Unix form. Manifest storage is
/// always Unix-style regardless of host platform.
pub fn to_unix_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolve a validated relative path under `root`, rejecting any path whose
/// normalized form would escape it (`..` components, absolute components,
/// or anything that `lexically` walks above `root`).
pub fn resolve_under_root(root: &Path, unix_path: &str) -> Result<PathBuf, Error> {
    let mut resolved = root.to_path_buf();
    let mut depth = 0i64;

    for component in unix_path.split('/').filter(|c| !c.is_empty()) {
        match component {
            "." => continue,
            ".." => {
                depth -= 1;
                if depth < 0 {
                    return Err(Error::InvalidPath {
                        path: PathBuf::from(unix_path),
                        reason: PathRejection::EscapesRoot,
                    });
                }
                resolved.pop();
            }
            other => {
                depth += 1;
                resolved.push(other);
            }
        }
    }

    Ok(resolved)
}

/// Combined validate + resolve, the call builders actually make.
pub fn safe_join(root: &Path, path: &Path) -> Result<(String, PathBuf), Error> {
    let unix_path = validate_relative_path(path)?;
    let resolved = resolve_under_root(root, &unix_path)?;
    Ok((unix_path, resolved))
}
