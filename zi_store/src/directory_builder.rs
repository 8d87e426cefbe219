//! Builds a real directory tree on disk (§4.2, §9).

use crate::builder::{Builder, ForwardOnlyBuilder};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use zi_core::errors::Error;
use zi_core::path_safety::safe_join;

#[cfg(unix)]
mod platform {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use zi_core::errors::Error;

    pub fn set_executable(path: &Path, executable: bool) -> Result<(), Error> {
        let mut perms = fs::metadata(path)?.permissions();
        let mode = if executable { 0o755 } else { 0o644 };
        perms.set_mode(mode);
        fs::set_permissions(path, perms)?;
        Ok(())
    }

    pub fn symlink(target: &str, link: &Path) -> Result<(), Error> {
        std::os::unix::fs::symlink(target, link)?;
        Ok(())
    }
}

#[cfg(not(unix))]
mod platform {
    use std::path::Path;
    use zi_core::errors::Error;

    pub fn set_executable(_path: &Path, _executable: bool) -> Result<(), Error> {
        Ok(())
    }

    pub fn symlink(_target: &str, _link: &Path) -> Result<(), Error> {
        Err(Error::NotSupported {
            message: "symlinks are not supported on this platform".to_string(),
        })
    }
}

/// Where a builder is allowed to hardlink source files from, when the
/// caller opts into hardlinking instead of copying (§9 resolves this as a
/// single configurable root rather than an implicit global allowlist).
#[derive(Debug, Clone)]
pub struct AllowedHardlinkRoot(pub PathBuf);

/// Writes entries directly under a root directory on disk.
pub struct DirectoryBuilder {
    root: PathBuf,
    hardlink_root: Option<AllowedHardlinkRoot>,
}

impl DirectoryBuilder {
    pub fn new(root: PathBuf) -> Result<Self, Error> {
        fs::create_dir_all(&root)?;
        Ok(DirectoryBuilder { root, hardlink_root: None })
    }

    pub fn with_hardlink_root(mut self, root: AllowedHardlinkRoot) -> Self {
        self.hardlink_root = Some(root);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ForwardOnlyBuilder for DirectoryBuilder {
    fn add_directory(&mut self, path: &str) -> Result<(), Error> {
        let (_, dest) = safe_join(&self.root, Path::new(path))?;
        fs::create_dir_all(dest)?;
        Ok(())
    }

    fn add_file(&mut self, path: &str, executable: bool) -> Result<Box<dyn Write + '_>, Error> {
        let (_, dest) = safe_join(&self.root, Path::new(path))?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&dest)?;
        platform::set_executable(&dest, executable)?;
        Ok(Box::new(file))
    }

    fn add_symlink(&mut self, path: &str, target: &str) -> Result<(), Error> {
        let (_, dest) = safe_join(&self.root, Path::new(path))?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        platform::symlink(target, &dest)
    }

    /// Hardlink `source` into the tree at `path` instead of copying its
    /// bytes, if `source` lives under the allowed hardlink root.
    fn add_hardlink(&mut self, path: &str, source: &Path) -> Result<(), Error> {
        let allowed = self.hardlink_root.as_ref().ok_or_else(|| Error::NotSupported {
            message: "hardlinking is not enabled for this builder".to_string(),
        })?;
        if !source.starts_with(&allowed.0) {
            return Err(Error::UnauthorizedAccess {
                message: format!(
                    "refusing to hardlink from '{}', outside allowed root '{}'",
                    source.display(),
                    allowed.0.display()
                ),
            });
        }
        let (_, dest) = safe_join(&self.root, Path::new(path))?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::hard_link(source, &dest)?;
        Ok(())
    }
}

impl Builder for DirectoryBuilder {
    fn rename(&mut self, source: &str, destination: &str) -> Result<(), Error> {
        let (_, from) = safe_join(&self.root, Path::new(source))?;
        let (_, to) = safe_join(&self.root, Path::new(destination))?;
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&from, &to)?;
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<(), Error> {
        let (_, dest) = safe_join(&self.root, Path::new(path))?;
        let metadata = fs::symlink_metadata(&dest)?;
        if metadata.is_dir() {
            fs::remove_dir_all(&dest)?;
        } else {
            fs::remove_file(&dest)?;
        }
        Ok(())
    }

    fn mark_executable(&mut self, path: &str, executable: bool) -> Result<(), Error> {
        let (_, dest) = safe_join(&self.root, Path::new(path))?;
        platform::set_executable(&dest, executable)
    }

    fn turn_into_symlink(&mut self, path: &str, target: &str) -> Result<(), Error> {
        let (_, dest) = safe_join(&self.root, Path::new(path))?;
        let metadata = fs::symlink_metadata(&dest)?;
        if metadata.is_dir() {
            fs::remove_dir_all(&dest)?;
        } else {
            fs::remove_file(&dest)?;
        }
        platform::symlink(target, &dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn add_file_creates_file_with_given_content() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = DirectoryBuilder::new(dir.path().to_path_buf()).unwrap();
        {
            let mut w = builder.add_file("hello.txt", false).unwrap();
            w.write_all(b"hi").unwrap();
        }
        assert_eq!(fs::read(dir.path().join("hello.txt")).unwrap(), b"hi");
    }

    #[test]
    fn add_directory_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = DirectoryBuilder::new(dir.path().to_path_buf()).unwrap();
        builder.add_directory("a/b").unwrap();
        builder.add_directory("a/b").unwrap();
        assert!(dir.path().join("a/b").is_dir());
    }

    #[test]
    fn rejects_path_escaping_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = DirectoryBuilder::new(dir.path().to_path_buf()).unwrap();
        let err = builder.add_directory("../escape").unwrap_err();
        assert!(matches!(err, Error::InvalidPath { .. }));
    }

    #[test]
    fn hardlink_outside_allowed_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let source_file = outside.path().join("src.txt");
        fs::write(&source_file, b"data").unwrap();

        let allowed_root = dir.path().join("allowed");
        fs::create_dir_all(&allowed_root).unwrap();
        let mut builder = DirectoryBuilder::new(dir.path().join("out")).unwrap()
            .with_hardlink_root(AllowedHardlinkRoot(allowed_root));

        let err = builder.add_hardlink("dst.txt", &source_file).unwrap_err();
        assert!(matches!(err, Error::UnauthorizedAccess { .. }));
    }
}
