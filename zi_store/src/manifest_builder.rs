//! Builder wrapper that records a `Manifest` alongside whatever an inner
//! builder writes to disk (§3, §4.2).
//!
//! AppleDouble sidecar files (`._foo`, written by macOS when copying onto
//! non-HFS+ filesystems) are silently dropped rather than recorded -- they
//! carry no content a 0install manifest should ever need to reproduce.

use crate::builder::{Builder, ForwardOnlyBuilder};
use std::cell::RefCell;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;
use zi_core::digest::{content_digest_hex, DigestFormat};
use zi_core::errors::Error;
use zi_core::manifest::{Entry, Manifest};

fn is_apple_double(path: &str) -> bool {
    path.rsplit('/').next().is_some_and(|name| name.starts_with("._"))
}

#[cfg(debug_assertions)]
fn log_apple_double_skip(path: &str) {
    eprintln!("    Note: skipping AppleDouble sidecar '{path}'");
}

#[cfg(not(debug_assertions))]
fn log_apple_double_skip(_path: &str) {}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> Result<bool, Error> {
    use std::os::unix::fs::PermissionsExt;
    Ok(std::fs::metadata(path)?.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_path: &std::path::Path) -> Result<bool, Error> {
    Ok(false)
}

/// Buffers file content in memory only long enough to hash it, then hands
/// the bytes to the inner builder and records the resulting entry.
pub struct ManifestBuilder<'a> {
    inner: &'a mut dyn Builder,
    manifest: Rc<RefCell<Manifest>>,
    format: DigestFormat,
}

impl<'a> ManifestBuilder<'a> {
    pub fn new(inner: &'a mut dyn Builder, format: DigestFormat) -> Self {
        let mut manifest = Manifest::new();
        manifest.add_dir("").expect("empty path is always a valid directory");
        ManifestBuilder {
            inner,
            manifest: Rc::new(RefCell::new(manifest)),
            format,
        }
    }

    pub fn into_manifest(self) -> Manifest {
        Rc::try_unwrap(self.manifest)
            .unwrap_or_else(|rc| rc.borrow().clone())
            .into_inner()
    }

    pub fn manifest(&self) -> std::cell::Ref<'_, Manifest> {
        self.manifest.borrow()
    }
}

struct HashingWriter<'b> {
    inner: Box<dyn Write + 'b>,
    hasher_input: Vec<u8>,
    path: String,
    executable: bool,
    format: DigestFormat,
    manifest: Rc<RefCell<Manifest>>,
}

impl Write for HashingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.hasher_input.extend_from_slice(buf);
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl Drop for HashingWriter<'_> {
    fn drop(&mut self) {
        let digest = content_digest_hex(self.format, &self.hasher_input);
        let size = self.hasher_input.len() as u64;
        let entry = if self.executable {
            Entry::ExecutableFile { digest, mtime_unix: 0, size }
        } else {
            Entry::NormalFile { digest, mtime_unix: 0, size }
        };
        if let Some(parent) = zi_core::manifest::parent_of(&self.path) {
            let name = zi_core::manifest::name_of(&self.path);
            let _ = self.manifest.borrow_mut().put(&parent, name, entry);
        }
    }
}

impl ForwardOnlyBuilder for ManifestBuilder<'_> {
    fn add_directory(&mut self, path: &str) -> Result<(), Error> {
        if is_apple_double(path) {
            log_apple_double_skip(path);
            return Ok(());
        }
        self.inner.add_directory(path)?;
        self.manifest.borrow_mut().add_dir(path)?;
        Ok(())
    }

    fn add_file(&mut self, path: &str, executable: bool) -> Result<Box<dyn Write + '_>, Error> {
        if is_apple_double(path) {
            log_apple_double_skip(path);
            // Still needs to return a writer; the caller writes into a void.
            return Ok(Box::new(std::io::sink()));
        }
        let inner_writer = self.inner.add_file(path, executable)?;
        Ok(Box::new(HashingWriter {
            inner: inner_writer,
            hasher_input: Vec::new(),
            path: path.to_string(),
            executable,
            format: self.format,
            manifest: Rc::clone(&self.manifest),
        }))
    }

    fn add_symlink(&mut self, path: &str, target: &str) -> Result<(), Error> {
        if is_apple_double(path) {
            log_apple_double_skip(path);
            return Ok(());
        }
        self.inner.add_symlink(path, target)?;
        let digest = content_digest_hex(self.format, target.as_bytes());
        let entry = Entry::Symlink { digest, size: target.len() as u64 };
        if let Some(parent) = zi_core::manifest::parent_of(path) {
            let name = zi_core::manifest::name_of(path);
            self.manifest.borrow_mut().put(&parent, name, entry)?;
        }
        Ok(())
    }

    fn add_hardlink(&mut self, path: &str, source: &Path) -> Result<(), Error> {
        if is_apple_double(path) {
            log_apple_double_skip(path);
            return Ok(());
        }
        self.inner.add_hardlink(path, source)?;
        let bytes = std::fs::read(source)?;
        let digest = content_digest_hex(self.format, &bytes);
        let size = bytes.len() as u64;
        let entry = if is_executable(source)? {
            Entry::ExecutableFile { digest, mtime_unix: 0, size }
        } else {
            Entry::NormalFile { digest, mtime_unix: 0, size }
        };
        if let Some(parent) = zi_core::manifest::parent_of(path) {
            let name = zi_core::manifest::name_of(path);
            self.manifest.borrow_mut().put(&parent, name, entry)?;
        }
        Ok(())
    }
}

impl Builder for ManifestBuilder<'_> {
    fn rename(&mut self, source: &str, destination: &str) -> Result<(), Error> {
        self.inner.rename(source, destination)?;
        self.manifest.borrow_mut().rename(source, destination)
    }

    fn remove(&mut self, path: &str) -> Result<(), Error> {
        self.inner.remove(path)?;
        self.manifest.borrow_mut().remove(path)?;
        Ok(())
    }

    fn mark_executable(&mut self, path: &str, executable: bool) -> Result<(), Error> {
        self.inner.mark_executable(path, executable)?;
        let mut manifest = self.manifest.borrow_mut();
        let (digest, mtime_unix, size) = match manifest.get(path).cloned() {
            Some(Entry::NormalFile { digest, mtime_unix, size }) => (digest, mtime_unix, size),
            Some(Entry::ExecutableFile { digest, mtime_unix, size }) => (digest, mtime_unix, size),
            _ => {
                return Err(Error::InvalidData {
                    message: format!("'{path}' has no regular-file manifest entry to mark executable"),
                })
            }
        };
        let entry = if executable {
            Entry::ExecutableFile { digest, mtime_unix, size }
        } else {
            Entry::NormalFile { digest, mtime_unix, size }
        };
        if let Some(parent) = zi_core::manifest::parent_of(path) {
            let name = zi_core::manifest::name_of(path);
            manifest.put(&parent, name, entry)?;
        }
        Ok(())
    }

    fn turn_into_symlink(&mut self, path: &str, target: &str) -> Result<(), Error> {
        self.inner.turn_into_symlink(path, target)?;
        let entry = zi_core::manifest::symlink_entry(self.format, target);
        if let Some(parent) = zi_core::manifest::parent_of(path) {
            let name = zi_core::manifest::name_of(path);
            self.manifest.borrow_mut().put(&parent, name, entry)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory_builder::DirectoryBuilder;
    use std::io::Write as _;

    #[test]
    fn records_a_file_entry_with_correct_digest() {
        let dir = tempfile::tempdir().unwrap();
        let mut directory = DirectoryBuilder::new(dir.path().to_path_buf()).unwrap();
        let manifest = {
            let mut builder = ManifestBuilder::new(&mut directory, DigestFormat::Sha256New);
            {
                let mut w = builder.add_file("hello.txt", false).unwrap();
                w.write_all(b"hi").unwrap();
            }
            builder.into_manifest()
        };
        let expected = content_digest_hex(DigestFormat::Sha256New, b"hi");
        let lines = manifest.lines();
        assert!(lines.iter().any(|l| l.contains(&expected)));
    }

    #[test]
    fn mark_executable_flips_entry_type_and_keeps_digest() {
        let dir = tempfile::tempdir().unwrap();
        let mut directory = DirectoryBuilder::new(dir.path().to_path_buf()).unwrap();
        let mut builder = ManifestBuilder::new(&mut directory, DigestFormat::Sha256New);
        {
            let mut w = builder.add_file("run.sh", false).unwrap();
            w.write_all(b"#!/bin/sh").unwrap();
        }
        let before = builder.manifest().get("run.sh").cloned().unwrap();
        builder.mark_executable("run.sh", true).unwrap();
        let after = builder.manifest().get("run.sh").cloned().unwrap();
        match (before, after) {
            (Entry::NormalFile { digest: d1, size: s1, .. }, Entry::ExecutableFile { digest: d2, size: s2, .. }) => {
                assert_eq!(d1, d2);
                assert_eq!(s1, s2);
            }
            other => panic!("unexpected entry pair: {other:?}"),
        }
    }

    #[test]
    fn turn_into_symlink_replaces_the_file_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut directory = DirectoryBuilder::new(dir.path().to_path_buf()).unwrap();
        let manifest = {
            let mut builder = ManifestBuilder::new(&mut directory, DigestFormat::Sha256New);
            {
                let mut w = builder.add_file("link.txt", false).unwrap();
                w.write_all(b"placeholder").unwrap();
            }
            builder.turn_into_symlink("link.txt", "target.txt").unwrap();
            builder.into_manifest()
        };
        assert!(matches!(manifest.get("link.txt"), Some(Entry::Symlink { .. })));
    }

    #[test]
    fn remove_deletes_both_the_inner_tree_and_the_manifest_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut directory = DirectoryBuilder::new(dir.path().to_path_buf()).unwrap();
        let manifest = {
            let mut builder = ManifestBuilder::new(&mut directory, DigestFormat::Sha256New);
            {
                let mut w = builder.add_file("unwanted.txt", false).unwrap();
                w.write_all(b"junk").unwrap();
            }
            builder.remove("unwanted.txt").unwrap();
            builder.into_manifest()
        };
        assert!(manifest.get("unwanted.txt").is_none());
        assert!(!dir.path().join("unwanted.txt").exists());
    }

    #[test]
    fn apple_double_files_are_dropped_silently() {
        let dir = tempfile::tempdir().unwrap();
        let mut directory = DirectoryBuilder::new(dir.path().to_path_buf()).unwrap();
        let manifest = {
            let mut builder = ManifestBuilder::new(&mut directory, DigestFormat::Sha256New);
            {
                let mut w = builder.add_file("._hidden", false).unwrap();
                w.write_all(b"junk").unwrap();
            }
            builder.into_manifest()
        };
        assert_eq!(manifest.entry_count(), 0);
    }
}
