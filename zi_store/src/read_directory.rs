//! Replays an existing directory tree through a `Builder` (§4.5, §9).
//!
//! Used both to re-manifest an already-unpacked implementation and, with
//! `force_hardlinks`, to materialize a store implementation into a build
//! sandbox without copying bytes.

use crate::builder::ForwardOnlyBuilder;
use crate::directory_builder::DirectoryBuilder;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use walkdir::{DirEntry, WalkDir};
use zi_core::digest::{content_digest_hex, DigestFormat};
use zi_core::errors::Error;
use zi_core::manifest::{Entry, Manifest};

/// §9 resolves "should ReadDirectory hardlink?" as one option on one entry
/// point rather than a global mode: `force_hardlinks` only has an effect
/// when called through `read_directory_hardlinked`, whose destination is a
/// concrete `DirectoryBuilder` with an allowed hardlink root configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadDirectoryOptions {
    pub force_hardlinks: bool,
}

/// Walk `source` in sorted order and replay every entry into `builder` by
/// copying file content.
pub fn read_directory(source: &Path, builder: &mut dyn ForwardOnlyBuilder) -> Result<(), Error> {
    for entry in sorted_entries(source)? {
        match classify(source, &entry)? {
            Replay::Dir(rel) => builder.add_directory(&rel)?,
            Replay::Symlink(rel, target) => builder.add_symlink(&rel, &target)?,
            Replay::File(rel, executable) => copy_file(builder, entry.path(), &rel, executable)?,
        }
    }
    Ok(())
}

/// Like `read_directory`, but regular files are hardlinked into `builder`'s
/// root instead of copied when `options.force_hardlinks` is set and the
/// source file lives under `builder`'s allowed hardlink root.
pub fn read_directory_hardlinked(
    source: &Path,
    builder: &mut DirectoryBuilder,
    options: ReadDirectoryOptions,
) -> Result<(), Error> {
    for entry in sorted_entries(source)? {
        match classify(source, &entry)? {
            Replay::Dir(rel) => builder.add_directory(&rel)?,
            Replay::Symlink(rel, target) => builder.add_symlink(&rel, &target)?,
            Replay::File(rel, executable) => {
                if options.force_hardlinks {
                    builder.add_hardlink(&rel, entry.path())?;
                } else {
                    copy_file(builder, entry.path(), &rel, executable)?;
                }
            }
        }
    }
    Ok(())
}

enum Replay {
    Dir(String),
    Symlink(String, String),
    File(String, bool),
}

fn classify(source: &Path, entry: &DirEntry) -> Result<Replay, Error> {
    let rel = entry
        .path()
        .strip_prefix(source)
        .expect("walkdir yields paths under its own root")
        .to_string_lossy()
        .replace('\\', "/");
    let metadata = entry.path().symlink_metadata()?;

    if metadata.is_dir() {
        Ok(Replay::Dir(rel))
    } else if metadata.file_type().is_symlink() {
        let target = fs::read_link(entry.path())?;
        Ok(Replay::Symlink(rel, target.to_string_lossy().into_owned()))
    } else {
        Ok(Replay::File(rel, metadata.mode() & 0o111 != 0))
    }
}

fn copy_file(builder: &mut dyn ForwardOnlyBuilder, source: &Path, rel: &str, executable: bool) -> Result<(), Error> {
    let mut writer = builder.add_file(rel, executable)?;
    let mut reader = fs::File::open(source)?;
    std::io::copy(&mut reader, &mut writer)?;
    Ok(())
}

/// A `Builder` that hashes file content without ever touching disk --
/// used by `ImplementationStore::verify` to recompute a manifest digest
/// in place.
pub struct NullBuilder {
    manifest: Manifest,
    format: DigestFormat,
}

impl NullBuilder {
    pub fn new(format: DigestFormat) -> Self {
        let mut manifest = Manifest::new();
        manifest.add_dir("").expect("empty path is always a valid directory");
        NullBuilder { manifest, format }
    }

    pub fn into_manifest(self) -> Manifest {
        self.manifest
    }
}

impl ForwardOnlyBuilder for NullBuilder {
    fn add_directory(&mut self, path: &str) -> Result<(), Error> {
        self.manifest.add_dir(path)
    }

    fn add_file(&mut self, path: &str, executable: bool) -> Result<Box<dyn std::io::Write + '_>, Error> {
        let (parent, name) = require_split(path)?;
        Ok(Box::new(NullFileWriter {
            manifest: &mut self.manifest,
            format: self.format,
            parent,
            name,
            executable,
            buf: Vec::new(),
        }))
    }

    fn add_symlink(&mut self, path: &str, target: &str) -> Result<(), Error> {
        let (parent, name) = require_split(path)?;
        let digest = content_digest_hex(self.format, target.as_bytes());
        self.manifest.put(&parent, &name, Entry::Symlink { digest, size: target.len() as u64 })
    }

    /// Never touches disk: hashes `source`'s content in place rather than
    /// linking it anywhere.
    fn add_hardlink(&mut self, path: &str, source: &Path) -> Result<(), Error> {
        let (parent, name) = require_split(path)?;
        let bytes = fs::read(source)?;
        let digest = content_digest_hex(self.format, &bytes);
        let size = bytes.len() as u64;
        let executable = source.symlink_metadata()?.mode() & 0o111 != 0;
        let entry = if executable {
            Entry::ExecutableFile { digest, mtime_unix: 0, size }
        } else {
            Entry::NormalFile { digest, mtime_unix: 0, size }
        };
        self.manifest.put(&parent, &name, entry)
    }
}

fn require_split(path: &str) -> Result<(String, String), Error> {
    match zi_core::manifest::parent_of(path) {
        Some(parent) => Ok((parent, zi_core::manifest::name_of(path).to_string())),
        None => Err(Error::InvalidData { message: format!("path '{path}' has no parent/name split") }),
    }
}

struct NullFileWriter<'a> {
    manifest: &'a mut Manifest,
    format: DigestFormat,
    parent: String,
    name: String,
    executable: bool,
    buf: Vec<u8>,
}

impl std::io::Write for NullFileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for NullFileWriter<'_> {
    fn drop(&mut self) {
        let digest = content_digest_hex(self.format, &self.buf);
        let size = self.buf.len() as u64;
        let entry = if self.executable {
            Entry::ExecutableFile { digest, mtime_unix: 0, size }
        } else {
            Entry::NormalFile { digest, mtime_unix: 0, size }
        };
        let _ = self.manifest.put(&self.parent, &self.name, entry);
    }
}

fn sorted_entries(source: &Path) -> Result<Vec<DirEntry>, Error> {
    let mut entries: Vec<_> = WalkDir::new(source)
        .min_depth(1)
        .into_iter()
        .collect::<Result<_, _>>()
        .map_err(|e| Error::Io { message: e.to_string() })?;
    entries.sort_by(|a, b| a.path().cmp(b.path()));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest_builder::ManifestBuilder;
    use zi_core::digest::DigestFormat;

    #[test]
    fn replays_files_directories_and_symlinks() {
        let source = tempfile::tempdir().unwrap();
        fs::create_dir_all(source.path().join("sub")).unwrap();
        fs::write(source.path().join("sub/file.txt"), b"content").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("file.txt", source.path().join("sub/link")).unwrap();

        let dest = tempfile::tempdir().unwrap();
        let mut directory = DirectoryBuilder::new(dest.path().to_path_buf()).unwrap();
        let manifest = {
            let mut manifest_builder = ManifestBuilder::new(&mut directory, DigestFormat::Sha256New);
            read_directory(source.path(), &mut manifest_builder).unwrap();
            manifest_builder.into_manifest()
        };

        assert!(dest.path().join("sub/file.txt").exists());
        assert!(manifest.entry_count() >= 1);
    }

    #[test]
    fn hardlinked_replay_links_instead_of_copying() {
        let source = tempfile::tempdir().unwrap();
        fs::write(source.path().join("file.txt"), b"content").unwrap();

        let dest = tempfile::tempdir().unwrap();
        let mut directory = DirectoryBuilder::new(dest.path().to_path_buf())
            .unwrap()
            .with_hardlink_root(crate::directory_builder::AllowedHardlinkRoot(source.path().to_path_buf()));

        read_directory_hardlinked(
            source.path(),
            &mut directory,
            ReadDirectoryOptions { force_hardlinks: true },
        )
        .unwrap();

        let src_meta = fs::metadata(source.path().join("file.txt")).unwrap();
        let dst_meta = fs::metadata(dest.path().join("file.txt")).unwrap();
        assert_eq!(src_meta.ino(), dst_meta.ino());
    }
}
