//! Content-addressed implementation store (§4.8, §9).

use crate::builder::Builder;
use crate::directory_builder::DirectoryBuilder;
use crate::lock::{DigestLockTable, StoreFileLock};
use crate::manifest_builder::ManifestBuilder;
use crate::read_directory::read_directory;
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use zi_core::digest::DigestFormat;
use zi_core::errors::Error;
use zi_core::manifest::Manifest;

/// One digest-rooted store directory, typically `~/.cache/0install/implementations`
/// or a distro-wide system path. `ReadOnly` and `Service` stores reject
/// every mutating operation with `Error::UnauthorizedAccess` -- `Service`
/// exists for stores a privileged helper manages on the caller's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    ReadWrite,
    ReadOnly,
    Service,
}

/// Manages one root directory of content-addressed implementations, each
/// named by its manifest digest. Additions are staged in a temp directory,
/// verified against the declared digest, then atomically renamed into
/// place so a reader never observes a partially-built implementation.
pub struct ImplementationStore {
    root: PathBuf,
    kind: StoreKind,
    locks: DigestLockTable,
}

impl ImplementationStore {
    pub fn new(root: PathBuf, kind: StoreKind) -> Result<Self, Error> {
        fs::create_dir_all(&root)?;
        Ok(ImplementationStore { root, kind, locks: DigestLockTable::new() })
    }

    pub fn kind(&self) -> &StoreKind {
        &self.kind
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn locks_dir(&self) -> PathBuf {
        self.root.join(".locks")
    }

    fn require_writable(&self, operation: &str) -> Result<(), Error> {
        match self.kind {
            StoreKind::ReadWrite => Ok(()),
            StoreKind::ReadOnly | StoreKind::Service => Err(Error::UnauthorizedAccess {
                message: format!("store at '{}' is not writable: cannot {operation}", self.root.display()),
            }),
        }
    }

    pub fn path_for(&self, digest: &str) -> PathBuf {
        self.root.join(digest)
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.path_for(digest).is_dir()
    }

    pub fn get_path(&self, digest: &str) -> Result<PathBuf, Error> {
        let path = self.path_for(digest);
        if path.is_dir() {
            Ok(path)
        } else {
            Err(Error::ImplementationNotFound { digest: digest.to_string() })
        }
    }

    /// Add an implementation by running `populate` against a fresh
    /// temp-directory builder, hashing everything it writes, then renaming
    /// the temp directory into place under `digest` if the resulting
    /// manifest hashes to `digest`.
    pub fn add<F>(&self, digest: &str, format: DigestFormat, populate: F) -> Result<PathBuf, Error>
    where
        F: FnOnce(&mut dyn Builder) -> Result<(), Error>,
    {
        if self.contains(digest) {
            return Ok(self.path_for(digest));
        }
        self.require_writable("add")?;

        let mutex = self.locks.lock_for(digest);
        let _in_process_guard = mutex.lock().unwrap_or_else(|e| e.into_inner());
        let _file_guard = StoreFileLock::acquire_shared(&self.locks_dir())?;

        if self.contains(digest) {
            return Ok(self.path_for(digest));
        }

        let tmp_dir = self.root.join(format!(".tmp-{}-{}", digest, fastrand::u64(..)));
        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir)?;
        }

        let manifest = {
            let mut directory = DirectoryBuilder::new(tmp_dir.clone())?;
            let mut manifest_builder = ManifestBuilder::new(&mut directory, format);
            if let Err(e) = populate(&mut manifest_builder) {
                drop(manifest_builder);
                let _ = fs::remove_dir_all(&tmp_dir);
                return Err(e);
            }
            manifest_builder.into_manifest()
        };

        let actual = manifest.digest(format);
        if actual != digest {
            let diff = compute_diff_hint(&manifest, digest);
            let _ = fs::remove_dir_all(&tmp_dir);
            return Err(Error::DigestMismatch {
                expected: digest.to_string(),
                actual,
                diff,
            });
        }

        write_manifest_file(&tmp_dir, &manifest)?;

        let final_path = self.path_for(digest);
        fs::rename(&tmp_dir, &final_path).map_err(|e| {
            let _ = fs::remove_dir_all(&tmp_dir);
            Error::Io { message: format!("failed to rename store entry into place: {e}") }
        })?;

        Ok(final_path)
    }

    /// Re-read an on-disk implementation and confirm its manifest still
    /// hashes to `digest`, catching bit rot or tampering. Never writes
    /// anything; entries are hashed in place without a copy.
    pub fn verify(&self, digest: &str, format: DigestFormat) -> Result<(), Error> {
        let path = self.get_path(digest)?;
        let mut null_builder = crate::read_directory::NullBuilder::new(format);
        read_directory(&path, &mut null_builder)?;
        let manifest = null_builder.into_manifest();
        let actual = manifest.digest(format);
        if actual != digest {
            return Err(Error::DigestMismatch {
                expected: digest.to_string(),
                actual,
                diff: compute_diff_hint(&manifest, digest),
            });
        }
        Ok(())
    }

    pub fn remove(&self, digest: &str) -> Result<bool, Error> {
        self.require_writable("remove")?;
        let _file_guard = StoreFileLock::acquire_shared(&self.locks_dir())?;
        let path = self.path_for(digest);
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn list_all(&self) -> Result<Vec<String>, Error> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if entry.path().is_dir() && !name.starts_with('.') {
                    out.push(name.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }

    pub fn list_temp(&self) -> Result<Vec<PathBuf>, Error> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(".tmp-") {
                    out.push(entry.path());
                }
            }
        }
        Ok(out)
    }

    /// Remove every `<digest>` entry and every leftover temp directory.
    pub fn purge(&self) -> Result<usize, Error> {
        self.require_writable("purge")?;
        let _file_guard = StoreFileLock::acquire_exclusive(&self.locks_dir())?;
        let mut count = 0;
        for digest in self.list_all()? {
            if fs::remove_dir_all(self.path_for(&digest)).is_ok() {
                count += 1;
            }
        }
        for path in self.list_temp()? {
            if fs::remove_dir_all(&path).is_ok() {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn total_size(&self) -> Result<u64, Error> {
        dir_size(&self.root)
    }

    /// Replace bit-identical regular files (same manifest digest and size)
    /// across every stored implementation with hardlinks to one canonical
    /// copy, returning the number of bytes reclaimed. Skips files already
    /// sharing an inode and refuses to hardlink across devices. Takes the
    /// store lock exclusively so it never races `add`/`remove`.
    pub fn optimise(&self) -> Result<u64, Error> {
        self.require_writable("optimise")?;
        let _file_guard = StoreFileLock::acquire_exclusive(&self.locks_dir())?;

        let mut groups: BTreeMap<(String, u64), Vec<PathBuf>> = BTreeMap::new();
        for digest in self.list_all()? {
            let impl_root = self.path_for(&digest);
            let manifest_path = impl_root.join(".manifest");
            let Ok(file) = fs::File::open(&manifest_path) else {
                continue;
            };
            let format = DigestFormat::parse_id(&digest).map(|(format, _)| format).unwrap_or(DigestFormat::Sha256New);
            let Ok(manifest) = Manifest::load(std::io::BufReader::new(file), format) else {
                continue;
            };
            for (rel_path, digest, size, _executable) in manifest.files() {
                groups.entry((digest.to_string(), size)).or_default().push(impl_root.join(rel_path));
            }
        }

        let mut reclaimed = 0u64;
        for paths in groups.into_values() {
            if paths.len() < 2 {
                continue;
            }
            reclaimed += hardlink_duplicates(&paths)?;
        }
        Ok(reclaimed)
    }
}

/// Given a set of paths all holding bit-identical content, hardlink every
/// path after the first canonical one onto it. Paths already sharing an
/// inode with the canonical path, or living on a different device, are
/// left untouched.
fn hardlink_duplicates(paths: &[PathBuf]) -> Result<u64, Error> {
    let mut ordered = paths.to_vec();
    ordered.sort();
    let canonical = &ordered[0];
    let Ok(canonical_meta) = fs::metadata(canonical) else {
        return Ok(0);
    };

    let mut reclaimed = 0u64;
    for dup in &ordered[1..] {
        let Ok(dup_meta) = fs::metadata(dup) else {
            continue;
        };
        if dup_meta.ino() == canonical_meta.ino() {
            continue;
        }
        if dup_meta.dev() != canonical_meta.dev() {
            continue;
        }
        let tmp = dup.with_file_name(format!(
            ".{}.optimise-tmp-{}",
            dup.file_name().and_then(|n| n.to_str()).unwrap_or("entry"),
            fastrand::u64(..),
        ));
        if fs::hard_link(canonical, &tmp).is_err() {
            continue;
        }
        if fs::rename(&tmp, dup).is_ok() {
            reclaimed += dup_meta.len();
        } else {
            let _ = fs::remove_file(&tmp);
        }
    }
    Ok(reclaimed)
}

fn compute_diff_hint(manifest: &Manifest, expected: &str) -> Vec<String> {
    vec![format!(
        "built manifest has {} entries, {} total bytes, but does not hash to {expected}",
        manifest.entry_count(),
        manifest.total_size()
    )]
}

fn write_manifest_file(root: &Path, manifest: &Manifest) -> Result<(), Error> {
    let mut file = fs::File::create(root.join(".manifest"))?;
    manifest.save(&mut file)?;
    Ok(())
}

fn dir_size(path: &Path) -> Result<u64, Error> {
    let mut total = 0;
    for entry in walkdir::WalkDir::new(path).into_iter() {
        let entry = entry.map_err(|e| Error::Io { message: e.to_string() })?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(|e| Error::Io { message: e.to_string() })?.len();
        }
    }
    Ok(total)
}

/// Searches multiple stores in priority order (user store first, then any
/// configured system stores), matching the upstream 0install layered-store
/// lookup.
pub struct CompositeStore {
    stores: Vec<ImplementationStore>,
}

impl CompositeStore {
    pub fn new(stores: Vec<ImplementationStore>) -> Self {
        CompositeStore { stores }
    }

    pub fn get_path(&self, digest: &str) -> Result<PathBuf, Error> {
        for store in &self.stores {
            if store.contains(digest) {
                return store.get_path(digest);
            }
        }
        Err(Error::ImplementationNotFound { digest: digest.to_string() })
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.stores.iter().any(|s| s.contains(digest))
    }

    /// The first store in priority order, used as the target for new
    /// `add` calls (typically the user's writable cache).
    pub fn primary(&self) -> Option<&ImplementationStore> {
        self.stores.first()
    }
}
