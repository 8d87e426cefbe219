//! Canonical, hashable directory-tree listing (§3, §4.1).

use crate::digest::{content_digest_hex, DigestFormat};
use crate::errors::Error;
use crate::path_safety::validate_relative_path;
use std::collections::BTreeMap;
use std::io::{BufRead, Write};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Entry {
    Dir,
    NormalFile {
        digest: String,
        mtime_unix: i64,
        size: u64,
    },
    ExecutableFile {
        digest: String,
        mtime_unix: i64,
        size: u64,
    },
    Symlink {
        digest: String,
        size: u64,
    },
}

/// An ordered directory tree keyed by Unix-style relative path (`""` is the
/// root). Every mutating operation re-validates its path argument against
/// §3's reserved-name/newline rules; insertion order is never observable —
/// `lines()` always re-sorts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    /// directory path -> (entry name -> entry)
    dirs: BTreeMap<String, BTreeMap<String, Entry>>,
}

/// Total order over manifest paths: `/` sorts as the lowest character, so
/// `a/b` sorts before `aa`, and ancestor directories always sort before any
/// of their descendants. Implemented by comparing the `/`-split component
/// sequence lexicographically rather than the raw byte string, which is
/// what gives `/` its "lower than any other byte" behavior without a
/// substitution trick.
pub fn path_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    let a_parts: Vec<&str> = if a.is_empty() {
        Vec::new()
    } else {
        a.split('/').collect()
    };
    let b_parts: Vec<&str> = if b.is_empty() {
        Vec::new()
    } else {
        b.split('/').collect()
    };
    a_parts.cmp(&b_parts)
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert this directory and all missing ancestors. Idempotent.
    pub fn add_dir(&mut self, path: &str) -> Result<(), Error> {
        let path = validate_relative_path(std::path::Path::new(path))?;
        self.add_dir_unchecked(&path);
        Ok(())
    }

    fn add_dir_unchecked(&mut self, path: &str) {
        if self.dirs.contains_key(path) {
            return;
        }
        self.dirs.entry(path.to_string()).or_default();
        if let Some(parent) = parent_of(path) {
            self.add_dir_unchecked(&parent);
            let name = name_of(path);
            self.dirs
                .get_mut(&parent)
                .unwrap()
                .entry(name.to_string())
                .or_insert(Entry::Dir);
        }
    }

    /// Insert or overwrite an entry. Fails if the parent directory is
    /// absent; callers that want auto-creation should `add_dir` first.
    pub fn put(&mut self, dir_path: &str, name: &str, entry: Entry) -> Result<(), Error> {
        let dir_path = validate_relative_path(std::path::Path::new(dir_path))?;
        let full = if dir_path.is_empty() {
            name.to_string()
        } else {
            format!("{dir_path}/{name}")
        };
        validate_relative_path(std::path::Path::new(&full))?;

        let Some(children) = self.dirs.get_mut(&dir_path) else {
            return Err(Error::InvalidData {
                message: format!("parent directory '{dir_path}' does not exist"),
            });
        };
        children.insert(name.to_string(), entry);
        Ok(())
    }

    /// Look up a single entry by its full path. `""` is never a valid entry
    /// (the root has no entry of its own), so it always returns `None`.
    pub fn get(&self, path: &str) -> Option<&Entry> {
        let parent = parent_of(path)?;
        let name = name_of(path);
        self.dirs.get(&parent)?.get(name)
    }

    /// Delete a directory (and all descendants) or a file. Returns whether
    /// anything was removed.
    pub fn remove(&mut self, path: &str) -> Result<bool, Error> {
        let path = validate_relative_path(std::path::Path::new(path))?;
        if path.is_empty() {
            let removed = !self.dirs.is_empty();
            self.dirs.clear();
            return Ok(removed);
        }

        let mut removed = false;
        if self.dirs.contains_key(&path) {
            let prefix = format!("{path}/");
            self.dirs
                .retain(|key, _| !(key == &path || key.starts_with(&prefix)));
            removed = true;
        }

        if let Some(parent) = parent_of(&path) {
            let name = name_of(&path);
            if let Some(children) = self.dirs.get_mut(&parent) {
                removed |= children.remove(name).is_some();
            }
        }

        Ok(removed)
    }

    /// Move a subtree. Fails only if `from` is absent. Preserves entry
    /// identity (hardlink relations survive untouched since entries are
    /// moved, not re-hashed).
    pub fn rename(&mut self, from_path: &str, to_path: &str) -> Result<(), Error> {
        let from_path = validate_relative_path(std::path::Path::new(from_path))?;
        let to_path = validate_relative_path(std::path::Path::new(to_path))?;

        if self.dirs.contains_key(&from_path) {
            let prefix = format!("{from_path}/");
            let moved: Vec<(String, BTreeMap<String, Entry>)> = self
                .dirs
                .iter()
                .filter(|(key, _)| *key == &from_path || key.starts_with(&prefix))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();

            if moved.is_empty() {
                return Err(Error::InvalidData {
                    message: format!("'{from_path}' does not exist"),
                });
            }

            for (key, _) in &moved {
                self.dirs.remove(key);
            }
            self.add_dir_unchecked(&to_path);
            for (key, value) in moved {
                let rest = key.strip_prefix(&from_path).unwrap_or("");
                let new_key = format!("{to_path}{rest}");
                self.add_dir_unchecked(&new_key);
                *self.dirs.get_mut(&new_key).unwrap() = value;
            }
            self.reattach_to_parent(&to_path);
            self.detach_name(&from_path);
            return Ok(());
        }

        // Not a directory: must be a file/symlink entry.
        let parent = parent_of(&from_path).unwrap_or_default();
        let name = name_of(&from_path);
        let entry = self
            .dirs
            .get_mut(&parent)
            .and_then(|children| children.remove(name))
            .ok_or_else(|| Error::InvalidData {
                message: format!("'{from_path}' does not exist"),
            })?;

        let to_parent = parent_of(&to_path).unwrap_or_default();
        let to_name = name_of(&to_path);
        self.add_dir_unchecked(&to_parent);
        self.dirs
            .get_mut(&to_parent)
            .unwrap()
            .insert(to_name.to_string(), entry);
        Ok(())
    }

    fn reattach_to_parent(&mut self, path: &str) {
        if let Some(parent) = parent_of(path) {
            self.add_dir_unchecked(&parent);
            let name = name_of(path);
            self.dirs
                .get_mut(&parent)
                .unwrap()
                .entry(name.to_string())
                .or_insert(Entry::Dir);
        }
    }

    fn detach_name(&mut self, path: &str) {
        if let Some(parent) = parent_of(path) {
            let name = name_of(path);
            if let Some(children) = self.dirs.get_mut(&parent) {
                children.remove(name);
            }
        }
    }

    /// Return a copy whose file mtimes are each rounded up to the next even
    /// second and shifted by `seconds`.
    pub fn with_time_offset(&self, seconds: i64) -> Manifest {
        let mut out = self.clone();
        for children in out.dirs.values_mut() {
            for entry in children.values_mut() {
                match entry {
                    Entry::NormalFile { mtime_unix, .. } | Entry::ExecutableFile { mtime_unix, .. } => {
                        let even = if *mtime_unix % 2 == 0 {
                            *mtime_unix
                        } else {
                            *mtime_unix + 1
                        };
                        *mtime_unix = even + seconds;
                    }
                    Entry::Dir | Entry::Symlink { .. } => {}
                }
            }
        }
        out
    }

    /// Produce the canonical line sequence defined in §3, LF-terminated.
    pub fn lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut dir_paths: Vec<&String> = self.dirs.keys().collect();
        dir_paths.sort_by(|a, b| path_cmp(a, b));

        for dir_path in dir_paths {
            if !dir_path.is_empty() {
                out.push(format!("D /{dir_path}\n"));
            }
            let children = &self.dirs[dir_path];
            let mut names: Vec<&String> = children.keys().collect();
            names.sort();
            for name in names {
                match &children[name] {
                    Entry::Dir => {}
                    Entry::NormalFile {
                        digest,
                        mtime_unix,
                        size,
                    } => {
                        out.push(format!("F {digest} {mtime_unix} {size} {name}\n"));
                    }
                    Entry::ExecutableFile {
                        digest,
                        mtime_unix,
                        size,
                    } => {
                        out.push(format!("X {digest} {mtime_unix} {size} {name}\n"));
                    }
                    Entry::Symlink { digest, size } => {
                        out.push(format!("S {digest} {size} {name}\n"));
                    }
                }
            }
        }

        out
    }

    fn serialized(&self) -> String {
        self.lines().concat()
    }

    pub fn digest(&self, format: DigestFormat) -> String {
        format.digest_of(self.serialized().as_bytes())
    }

    pub fn entry_count(&self) -> usize {
        self.dirs.values().map(|c| c.len()).sum::<usize>() + 1
    }

    pub fn total_size(&self) -> u64 {
        self.dirs
            .values()
            .flat_map(|c| c.values())
            .map(|e| match e {
                Entry::NormalFile { size, .. }
                | Entry::ExecutableFile { size, .. }
                | Entry::Symlink { size, .. } => *size,
                Entry::Dir => 0,
            })
            .sum()
    }

    /// Every regular file in the tree as `(full_path, digest, size,
    /// executable)`, used by store-level deduplication to find files with
    /// identical content across implementations.
    pub fn files(&self) -> Vec<(String, &str, u64, bool)> {
        let mut out = Vec::new();
        for (dir_path, children) in &self.dirs {
            for (name, entry) in children {
                match entry {
                    Entry::NormalFile { digest, size, .. } => {
                        out.push((join(dir_path, name), digest.as_str(), *size, false));
                    }
                    Entry::ExecutableFile { digest, size, .. } => {
                        out.push((join(dir_path, name), digest.as_str(), *size, true));
                    }
                    Entry::Dir | Entry::Symlink { .. } => {}
                }
            }
        }
        out
    }

    /// Parse a manifest from its canonical line format. Unknown line kinds,
    /// wrong field counts, non-integer mtime/size, or overflow fail with
    /// `Error::InvalidData`.
    pub fn load<R: BufRead>(mut reader: R, format: DigestFormat) -> Result<Manifest, Error> {
        let _ = format; // format currently only affects digest(), not parsing
        let mut manifest = Manifest::new();
        let mut current_dir = String::new();
        let mut line = String::new();

        loop {
            line.clear();
            let n = reader.read_line(&mut line).map_err(|e| Error::Io {
                message: e.to_string(),
            })?;
            if n == 0 {
                break;
            }
            let line = line.trim_end_matches('\n');
            if line.is_empty() {
                continue;
            }

            let mut parts = line.splitn(2, ' ');
            let kind = parts.next().unwrap_or_default();
            let rest = parts.next().unwrap_or_default();

            match kind {
                "D" => {
                    let path = rest.strip_prefix('/').ok_or_else(|| Error::InvalidData {
                        message: format!("malformed directory line: {line}"),
                    })?;
                    manifest.add_dir_unchecked(path);
                    current_dir = path.to_string();
                }
                "F" | "X" => {
                    let fields: Vec<&str> = rest.splitn(4, ' ').collect();
                    if fields.len() != 4 {
                        return Err(Error::InvalidData {
                            message: format!("malformed file line: {line}"),
                        });
                    }
                    let digest = fields[0].to_string();
                    let mtime_unix: i64 = fields[1].parse().map_err(|_| Error::InvalidData {
                        message: format!("bad mtime in line: {line}"),
                    })?;
                    let size: u64 = fields[2].parse().map_err(|_| Error::InvalidData {
                        message: format!("bad size in line: {line}"),
                    })?;
                    let name = fields[3].to_string();
                    manifest.add_dir_unchecked(&current_dir);
                    let entry = if kind == "F" {
                        Entry::NormalFile {
                            digest,
                            mtime_unix,
                            size,
                        }
                    } else {
                        Entry::ExecutableFile {
                            digest,
                            mtime_unix,
                            size,
                        }
                    };
                    manifest.put(&current_dir, &name, entry)?;
                }
                "S" => {
                    let fields: Vec<&str> = rest.splitn(3, ' ').collect();
                    if fields.len() != 3 {
                        return Err(Error::InvalidData {
                            message: format!("malformed symlink line: {line}"),
                        });
                    }
                    let digest = fields[0].to_string();
                    let size: u64 = fields[1].parse().map_err(|_| Error::InvalidData {
                        message: format!("bad size in line: {line}"),
                    })?;
                    let name = fields[2].to_string();
                    manifest.add_dir_unchecked(&current_dir);
                    manifest.put(&current_dir, &name, Entry::Symlink { digest, size })?;
                }
                _ => {
                    return Err(Error::InvalidData {
                        message: format!("unknown manifest line kind '{kind}' in: {line}"),
                    });
                }
            }
        }

        Ok(manifest)
    }

    pub fn save<W: Write>(&self, mut writer: W) -> Result<(), Error> {
        for line in self.lines() {
            writer.write_all(line.as_bytes()).map_err(|e| Error::Io {
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Short per-path diff against `other`, capped at `limit` entries with a
    /// "+N more" tail, used to give `DigestMismatch` something concrete to
    /// print beyond two hashes.
    pub fn diff(&self, other: &Manifest, limit: usize) -> Vec<String> {
        let mut all_paths: Vec<String> = Vec::new();
        for (dir, children) in &self.dirs {
            for name in children.keys() {
                all_paths.push(join(dir, name));
            }
        }
        for (dir, children) in &other.dirs {
            for name in children.keys() {
                all_paths.push(join(dir, name));
            }
        }
        all_paths.sort_by(|a, b| path_cmp(a, b));
        all_paths.dedup();

        let mut out = Vec::new();
        for path in all_paths {
            let (dir, name) = split_path(&path);
            let mine = self.dirs.get(&dir).and_then(|c| c.get(&name));
            let theirs = other.dirs.get(&dir).and_then(|c| c.get(&name));
            match (mine, theirs) {
                (Some(a), Some(b)) if a != b => out.push(format!("~ {path}")),
                (Some(_), None) => out.push(format!("- {path}")),
                (None, Some(_)) => out.push(format!("+ {path}")),
                _ => {}
            }
        }

        if out.len() > limit {
            let extra = out.len() - limit;
            out.truncate(limit);
            out.push(format!("+{extra} more"));
        }
        out
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

fn split_path(path: &str) -> (String, String) {
    match path.rfind('/') {
        Some(idx) => (path[..idx].to_string(), path[idx + 1..].to_string()),
        None => (String::new(), path.to_string()),
    }
}

pub fn parent_of(path: &str) -> Option<String> {
    if path.is_empty() {
        return None;
    }
    match path.rfind('/') {
        Some(idx) => Some(path[..idx].to_string()),
        None => Some(String::new()),
    }
}

pub fn name_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Hash a symlink target string the same way `ManifestBuilder` does, for
/// callers outside `zi_store` that need to construct `Entry::Symlink`
/// values directly (e.g. tests, or recipe steps operating purely on the
/// in-memory manifest).
pub fn symlink_entry(format: DigestFormat, target: &str) -> Entry {
    let bytes = target.as_bytes();
    Entry::Symlink {
        digest: content_digest_hex(format, bytes),
        size: bytes.len() as u64,
    }
}
