//! Builder capability traits implementations compose (§4.2).
//!
//! `ForwardOnlyBuilder` is the capability every pipeline stage needs: add
//! entries to a tree under construction, never touching anything already
//! written. `Builder` extends it with the mutating operations a `<recipe>`
//! step can require (§4.4) -- renaming, removing, or retyping an entry that
//! an earlier step (or an earlier retrieval method) already placed.

use std::io::Write;
use std::path::Path;
use zi_core::errors::Error;

/// Entries a builder can add to the tree it's constructing, without ever
/// needing to reason about undoing a previous write.
pub trait ForwardOnlyBuilder {
    fn add_directory(&mut self, path: &str) -> Result<(), Error>;

    /// Returns a writer for a new regular file's content. The file is not
    /// necessarily visible to readers until the writer is dropped.
    fn add_file(&mut self, path: &str, executable: bool) -> Result<Box<dyn Write + '_>, Error>;

    fn add_symlink(&mut self, path: &str, target: &str) -> Result<(), Error>;

    /// Link `source`, an existing file on disk, into the tree at `path`
    /// instead of copying its bytes.
    fn add_hardlink(&mut self, path: &str, source: &Path) -> Result<(), Error>;
}

/// The full set of tree operations a recipe can require: everything
/// `ForwardOnlyBuilder` offers, plus renaming, removing, and retyping
/// entries already placed by an earlier step.
pub trait Builder: ForwardOnlyBuilder {
    fn rename(&mut self, source: &str, destination: &str) -> Result<(), Error>;

    fn remove(&mut self, path: &str) -> Result<(), Error>;

    fn mark_executable(&mut self, path: &str, executable: bool) -> Result<(), Error>;

    fn turn_into_symlink(&mut self, path: &str, target: &str) -> Result<(), Error>;
}
