//! Applies a `RetrievalMethod`/`Recipe` to a `Builder` (§4.4).

pub mod extractors;

use crate::builder::{Builder, ForwardOnlyBuilder};
use crate::prefix_builder::PrefixBuilder;
use extractors::extract_archive;
use std::collections::HashMap;
use std::path::Path;
use zi_core::errors::Error;
use zi_core::feed::{RecipeStep, RetrievalMethod};

/// Resolves a retrieval method's `href` to local bytes already fetched.
/// `zi_store` never performs network I/O itself; callers (an external
/// fetcher) populate this map ahead of time.
pub trait FetchHandle {
    fn bytes_for(&self, href: &str) -> Result<Vec<u8>, Error>;

    /// Resolve `path` inside another already-staged implementation, for
    /// `<copy-from>` recipe steps. Callers that never apply a recipe with a
    /// `copy-from` step can leave this at its default.
    fn read_from_implementation(&self, digest: &str, path: &str) -> Result<Vec<u8>, Error> {
        Err(Error::NotSupported {
            message: format!("no source available for implementation '{digest}' path '{path}'"),
        })
    }
}

/// A `FetchHandle` backed by an in-memory map, for tests and for callers
/// that have already downloaded everything up front.
pub struct PrefetchedBytes(pub HashMap<String, Vec<u8>>);

impl FetchHandle for PrefetchedBytes {
    fn bytes_for(&self, href: &str) -> Result<Vec<u8>, Error> {
        self.0.get(href).cloned().ok_or_else(|| Error::ImplementationNotFound {
            digest: href.to_string(),
        })
    }
}

/// Apply a single retrieval method into `builder`.
pub fn apply_retrieval_method(
    method: &RetrievalMethod,
    fetch: &dyn FetchHandle,
    builder: &mut dyn Builder,
) -> Result<(), Error> {
    match method {
        RetrievalMethod::Archive { mime_type, extract_subdir, destination, href, .. } => {
            apply_archive(mime_type, extract_subdir.as_deref(), destination.as_deref(), href, fetch, builder)
        }
        RetrievalMethod::SingleFile { destination, executable, href } => {
            apply_single_file(destination, *executable, href, fetch, builder)
        }
        RetrievalMethod::Recipe { steps } => apply_recipe(steps, fetch, builder),
    }
}

fn apply_archive(
    mime_type: &str,
    extract_subdir: Option<&str>,
    destination: Option<&str>,
    href: &str,
    fetch: &dyn FetchHandle,
    builder: &mut dyn Builder,
) -> Result<(), Error> {
    let bytes = fetch.bytes_for(href)?;
    let mut target = dest_builder(builder, destination);
    extract_archive(mime_type, &bytes, extract_subdir, target.as_mut())
}

fn apply_single_file(
    destination: &str,
    executable: bool,
    href: &str,
    fetch: &dyn FetchHandle,
    builder: &mut dyn Builder,
) -> Result<(), Error> {
    let bytes = fetch.bytes_for(href)?;
    use std::io::Write;
    let mut writer = builder.add_file(destination, executable)?;
    writer.write_all(&bytes)?;
    Ok(())
}

/// A sequence of steps applied in order, each a self-contained
/// `RecipeStep`. `remove`/`rename`/`copy-from` only make sense relative to
/// a working tree rather than a forward-only builder, so recipes carrying
/// those are applied against a `DirectoryBuilder`'s backing root directly.
fn apply_recipe(steps: &[RecipeStep], fetch: &dyn FetchHandle, builder: &mut dyn Builder) -> Result<(), Error> {
    for step in steps {
        match step {
            RecipeStep::Archive { mime_type, extract_subdir, destination, href, .. } => {
                apply_archive(mime_type, extract_subdir.as_deref(), destination.as_deref(), href, fetch, builder)?;
            }
            RecipeStep::SingleFile { destination, executable, href } => {
                apply_single_file(destination, *executable, href, fetch, builder)?;
            }
            RecipeStep::Remove { path } => {
                builder.remove(path)?;
            }
            RecipeStep::Rename { source, destination } => {
                builder.rename(source, destination)?;
            }
            RecipeStep::CopyFrom { source, destination, from_implementation_digest } => {
                let bytes = fetch.read_from_implementation(from_implementation_digest, source)?;
                use std::io::Write as _;
                let mut writer = builder.add_file(destination, false)?;
                writer.write_all(&bytes)?;
            }
        }
    }
    Ok(())
}

fn dest_builder<'a>(builder: &'a mut dyn Builder, destination: Option<&str>) -> Box<dyn Builder + 'a> {
    match destination {
        Some(dest) => Box::new(PrefixBuilder::new(builder, dest)),
        None => Box::new(NoOpPrefix(builder)),
    }
}

/// Identity wrapper so `dest_builder` always returns a boxed trait object
/// regardless of whether a destination prefix applies.
struct NoOpPrefix<'a>(&'a mut dyn Builder);

impl ForwardOnlyBuilder for NoOpPrefix<'_> {
    fn add_directory(&mut self, path: &str) -> Result<(), Error> {
        self.0.add_directory(path)
    }
    fn add_file(&mut self, path: &str, executable: bool) -> Result<Box<dyn std::io::Write + '_>, Error> {
        self.0.add_file(path, executable)
    }
    fn add_symlink(&mut self, path: &str, target: &str) -> Result<(), Error> {
        self.0.add_symlink(path, target)
    }
    fn add_hardlink(&mut self, path: &str, source: &Path) -> Result<(), Error> {
        self.0.add_hardlink(path, source)
    }
}

impl Builder for NoOpPrefix<'_> {
    fn rename(&mut self, source: &str, destination: &str) -> Result<(), Error> {
        self.0.rename(source, destination)
    }
    fn remove(&mut self, path: &str) -> Result<(), Error> {
        self.0.remove(path)
    }
    fn mark_executable(&mut self, path: &str, executable: bool) -> Result<(), Error> {
        self.0.mark_executable(path, executable)
    }
    fn turn_into_symlink(&mut self, path: &str, target: &str) -> Result<(), Error> {
        self.0.turn_into_symlink(path, target)
    }
}
