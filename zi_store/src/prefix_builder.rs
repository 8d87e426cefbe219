//! Delegates to an inner builder with every path rewritten under a fixed
//! prefix, used for `<archive dest="...">` and recipe steps that unpack
//! into a subdirectory of the implementation tree (§4.4).

use crate::builder::{Builder, ForwardOnlyBuilder};
use std::io::Write;
use std::path::Path;
use zi_core::errors::Error;

pub struct PrefixBuilder<'a> {
    inner: &'a mut dyn Builder,
    prefix: String,
}

impl<'a> PrefixBuilder<'a> {
    pub fn new(inner: &'a mut dyn Builder, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let prefix = prefix.trim_matches('/').to_string();
        PrefixBuilder { inner, prefix }
    }

    fn rewrite(&self, path: &str) -> String {
        if self.prefix.is_empty() {
            path.to_string()
        } else if path.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}/{}", self.prefix, path)
        }
    }
}

impl ForwardOnlyBuilder for PrefixBuilder<'_> {
    fn add_directory(&mut self, path: &str) -> Result<(), Error> {
        let rewritten = self.rewrite(path);
        self.inner.add_directory(&rewritten)
    }

    fn add_file(&mut self, path: &str, executable: bool) -> Result<Box<dyn Write + '_>, Error> {
        let rewritten = self.rewrite(path);
        self.inner.add_file(&rewritten, executable)
    }

    fn add_symlink(&mut self, path: &str, target: &str) -> Result<(), Error> {
        let rewritten = self.rewrite(path);
        self.inner.add_symlink(&rewritten, target)
    }

    fn add_hardlink(&mut self, path: &str, source: &Path) -> Result<(), Error> {
        let rewritten = self.rewrite(path);
        self.inner.add_hardlink(&rewritten, source)
    }
}

impl Builder for PrefixBuilder<'_> {
    fn rename(&mut self, source: &str, destination: &str) -> Result<(), Error> {
        let source = self.rewrite(source);
        let destination = self.rewrite(destination);
        self.inner.rename(&source, &destination)
    }

    fn remove(&mut self, path: &str) -> Result<(), Error> {
        let rewritten = self.rewrite(path);
        self.inner.remove(&rewritten)
    }

    fn mark_executable(&mut self, path: &str, executable: bool) -> Result<(), Error> {
        let rewritten = self.rewrite(path);
        self.inner.mark_executable(&rewritten, executable)
    }

    fn turn_into_symlink(&mut self, path: &str, target: &str) -> Result<(), Error> {
        let rewritten = self.rewrite(path);
        self.inner.turn_into_symlink(&rewritten, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory_builder::DirectoryBuilder;

    #[test]
    fn rewrites_paths_under_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut directory = DirectoryBuilder::new(dir.path().to_path_buf()).unwrap();
        {
            let mut prefixed = PrefixBuilder::new(&mut directory, "sub/dir");
            prefixed.add_directory("inner").unwrap();
        }
        assert!(dir.path().join("sub/dir/inner").is_dir());
    }

    #[test]
    fn empty_prefix_is_a_no_op_passthrough() {
        let dir = tempfile::tempdir().unwrap();
        let mut directory = DirectoryBuilder::new(dir.path().to_path_buf()).unwrap();
        {
            let mut prefixed = PrefixBuilder::new(&mut directory, "");
            prefixed.add_directory("a").unwrap();
        }
        assert!(dir.path().join("a").is_dir());
    }
}
