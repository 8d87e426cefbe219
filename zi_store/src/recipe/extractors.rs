//! Reference archive extractors for the MIME types 0install feeds declare
//! on `<archive>` elements. Ships unconditionally rather than behind a
//! feature flag, matching the ambient-stack dependency footprint.

use crate::builder::Builder;
use std::io::{Cursor, Read};
use zi_core::errors::Error;

/// Extract `bytes` (an archive of the given MIME type) into `builder`,
/// stripping a leading path component equal to `extract_subdir` if given
/// (i.e. unpacking only that subdirectory's contents, flattened to the
/// builder's root).
pub fn extract_archive(
    mime_type: &str,
    bytes: &[u8],
    extract_subdir: Option<&str>,
    builder: &mut dyn Builder,
) -> Result<(), Error> {
    match mime_type {
        "application/x-compressed-tar" | "application/x-tar+gzip" => {
            let decoder = flate2::read::GzDecoder::new(Cursor::new(bytes));
            extract_tar(decoder, extract_subdir, builder)
        }
        "application/x-tar" => extract_tar(Cursor::new(bytes), extract_subdir, builder),
        "application/x-bzip-compressed-tar" => Err(Error::NotSupported {
            message: "bzip2 archives are not supported".to_string(),
        }),
        "application/x-xz-compressed-tar" => {
            let decoder = xz2::read::XzDecoder::new(Cursor::new(bytes));
            extract_tar(decoder, extract_subdir, builder)
        }
        "application/zstd" | "application/x-zstd-compressed-tar" => {
            let decoder = zstd::stream::read::Decoder::new(Cursor::new(bytes))
                .map_err(|e| Error::InvalidData { message: format!("zstd error: {e}") })?;
            extract_tar(decoder, extract_subdir, builder)
        }
        "application/zip" => Err(Error::NotSupported {
            message: "zip archives are not supported".to_string(),
        }),
        other => Err(Error::NotSupported {
            message: format!("unknown archive MIME type '{other}'"),
        }),
    }
}

fn extract_tar<R: Read>(
    reader: R,
    extract_subdir: Option<&str>,
    builder: &mut dyn Builder,
) -> Result<(), Error> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| Error::InvalidData { message: format!("tar error: {e}") })?;

    for entry in entries {
        let mut entry = entry.map_err(|e| Error::InvalidData { message: format!("tar error: {e}") })?;
        let raw_path = entry
            .path()
            .map_err(|e| Error::InvalidData { message: format!("tar path error: {e}") })?
            .to_string_lossy()
            .into_owned();

        let Some(rel_path) = strip_subdir(&raw_path, extract_subdir) else {
            continue;
        };
        if rel_path.is_empty() {
            continue;
        }

        match entry.header().entry_type() {
            tar::EntryType::Directory => {
                builder.add_directory(&rel_path)?;
            }
            tar::EntryType::Regular => {
                let executable = entry.header().mode().unwrap_or(0o644) & 0o111 != 0;
                let mut writer = builder.add_file(&rel_path, executable)?;
                std::io::copy(&mut entry, &mut writer)
                    .map_err(|e| Error::Io { message: e.to_string() })?;
            }
            tar::EntryType::Symlink => {
                if let Some(link_name) = entry
                    .link_name()
                    .map_err(|e| Error::InvalidData { message: format!("tar link error: {e}") })?
                {
                    builder.add_symlink(&rel_path, &link_name.to_string_lossy())?;
                }
            }
            _ => {
                // Hardlinks, device nodes, and other exotic tar entry
                // types have no 0install manifest representation; skip.
            }
        }
    }
    Ok(())
}

fn strip_subdir(path: &str, extract_subdir: Option<&str>) -> Option<String> {
    let path = path.trim_end_matches('/');
    match extract_subdir {
        None => Some(path.to_string()),
        Some(subdir) => {
            let subdir = subdir.trim_matches('/');
            path.strip_prefix(subdir)
                .map(|rest| rest.trim_start_matches('/').to_string())
        }
    }
}
