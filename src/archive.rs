//! Gzip-compressed POSIX tar packing for directory artifacts.

use bytes::Bytes;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use snafu::prelude::*;
use std::fs;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("archive I/O error: {source}"))]
    Io { source: std::io::Error },

    #[snafu(display("archive entry has an invalid path: {path}"))]
    InvalidPath { path: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Pack a directory tree into a gzip tar. Members are stored with paths
/// relative to `src`, in name-sorted order so identical trees produce
/// identical archives.
pub fn pack_dir(src: &Path) -> Result<Bytes> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    append_tree(&mut builder, src, src)?;
    let encoder = builder.into_inner().context(IoSnafu)?;
    let data = encoder.finish().context(IoSnafu)?;
    Ok(Bytes::from(data))
}

fn append_tree(
    builder: &mut tar::Builder<GzEncoder<Vec<u8>>>,
    root: &Path,
    dir: &Path,
) -> Result<()> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .context(IoSnafu)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()
        .context(IoSnafu)?;
    paths.sort();

    for path in paths {
        let relative = path.strip_prefix(root).map_err(|_| Error::InvalidPath {
            path: path.display().to_string(),
        })?;
        let metadata = fs::symlink_metadata(&path).context(IoSnafu)?;
        if metadata.is_dir() {
            builder.append_dir(relative, &path).context(IoSnafu)?;
            append_tree(builder, root, &path)?;
        } else if metadata.is_file() {
            let mut file = fs::File::open(&path).context(IoSnafu)?;
            builder.append_file(relative, &mut file).context(IoSnafu)?;
        }
        // symlinks and special files are not archived
    }
    Ok(())
}

/// Extract a gzip tar under `dest`, recreating files and directories.
/// Other member types are ignored. Entries that would land outside
/// `dest` (absolute paths, or paths with parent components) are
/// rejected.
pub fn unpack(data: &[u8], dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(GzDecoder::new(Cursor::new(data)));
    for entry in archive.entries().context(IoSnafu)? {
        let mut entry = entry.context(IoSnafu)?;
        let relative = entry.path().context(IoSnafu)?.into_owned();
        let escapes = !relative.is_relative()
            || relative.components().any(|component| match component {
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => true,
                Component::CurDir | Component::Normal(_) => false,
            });
        if escapes {
            return InvalidPathSnafu {
                path: relative.display().to_string(),
            }
            .fail();
        }

        let target = dest.join(&relative);
        let kind = entry.header().entry_type();
        if kind.is_dir() {
            fs::create_dir_all(&target).context(IoSnafu)?;
        } else if kind.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).context(IoSnafu)?;
            }
            let mut file = fs::File::create(&target).context(IoSnafu)?;
            std::io::copy(&mut entry, &mut file).context(IoSnafu)?;
        }
    }
    Ok(())
}
