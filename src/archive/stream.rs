//! Lazy tar generation.
//!
//! # Wire Format
//! ```text
//! per entry:  [GNU long-name header + name blocks]?  header  content  padding
//! trailer:    two zero blocks
//! ```
//! Blocks are 512 bytes. Headers are built with `tar::Header`; content bytes
//! are passed through untouched.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::time::UNIX_EPOCH;

use async_stream::try_stream;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tokio_util::io::ReaderStream;

use crate::archive::entry::{Content, EntryHeader, EntryKind, TarEntry};
use crate::client::body::{self, Body};

/// Tar block size.
pub const BLOCK_SIZE: usize = 512;

/// Longest name that fits the header's name field.
const NAME_FIELD_LEN: usize = 100;

static ZERO_BLOCKS: [u8; 2 * BLOCK_SIZE] = [0; 2 * BLOCK_SIZE];

/// Errors while producing or reading an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("invalid archive path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("entry {path:?} declared {expected} bytes but its content had {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("malformed archive: {0}")]
    Malformed(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Stream of archive bytes.
pub type ArchiveStream = Pin<Box<dyn Stream<Item = Result<Bytes, ArchiveError>> + Send>>;

/// Produce a tar archive from `entries`, one entry at a time.
///
/// Nothing is buffered beyond the chunk being emitted: an entry's header is
/// written before its content is polled, and the next entry is not touched
/// until the current one is complete.
pub fn tar_stream<I>(entries: I) -> ArchiveStream
where
    I: IntoIterator<Item = TarEntry>,
    I::IntoIter: Send + 'static,
{
    Box::pin(archive_chunks(entries.into_iter()))
}

fn archive_chunks<I>(entries: I) -> impl Stream<Item = Result<Bytes, ArchiveError>> + Send
where
    I: Iterator<Item = TarEntry> + Send + 'static,
{
    try_stream! {
        for entry in entries {
            let TarEntry { header, content } = entry;
            let path = archive_path(&header)?;

            for block in header_blocks(&path, &header) {
                yield block;
            }

            let mut written = 0u64;
            match content {
                Content::Bytes(bytes) => {
                    written = bytes.len() as u64;
                    check_size(&path, header.size, written)?;
                    if !bytes.is_empty() {
                        yield bytes;
                    }
                }
                Content::Text(text) => {
                    written = text.len() as u64;
                    check_size(&path, header.size, written)?;
                    if !text.is_empty() {
                        yield Bytes::from(text);
                    }
                }
                Content::Stream(mut stream) => {
                    while let Some(chunk) = stream.next().await {
                        let chunk = chunk?;
                        written += chunk.len() as u64;
                        if written > header.size {
                            check_size(&path, header.size, written)?;
                        }
                        yield chunk;
                    }
                    check_size(&path, header.size, written)?;
                }
            }

            let tail = (written % BLOCK_SIZE as u64) as usize;
            if tail != 0 {
                yield Bytes::from_static(&ZERO_BLOCKS[..BLOCK_SIZE - tail]);
            }
            tracing::trace!(path = %path, size = written, "Archive entry written");
        }

        yield Bytes::from_static(&ZERO_BLOCKS);
    }
}

/// Adapt an archive into a request body, e.g. for `POST /build`.
pub fn into_body(archive: ArchiveStream) -> Body {
    body::stream(archive)
}

fn check_size(path: &str, expected: u64, actual: u64) -> Result<(), ArchiveError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ArchiveError::SizeMismatch {
            path: path.to_string(),
            expected,
            actual,
        })
    }
}

/// Normalize an entry path: relative, slash-separated, no `..`.
fn archive_path(header: &EntryHeader) -> Result<String, ArchiveError> {
    let invalid = |reason| ArchiveError::InvalidPath {
        path: header.path.clone(),
        reason,
    };

    let mut parts = Vec::new();
    for part in header.path.split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => return Err(invalid("parent directory components are not allowed")),
            part => parts.push(part),
        }
    }
    if parts.is_empty() {
        return Err(invalid("path is empty"));
    }

    let mut path = parts.join("/");
    if header.kind == EntryKind::Directory {
        path.push('/');
    }
    Ok(path)
}

fn base_header(kind: tar::EntryType, size: u64, mode: u32, mtime: u64) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(kind);
    header.set_size(size);
    header.set_mode(mode);
    header.set_mtime(mtime);
    header.set_uid(0);
    header.set_gid(0);
    header
}

/// Header blocks for one entry, preceded by a GNU long-name record when the
/// path does not fit the name field.
fn header_blocks(path: &str, header: &EntryHeader) -> Vec<Bytes> {
    let kind = match header.kind {
        EntryKind::File => tar::EntryType::Regular,
        EntryKind::Directory => tar::EntryType::Directory,
    };
    let mut blocks = Vec::with_capacity(3);
    let mut main = base_header(kind, header.size, header.mode, header.mtime);

    let name = path.as_bytes();
    if name.len() <= NAME_FIELD_LEN {
        main.as_old_mut().name[..name.len()].copy_from_slice(name);
    } else {
        let mut long = base_header(tar::EntryType::GNULongName, name.len() as u64 + 1, 0o644, 0);
        let marker = b"././@LongLink";
        long.as_old_mut().name[..marker.len()].copy_from_slice(marker);
        long.set_cksum();
        blocks.push(Bytes::copy_from_slice(long.as_bytes()));

        let padded = (name.len() + 1).div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        let mut data = BytesMut::zeroed(padded);
        data[..name.len()].copy_from_slice(name);
        blocks.push(data.freeze());

        main.as_old_mut().name.copy_from_slice(&name[..NAME_FIELD_LEN]);
    }

    main.set_cksum();
    blocks.push(Bytes::copy_from_slice(main.as_bytes()));
    blocks
}

/// Build entries for `paths` under `root`, recursing into directories.
///
/// File contents are opened and read only when the archive reaches them.
pub async fn entries_from_dir<P>(root: &Path, paths: &[P]) -> Result<Vec<TarEntry>, ArchiveError>
where
    P: AsRef<Path>,
{
    let mut pending: Vec<PathBuf> = paths.iter().rev().map(|p| p.as_ref().to_path_buf()).collect();
    let mut entries = Vec::new();

    while let Some(relative) = pending.pop() {
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(ArchiveError::InvalidPath {
                path: relative.display().to_string(),
                reason: "paths must stay inside the context root",
            });
        }

        let absolute = root.join(&relative);
        let metadata = tokio::fs::metadata(&absolute).await?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        if metadata.is_dir() {
            entries.push(
                TarEntry::directory(name)
                    .with_mode(permissions(&metadata, true))
                    .with_mtime(mtime),
            );

            let mut children = Vec::new();
            let mut dir = tokio::fs::read_dir(&absolute).await?;
            while let Some(child) = dir.next_entry().await? {
                children.push(relative.join(child.file_name()));
            }
            children.sort();
            pending.extend(children.into_iter().rev());
        } else if metadata.is_file() {
            entries.push(
                TarEntry::stream(name, metadata.len(), lazy_file(absolute))
                    .with_mode(permissions(&metadata, false))
                    .with_mtime(mtime),
            );
        } else {
            tracing::debug!(path = %absolute.display(), "Skipping special file in build context");
        }
    }

    Ok(entries)
}

/// File content that is opened on first poll.
fn lazy_file(path: PathBuf) -> impl Stream<Item = io::Result<Bytes>> + Send {
    try_stream! {
        let file = tokio::fs::File::open(&path).await?;
        let mut reader = ReaderStream::new(file);
        while let Some(chunk) = reader.next().await {
            yield chunk?;
        }
    }
}

#[cfg(unix)]
fn permissions(metadata: &std::fs::Metadata, _dir: bool) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permissions(_metadata: &std::fs::Metadata, dir: bool) -> u32 {
    if dir {
        crate::archive::entry::DEFAULT_DIR_MODE
    } else {
        crate::archive::entry::DEFAULT_FILE_MODE
    }
}
