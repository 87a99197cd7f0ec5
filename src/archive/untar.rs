//! Reading archives sent by the engine, e.g. `GET /containers/{id}/archive`.
//!
//! The body is parsed block by block. Each entry is yielded once its content
//! has arrived, so only one entry is held in memory at a time.

use std::io;
use std::pin::Pin;

use async_stream::try_stream;
use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;

use crate::archive::entry::{EntryHeader, EntryKind};
use crate::archive::stream::{ArchiveError, BLOCK_SIZE};
use crate::client::body::BoxError;

/// Largest GNU long-name or PAX record accepted.
const MAX_METADATA_BYTES: u64 = 64 * 1024;

/// One member read back from an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UntarEntry {
    pub header: EntryHeader,
    pub content: Bytes,
}

/// Stream of entries decoded from an archive body.
pub type UntarStream = Pin<Box<dyn Stream<Item = Result<UntarEntry, ArchiveError>> + Send>>;

/// Decode a tar body into its regular files and directories.
///
/// GNU long names and PAX `path` records are applied to the entry they
/// precede. Links and special files are skipped. The archive ends at the
/// first zero block or at a clean end of input on a block boundary.
pub fn untar<S, E>(body: S) -> UntarStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    let reader = StreamReader::new(body.map_err(|e| io::Error::other::<BoxError>(e.into())));
    Box::pin(entries(Box::pin(reader)))
}

fn entries<R>(mut reader: R) -> impl Stream<Item = Result<UntarEntry, ArchiveError>> + Send
where
    R: AsyncRead + Unpin + Send + 'static,
{
    try_stream! {
        let mut pending_name: Option<String> = None;

        while let Some(header) = read_header(&mut reader).await? {
            let kind = header.entry_type();
            let size = header.entry_size().map_err(|e| malformed(e.to_string()))?;

            if kind.is_gnu_longname() || kind.is_pax_local_extensions() {
                if size > MAX_METADATA_BYTES {
                    Err::<(), _>(malformed(format!("metadata record of {size} bytes")))?;
                }
                let data = read_content(&mut reader, size).await?;
                pending_name = if kind.is_gnu_longname() {
                    Some(long_name(&data))
                } else {
                    pax_path(&data)?.or(pending_name)
                };
                continue;
            }

            let content = read_content(&mut reader, size).await?;
            let path = match pending_name.take() {
                Some(name) => name,
                None => String::from_utf8_lossy(&header.path_bytes()).into_owned(),
            };

            let kind = if kind.is_file() || kind == tar::EntryType::Continuous {
                EntryKind::File
            } else if kind.is_dir() {
                EntryKind::Directory
            } else {
                tracing::debug!(path = %path, kind = ?kind, "Skipping archive member");
                continue;
            };

            yield UntarEntry {
                header: EntryHeader {
                    path: path.trim_end_matches('/').to_string(),
                    size,
                    mode: header.mode().map_err(|e| malformed(e.to_string()))?,
                    mtime: header.mtime().map_err(|e| malformed(e.to_string()))?,
                    kind,
                },
                content,
            };
        }
    }
}

fn malformed(reason: impl Into<String>) -> ArchiveError {
    ArchiveError::Malformed(reason.into())
}

/// Next header block, or `None` at the end of the archive.
async fn read_header<R>(reader: &mut R) -> Result<Option<tar::Header>, ArchiveError>
where
    R: AsyncRead + Unpin,
{
    let mut header = tar::Header::new_old();
    let block = header.as_mut_bytes();

    let mut filled = 0;
    while filled < BLOCK_SIZE {
        let n = reader.read(&mut block[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    match filled {
        0 => return Ok(None),
        BLOCK_SIZE => {}
        _ => return Err(malformed("archive ends inside a header block")),
    }
    if block.iter().all(|b| *b == 0) {
        return Ok(None);
    }

    let expected = header.cksum().map_err(|e| malformed(e.to_string()))?;
    let actual = checksum(header.as_bytes());
    if expected != actual {
        return Err(malformed(format!("header checksum {expected} does not match {actual}")));
    }
    Ok(Some(header))
}

/// Header checksum with the checksum field itself read as spaces.
fn checksum(block: &[u8; BLOCK_SIZE]) -> u32 {
    block
        .iter()
        .enumerate()
        .map(|(i, b)| if (148..156).contains(&i) { u32::from(b' ') } else { u32::from(*b) })
        .sum()
}

/// Read `size` content bytes and the padding that follows them.
async fn read_content<R>(reader: &mut R, size: u64) -> Result<Bytes, ArchiveError>
where
    R: AsyncRead + Unpin,
{
    let mut content = Vec::new();
    (&mut *reader).take(size).read_to_end(&mut content).await?;
    if content.len() as u64 != size {
        return Err(malformed(format!(
            "entry content ends after {} of {size} bytes",
            content.len()
        )));
    }

    let padding = (BLOCK_SIZE - (size % BLOCK_SIZE as u64) as usize) % BLOCK_SIZE;
    let mut skip = [0u8; BLOCK_SIZE];
    reader
        .read_exact(&mut skip[..padding])
        .await
        .map_err(|_| malformed("archive ends inside entry padding"))?;
    Ok(Bytes::from(content))
}

fn long_name(data: &[u8]) -> String {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

fn pax_path(data: &[u8]) -> Result<Option<String>, ArchiveError> {
    let mut path = None;
    for record in tar::PaxExtensions::new(data) {
        let record = record.map_err(|e| malformed(e.to_string()))?;
        if record.key_bytes() == b"path" {
            path = Some(String::from_utf8_lossy(record.value_bytes()).into_owned());
        }
    }
    Ok(path)
}
