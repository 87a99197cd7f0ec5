use std::fmt;
use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;

/// Default permission bits for regular files.
pub const DEFAULT_FILE_MODE: u32 = 0o644;
/// Default permission bits for directories.
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Content that is produced while the archive is being written.
pub type ContentStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Header fields for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    /// Slash-separated path relative to the archive root.
    pub path: String,
    pub size: u64,
    pub mode: u32,
    /// Seconds since the Unix epoch.
    pub mtime: u64,
    pub kind: EntryKind,
}

pub enum Content {
    Bytes(Bytes),
    Text(String),
    /// Streamed as-is; must yield exactly `header.size` bytes.
    Stream(ContentStream),
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Content::Text(s) => f.debug_tuple("Text").field(&s.len()).finish(),
            Content::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// One archive member.
#[derive(Debug)]
pub struct TarEntry {
    pub header: EntryHeader,
    pub content: Content,
}

impl TarEntry {
    /// A regular file with in-memory content.
    pub fn file(path: impl Into<String>, content: impl Into<Bytes>) -> Self {
        let content = content.into();
        Self {
            header: EntryHeader {
                path: path.into(),
                size: content.len() as u64,
                mode: DEFAULT_FILE_MODE,
                mtime: 0,
                kind: EntryKind::File,
            },
            content: Content::Bytes(content),
        }
    }

    /// A regular file holding UTF-8 text.
    pub fn text(path: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            header: EntryHeader {
                path: path.into(),
                size: text.len() as u64,
                mode: DEFAULT_FILE_MODE,
                mtime: 0,
                kind: EntryKind::File,
            },
            content: Content::Text(text),
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            header: EntryHeader {
                path: path.into(),
                size: 0,
                mode: DEFAULT_DIR_MODE,
                mtime: 0,
                kind: EntryKind::Directory,
            },
            content: Content::Bytes(Bytes::new()),
        }
    }

    /// A regular file whose `size` bytes come from `stream`.
    pub fn stream<S>(path: impl Into<String>, size: u64, stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            header: EntryHeader {
                path: path.into(),
                size,
                mode: DEFAULT_FILE_MODE,
                mtime: 0,
                kind: EntryKind::File,
            },
            content: Content::Stream(Box::pin(stream)),
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.header.mode = mode;
        self
    }

    pub fn with_mtime(mut self, mtime: u64) -> Self {
        self.header.mtime = mtime;
        self
    }
}
