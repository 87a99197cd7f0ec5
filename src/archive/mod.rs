//! Build-context archives.
//!
//! Entries are described up front ([`TarEntry`]) but their content is only
//! read when the archive reaches them, so a large context never has to fit
//! in memory. The resulting [`ArchiveStream`] can be handed straight to a
//! request with [`into_body`]. Archives coming back from the engine are read
//! with [`untar`].

pub mod entry;
pub mod stream;
pub mod untar;

pub use entry::{
    Content, ContentStream, EntryHeader, EntryKind, TarEntry, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE,
};
pub use stream::{entries_from_dir, into_body, tar_stream, ArchiveError, ArchiveStream, BLOCK_SIZE};
pub use untar::{untar, UntarEntry, UntarStream};
