pub mod fswalk;
pub mod tarfile;

use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;
use time::OffsetDateTime;

pub use crate::fswalk::FsReader;
pub use crate::tarfile::TarReader;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("path '{0}' does not exist")]
    Missing(PathBuf),
    #[error("path '{0}' is not a directory")]
    NotADirectory(PathBuf),
    #[error("bad tar header checksum at offset {0}")]
    HeaderChecksum(u64),
    #[error("tar archive truncated at offset {0}")]
    Truncated(u64),
    #[error("cannot read '{path}': {source}")]
    Entry {
        path: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Walk(#[from] ignore::Error),
}

/// The intersection of what a tar header and a filesystem stat can tell us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    pub rel_path: String,
    // Only set for entries that live on disk
    pub abs_path: Option<PathBuf>,
    pub size: u64,
    pub modified: Option<OffsetDateTime>,
    pub is_dir: bool,
    pub is_regular_file: bool,
    pub uid: u64,
    pub gid: u64,
}

/// One entry handed to a visitor, the reader only covers this entry's bytes.
pub struct Entry<'a> {
    pub reader: &'a mut dyn Read,
    pub summary: EntrySummary,
}

/// What the visitor wants the walk to do after an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    Continue,
    Stop,
}

/// Forward only walk over every entry in a bag.
///
/// A reader is good for exactly one walk, callers that need to look at
/// the bag again must open a fresh reader over the same path.
pub trait ArchiveReader {
    /// Hands every entry to `visit` in archive order.
    ///
    /// Errors confined to one entry go to `visit` and the walk carries on.
    /// An error that loses our place in the archive ends the walk and is
    /// returned.
    fn walk(
        &mut self,
        visit: &mut dyn FnMut(Result<Entry<'_>, ArchiveError>) -> Walk,
    ) -> Result<(), ArchiveError>;

    /// Top level directory names seen so far.
    fn top_level_dirs(&self) -> &[String];
}

pub fn is_tar<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .to_str()
        .map(|p| p.ends_with(".tar"))
        .unwrap_or(false)
}

/// Open a tar or directory reader depending on what the path looks like.
pub fn open<P: AsRef<Path>>(path: P) -> Result<Box<dyn ArchiveReader>, ArchiveError> {
    let path = path.as_ref();
    if is_tar(path) {
        Ok(Box::new(TarReader::open(path)?))
    } else {
        Ok(Box::new(FsReader::open(path)?))
    }
}

/// Join path components with `/` regardless of platform
pub(crate) fn slash_path<'a, I: Iterator<Item = &'a std::ffi::OsStr>>(components: I) -> String {
    components
        .map(|c| c.to_string_lossy().into_owned())
        .collect::<Vec<String>>()
        .join("/")
}
