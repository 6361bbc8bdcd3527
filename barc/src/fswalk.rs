use std::fs::{File, Metadata};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use log::debug;
use time::OffsetDateTime;

use crate::{slash_path, ArchiveError, ArchiveReader, Entry, EntrySummary, Walk};

/// Reads an untarred bag from a directory tree.
///
/// The whole tree is listed up front (sorted, so every pass sees the
/// same order) and each file is only opened when we get to it. Like the
/// tar reader it is good for one walk.
pub struct FsReader {
    root: PathBuf,
    entries: Vec<PathBuf>,
    top_level_dirs: Vec<String>,
}

impl FsReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let root = path.as_ref().to_path_buf();
        if !root.exists() {
            return Err(ArchiveError::Missing(root));
        }
        if !root.is_dir() {
            return Err(ArchiveError::NotADirectory(root));
        }

        let walker = WalkBuilder::new(&root)
            .follow_links(false)
            .standard_filters(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        let mut entries = Vec::new();
        for entry in walker {
            let entry = entry?;
            // Skip the bag directory itself
            if entry.depth() == 0 {
                continue;
            }
            entries.push(entry.into_path());
        }

        let top_level_dirs = root
            .file_name()
            .map(|n| vec![n.to_string_lossy().into_owned()])
            .unwrap_or_default();

        debug!("{} entries under {}", entries.len(), root.display());

        Ok(FsReader {
            root,
            entries,
            top_level_dirs,
        })
    }

    fn rel_path(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) => slash_path(rel.iter()),
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }
}

impl FsReader {
    fn summarize(&self, path: &Path) -> Result<EntrySummary, ArchiveError> {
        let meta = std::fs::symlink_metadata(path).map_err(|e| ArchiveError::Entry {
            path: path.display().to_string(),
            source: e,
        })?;
        let (uid, gid) = owner_ids(&meta);

        Ok(EntrySummary {
            rel_path: self.rel_path(path),
            abs_path: Some(path.to_path_buf()),
            size: meta.len(),
            modified: meta.modified().ok().map(OffsetDateTime::from),
            is_dir: meta.is_dir(),
            is_regular_file: meta.file_type().is_file(),
            uid,
            gid,
        })
    }
}

impl ArchiveReader for FsReader {
    fn walk(
        &mut self,
        visit: &mut dyn FnMut(Result<Entry<'_>, ArchiveError>) -> Walk,
    ) -> Result<(), ArchiveError> {
        let entries = std::mem::take(&mut self.entries);

        for path in entries {
            // A file we cannot stat or open only costs us that file
            let summary = match self.summarize(&path) {
                Ok(s) => s,
                Err(e) => {
                    if visit(Err(e)) == Walk::Stop {
                        break;
                    }
                    continue;
                }
            };

            let next = if summary.is_regular_file {
                match File::open(&path) {
                    Ok(file) => visit(Ok(Entry {
                        reader: &mut BufReader::new(file),
                        summary,
                    })),
                    Err(e) => visit(Err(ArchiveError::Entry {
                        path: path.display().to_string(),
                        source: e,
                    })),
                }
            } else {
                visit(Ok(Entry {
                    reader: &mut io::empty(),
                    summary,
                }))
            };

            if next == Walk::Stop {
                break;
            }
        }
        Ok(())
    }

    fn top_level_dirs(&self) -> &[String] {
        &self.top_level_dirs
    }
}

#[cfg(unix)]
fn owner_ids(meta: &Metadata) -> (u64, u64) {
    use std::os::unix::fs::MetadataExt;
    (meta.uid() as u64, meta.gid() as u64)
}

#[cfg(not(unix))]
fn owner_ids(_meta: &Metadata) -> (u64, u64) {
    (0, 0)
}
