use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path};

use log::debug;
use tar::{Archive, Header};
use time::OffsetDateTime;

use bcore::buf::fill_buf;

use crate::{slash_path, ArchiveError, ArchiveReader, Entry, EntrySummary, Walk};

const BLOCK_SIZE: usize = 512;

type TarEntry<'a> = tar::Entry<'a, BufReader<File>>;

/// Reads a tarred bag straight off disk without untarring it.
///
/// Headers, GNU long names and PAX overrides are decoded by `tar` over a
/// single file handle, so this is single pass: once walked it is spent.
pub struct TarReader {
    archive: Option<Archive<BufReader<File>>>,
    top_level_dirs: Vec<String>,
}

impl TarReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ArchiveError::Missing(path.to_path_buf()));
        }

        // Check the first header up front, a garbage archive fails here
        // instead of halfway through a pass
        let mut file = File::open(path)?;
        let mut block = [0u8; BLOCK_SIZE];
        match fill_buf(&mut file, &mut block)? {
            (true, 0) => (),
            (true, _) => return Err(ArchiveError::Truncated(0)),
            (false, _) => {
                if !is_zero(&block) {
                    verify_checksum(&block, 0)?;
                }
            }
        }
        file.seek(SeekFrom::Start(0))?;

        Ok(TarReader {
            archive: Some(Archive::new(BufReader::new(file))),
            top_level_dirs: Vec::new(),
        })
    }

    fn set_top_level_dir(&mut self, name: &str) {
        if !self.top_level_dirs.iter().any(|d| d == name) {
            self.top_level_dirs.push(name.to_string());
        }
    }
}

impl ArchiveReader for TarReader {
    fn walk(
        &mut self,
        visit: &mut dyn FnMut(Result<Entry<'_>, ArchiveError>) -> Walk,
    ) -> Result<(), ArchiveError> {
        let mut archive = match self.archive.take() {
            Some(a) => a,
            None => return Ok(()),
        };

        // Any header error means we lost our place in the stream
        for entry in archive.entries()? {
            let mut entry = entry?;
            let (top_level, summary) = summarize(&mut entry)?;
            if let Some(top) = &top_level {
                self.set_top_level_dir(top);
            }

            debug!("tar entry: {} ({} bytes)", summary.rel_path, summary.size);

            // Unread bytes are skipped by the next header read
            let next = visit(Ok(Entry {
                reader: &mut entry,
                summary,
            }));
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

// Size, uid and gid already carry any PAX override, mtime does not
fn summarize(entry: &mut TarEntry<'_>) -> Result<(Option<String>, EntrySummary), ArchiveError> {
    let name = entry.path()?.to_string_lossy().into_owned();
    let (top_level, rel_path) = split_name(&name);

    let mtime = match pax_mtime(entry)? {
        Some(t) => Some(t),
        None => entry.header().mtime().ok().map(|t| t as i64),
    };

    let header = entry.header();
    let entry_type = header.entry_type();
    let summary = EntrySummary {
        rel_path,
        abs_path: None,
        size: entry.size(),
        modified: mtime.and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok()),
        is_dir: entry_type.is_dir(),
        is_regular_file: entry_type.is_file(),
        uid: header.uid().unwrap_or(0),
        gid: header.gid().unwrap_or(0),
    };
    Ok((top_level, summary))
}

fn pax_mtime(entry: &mut TarEntry<'_>) -> Result<Option<i64>, ArchiveError> {
    let extensions = match entry.pax_extensions()? {
        Some(e) => e,
        None => return Ok(None),
    };

    for extension in extensions {
        let extension = extension?;
        if extension.key() == Ok("mtime") {
            return Ok(extension.value().ok().and_then(parse_pax_time));
        }
    }
    Ok(None)
}

// "1350244992.023960108" -> 1350244992, whole seconds like the ustar field
fn parse_pax_time(value: &str) -> Option<i64> {
    value.split('.').next()?.parse().ok()
}

fn is_zero(block: &[u8]) -> bool {
    block.iter().all(|b| *b == 0)
}

fn verify_checksum(block: &[u8; BLOCK_SIZE], offset: u64) -> Result<(), ArchiveError> {
    let header = Header::from_byte_slice(block);
    let expected = header
        .cksum()
        .map_err(|_| ArchiveError::HeaderChecksum(offset))?;

    // The checksum field itself is summed as if it were all spaces
    let actual: u32 = block[..148]
        .iter()
        .chain(&[b' '; 8])
        .chain(&block[156..])
        .map(|b| *b as u32)
        .sum();

    if actual != expected {
        return Err(ArchiveError::HeaderChecksum(offset));
    }
    Ok(())
}

// "bag/data/file.txt" -> ("bag", "data/file.txt")
fn split_name(name: &str) -> (Option<String>, String) {
    let mut components = Path::new(name).components().filter_map(|c| match c {
        Component::Normal(c) => Some(c),
        _ => None,
    });

    let top = components
        .next()
        .map(|c| c.to_string_lossy().into_owned());
    (top, slash_path(components))
}
