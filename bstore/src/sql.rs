use rusqlite as rs;

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use rusqlite::{Connection, ErrorCode};

use bcore::model::FileRecord;

use crate::{decode, encode, Kind, Record, Store, StoreError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

/// Sidecar database holding everything learned about one bag.
///
/// The connection runs in exclusive locking mode and takes the write
/// lock while opening, so a second validator pointed at the same bag
/// fails fast instead of interleaving writes with ours.
pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;

        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "locking_mode", "EXCLUSIVE", |row| {
            row.get::<_, String>(0)
        })?;

        conn.execute_batch(
            "BEGIN EXCLUSIVE;
             CREATE TABLE IF NOT EXISTS objects (
                identifier VARCHAR PRIMARY KEY NOT NULL,
                data BLOB NOT NULL
             );
             CREATE TABLE IF NOT EXISTS files (
                identifier VARCHAR PRIMARY KEY NOT NULL,
                data BLOB NOT NULL
             );
             CREATE TABLE IF NOT EXISTS meta (
                key VARCHAR PRIMARY KEY NOT NULL,
                value VARCHAR NOT NULL
             );
             COMMIT;",
        )
        .map_err(|e| match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                StoreError::Locked(path.clone())
            }
            _ => StoreError::Sql(e),
        })?;

        debug!("opened sidecar store {}", path.display());
        Ok(SqliteStore { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and release the lock on the sidecar.
    pub fn close(self) -> Result<(), StoreError> {
        debug!("closing sidecar store {}", self.path.display());
        self.conn.close().map_err(|(_, e)| StoreError::Sql(e))
    }
}

impl Store for SqliteStore {
    fn save<T: Record>(&mut self, key: &str, value: &T) -> Result<(), StoreError> {
        let data = encode(value)?;

        match T::KIND {
            Kind::File => {
                self.conn
                    .prepare_cached(
                        "INSERT INTO files
                         (identifier, data)
                         VALUES
                         (?, ?)
                         ON CONFLICT(identifier) DO UPDATE SET data = excluded.data",
                    )?
                    .execute(rs::params![key, data])?;
            }
            Kind::Object => {
                let tx = self.conn.transaction()?;
                tx.prepare_cached(
                    "INSERT INTO objects
                     (identifier, data)
                     VALUES
                     (?, ?)
                     ON CONFLICT(identifier) DO UPDATE SET data = excluded.data",
                )?
                .execute(rs::params![key, data])?;
                tx.prepare_cached(
                    "INSERT OR REPLACE INTO meta
                     (key, value)
                     VALUES
                     ('object_identifier', ?)",
                )?
                .execute(rs::params![key])?;
                tx.commit()?;
            }
        }
        Ok(())
    }

    fn get<T: Record>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let sql = match T::KIND {
            Kind::Object => "SELECT data FROM objects WHERE identifier = ?",
            Kind::File => "SELECT data FROM files WHERE identifier = ?",
        };

        let mut stmt = self.conn.prepare_cached(sql)?;
        let mut rows = stmt.query(rs::params![key])?;
        match rows.next()? {
            None => Ok(None),
            Some(row) => {
                let data: Vec<u8> = row.get(0)?;
                Ok(Some(decode(&data)?))
            }
        }
    }

    fn object_identifier(&self) -> Result<Option<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT value FROM meta WHERE key = 'object_identifier'")?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            None => Ok(None),
            Some(row) => Ok(Some(row.get(0)?)),
        }
    }

    fn file_identifier_batch(&self, offset: usize, limit: usize) -> Result<Vec<String>, StoreError> {
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut stmt = self.conn.prepare_cached(
            "SELECT identifier
             FROM files
             ORDER BY identifier ASC
             LIMIT ? OFFSET ?",
        )?;
        let ids = stmt
            .query_map(rs::params![limit, offset], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn file_identifiers_after(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        // Identifiers are never empty, so "" sorts before all of them
        let mut stmt = self.conn.prepare_cached(
            "SELECT identifier
             FROM files
             WHERE identifier > ?
             ORDER BY identifier ASC
             LIMIT ?",
        )?;
        let ids = stmt
            .query_map(rs::params![after.unwrap_or(""), limit], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn clear_files(&mut self) -> Result<usize, StoreError> {
        let count = self.conn.execute("DELETE FROM files", [])?;
        debug!("cleared {} file records from {}", count, self.path.display());
        Ok(count)
    }

    fn file_count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn for_each_file<F>(&self, mut f: F) -> Result<(), StoreError>
    where
        F: FnMut(FileRecord) -> Result<(), StoreError>,
    {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT data FROM files ORDER BY identifier ASC")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let data: Vec<u8> = row.get(0)?;
            f(decode(&data)?)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcore::digest::Algorithm;
    use bcore::model::{BagObject, Checksum, Tag};
    use time::OffsetDateTime;

    fn sample_file(bag: &str, path: &str) -> FileRecord {
        let mut rec = FileRecord::new(bag, path);
        rec.size = Some(10);
        rec.checksums.insert(
            Algorithm::Sha256,
            Checksum {
                digest: "feed".to_string(),
                generated_at: Some(OffsetDateTime::UNIX_EPOCH),
                verified_at: None,
            },
        );
        rec.manifest_digests
            .insert(Algorithm::Sha256, "feed".to_string());
        rec
    }

    #[test]
    fn basic_read_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqliteStore::open(dir.path().join("bag.valdb")).unwrap();

        let mut obj = BagObject::new("bag");
        obj.tags.push(Tag::new("bag-info.txt", "Source-Organization", "example.edu"));
        store.save("bag", &obj).unwrap();

        let rec = sample_file("bag", "data/a.txt");
        store.save(&rec.identifier, &rec).unwrap();

        assert_eq!(store.get_object("bag").unwrap(), Some(obj));
        assert_eq!(store.get_file("bag/data/a.txt").unwrap(), Some(rec));
        assert_eq!(store.get_file("bag/data/nope").unwrap(), None);
        assert_eq!(store.object_identifier().unwrap(), Some("bag".to_string()));
    }

    #[test]
    fn overwrite_read_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqliteStore::open(dir.path().join("bag.valdb")).unwrap();

        let mut rec = sample_file("bag", "data/a.txt");
        store.save(&rec.identifier, &rec).unwrap();

        rec.size = Some(99);
        store.save(&rec.identifier, &rec).unwrap();

        assert_eq!(store.file_count().unwrap(), 1);
        assert_eq!(store.get_file(&rec.identifier).unwrap().unwrap().size, Some(99));
    }

    #[test]
    fn batches_and_scan() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqliteStore::open(dir.path().join("bag.valdb")).unwrap();

        for path in ["data/c", "data/a", "bagit.txt", "data/b"] {
            let rec = sample_file("bag", path);
            store.save(&rec.identifier, &rec).unwrap();
        }

        assert_eq!(
            store.file_identifier_batch(0, 2).unwrap(),
            vec!["bag/bagit.txt".to_string(), "bag/data/a".to_string()]
        );
        assert_eq!(
            store.file_identifier_batch(2, 100).unwrap(),
            vec!["bag/data/b".to_string(), "bag/data/c".to_string()]
        );
        assert_eq!(store.file_identifiers().unwrap().len(), 4);

        let mut seen = Vec::new();
        store
            .for_each_file(|rec| {
                seen.push(rec.path);
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec!["bagit.txt", "data/a", "data/b", "data/c"]);

        let page = store.file_identifiers_after(Some("bag/data/a"), 10).unwrap();
        assert_eq!(page, vec!["bag/data/b".to_string(), "bag/data/c".to_string()]);
        assert_eq!(store.file_identifiers_after(None, 1).unwrap(), vec!["bag/bagit.txt"]);
    }

    #[test]
    fn timestamps_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqliteStore::open(dir.path().join("bag.valdb")).unwrap();
        let now = OffsetDateTime::now_utc();

        let mut rec = sample_file("bag", "data/a.txt");
        rec.modified = Some(now);
        rec.uuid_generated_at = Some(now);
        if let Some(checksum) = rec.checksums.get_mut(&Algorithm::Sha256) {
            checksum.verified_at = Some(now);
        }
        store.save(&rec.identifier, &rec).unwrap();

        assert_eq!(store.get_file(&rec.identifier).unwrap(), Some(rec));
    }

    #[test]
    fn clear_files_keeps_object() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqliteStore::open(dir.path().join("bag.valdb")).unwrap();

        store.save("bag", &BagObject::new("bag")).unwrap();
        for path in ["data/a", "data/b"] {
            let rec = sample_file("bag", path);
            store.save(&rec.identifier, &rec).unwrap();
        }

        assert_eq!(store.clear_files().unwrap(), 2);
        assert_eq!(store.file_count().unwrap(), 0);
        assert!(store.get_object("bag").unwrap().is_some());
        assert_eq!(store.object_identifier().unwrap(), Some("bag".to_string()));
    }

    #[test]
    fn reopen_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bag.valdb");

        let mut store = SqliteStore::open(&path).unwrap();
        store.save("bag", &BagObject::new("bag")).unwrap();
        store.close().unwrap();

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.path(), path.as_path());
        assert_eq!(store.object_identifier().unwrap(), Some("bag".to_string()));
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bag.valdb");

        let _first = SqliteStore::open(&path).unwrap();
        assert!(matches!(
            SqliteStore::open(&path),
            Err(StoreError::Locked(_))
        ));
    }
}
