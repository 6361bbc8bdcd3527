pub mod mem;

#[cfg(feature = "sql")]
pub mod sql;

use std::io::Write;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use bcore::model::{BagObject, FileRecord};

pub use crate::mem::MemStore;
#[cfg(feature = "sql")]
pub use crate::sql::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[cfg(feature = "sql")]
    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
    #[error(transparent)]
    Encode(#[from] bincode::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("sidecar store '{0}' is held open by someone else")]
    Locked(PathBuf),
    #[error("no bag object recorded in the store")]
    NoObject,
}

// Which table a record lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Object,
    File,
}

pub trait Record: Serialize + DeserializeOwned {
    const KIND: Kind;
}

impl Record for BagObject {
    const KIND: Kind = Kind::Object;
}

impl Record for FileRecord {
    const KIND: Kind = Kind::File;
}

pub(crate) fn encode<T: Record>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(bincode::serialize(value)?)
}

pub(crate) fn decode<T: Record>(data: &[u8]) -> Result<T, StoreError> {
    Ok(bincode::deserialize(data)?)
}

/// Keyed record storage for one validation run.
///
/// There is exactly one `BagObject` and one `FileRecord` per file in the
/// bag, saving a `BagObject` also marks it as the store's current object.
pub trait Store {
    /// Insert or overwrite the record under `key`.
    fn save<T: Record>(&mut self, key: &str, value: &T) -> Result<(), StoreError>;

    fn get<T: Record>(&self, key: &str) -> Result<Option<T>, StoreError>;

    fn get_object(&self, key: &str) -> Result<Option<BagObject>, StoreError> {
        self.get(key)
    }

    fn get_file(&self, key: &str) -> Result<Option<FileRecord>, StoreError> {
        self.get(key)
    }

    /// Identifier of the last saved `BagObject`
    fn object_identifier(&self) -> Result<Option<String>, StoreError>;

    /// File identifiers in key order from `offset`, at most `limit` of them.
    fn file_identifier_batch(&self, offset: usize, limit: usize) -> Result<Vec<String>, StoreError>;

    fn file_identifiers(&self) -> Result<Vec<String>, StoreError> {
        self.file_identifier_batch(0, usize::MAX)
    }

    /// File identifiers in key order strictly after `after`, at most
    /// `limit` of them. Each page starts at its key, nothing before it is
    /// read again.
    fn file_identifiers_after(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError>;

    /// Drop every file record, keeping the object. Returns how many went.
    fn clear_files(&mut self) -> Result<usize, StoreError>;

    fn file_count(&self) -> Result<usize, StoreError>;

    /// Stream every file record in key order, one at a time.
    fn for_each_file<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnMut(FileRecord) -> Result<(), StoreError>;
}

/// Write the bag object and all of its files out as one JSON document.
///
/// Files are written one by one, a bag with a few hundred thousand
/// files never has to be held in memory.
pub fn dump_json<S: Store, W: Write>(store: &S, mut writer: W) -> Result<(), StoreError> {
    let identifier = store.object_identifier()?.ok_or(StoreError::NoObject)?;
    let obj = store.get_object(&identifier)?.ok_or(StoreError::NoObject)?;

    write!(writer, "{{\n  \"object\": ")?;
    serde_json::to_writer(&mut writer, &obj)?;
    write!(writer, ",\n  \"files\": [")?;

    let mut count = 0;
    store.for_each_file(|rec| {
        if count > 0 {
            write!(writer, ",")?;
        }
        write!(writer, "\n    ")?;
        serde_json::to_writer(&mut writer, &rec)?;
        count += 1;
        Ok(())
    })?;

    write!(writer, "\n  ]\n}}\n")?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcore::digest::Algorithm;
    use bcore::model::Checksum;
    use time::OffsetDateTime;

    #[test]
    fn dump_is_json() {
        let mut store = MemStore::new();
        let obj = BagObject::new("bag");
        store.save("bag", &obj).unwrap();

        for path in ["data/a.txt", "bagit.txt"] {
            let mut rec = FileRecord::new("bag", path);
            rec.checksums.insert(
                Algorithm::Md5,
                Checksum {
                    digest: "abc".to_string(),
                    generated_at: None,
                    verified_at: None,
                },
            );
            store.save(&rec.identifier.clone(), &rec).unwrap();
        }

        let mut out = Vec::new();
        dump_json(&store, &mut out).unwrap();

        let doc: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(doc["object"]["identifier"], "bag");
        assert_eq!(doc["files"].as_array().unwrap().len(), 2);
        assert_eq!(doc["files"][0]["path"], "bagit.txt");
        assert_eq!(doc["files"][1]["checksums"]["md5"]["digest"], "abc");
    }

    #[test]
    fn dump_timestamps_as_rfc3339() {
        let mut store = MemStore::new();
        store.save("bag", &BagObject::new("bag")).unwrap();

        let mut rec = FileRecord::new("bag", "data/a.txt");
        rec.modified = Some(OffsetDateTime::UNIX_EPOCH);
        rec.checksums.insert(
            Algorithm::Md5,
            Checksum {
                digest: "abc".to_string(),
                generated_at: Some(OffsetDateTime::UNIX_EPOCH),
                verified_at: None,
            },
        );
        store.save(&rec.identifier.clone(), &rec).unwrap();

        let mut out = Vec::new();
        dump_json(&store, &mut out).unwrap();

        let doc: serde_json::Value = serde_json::from_slice(&out).unwrap();
        let file = &doc["files"][0];
        assert_eq!(file["modified"], "1970-01-01T00:00:00Z");
        assert_eq!(file["checksums"]["md5"]["generated_at"], "1970-01-01T00:00:00Z");
        assert!(file["checksums"]["md5"]["verified_at"].is_null());

        // And back again
        let back: FileRecord = serde_json::from_value(file.clone()).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn encode_timestamps() {
        let now = OffsetDateTime::now_utc();
        let mut rec = FileRecord::new("bag", "data/a.txt");
        rec.modified = Some(now);
        rec.uuid_generated_at = Some(OffsetDateTime::UNIX_EPOCH);
        rec.checksums.insert(
            Algorithm::Sha256,
            Checksum {
                digest: "feed".to_string(),
                generated_at: Some(now),
                verified_at: Some(now),
            },
        );

        let back: FileRecord = decode(&encode(&rec).unwrap()).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn dump_needs_object() {
        let store = MemStore::new();
        let mut out = Vec::new();
        assert!(matches!(dump_json(&store, &mut out), Err(StoreError::NoObject)));
    }
}
