use std::collections::BTreeMap;
use std::ops::Bound;

use bcore::model::FileRecord;

use crate::{decode, encode, Kind, Record, Store, StoreError};

/// Store that lives and dies with the process.
///
/// Records still go through the same encoding as the sqlite store so
/// anything that round trips here round trips there.
#[derive(Default)]
pub struct MemStore {
    objects: BTreeMap<String, Vec<u8>>,
    files: BTreeMap<String, Vec<u8>>,
    object_identifier: Option<String>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, kind: Kind) -> &BTreeMap<String, Vec<u8>> {
        match kind {
            Kind::Object => &self.objects,
            Kind::File => &self.files,
        }
    }
}

impl Store for MemStore {
    fn save<T: Record>(&mut self, key: &str, value: &T) -> Result<(), StoreError> {
        let data = encode(value)?;
        match T::KIND {
            Kind::Object => {
                self.objects.insert(key.to_string(), data);
                self.object_identifier = Some(key.to_string());
            }
            Kind::File => {
                self.files.insert(key.to_string(), data);
            }
        }
        Ok(())
    }

    fn get<T: Record>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.table(T::KIND).get(key) {
            None => Ok(None),
            Some(data) => Ok(Some(decode(data)?)),
        }
    }

    fn object_identifier(&self) -> Result<Option<String>, StoreError> {
        Ok(self.object_identifier.clone())
    }

    fn file_identifier_batch(&self, offset: usize, limit: usize) -> Result<Vec<String>, StoreError> {
        Ok(self.files.keys().skip(offset).take(limit).cloned().collect())
    }

    fn file_identifiers_after(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let start = match after {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        Ok(self
            .files
            .range::<str, _>((start, Bound::Unbounded))
            .take(limit)
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn clear_files(&mut self) -> Result<usize, StoreError> {
        let count = self.files.len();
        self.files.clear();
        Ok(count)
    }

    fn file_count(&self) -> Result<usize, StoreError> {
        Ok(self.files.len())
    }

    fn for_each_file<F>(&self, mut f: F) -> Result<(), StoreError>
    where
        F: FnMut(FileRecord) -> Result<(), StoreError>,
    {
        for data in self.files.values() {
            f(decode(data)?)?;
        }
        Ok(())
    }
}
