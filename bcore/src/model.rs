use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::digest::Algorithm;

/// What role a file plays inside of a bag
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    PayloadFile,
    PayloadManifest,
    TagManifest,
    TagFile,
}

impl FileType {
    /// Classify by the path relative to the bag root.
    pub fn classify(rel_path: &str) -> FileType {
        if rel_path.starts_with("tagmanifest-") {
            FileType::TagManifest
        } else if rel_path.starts_with("manifest-") {
            FileType::PayloadManifest
        } else if rel_path.starts_with("data/") {
            FileType::PayloadFile
        } else {
            FileType::TagFile
        }
    }

    pub fn is_manifest(&self) -> bool {
        matches!(self, FileType::PayloadManifest | FileType::TagManifest)
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::PayloadFile => write!(f, "payload_file"),
            FileType::PayloadManifest => write!(f, "payload_manifest"),
            FileType::TagManifest => write!(f, "tag_manifest"),
            FileType::TagFile => write!(f, "tag_file"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub source_file: String,
    pub label: String,
    pub value: String,
}

impl Tag {
    pub fn new(source_file: &str, label: &str, value: &str) -> Self {
        Tag {
            source_file: source_file.to_string(),
            label: label.to_string(),
            value: value.to_string(),
        }
    }
}

/// The single per-bag record of a validation run.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BagObject {
    pub identifier: String,
    pub title: String,
    pub description: String,
    pub access: String,
    pub alt_identifier: String,
    pub bag_group_identifier: String,
    pub institution: String,

    pub tar_path: Option<String>,
    pub untarred_path: Option<String>,

    pub manifests: Vec<String>,
    pub tag_manifests: Vec<String>,
    pub top_level_dirs: Vec<String>,
    pub tags: Vec<Tag>,
}

impl BagObject {
    pub fn new(identifier: &str) -> Self {
        BagObject {
            identifier: identifier.to_string(),
            ..Default::default()
        }
    }

    /// All tags with exactly this label, in the order they were parsed.
    pub fn find_tags(&self, label: &str) -> Vec<&Tag> {
        self.tags.iter().filter(|t| t.label == label).collect()
    }

    /// Copy well known tag values into the object's own fields.
    pub fn promote(&mut self, tag: &Tag) {
        let label = tag.label.to_ascii_lowercase();
        let value = tag.value.clone();

        match (tag.source_file.as_str(), label.as_str()) {
            ("aptrust-info.txt", "title") => self.title = value,
            ("aptrust-info.txt", "access") => self.access = value,
            ("aptrust-info.txt", "description") => self.description = value,
            ("bag-info.txt", "source-organization") => self.institution = value,
            ("bag-info.txt", "internal-sender-description") => self.description = value,
            ("bag-info.txt", "internal-sender-identifier") => self.alt_identifier = value,
            ("bag-info.txt", "bag-group-identifier") => self.bag_group_identifier = value,
            _ => (),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub digest: String,
    #[serde(with = "timestamp")]
    pub generated_at: Option<OffsetDateTime>,
    #[serde(with = "timestamp")]
    pub verified_at: Option<OffsetDateTime>,
}

/// Per-file record, keyed by `<bag identifier>/<relative path>`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub identifier: String,
    pub path: String,
    pub file_type: FileType,

    // Computed while reading the bag
    pub checksums: BTreeMap<Algorithm, Checksum>,

    // Declared by the manifests
    pub manifest_digests: BTreeMap<Algorithm, String>,

    // Extended attributes
    pub size: Option<u64>,
    #[serde(with = "timestamp")]
    pub modified: Option<OffsetDateTime>,
    pub uid: Option<u64>,
    pub gid: Option<u64>,
    pub local_path: Option<String>,
    pub uuid: Option<Uuid>,
    #[serde(with = "timestamp")]
    pub uuid_generated_at: Option<OffsetDateTime>,
    pub file_format: Option<String>,
}

impl FileRecord {
    pub fn new(bag_identifier: &str, rel_path: &str) -> Self {
        FileRecord {
            identifier: file_identifier(bag_identifier, rel_path),
            path: rel_path.to_string(),
            file_type: FileType::classify(rel_path),
            checksums: BTreeMap::new(),
            manifest_digests: BTreeMap::new(),
            size: None,
            modified: None,
            uid: None,
            gid: None,
            local_path: None,
            uuid: None,
            uuid_generated_at: None,
            file_format: None,
        }
    }

    /// Path of the file relative to the bag root.
    pub fn original_path(&self) -> &str {
        &self.path
    }

    pub fn digest(&self, alg: Algorithm) -> Option<&str> {
        self.checksums.get(&alg).map(|c| c.digest.as_str())
    }

    pub fn in_any_manifest(&self) -> bool {
        !self.manifest_digests.is_empty()
    }
}

pub fn file_identifier(bag_identifier: &str, rel_path: &str) -> String {
    format!("{}/{}", bag_identifier, rel_path)
}

// RFC 3339 strings for JSON, time's own compact form for bincode which
// cannot decode the string adapter
mod timestamp {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use time::OffsetDateTime;

    pub fn serialize<S: Serializer>(
        value: &Option<OffsetDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            time::serde::rfc3339::option::serialize(value, serializer)
        } else {
            value.serialize(serializer)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<OffsetDateTime>, D::Error> {
        if deserializer.is_human_readable() {
            time::serde::rfc3339::option::deserialize(deserializer)
        } else {
            Option::<OffsetDateTime>::deserialize(deserializer)
        }
    }
}
