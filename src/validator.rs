use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use log::{debug, info, warn};
use regex::Regex;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use barc::{ArchiveReader, Entry, EntrySummary, Walk};
use bcore::digest::{Algorithm, MultiDigest};
use bcore::format;
use bcore::model::{file_identifier, BagObject, Checksum, FileRecord, FileType};
use bstore::{SqliteStore, Store, StoreError};

use crate::manifest::parse_manifest;
use crate::rules::{BagValidationConfig, Presence, RuleSet, RulesError};
use crate::settings::Limits;
use crate::summary::Summary;
use crate::tagfile::parse_tags;

pub const VALIDATION_DB_SUFFIX: &str = ".valdb";

// File records are read back this many at a time during verification
const VERIFY_BATCH_SIZE: usize = 500;

static MULTIPART_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.b\d+\.of\d+$").expect("multipart suffix regex"));

#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error("Bag does not exist at {0}")]
    Missing(PathBuf),
    #[error(transparent)]
    Rules(#[from] RulesError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Bag identifier from a bag path: base name without `.tar` or a
/// multipart suffix such as `.b01.of12`.
pub fn clean_bag_name<P: AsRef<Path>>(path: P) -> String {
    let name = path
        .as_ref()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = name.strip_suffix(".tar").unwrap_or(&name);
    MULTIPART_SUFFIX.replace(name, "").into_owned()
}

enum Pass {
    Completed,
    Aborted,
}

/// Validates one bag, tarred or not, against a rule set.
pub struct Validator {
    path: PathBuf,
    rules: RuleSet,
    preserve_attributes: bool,
    limits: Limits,
    bag_identifier: String,
}

impl Validator {
    /// Fails without touching the bag if the config is bad, then checks the
    /// bag path exists.
    pub fn new<P: AsRef<Path>>(
        path: P,
        config: &BagValidationConfig,
        preserve_attributes: bool,
        limits: Limits,
    ) -> Result<Self, ValidatorError> {
        let rules = config.compile()?;
        Self::with_rules(path, rules, preserve_attributes, limits)
    }

    pub fn with_rules<P: AsRef<Path>>(
        path: P,
        rules: RuleSet,
        preserve_attributes: bool,
        limits: Limits,
    ) -> Result<Self, ValidatorError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ValidatorError::Missing(path));
        }

        Ok(Validator {
            bag_identifier: clean_bag_name(&path),
            path,
            rules,
            preserve_attributes,
            limits,
        })
    }

    pub fn bag_identifier(&self) -> &str {
        &self.bag_identifier
    }

    pub fn is_tarred(&self) -> bool {
        barc::is_tar(&self.path)
    }

    /// Path of the sidecar store for this bag.
    pub fn db_name(&self) -> PathBuf {
        let path = self.path.to_string_lossy();
        let path = match path.strip_suffix(".tar") {
            Some(p) => p,
            None => path.trim_end_matches(std::path::MAIN_SEPARATOR),
        };
        PathBuf::from(format!("{}{}", path, VALIDATION_DB_SUFFIX))
    }

    /// Run the whole validation with a sidecar store next to the bag.
    ///
    /// The store is left on disk for the caller to inspect or remove.
    pub fn validate(&self) -> Result<Summary, ValidatorError> {
        let mut store = SqliteStore::open(self.db_name())?;
        let summary = self.validate_with(&mut store);
        store.close()?;
        Ok(summary)
    }

    /// Run the whole validation against an already open store.
    pub fn validate_with<S: Store>(&self, store: &mut S) -> Summary {
        let mut run = Run {
            validator: self,
            summary: Summary::new(self.limits),
            seen_required: BTreeSet::new(),
            seen_forbidden: BTreeSet::new(),
        };
        run.summary.start();
        info!("validating {}", self.path.display());

        let mut obj = match run.init_object(store) {
            Some(obj) => obj,
            None => return run.finish(),
        };

        if let Pass::Aborted = run.add_files(store, &mut obj) {
            warn!("stopped reading {} early", self.path.display());
            return run.finish();
        }
        if let Pass::Aborted = run.parse_files(store, &mut obj) {
            warn!("stopped parsing {} early", self.path.display());
            return run.finish();
        }

        run.verify_manifest_present(&obj);
        run.verify_top_level_folder(&obj);
        run.verify_file_specs();
        run.verify_tag_specs(&obj);
        run.verify_files(store);

        run.finish()
    }
}

/// Everything one run keeps in memory. Bounded by the size of the rule
/// set, never by the number of files in the bag.
struct Run<'a> {
    validator: &'a Validator,
    summary: Summary,
    seen_required: BTreeSet<String>,
    seen_forbidden: BTreeSet<String>,
}

impl Run<'_> {
    fn finish(mut self) -> Summary {
        self.summary.finish();
        info!(
            "finished {} with {} errors",
            self.validator.path.display(),
            self.summary.errors.len()
        );
        self.summary
    }

    fn open_reader(&mut self) -> Option<Box<dyn ArchiveReader>> {
        match barc::open(&self.validator.path) {
            Ok(reader) => Some(reader),
            Err(e) => {
                self.summary
                    .add_error(format!("Error getting file iterator: {}", e));
                None
            }
        }
    }

    /// Load the object from an earlier run or start a new one.
    fn init_object<S: Store>(&mut self, store: &mut S) -> Option<BagObject> {
        let identifier = &self.validator.bag_identifier;
        let obj = match store.get_object(identifier) {
            Ok(Some(mut obj)) => {
                // Everything below is rediscovered by this run
                obj.manifests.clear();
                obj.tag_manifests.clear();
                obj.top_level_dirs.clear();
                obj.tags.clear();
                obj
            }
            Ok(None) => {
                let mut obj = BagObject::new(identifier);
                let path = self.validator.path.display().to_string();
                if self.validator.is_tarred() {
                    obj.tar_path = Some(path);
                } else {
                    obj.untarred_path = Some(path);
                }
                obj
            }
            Err(e) => {
                self.summary.add_error(format!("Could not init object: {}", e));
                return None;
            }
        };

        // Files from an earlier run may be gone from the bag by now
        match store.clear_files() {
            Ok(0) => (),
            Ok(n) => info!("dropped {} file records from an earlier run", n),
            Err(e) => {
                self.summary
                    .add_error(format!("Could not clear old file records: {}", e));
                return None;
            }
        }

        if let Err(e) = store.save(identifier, &obj) {
            self.summary.add_error(format!("Could not init object: {}", e));
            return None;
        }
        Some(obj)
    }

    fn save_object<S: Store>(&mut self, store: &mut S, obj: &BagObject) {
        if let Err(e) = store.save(&obj.identifier, obj) {
            self.summary
                .add_error(format!("Could not save object metadata: {}", e));
        }
    }

    /// Walk a fresh reader over the bag. Aborted when the reader could not
    /// be opened or the error ceiling was reached.
    fn walk_bag(
        &mut self,
        visit: &mut dyn FnMut(&mut Self, Entry<'_>) -> Walk,
    ) -> (Pass, Option<Box<dyn ArchiveReader>>) {
        let mut reader = match self.open_reader() {
            Some(r) => r,
            None => return (Pass::Aborted, None),
        };

        let result = reader.walk(&mut |entry| {
            if self.summary.is_full() {
                return Walk::Stop;
            }
            match entry {
                Ok(entry) => visit(self, entry),
                Err(e) => {
                    self.summary.add_error(e.to_string());
                    Walk::Continue
                }
            }
        });
        if let Err(e) = result {
            self.summary.add_error(e.to_string());
        }

        if self.summary.is_full() {
            (Pass::Aborted, Some(reader))
        } else {
            (Pass::Completed, Some(reader))
        }
    }

    /// First pass: one record with computed digests per regular file.
    fn add_files<S: Store>(&mut self, store: &mut S, obj: &mut BagObject) -> Pass {
        let mut count = 0;
        let (pass, reader) = self.walk_bag(&mut |run, mut entry| {
            if run.add_file(store, obj, &mut entry) {
                count += 1;
            }
            Walk::Continue
        });

        let reader = match (pass, reader) {
            (Pass::Completed, Some(reader)) => reader,
            (pass, _) => return pass,
        };

        obj.top_level_dirs = reader.top_level_dirs().to_vec();
        self.save_object(store, obj);

        info!(
            "read {} files, {} manifests, {} tag manifests",
            count,
            obj.manifests.len(),
            obj.tag_manifests.len()
        );
        Pass::Completed
    }

    /// Digest and record one entry, returns true if it was a file.
    fn add_file<S: Store>(
        &mut self,
        store: &mut S,
        obj: &mut BagObject,
        entry: &mut Entry<'_>,
    ) -> bool {
        let validator = self.validator;
        if !entry.summary.is_regular_file || entry.summary.rel_path.is_empty() {
            return false;
        }

        let mut record = FileRecord::new(obj.identifier.as_str(), &entry.summary.rel_path);
        match record.file_type {
            FileType::TagManifest => obj.tag_manifests.push(record.path.clone()),
            FileType::PayloadManifest => obj.manifests.push(record.path.clone()),
            _ => (),
        }
        if record.file_type.is_manifest() {
            record.file_format = Some(format::TEXT_PLAIN.to_string());
        }

        if validator.preserve_attributes {
            set_attributes(&mut record, &entry.summary);
        }

        match validator.rules.file_rule(&record.path).map(|r| r.presence) {
            Some(Presence::Required) => {
                self.seen_required.insert(record.path.clone());
            }
            Some(Presence::Forbidden) => {
                self.seen_forbidden.insert(record.path.clone());
            }
            _ => (),
        }

        // Keep the record even when reading it fails so it still gets reported on
        let digester = MultiDigest::new(&validator.rules.algorithms);
        match digester.digest_reader(entry.reader) {
            Ok(digests) => {
                let generated_at = validator
                    .preserve_attributes
                    .then(OffsetDateTime::now_utc);
                for (alg, digest) in digests {
                    record.checksums.insert(
                        alg,
                        Checksum {
                            digest,
                            generated_at,
                            verified_at: None,
                        },
                    );
                }
            }
            Err(e) => self
                .summary
                .add_error(format!("Error reading '{}': {}", record.path, e)),
        }

        if let Err(e) = store.save(&record.identifier, &record) {
            self.summary.add_error(format!(
                "Error saving '{}' to validation db: {}",
                record.identifier, e
            ));
        }
        debug!("added {}", record.identifier);
        true
    }

    /// Second pass: parse tag files and manifests from a fresh reader,
    /// and sniff formats of everything else when keeping attributes.
    fn parse_files<S: Store>(&mut self, store: &mut S, obj: &mut BagObject) -> Pass {
        let (pass, _) = self.walk_bag(&mut |run, entry| {
            run.parse_file(store, obj, entry);
            Walk::Continue
        });
        if let Pass::Completed = pass {
            info!("parsed {} tags", obj.tags.len());
        }
        pass
    }

    fn parse_file<S: Store>(&mut self, store: &mut S, obj: &mut BagObject, entry: Entry<'_>) {
        let validator = self.validator;
        if entry.summary.is_dir {
            return;
        }

        let rel_path = entry.summary.rel_path.as_str();
        if validator.rules.is_tag_file_to_parse(rel_path) {
            parse_tags(obj, rel_path, entry.reader, &mut self.summary);
            self.save_object(store, obj);

            if validator.preserve_attributes {
                // Only text files can be parsed as tags
                let mime = if rel_path.ends_with(".txt") {
                    format::TEXT_PLAIN
                } else {
                    format::APPLICATION_BINARY
                };
                self.set_file_format(store, rel_path, mime);
            }
        } else if obj.manifests.iter().any(|m| m == rel_path)
            || obj.tag_manifests.iter().any(|m| m == rel_path)
        {
            parse_manifest(
                store,
                &validator.bag_identifier,
                rel_path,
                entry.reader,
                &mut self.summary,
            );
        } else if validator.preserve_attributes && entry.summary.is_regular_file {
            let mut head = Vec::with_capacity(format::SNIFF_LEN);
            match entry
                .reader
                .take(format::SNIFF_LEN as u64)
                .read_to_end(&mut head)
            {
                Ok(_) => self.set_file_format(store, rel_path, format::sniff(&head)),
                Err(e) => self
                    .summary
                    .add_error(format!("Error reading '{}': {}", rel_path, e)),
            }
        }
    }

    fn set_file_format<S: Store>(&mut self, store: &mut S, rel_path: &str, mime: &str) {
        let identifier = file_identifier(&self.validator.bag_identifier, rel_path);
        let mut record = match store.get_file(&identifier) {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.summary
                    .add_error(format!("Cannot find '{}' in validation db", identifier));
                return;
            }
            Err(e) => {
                self.summary.add_error(format!(
                    "Error finding '{}' in validation db: {}",
                    identifier, e
                ));
                return;
            }
        };

        record.file_format = Some(mime.to_string());
        if let Err(e) = store.save(&identifier, &record) {
            self.summary.add_error(format!(
                "Error saving '{}' to validation db: {}",
                identifier, e
            ));
        }
    }

    fn verify_manifest_present(&mut self, obj: &BagObject) {
        if obj.manifests.is_empty() {
            self.summary.add_error("Bag contains no payload manifest.");
        }
    }

    fn verify_top_level_folder(&mut self, obj: &BagObject) {
        if !self.validator.rules.top_level_dir_must_match_bag_name {
            return;
        }
        let tar_path = match &obj.tar_path {
            Some(p) => p,
            None => return,
        };

        let base = Path::new(tar_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let expected = base.strip_suffix(".tar").unwrap_or(&base);

        for dir in &obj.top_level_dirs {
            if dir != expected {
                self.summary.add_error(format!(
                    "Tarred bag should untar to directory '{}', not '{}'",
                    expected, dir
                ));
            }
        }
    }

    fn verify_file_specs(&mut self) {
        let rules = &self.validator.rules;
        for (path, rule) in &rules.files {
            match rule.presence {
                Presence::Required if !self.seen_required.contains(path) => {
                    self.summary
                        .add_error(format!("Required file '{}' is missing.", path));
                }
                Presence::Forbidden if self.seen_forbidden.contains(path) => {
                    self.summary
                        .add_error(format!("Bag contains forbidden file '{}'.", path));
                }
                _ => (),
            }
        }
    }

    fn verify_tag_specs(&mut self, obj: &BagObject) {
        let rules = &self.validator.rules;
        for rule in &rules.tags {
            let tags = obj.find_tags(&rule.label);

            match rule.presence {
                Presence::Forbidden => {
                    if let Some(tag) = tags.first() {
                        self.summary.add_error(format!(
                            "Forbidden tag '{}' found in file '{}'.",
                            rule.label, tag.source_file
                        ));
                    }
                    continue;
                }
                Presence::Required => {
                    if tags.is_empty() {
                        self.summary
                            .add_error(format!("Required tag '{}' is missing.", rule.label));
                        continue;
                    }
                    if !rule.empty_ok && tags.iter().all(|t| t.value.is_empty()) {
                        self.summary
                            .add_error(format!("Value for tag '{}' is missing.", rule.label));
                    }
                }
                Presence::Optional => (),
            }

            if tags.is_empty() || rule.allowed_values.is_empty() {
                continue;
            }
            let allowed = |value: &str| {
                let value = value.trim().to_lowercase();
                rule.allowed_values
                    .iter()
                    .any(|a| a.trim().to_lowercase() == value)
            };
            if !tags.iter().any(|t| allowed(&t.value)) {
                let last = tags.last().map(|t| t.value.trim()).unwrap_or("");
                self.summary.add_error(format!(
                    "Tag '{}' has illegal value '{}'.",
                    rule.label, last
                ));
            }
        }
    }

    /// Read every file record back, a page of identifiers at a time.
    fn verify_files<S: Store>(&mut self, store: &mut S) {
        let mut reported_dirs = BTreeSet::new();
        let mut last: Option<String> = None;

        loop {
            let page = match store.file_identifiers_after(last.as_deref(), VERIFY_BATCH_SIZE)
            {
                Ok(page) => page,
                Err(e) => {
                    self.summary
                        .add_error(format!("Could not list files in validation db: {}", e));
                    return;
                }
            };

            for identifier in &page {
                if self.summary.is_full() {
                    return;
                }
                match store.get_file(identifier) {
                    Ok(Some(mut record)) => {
                        if self.verify_file(&mut record, &mut reported_dirs) {
                            if let Err(e) = store.save(identifier, &record) {
                                self.summary.add_error(format!(
                                    "Error saving '{}' to validation db: {}",
                                    identifier, e
                                ));
                            }
                        }
                    }
                    Ok(None) => self
                        .summary
                        .add_error(format!("Cannot find '{}' in validation db", identifier)),
                    Err(e) => self.summary.add_error(format!(
                        "Could not get file metadata for '{}' from db: {}",
                        identifier, e
                    )),
                }
            }

            match page.into_iter().last() {
                Some(id) => last = Some(id),
                None => break,
            }
        }
    }

    /// Check one record, returns true if it was changed and needs saving.
    fn verify_file(&mut self, record: &mut FileRecord, reported_dirs: &mut BTreeSet<String>) -> bool {
        let rules = &self.validator.rules;
        let mut changed = false;
        let now = OffsetDateTime::now_utc();

        for alg in &rules.algorithms {
            let declared = match record.manifest_digests.get(alg) {
                Some(d) => d,
                None => continue,
            };
            match record.checksums.get_mut(alg) {
                Some(computed) if computed.digest.eq_ignore_ascii_case(declared) => {
                    computed.verified_at = Some(now);
                    changed = true;
                }
                computed => {
                    let digest = computed.map(|c| c.digest.clone()).unwrap_or_default();
                    self.summary.add_error(format!(
                        "Bad {} digest for '{}': manifest says '{}', file digest is '{}'",
                        alg, record.path, declared, digest
                    ));
                }
            }
        }

        if record.file_type == FileType::PayloadFile && !record.in_any_manifest() {
            self.summary.add_error(format!(
                "File '{}' does not appear in any payload manifest ({})",
                record.original_path(),
                algorithm_names(&rules.algorithms)
            ));
        }

        if let Some(pattern) = &rules.file_name_pattern {
            let path = record.original_path();
            if path.split('/').any(|c| !pattern.is_match(c)) {
                self.summary.add_error(format!(
                    "Filename '{}' is not valid according to {}",
                    path,
                    pattern.detail()
                ));
            }
        }

        let path = record.original_path();
        match path.split_once('/') {
            None => {
                if !rules.allow_misc_top_level_files
                    && record.file_type == FileType::TagFile
                    && rules.file_rule(path).is_none()
                {
                    self.summary.add_error(format!(
                        "File '{}' is not allowed at the top level of the bag",
                        path
                    ));
                }
            }
            Some((dir, _)) => {
                let prefix = format!("{}/", dir);
                if !rules.allow_misc_directories
                    && dir != "data"
                    && !rules.files.keys().any(|k| k.starts_with(&prefix))
                    && reported_dirs.insert(dir.to_string())
                {
                    self.summary
                        .add_error(format!("Directory '{}' is not allowed in the bag", dir));
                }
            }
        }

        changed
    }
}

fn set_attributes(record: &mut FileRecord, summary: &EntrySummary) {
    record.size = Some(summary.size);
    record.modified = summary.modified;
    record.uid = Some(summary.uid);
    record.gid = Some(summary.gid);
    record.local_path = summary
        .abs_path
        .as_ref()
        .map(|p| p.display().to_string());
    record.uuid = Some(Uuid::new_v4());
    record.uuid_generated_at = Some(OffsetDateTime::now_utc());
}

fn algorithm_names(algorithms: &[Algorithm]) -> String {
    algorithms
        .iter()
        .map(|a| a.name())
        .collect::<Vec<&str>>()
        .join(" or ")
}
