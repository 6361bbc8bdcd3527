use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use log::debug;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use bcore::digest::Algorithm;

// Letters, digits, dot, underscore, dash and percent escapes. No leading dash.
pub const APTRUST_FILE_NAME_PATTERN: &str = r"^[A-Za-z0-9\._%][A-Za-z0-9\-_\.%]*$";
pub const POSIX_FILE_NAME_PATTERN: &str = r"^[A-Za-z0-9\._\-]+$";

#[derive(Error, Debug)]
pub enum RulesError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("Error parsing JSON from bag validation config '{path}': {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
    #[error("BagValidationConfig has the following errors:\n{}", .0.join("\n"))]
    Invalid(Vec<String>),
    #[error("Cannot compile regex for FileNamePattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: regex::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Required,
    Optional,
    Forbidden,
}

impl FromStr for Presence {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "required" => Ok(Presence::Required),
            "optional" => Ok(Presence::Optional),
            "forbidden" => Ok(Presence::Forbidden),
            _ => Err(()),
        }
    }
}

/// Rules for the file at one path inside the bag, as written in the JSON.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct FileSpec {
    pub presence: String,
    pub parse_as_tag_file: bool,
}

/// Rules for one tag label, as written in the JSON.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct TagSpec {
    pub file_path: String,
    pub presence: String,
    #[serde(rename = "EmptyOK")]
    pub empty_ok: bool,
    pub allowed_values: Vec<String>,
}

/// The bag validation config exactly as loaded, before any checking.
///
/// Presence values and algorithm names are kept as plain strings here so
/// that `validate_config` can report every problem in one go rather than
/// stopping at the first bad entry.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "PascalCase", default)]
pub struct BagValidationConfig {
    pub file_specs: BTreeMap<String, FileSpec>,
    pub tag_specs: BTreeMap<String, TagSpec>,
    pub allow_misc_top_level_files: bool,
    pub allow_misc_directories: bool,
    pub top_level_dir_must_match_bag_name: bool,
    pub fixity_algorithms: Vec<String>,
    pub file_name_pattern: String,
}

impl Default for BagValidationConfig {
    fn default() -> Self {
        BagValidationConfig {
            file_specs: BTreeMap::new(),
            tag_specs: BTreeMap::new(),
            allow_misc_top_level_files: true,
            allow_misc_directories: true,
            top_level_dir_must_match_bag_name: true,
            fixity_algorithms: vec!["md5".to_string(), "sha256".to_string()],
            file_name_pattern: String::new(),
        }
    }
}

impl BagValidationConfig {
    pub fn from_json(data: &str, origin: &str) -> Result<Self, RulesError> {
        serde_json::from_str(data).map_err(|e| RulesError::Json {
            path: origin.to_string(),
            source: e,
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RulesError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)?;
        Self::from_json(&data, &path.display().to_string())
    }

    /// Every internal inconsistency in the config, empty if there are none.
    pub fn validate_config(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (path, spec) in &self.file_specs {
            if spec.presence.parse::<Presence>().is_err() {
                errors.push(format!(
                    "FileSpec for file '{}' has invalid presence value '{}'.",
                    path, spec.presence
                ));
            }
        }

        for spec in self.tag_specs.values() {
            if spec.file_path.is_empty() || spec.presence.parse::<Presence>().is_err() {
                errors.push(format!(
                    "TagSpec for file '{}' requires non-empty FilePath and valid presence value.",
                    spec.file_path
                ));
            }
        }

        for name in &self.fixity_algorithms {
            if let Err(e) = name.parse::<Algorithm>() {
                errors.push(format!("FixityAlgorithms: {}.", e));
            }
        }

        errors
    }

    /// Check the config and turn it into an immutable `RuleSet`.
    pub fn compile(&self) -> Result<RuleSet, RulesError> {
        let errors = self.validate_config();
        if !errors.is_empty() {
            return Err(RulesError::Invalid(errors));
        }

        let mut files = BTreeMap::new();
        for (path, spec) in &self.file_specs {
            files.insert(
                path.clone(),
                FileRule {
                    presence: parse_presence(&spec.presence)?,
                    parse_as_tag_file: spec.parse_as_tag_file,
                },
            );
        }

        let mut tags = Vec::new();
        for (label, spec) in &self.tag_specs {
            tags.push(TagRule {
                label: label.clone(),
                file_path: spec.file_path.clone(),
                presence: parse_presence(&spec.presence)?,
                empty_ok: spec.empty_ok,
                allowed_values: spec.allowed_values.clone(),
            });
        }

        let mut algorithms: Vec<Algorithm> = Vec::new();
        for name in &self.fixity_algorithms {
            let alg = name
                .parse::<Algorithm>()
                .map_err(|e| RulesError::Invalid(vec![e.to_string()]))?;
            if !algorithms.contains(&alg) {
                algorithms.push(alg);
            }
        }

        let file_name_pattern = FileNamePattern::compile(&self.file_name_pattern)?;

        debug!(
            "compiled rule set: {} file rules, {} tag rules, algorithms {:?}",
            files.len(),
            tags.len(),
            algorithms
        );

        Ok(RuleSet {
            files,
            tags,
            allow_misc_top_level_files: self.allow_misc_top_level_files,
            allow_misc_directories: self.allow_misc_directories,
            top_level_dir_must_match_bag_name: self.top_level_dir_must_match_bag_name,
            algorithms,
            file_name_pattern,
        })
    }
}

fn parse_presence(value: &str) -> Result<Presence, RulesError> {
    value
        .parse()
        .map_err(|_| RulesError::Invalid(vec![format!("invalid presence value '{}'", value)]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRule {
    pub presence: Presence,
    pub parse_as_tag_file: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRule {
    pub label: String,
    pub file_path: String,
    pub presence: Presence,
    pub empty_ok: bool,
    pub allowed_values: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum FileNamePattern {
    Aptrust(Regex),
    Posix(Regex),
    Custom(Regex),
}

impl FileNamePattern {
    /// `APTRUST` and `POSIX` (any case) name the built in patterns, anything
    /// else non-empty is compiled as a regex.
    pub fn compile(pattern: &str) -> Result<Option<FileNamePattern>, RulesError> {
        let compile = |p: &str| {
            Regex::new(p).map_err(|e| RulesError::Pattern {
                pattern: pattern.to_string(),
                source: e,
            })
        };

        match pattern.to_ascii_uppercase().as_str() {
            "" => Ok(None),
            "APTRUST" => Ok(Some(FileNamePattern::Aptrust(compile(
                APTRUST_FILE_NAME_PATTERN,
            )?))),
            "POSIX" => Ok(Some(FileNamePattern::Posix(compile(POSIX_FILE_NAME_PATTERN)?))),
            _ => Ok(Some(FileNamePattern::Custom(compile(pattern)?))),
        }
    }

    pub fn is_match(&self, name: &str) -> bool {
        match self {
            FileNamePattern::Aptrust(re) | FileNamePattern::Posix(re) | FileNamePattern::Custom(re) => {
                re.is_match(name)
            }
        }
    }

    /// Which rules a bad name broke, for error messages.
    pub fn detail(&self) -> String {
        match self {
            FileNamePattern::Aptrust(_) => "APTrust validation rules".to_string(),
            FileNamePattern::Posix(_) => "POSIX validation rules".to_string(),
            FileNamePattern::Custom(re) => format!("validation pattern {}", re.as_str()),
        }
    }
}

/// Compiled, immutable validation rules.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub files: BTreeMap<String, FileRule>,
    // Ordered by label
    pub tags: Vec<TagRule>,
    pub allow_misc_top_level_files: bool,
    pub allow_misc_directories: bool,
    pub top_level_dir_must_match_bag_name: bool,
    pub algorithms: Vec<Algorithm>,
    pub file_name_pattern: Option<FileNamePattern>,
}

impl RuleSet {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<RuleSet, RulesError> {
        BagValidationConfig::load(path)?.compile()
    }

    pub fn from_json(data: &str) -> Result<RuleSet, RulesError> {
        BagValidationConfig::from_json(data, "<string>")?.compile()
    }

    pub fn file_rule(&self, path: &str) -> Option<&FileRule> {
        self.files.get(path)
    }

    pub fn is_tag_file_to_parse(&self, path: &str) -> bool {
        self.files
            .get(path)
            .map(|rule| rule.parse_as_tag_file)
            .unwrap_or(false)
    }

    pub fn computes(&self, alg: Algorithm) -> bool {
        self.algorithms.contains(&alg)
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        RuleSet {
            files: BTreeMap::new(),
            tags: Vec::new(),
            allow_misc_top_level_files: true,
            allow_misc_directories: true,
            top_level_dir_must_match_bag_name: true,
            algorithms: vec![Algorithm::Md5, Algorithm::Sha256],
            file_name_pattern: None,
        }
    }
}
