pub mod lines;
pub mod manifest;
pub mod rules;
pub mod settings;
pub mod summary;
pub mod tagfile;
pub mod validator;

#[cfg(test)]
mod testbag;

pub use crate::rules::{BagValidationConfig, RuleSet, RulesError};
pub use crate::settings::{Limits, Settings};
pub use crate::summary::Summary;
pub use crate::validator::{Validator, ValidatorError};
