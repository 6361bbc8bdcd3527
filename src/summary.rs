use time::{Duration, OffsetDateTime};

use crate::settings::Limits;

/// Outcome of one validation run.
///
/// Errors are kept in the order they were found. Once `max_errors` is
/// reached a final marker is added and anything later is dropped.
#[derive(Debug, Clone)]
pub struct Summary {
    pub attempted: bool,
    pub attempt_number: u32,
    pub started_at: Option<OffsetDateTime>,
    pub finished_at: Option<OffsetDateTime>,
    pub errors: Vec<String>,
    limits: Limits,
    full: bool,
}

impl Summary {
    pub fn new(limits: Limits) -> Self {
        Summary {
            attempted: false,
            attempt_number: 0,
            started_at: None,
            finished_at: None,
            errors: Vec::new(),
            limits,
            full: false,
        }
    }

    pub fn start(&mut self) {
        self.attempted = true;
        self.attempt_number += 1;
        self.started_at = Some(OffsetDateTime::now_utc());
        self.finished_at = None;
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(OffsetDateTime::now_utc());
    }

    pub fn add_error<S: Into<String>>(&mut self, message: S) {
        if self.full {
            return;
        }

        let mut message = message.into();
        if let Some((idx, _)) = message.char_indices().nth(self.limits.max_error_len) {
            message.truncate(idx);
            message.push_str("...");
        }
        self.errors.push(message);

        if self.limits.max_errors > 0 && self.errors.len() >= self.limits.max_errors {
            self.errors.push(format!(
                "Too many errors, stopped after {}.",
                self.limits.max_errors
            ));
            self.full = true;
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// True once the error ceiling has been hit, passes should stop.
    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn succeeded(&self) -> bool {
        self.finished_at.is_some() && !self.has_errors()
    }

    pub fn first_error(&self) -> Option<&str> {
        self.errors.first().map(|e| e.as_str())
    }

    pub fn all_errors(&self) -> String {
        self.errors.join("\n")
    }

    pub fn run_time(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
