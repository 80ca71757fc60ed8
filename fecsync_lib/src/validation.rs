//! Input validation for work items read from seed lists.

use std::sync::OnceLock;

use chrono::{Datelike, Utc};
use regex::Regex;
use thiserror::Error;

/// First two-year cycle with electronic OpenFEC data.
pub const MIN_CYCLE: i32 = 1976;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid committee id '{0}': expected 'C' followed by 8 digits")]
    InvalidCommitteeId(String),
    #[error("Invalid cycle {cycle}: {reason}")]
    InvalidCycle { cycle: i32, reason: String },
}

fn committee_id_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^C[0-9]{8}$").ok())
        .as_ref()
}

/// Validate a committee id, returning it trimmed and upper-cased.
pub fn validate_committee_id(input: &str) -> Result<String, ValidationError> {
    let normalized = input.trim().to_ascii_uppercase();
    if committee_id_pattern().is_some_and(|re| re.is_match(&normalized)) {
        Ok(normalized)
    } else {
        Err(ValidationError::InvalidCommitteeId(input.to_string()))
    }
}

/// Validate a two-year election cycle (even year, not beyond the next cycle).
pub fn validate_cycle(cycle: i32) -> Result<i32, ValidationError> {
    let max = Utc::now().year() + 2;
    if cycle % 2 != 0 {
        return Err(ValidationError::InvalidCycle {
            cycle,
            reason: "cycles are even years".to_string(),
        });
    }
    if !(MIN_CYCLE..=max).contains(&cycle) {
        return Err(ValidationError::InvalidCycle {
            cycle,
            reason: format!("must be between {} and {}", MIN_CYCLE, max),
        });
    }
    Ok(cycle)
}
