//! Work items, delivery units and per-item outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dedup::CanonicalFiling;
use crate::error::FailureReason;
use crate::resolver::RoleResolution;
use crate::validation::{validate_committee_id, validate_cycle, ValidationError};

/// One unit of collection work: a committee and the cycle to collect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    committee_id: String,
    cycle: i32,
}

impl WorkItem {
    /// Build a validated work item.
    pub fn new(committee_id: &str, cycle: i32) -> Result<Self, ValidationError> {
        Ok(Self {
            committee_id: validate_committee_id(committee_id)?,
            cycle: validate_cycle(cycle)?,
        })
    }

    pub fn committee_id(&self) -> &str {
        &self.committee_id
    }

    pub fn cycle(&self) -> i32 {
        self.cycle
    }

    /// Checkpoint key, `"{committee_id}:{cycle}"`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.committee_id, self.cycle)
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.committee_id, self.cycle)
    }
}

/// Everything collected for one work item, handed to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectedEntity {
    pub item: WorkItem,
    pub role: RoleResolution,
    /// One filing per distinct reporting period.
    pub filings: Vec<CanonicalFiling>,
    /// Filings discarded for missing key fields.
    pub dropped_filings: usize,
}

/// Result of processing one work item.
#[derive(Debug, Clone, PartialEq)]
pub enum FilingOutcome {
    Completed(CollectedEntity),
    /// The upstream answered successfully but had no usable filings.
    NoDataFound,
    Failed(FailureReason),
}

/// Status reported to progress observers after each item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Completed,
    NoDataFound,
    RetryableFailed,
    PermanentFailed,
    Skipped,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::NoDataFound => write!(f, "no_data"),
            Self::RetryableFailed => write!(f, "retryable_failed"),
            Self::PermanentFailed => write!(f, "permanent_failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}
