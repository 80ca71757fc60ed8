//! Cycle-aware committee role resolution.
//!
//! Provides CommitteeRoleResolver for finding the role (designation) a
//! committee held during a given election cycle. A committee's designation
//! changes over time, so the role in effect for the target cycle is looked up
//! in its history rather than taken from its current record.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::openfec::types::HistoryRecord;
use crate::openfec::OpenFecClient;

/// Classification of FEC committee types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleClass {
    Campaign,
    LeadershipPac,
    JointFundraising,
    Party,
    Pac,
    Other,
}

impl RoleClass {
    /// Classify a committee based on designation and committee_type.
    ///
    /// CRITICAL: Designation is checked FIRST because leadership PACs can have
    /// H/S/P committee types but are identified by designation "D".
    ///
    /// Classification rules:
    /// - designation "D" -> LeadershipPac (overrides committee_type)
    /// - designation "J" -> JointFundraising
    /// - committee_type H/S/P with designation A/P -> Campaign
    /// - committee_type X/Y/Z -> Party
    /// - committee_type N/Q/O -> Pac
    /// - Everything else -> Other
    pub fn classify(committee_type: Option<&str>, designation: Option<&str>) -> Self {
        match designation {
            Some("D") => return Self::LeadershipPac,
            Some("J") => return Self::JointFundraising,
            _ => {}
        }

        match committee_type {
            Some("H") | Some("S") | Some("P") => match designation {
                Some("A") | Some("P") => Self::Campaign,
                _ => Self::Other,
            },
            Some("X") | Some("Y") | Some("Z") => Self::Party,
            Some("N") | Some("Q") | Some("O") => Self::Pac,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for RoleClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Campaign => write!(f, "campaign"),
            Self::LeadershipPac => write!(f, "leadership_pac"),
            Self::JointFundraising => write!(f, "joint_fundraising"),
            Self::Party => write!(f, "party"),
            Self::Pac => write!(f, "pac"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// How the history record was matched to the target cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoleMatch {
    Exact,
    /// No record for the target cycle; the nearest earlier cycle was used.
    Fallback { from_cycle: i32 },
}

impl std::fmt::Display for RoleMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Fallback { from_cycle } => write!(f, "fallback:{}", from_cycle),
        }
    }
}

/// Role in effect for a committee during one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRole {
    pub committee_id: String,
    pub cycle: i32,
    pub role_code: Option<String>,
    pub type_code: Option<String>,
    pub display_name: Option<String>,
    pub class: RoleClass,
    pub match_kind: RoleMatch,
    /// Several records competed for the chosen cycle; the first was used.
    pub ambiguous: bool,
}

/// Outcome of a role lookup. `Unknown` is a valid terminal answer, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RoleResolution {
    Known(ResolvedRole),
    Unknown,
}

impl RoleResolution {
    pub fn role(&self) -> Option<&ResolvedRole> {
        match self {
            Self::Known(role) => Some(role),
            Self::Unknown => None,
        }
    }
}

/// The history record chosen for a cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoleSelection<'a> {
    pub record: &'a HistoryRecord,
    pub match_kind: RoleMatch,
    pub ambiguous: bool,
}

/// Pick the history record authoritative for `target_cycle`.
///
/// An exact cycle match always wins. Otherwise the most recent record with
/// `cycle <= target_cycle` is used. Ties within the chosen cycle resolve to the
/// first record in `history` order and are reported as ambiguous.
pub fn select_role(history: &[HistoryRecord], target_cycle: i32) -> Option<RoleSelection<'_>> {
    let chosen_cycle = if history.iter().any(|r| r.cycle == target_cycle) {
        target_cycle
    } else {
        history
            .iter()
            .map(|r| r.cycle)
            .filter(|&c| c <= target_cycle)
            .max()?
    };

    let mut candidates = history.iter().filter(|r| r.cycle == chosen_cycle);
    let record = candidates.next()?;
    let ambiguous = candidates.next().is_some();

    let match_kind = if chosen_cycle == target_cycle {
        RoleMatch::Exact
    } else {
        RoleMatch::Fallback {
            from_cycle: chosen_cycle,
        }
    };

    Some(RoleSelection {
        record,
        match_kind,
        ambiguous,
    })
}

/// Resolves cycle-specific committee roles from upstream history.
///
/// History is fetched fresh for each run and memoised only for the lifetime
/// of the resolver, since many work items share a committee.
pub struct CommitteeRoleResolver {
    client: Arc<OpenFecClient>,
    history: DashMap<String, Arc<Vec<HistoryRecord>>>,
}

impl CommitteeRoleResolver {
    pub fn new(client: Arc<OpenFecClient>) -> Self {
        Self {
            client,
            history: DashMap::new(),
        }
    }

    /// Resolve the role `committee_id` held during `cycle`.
    ///
    /// Transport failures are logged and reported as `Unknown`.
    pub async fn resolve(&self, committee_id: &str, cycle: i32) -> RoleResolution {
        let history = match self.history(committee_id).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(
                    committee_id,
                    cycle,
                    "history lookup failed, role unknown: {}",
                    e
                );
                return RoleResolution::Unknown;
            }
        };

        let Some(selection) = select_role(&history, cycle) else {
            tracing::info!(committee_id, cycle, "no history at or before cycle");
            return RoleResolution::Unknown;
        };

        if selection.ambiguous {
            tracing::warn!(
                committee_id,
                cycle,
                chosen = ?selection.record.role_code,
                "multiple history records for one cycle, using the first"
            );
        }

        let record = selection.record;
        RoleResolution::Known(ResolvedRole {
            committee_id: committee_id.to_string(),
            cycle,
            role_code: record.role_code.clone(),
            type_code: record.type_code.clone(),
            display_name: record.display_name.clone(),
            class: RoleClass::classify(record.type_code.as_deref(), record.role_code.as_deref()),
            match_kind: selection.match_kind,
            ambiguous: selection.ambiguous,
        })
    }

    async fn history(
        &self,
        committee_id: &str,
    ) -> Result<Arc<Vec<HistoryRecord>>, crate::openfec::OpenFecError> {
        if let Some(cached) = self.history.get(committee_id) {
            return Ok(Arc::clone(cached.value()));
        }

        let mut records = self.client.committee_history(committee_id).await?;
        // Stable: records sharing a cycle keep upstream order.
        records.sort_by_key(|r| r.cycle);
        let records = Arc::new(records);
        self.history
            .insert(committee_id.to_string(), Arc::clone(&records));
        Ok(records)
    }

    /// Number of committees with memoised history (for testing).
    pub fn cache_len(&self) -> usize {
        self.history.len()
    }
}
