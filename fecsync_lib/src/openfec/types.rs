//! Types for OpenFEC API requests and responses.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

// ============================================================================
// Pagination
// ============================================================================

/// Page-numbered pagination block returned by list endpoints.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Pagination {
    #[serde(default)]
    pub count: i64,
    pub page: Option<u32>,
    pub pages: Option<u32>,
    #[serde(default)]
    pub per_page: i64,
}

/// One page of a list endpoint: `{results: [...], pagination: {...}}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    #[serde(default)]
    pub pagination: Pagination,
}

// ============================================================================
// Committee History
// ============================================================================

/// One cycle of a committee's history.
///
/// The designation is the committee's role for that cycle; it can change from
/// cycle to cycle, so the current record is not authoritative for older data.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HistoryRecord {
    #[serde(default)]
    pub committee_id: String,
    pub cycle: i32,
    #[serde(rename = "designation")]
    pub role_code: Option<String>,
    #[serde(rename = "committee_type")]
    pub type_code: Option<String>,
    #[serde(rename = "name")]
    pub display_name: Option<String>,
}

// ============================================================================
// Committee Reports (filings)
// ============================================================================

/// Financial totals carried on a filing. Any of them may be omitted upstream.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FilingAmounts {
    pub total_receipts: Option<f64>,
    pub total_disbursements: Option<f64>,
    #[serde(rename = "cash_on_hand_end_period")]
    pub cash_on_hand_end: Option<f64>,
}

/// A filing exactly as returned by the reports endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawFiling {
    #[serde(
        rename = "coverage_start_date",
        default,
        deserialize_with = "deserialize_fec_date"
    )]
    pub period_start: Option<NaiveDate>,
    #[serde(
        rename = "coverage_end_date",
        default,
        deserialize_with = "deserialize_fec_date"
    )]
    pub period_end: Option<NaiveDate>,
    #[serde(rename = "report_type", default)]
    pub report_kind: Option<String>,
    #[serde(rename = "amendment_indicator", default)]
    pub amendment_seq: Option<String>,
    #[serde(flatten)]
    pub amounts: FilingAmounts,
    #[serde(
        rename = "receipt_date",
        default,
        deserialize_with = "deserialize_fec_datetime"
    )]
    pub receipt_timestamp: Option<NaiveDateTime>,
    #[serde(default)]
    pub file_number: Option<i64>,
}

/// OpenFEC dates come back either as `YYYY-MM-DD` or as a midnight timestamp.
fn parse_fec_date(raw: &str) -> Option<NaiveDate> {
    let head = raw.get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

fn parse_fec_datetime(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| parse_fec_date(raw).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

fn deserialize_fec_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_fec_date))
}

fn deserialize_fec_datetime<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_fec_datetime))
}

// ============================================================================
// Query Builders
// ============================================================================

/// Query builder for the committee history endpoint.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub sort: Option<String>,
}

impl HistoryQuery {
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = Some(per_page);
        self
    }

    pub fn with_sort(mut self, sort: &str) -> Self {
        self.sort = Some(sort.to_string());
        self
    }

    /// Build query parameter pairs (excluding None values).
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();

        if let Some(page) = self.page {
            params.push(("page".to_string(), page.to_string()));
        }
        if let Some(per_page) = self.per_page {
            params.push(("per_page".to_string(), per_page.to_string()));
        }
        if let Some(ref sort) = self.sort {
            params.push(("sort".to_string(), sort.clone()));
        }

        params
    }
}

/// Query builder for the committee reports endpoint.
#[derive(Debug, Clone, Default)]
pub struct ReportsQuery {
    pub cycle: Option<i32>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub sort: Option<String>,
}

impl ReportsQuery {
    pub fn with_cycle(mut self, cycle: i32) -> Self {
        self.cycle = Some(cycle);
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = Some(per_page);
        self
    }

    pub fn with_sort(mut self, sort: &str) -> Self {
        self.sort = Some(sort.to_string());
        self
    }

    /// Build query parameter pairs (excluding None values).
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();

        if let Some(cycle) = self.cycle {
            params.push(("cycle".to_string(), cycle.to_string()));
        }
        if let Some(page) = self.page {
            params.push(("page".to_string(), page.to_string()));
        }
        if let Some(per_page) = self.per_page {
            params.push(("per_page".to_string(), per_page.to_string()));
        }
        if let Some(ref sort) = self.sort {
            params.push(("sort".to_string(), sort.clone()));
        }

        params
    }
}

// ============================================================================
// Tests
// ============================================================================
