//! Amendment-chain collapsing for committee filings.
//!
//! Filings covering the same `(report_kind, period_start, period_end)` form an
//! amendment chain; only the latest amendment is authoritative. Collapsing is a
//! pure in-memory pass with no network access.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::openfec::types::RawFiling;

/// Grouping key for an amendment chain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FilingKey {
    pub report_kind: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

impl FilingKey {
    /// Extract the key, or name the first missing field.
    pub fn of(filing: &RawFiling) -> Result<Self, MissingKeyField> {
        let report_kind = filing
            .report_kind
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(MissingKeyField::ReportKind)?;
        let period_start = filing.period_start.ok_or(MissingKeyField::PeriodStart)?;
        let period_end = filing.period_end.ok_or(MissingKeyField::PeriodEnd)?;
        Ok(Self {
            report_kind: report_kind.to_string(),
            period_start,
            period_end,
        })
    }
}

impl fmt::Display for FilingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}..{}", self.report_kind, self.period_start, self.period_end)
    }
}

/// Key field a filing was missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingKeyField {
    ReportKind,
    PeriodStart,
    PeriodEnd,
}

impl fmt::Display for MissingKeyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReportKind => write!(f, "missing report kind"),
            Self::PeriodStart => write!(f, "missing period start"),
            Self::PeriodEnd => write!(f, "missing period end"),
        }
    }
}

/// Position of a filing in its amendment chain.
///
/// Absent or empty = 0 (the original filing), `A` = 1, `B` = 2, and so on.
/// Anything that is not a single letter is treated as 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AmendmentRank(u8);

impl AmendmentRank {
    pub const INITIAL: Self = Self(0);

    pub fn parse(code: Option<&str>) -> Self {
        let code = match code.map(str::trim) {
            Some(c) if !c.is_empty() => c,
            _ => return Self::INITIAL,
        };
        let mut chars = code.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphabetic() => {
                Self(c.to_ascii_uppercase() as u8 - b'A' + 1)
            }
            _ => Self::INITIAL,
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

/// The authoritative filing for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalFiling {
    pub key: FilingKey,
    pub filing: RawFiling,
    /// Number of other filings in the chain this one replaced.
    pub superseded: usize,
}

/// A filing excluded because it could not be grouped.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedFiling {
    pub filing: RawFiling,
    pub reason: MissingKeyField,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupOutcome {
    /// One entry per distinct key, sorted by key.
    pub canonical: Vec<CanonicalFiling>,
    pub dropped: Vec<DroppedFiling>,
}

/// Total order used to pick the winner of an amendment chain: amendment rank
/// first, then receipt timestamp (absent sorts lowest).
fn chain_order(a: &RawFiling, b: &RawFiling) -> Ordering {
    AmendmentRank::parse(a.amendment_seq.as_deref())
        .cmp(&AmendmentRank::parse(b.amendment_seq.as_deref()))
        .then_with(|| a.receipt_timestamp.cmp(&b.receipt_timestamp))
}

/// Collapse a batch of filings to one canonical filing per key.
///
/// Within a chain the highest amendment wins, ties go to the later receipt,
/// and a full tie keeps the first filing seen. Filings missing a key field are
/// returned in `dropped`.
pub fn dedupe(filings: &[RawFiling]) -> DedupOutcome {
    let mut chains: BTreeMap<FilingKey, (usize, usize)> = BTreeMap::new();
    let mut dropped = Vec::new();

    for (idx, filing) in filings.iter().enumerate() {
        let key = match FilingKey::of(filing) {
            Ok(key) => key,
            Err(reason) => {
                tracing::warn!(
                    file_number = ?filing.file_number,
                    "dropping filing that cannot be grouped: {}",
                    reason
                );
                dropped.push(DroppedFiling {
                    filing: filing.clone(),
                    reason,
                });
                continue;
            }
        };

        chains
            .entry(key)
            .and_modify(|(winner, size)| {
                *size += 1;
                if chain_order(filing, &filings[*winner]) == Ordering::Greater {
                    *winner = idx;
                }
            })
            .or_insert((idx, 1));
    }

    let canonical = chains
        .into_iter()
        .map(|(key, (winner, size))| CanonicalFiling {
            key,
            filing: filings[winner].clone(),
            superseded: size - 1,
        })
        .collect();

    DedupOutcome { canonical, dropped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use std::collections::HashSet;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ts(day: u32, hour: u32) -> NaiveDateTime {
        date(2024, 5, day).and_hms_opt(hour, 0, 0).unwrap()
    }

    fn filing(kind: &str, start: NaiveDate, end: NaiveDate, seq: &str, day: u32) -> RawFiling {
        RawFiling {
            period_start: Some(start),
            period_end: Some(end),
            report_kind: Some(kind.to_string()),
            amendment_seq: if seq.is_empty() { None } else { Some(seq.to_string()) },
            receipt_timestamp: Some(ts(day, 9)),
            file_number: Some(day as i64),
            ..RawFiling::default()
        }
    }

    fn q1(seq: &str, day: u32) -> RawFiling {
        filing("Q1", date(2024, 1, 1), date(2024, 3, 31), seq, day)
    }

    fn q2(seq: &str, day: u32) -> RawFiling {
        filing("Q2", date(2024, 4, 1), date(2024, 6, 30), seq, day)
    }

    #[test]
    fn rank_ordering() {
        assert_eq!(AmendmentRank::parse(None), AmendmentRank::INITIAL);
        assert_eq!(AmendmentRank::parse(Some("")), AmendmentRank::INITIAL);
        assert_eq!(AmendmentRank::parse(Some("A")).value(), 1);
        assert_eq!(AmendmentRank::parse(Some("b")).value(), 2);
        assert!(AmendmentRank::parse(Some("C")) > AmendmentRank::parse(Some("B")));
        assert!(AmendmentRank::parse(Some("A")) > AmendmentRank::INITIAL);
    }

    #[test]
    fn unrecognized_codes_rank_as_initial() {
        for code in ["AMENDED", "1", "A1", "*", "  "] {
            assert_eq!(AmendmentRank::parse(Some(code)), AmendmentRank::INITIAL, "{code}");
        }
    }

    #[test]
    fn one_record_per_distinct_key() {
        let batch = vec![
            q1("", 1),
            q2("", 2),
            q1("A", 3),
            filing("YE", date(2023, 7, 1), date(2023, 12, 31), "", 4),
            q2("A", 5),
            q1("B", 6),
        ];
        let out = dedupe(&batch);
        let keys: HashSet<_> = batch.iter().filter_map(|f| FilingKey::of(f).ok()).collect();
        assert_eq!(out.canonical.len(), keys.len());
        assert_eq!(out.canonical.len(), 3);
        let out_keys: HashSet<_> = out.canonical.iter().map(|c| c.key.clone()).collect();
        assert_eq!(out_keys, keys);
    }

    #[test]
    fn highest_amendment_wins_in_any_input_order() {
        let chain = [q1("", 1), q1("A", 2), q1("B", 3), q1("C", 4)];
        let orders: [[usize; 4]; 6] = [
            [0, 1, 2, 3],
            [3, 2, 1, 0],
            [1, 3, 0, 2],
            [2, 0, 3, 1],
            [3, 0, 1, 2],
            [0, 3, 2, 1],
        ];
        for order in orders {
            let batch: Vec<_> = order.iter().map(|&i| chain[i].clone()).collect();
            let out = dedupe(&batch);
            assert_eq!(out.canonical.len(), 1);
            assert_eq!(out.canonical[0].filing.amendment_seq.as_deref(), Some("C"));
            assert_eq!(out.canonical[0].superseded, 3);
        }
    }

    #[test]
    fn equal_sequence_later_receipt_wins() {
        let earlier = q1("A", 3);
        let later = q1("A", 7);
        for batch in [vec![earlier.clone(), later.clone()], vec![later.clone(), earlier.clone()]] {
            let out = dedupe(&batch);
            assert_eq!(out.canonical[0].filing.receipt_timestamp, Some(ts(7, 9)));
        }
    }

    #[test]
    fn missing_receipt_loses_tie() {
        let mut undated = q1("B", 1);
        undated.receipt_timestamp = None;
        let dated = q1("B", 2);
        let out = dedupe(&[undated, dated]);
        assert_eq!(out.canonical[0].filing.file_number, Some(2));
    }

    #[test]
    fn full_tie_keeps_first_seen() {
        let mut first = q1("A", 4);
        first.file_number = Some(100);
        let mut second = q1("A", 4);
        second.file_number = Some(200);
        let out = dedupe(&[first, second]);
        assert_eq!(out.canonical[0].filing.file_number, Some(100));
    }

    #[test]
    fn records_missing_key_fields_are_dropped() {
        let mut no_kind = q1("", 1);
        no_kind.report_kind = Some("   ".to_string());
        let mut no_start = q1("", 2);
        no_start.period_start = None;
        let mut no_end = q1("", 3);
        no_end.period_end = None;

        let out = dedupe(&[no_kind, no_start, q2("", 4), no_end]);
        assert_eq!(out.canonical.len(), 1);
        let reasons: Vec<_> = out.dropped.iter().map(|d| d.reason).collect();
        assert_eq!(
            reasons,
            vec![
                MissingKeyField::ReportKind,
                MissingKeyField::PeriodStart,
                MissingKeyField::PeriodEnd
            ]
        );
    }

    #[test]
    fn dedupe_is_idempotent() {
        let batch = vec![q1("", 1), q1("A", 2), q2("", 3), q2("", 5), q1("A", 1)];
        let once = dedupe(&batch);
        let again_input: Vec<_> = once.canonical.iter().map(|c| c.filing.clone()).collect();
        let twice = dedupe(&again_input);

        let filings = |o: &DedupOutcome| -> Vec<RawFiling> {
            o.canonical.iter().map(|c| c.filing.clone()).collect()
        };
        assert_eq!(filings(&once), filings(&twice));
        assert!(twice.canonical.iter().all(|c| c.superseded == 0));
    }

    #[test]
    fn output_sorted_by_key() {
        let out = dedupe(&[q2("", 1), q1("", 2)]);
        assert_eq!(out.canonical[0].key.report_kind, "Q1");
        assert_eq!(out.canonical[1].key.report_kind, "Q2");
    }

    #[test]
    fn empty_batch() {
        let out = dedupe(&[]);
        assert!(out.canonical.is_empty());
        assert!(out.dropped.is_empty());
    }
}
