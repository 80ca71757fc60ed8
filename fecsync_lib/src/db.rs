//! SQLite storage for collected committee roles and canonical filings.

use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::dedup::CanonicalFiling;
use crate::resolver::RoleResolution;
use crate::sink::{FilingSink, SinkError};
use crate::types::{CollectedEntity, WorkItem};

#[derive(thiserror::Error, Debug)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub struct Db {
    conn: Connection,
}

/// A role row as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRole {
    pub role_code: Option<String>,
    pub role_class: String,
    pub match_kind: String,
    pub ambiguous: bool,
}

impl Db {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    pub fn init(&self) -> Result<(), DbError> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            let schema = include_str!("../../schema/sqlite.sql");
            self.conn.execute_batch(schema)?;
            self.conn.pragma_update(None, "user_version", 1)?;
        }

        Ok(())
    }

    /// Store everything collected for one work item in a single transaction.
    pub fn upsert_entity(&mut self, entity: &CollectedEntity) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        upsert_role(&tx, &entity.item, &entity.role, &now)?;
        upsert_filings(&tx, &entity.item, &entity.filings, &now)?;
        tx.commit()?;
        Ok(())
    }

    pub fn filing_count(&self) -> Result<i64, DbError> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM filings", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn get_role(&self, committee_id: &str, cycle: i32) -> Result<Option<StoredRole>, DbError> {
        let role = self
            .conn
            .query_row(
                "SELECT role_code, role_class, match_kind, ambiguous
                 FROM committee_roles WHERE committee_id = ?1 AND cycle = ?2",
                params![committee_id, cycle],
                |row| {
                    Ok(StoredRole {
                        role_code: row.get(0)?,
                        role_class: row.get(1)?,
                        match_kind: row.get(2)?,
                        ambiguous: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(role)
    }

    /// Amendment sequence stored for one filing period, if present.
    pub fn get_amendment_seq(
        &self,
        committee_id: &str,
        cycle: i32,
        report_kind: &str,
        period_start: &str,
        period_end: &str,
    ) -> Result<Option<Option<String>>, DbError> {
        let seq = self
            .conn
            .query_row(
                "SELECT amendment_seq FROM filings
                 WHERE committee_id = ?1 AND cycle = ?2 AND report_kind = ?3
                   AND period_start = ?4 AND period_end = ?5",
                params![committee_id, cycle, report_kind, period_start, period_end],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seq)
    }
}

fn upsert_role(
    conn: &Connection,
    item: &WorkItem,
    role: &RoleResolution,
    now: &str,
) -> Result<(), DbError> {
    let (role_code, type_code, display_name, role_class, match_kind, ambiguous) = match role {
        RoleResolution::Known(r) => (
            r.role_code.clone(),
            r.type_code.clone(),
            r.display_name.clone(),
            r.class.to_string(),
            r.match_kind.to_string(),
            r.ambiguous,
        ),
        RoleResolution::Unknown => (
            None,
            None,
            None,
            "unknown".to_string(),
            "unknown".to_string(),
            false,
        ),
    };

    conn.execute(
        "INSERT INTO committee_roles
            (committee_id, cycle, role_code, type_code, display_name,
             role_class, match_kind, ambiguous, resolved_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(committee_id, cycle) DO UPDATE SET
            role_code = excluded.role_code,
            type_code = excluded.type_code,
            display_name = excluded.display_name,
            role_class = excluded.role_class,
            match_kind = excluded.match_kind,
            ambiguous = excluded.ambiguous,
            resolved_at = excluded.resolved_at",
        params![
            item.committee_id(),
            item.cycle(),
            role_code,
            type_code,
            display_name,
            role_class,
            match_kind,
            ambiguous,
            now,
        ],
    )?;
    Ok(())
}

fn upsert_filings(
    conn: &Connection,
    item: &WorkItem,
    filings: &[CanonicalFiling],
    now: &str,
) -> Result<(), DbError> {
    let mut stmt = conn.prepare(
        "INSERT INTO filings
            (committee_id, cycle, report_kind, period_start, period_end, amendment_seq,
             total_receipts, total_disbursements, cash_on_hand_end, receipt_timestamp,
             file_number, superseded_count, collected_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(committee_id, cycle, report_kind, period_start, period_end) DO UPDATE SET
            amendment_seq = excluded.amendment_seq,
            total_receipts = excluded.total_receipts,
            total_disbursements = excluded.total_disbursements,
            cash_on_hand_end = excluded.cash_on_hand_end,
            receipt_timestamp = excluded.receipt_timestamp,
            file_number = excluded.file_number,
            superseded_count = excluded.superseded_count,
            collected_at = excluded.collected_at",
    )?;

    for canonical in filings {
        let f = &canonical.filing;
        stmt.execute(params![
            item.committee_id(),
            item.cycle(),
            canonical.key.report_kind,
            canonical.key.period_start.format("%Y-%m-%d").to_string(),
            canonical.key.period_end.format("%Y-%m-%d").to_string(),
            f.amendment_seq,
            f.amounts.total_receipts,
            f.amounts.total_disbursements,
            f.amounts.cash_on_hand_end,
            f.receipt_timestamp
                .map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string()),
            f.file_number,
            canonical.superseded as i64,
            now,
        ])?;
    }
    Ok(())
}

impl FilingSink for Db {
    fn deliver(&mut self, entity: &CollectedEntity) -> Result<(), SinkError> {
        self.upsert_entity(entity)?;
        Ok(())
    }
}
