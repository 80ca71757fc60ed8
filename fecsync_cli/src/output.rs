use fecsync_lib::{CollectedEntity, PermanentFailure, ProgressCheckpoint, RoleResolution, RunSummary};
use serde::Serialize;
use tabled::{Table, Tabled};

#[derive(Clone, Debug)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Tabled, Serialize)]
struct CountRow {
    #[tabled(rename = "Outcome")]
    #[serde(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Items")]
    #[serde(rename = "Items")]
    items: usize,
}

#[derive(Tabled, Serialize)]
struct FailureRow {
    #[tabled(rename = "Item")]
    #[serde(rename = "Item")]
    key: String,
    #[tabled(rename = "Reason")]
    #[serde(rename = "Reason")]
    reason: String,
    #[tabled(rename = "Attempts")]
    #[serde(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Retryable")]
    #[serde(rename = "Retryable")]
    retryable: String,
}

#[derive(Tabled, Serialize)]
struct EntityRow {
    #[tabled(rename = "Committee")]
    #[serde(rename = "Committee")]
    committee_id: String,
    #[tabled(rename = "Cycle")]
    #[serde(rename = "Cycle")]
    cycle: i32,
    #[tabled(rename = "Role")]
    #[serde(rename = "Role")]
    role: String,
    #[tabled(rename = "Match")]
    #[serde(rename = "Match")]
    match_kind: String,
    #[tabled(rename = "Filings")]
    #[serde(rename = "Filings")]
    filings: usize,
    #[tabled(rename = "Latest Period")]
    #[serde(rename = "Latest Period")]
    latest_period: String,
    #[tabled(rename = "Cash On Hand")]
    #[serde(rename = "Cash On Hand")]
    cash_on_hand: String,
}

fn count_row(outcome: &str, items: usize) -> CountRow {
    CountRow {
        outcome: outcome.to_string(),
        items,
    }
}

fn build_summary_rows(summary: &RunSummary) -> Vec<CountRow> {
    vec![
        count_row("completed", summary.completed),
        count_row("no data", summary.no_data),
        count_row("failed (retryable)", summary.retryable_failed),
        count_row("failed (permanent)", summary.permanent_failed),
        count_row("skipped (already done)", summary.skipped),
        count_row("recovered on retry", summary.recovered_on_retry),
        count_row("total", summary.total_items),
    ]
}

fn build_summary_failure_rows(failures: &[PermanentFailure]) -> Vec<FailureRow> {
    failures
        .iter()
        .map(|f| FailureRow {
            key: f.key.clone(),
            reason: f.reason.clone(),
            attempts: f.attempts,
            retryable: "no".to_string(),
        })
        .collect()
}

fn build_checkpoint_rows(checkpoint: &ProgressCheckpoint) -> Vec<CountRow> {
    let permanent = checkpoint.permanent_failures().count();
    vec![
        count_row("completed", checkpoint.completed_ids().len()),
        count_row("no data", checkpoint.no_data_ids().len()),
        count_row("pending retry", checkpoint.pending_retry_ids().len()),
        count_row("failed (permanent)", permanent),
    ]
}

fn build_checkpoint_failure_rows(checkpoint: &ProgressCheckpoint) -> Vec<FailureRow> {
    checkpoint
        .failed_ids()
        .iter()
        .map(|(key, record)| FailureRow {
            key: key.clone(),
            reason: record.reason.to_string(),
            attempts: record.attempts,
            retryable: if record.retryable { "yes" } else { "no" }.to_string(),
        })
        .collect()
}

fn build_entity_rows(entities: &[CollectedEntity]) -> Vec<EntityRow> {
    entities
        .iter()
        .map(|e| {
            let (role, match_kind) = match &e.role {
                RoleResolution::Known(r) => (
                    format!("{} ({})", r.role_code.as_deref().unwrap_or("-"), r.class),
                    r.match_kind.to_string(),
                ),
                RoleResolution::Unknown => ("unknown".to_string(), "-".to_string()),
            };
            let latest = e.filings.iter().max_by_key(|f| f.key.period_end);
            EntityRow {
                committee_id: e.item.committee_id().to_string(),
                cycle: e.item.cycle(),
                role,
                match_kind,
                filings: e.filings.len(),
                latest_period: latest
                    .map(|f| format!("{} {}", f.key.report_kind, f.key.period_end))
                    .unwrap_or_else(|| "-".to_string()),
                cash_on_hand: format_amount(
                    latest.and_then(|f| f.filing.amounts.cash_on_hand_end),
                ),
            }
        })
        .collect()
}

// -- Table output --

pub fn print_summary_table(summary: &RunSummary) {
    println!("{}", Table::new(build_summary_rows(summary)));
    if !summary.permanent_failures.is_empty() {
        println!("\nPermanent failures (manual review needed):");
        println!(
            "{}",
            Table::new(build_summary_failure_rows(&summary.permanent_failures))
        );
    }
    let r = &summary.requests;
    println!(
        "\nRequests: {} made, {} ok, {} rate-limited, {} network errors, {} other errors, {:.1}s backoff",
        r.requests_made,
        r.requests_succeeded,
        r.requests_rate_limited,
        r.requests_network_failed,
        r.requests_failed,
        r.total_backoff_secs
    );
}

pub fn print_checkpoint_table(checkpoint: &ProgressCheckpoint) {
    println!("{}", Table::new(build_checkpoint_rows(checkpoint)));
    let failures = build_checkpoint_failure_rows(checkpoint);
    if !failures.is_empty() {
        println!("\n{}", Table::new(failures));
    }
    match checkpoint.last_saved_at() {
        Some(at) => println!("\nLast saved: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("\nLast saved: never"),
    }
}

pub fn print_entities_table(entities: &[CollectedEntity]) {
    if entities.is_empty() {
        return;
    }
    println!("\n{}", Table::new(build_entity_rows(entities)));
}

// -- JSON output --

pub fn print_json<T: serde::Serialize>(data: &T) {
    match serde_json::to_string_pretty(data) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize to JSON: {}", e),
    }
}

fn format_amount(value: Option<f64>) -> String {
    match value {
        None => "-".to_string(),
        Some(v) if v.abs() >= 1_000_000.0 => format!("${:.1}M", v / 1_000_000.0),
        Some(v) if v.abs() >= 1_000.0 => format!("${:.1}K", v / 1_000.0),
        Some(v) => format!("${:.0}", v),
    }
}

#[cfg(test)]
#[path = "output_tests.rs"]
mod tests;
