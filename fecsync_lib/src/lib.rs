//! Library layer for fecsync: a resumable, rate-limited collector for FEC
//! committee filings.
//!
//! The OpenFEC client paces and retries every request, the paginator walks
//! multi-page listings, the role resolver maps committees to their role in a
//! target cycle, and amendment deduplication keeps one filing per reporting
//! period. `CheckpointedCollector` ties these together with durable progress
//! so an interrupted run picks up where it left off.

pub mod checkpoint;
pub mod collector;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod openfec;
pub mod paginator;
pub mod resolver;
pub mod sink;
pub mod types;
pub mod validation;

pub use checkpoint::{CheckpointError, CheckpointSession, CheckpointStore, ProgressCheckpoint};
pub use collector::{CheckpointedCollector, PermanentFailure, RunSummary};
pub use config::{ConfigError, SyncConfig};
pub use db::{Db, DbError};
pub use dedup::{dedupe, CanonicalFiling, DedupOutcome, FilingKey};
pub use error::{CollectorError, FailureKind, FailureReason};
pub use openfec::{OpenFecClient, OpenFecError, RateLimiter, RetryPolicy, TrackerSummary};
pub use paginator::Paginator;
pub use resolver::{CommitteeRoleResolver, RoleResolution};
pub use sink::{FilingSink, MemorySink, SinkError};
pub use types::{CollectedEntity, FilingOutcome, ItemStatus, WorkItem};
pub use validation::ValidationError;
