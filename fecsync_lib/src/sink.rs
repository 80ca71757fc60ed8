//! Downstream delivery of collected entities.

use thiserror::Error;

use crate::db::DbError;
use crate::types::CollectedEntity;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error("Sink rejected {key}: {message}")]
    Rejected { key: String, message: String },
}

/// Destination for collected data.
///
/// Implementations must tolerate re-delivery of the same work item (a resumed
/// run may deliver an item whose completion was never checkpointed).
pub trait FilingSink {
    fn deliver(&mut self, entity: &CollectedEntity) -> Result<(), SinkError>;
}

impl<S: FilingSink + ?Sized> FilingSink for Box<S> {
    fn deliver(&mut self, entity: &CollectedEntity) -> Result<(), SinkError> {
        (**self).deliver(entity)
    }
}

/// Sink that keeps everything in memory (dry runs and tests).
#[derive(Debug, Default)]
pub struct MemorySink {
    delivered: Vec<CollectedEntity>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> &[CollectedEntity] {
        &self.delivered
    }
}

impl FilingSink for MemorySink {
    fn deliver(&mut self, entity: &CollectedEntity) -> Result<(), SinkError> {
        // Re-delivery replaces the earlier copy.
        self.delivered.retain(|e| e.item != entity.item);
        self.delivered.push(entity.clone());
        Ok(())
    }
}
