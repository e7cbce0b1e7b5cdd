use thiserror::Error;

use crate::directive::DirectiveError;
use crate::{ChunkId, MilestoneId, UserId};

/// Errors surfaced by the review core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },
    #[error("{entity} not found: {name}")]
    NotFoundName { entity: &'static str, name: String },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("malformed chunk directive: {0}")]
    MalformedDirective(#[from] DirectiveError),
    #[error("reviewer {reviewer_id} already assigned to chunk {chunk_id}")]
    DuplicateAssignment {
        chunk_id: ChunkId,
        reviewer_id: UserId,
    },
    #[error("review milestone {milestone_id} was modified concurrently")]
    ConcurrentUpdate { milestone_id: MilestoneId },
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        CoreError::NotFound { entity, id }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
