use thiserror::Error;
use uuid::Uuid;

use crate::distribution::job::ValidationError;

#[derive(Error, Debug)]
pub enum DistributeError {
    #[error("Invalid job: {0}")]
    Validation(#[from] ValidationError),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Job already exists: {0}")]
    JobAlreadyExists(Uuid),

    #[error("Job is already running: {0}")]
    JobAlreadyRunning(Uuid),

    #[error("Job has already finished: {0}")]
    JobAlreadyTerminal(Uuid),

    #[error("Job store is at capacity")]
    StoreFull,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DistributeError>;
