use sea_orm::DbErr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("bigquery request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("bigquery returned {status}: {message}")]
    BigQuery { status: u16, message: String },
    #[error("bigquery job {job_id} did not finish after {attempts} polls")]
    JobIncomplete { job_id: String, attempts: u32 },
    #[error("listings source misconfigured: {0}")]
    Config(String),
    #[error("failed to decode listing row: {0}")]
    Decode(String),
}

impl ListingError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, ListingError::InvalidInput(_))
    }
}

pub type ListingResult<T> = Result<T, ListingError>;
