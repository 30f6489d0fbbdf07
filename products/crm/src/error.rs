use platform_api::ApiError;
use platform_storage::StorageError;
use products_listings::ListingError;
use sea_orm::DbErr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("listing source error: {0}")]
    Listings(#[from] ListingError),
}

pub type CrmResult<T> = Result<T, CrmError>;

pub(crate) fn validation(message: impl Into<String>) -> CrmError {
    CrmError::Validation(message.into())
}

impl From<CrmError> for ApiError {
    fn from(err: CrmError) -> Self {
        match err {
            CrmError::NotFound(message) => ApiError::not_found(message),
            CrmError::Validation(message) => ApiError::invalid(message),
            CrmError::Conflict(message) => ApiError::Conflict(message),
            CrmError::Listings(err) if err.is_invalid_input() => ApiError::invalid(err.to_string()),
            CrmError::Listings(err) => {
                ApiError::internal_with("Failed to fetch listing", anyhow::Error::new(err))
            }
            CrmError::Database(err) => {
                ApiError::internal_with("Database error", anyhow::Error::new(err))
            }
            CrmError::Storage(err) => {
                ApiError::internal_with("Document storage error", anyhow::Error::new(err))
            }
        }
    }
}
