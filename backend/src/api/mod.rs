mod channels;
mod collect;
mod stats;

pub use channels::*;
pub use collect::*;
pub use stats::*;

use crate::error::{CollectError, RepositoryError};
use crate::models::ErrorResponse;
use rocket::http::Status;

impl From<CollectError> for ErrorResponse {
    fn from(e: CollectError) -> Self {
        match e {
            CollectError::QuotaExhausted { .. } => {
                ErrorResponse::new(Status::TooManyRequests, "Quota exhausted", e.to_string())
            }
            CollectError::Repository(e) => e.into(),
        }
    }
}

impl From<RepositoryError> for ErrorResponse {
    fn from(e: RepositoryError) -> Self {
        ErrorResponse::new(Status::InternalServerError, "Storage failure", e.to_string())
    }
}
