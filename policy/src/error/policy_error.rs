use crate::validation::ValidationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Unknown {field} code: {value}")]
    UnknownCode { field: &'static str, value: i64 },
}
