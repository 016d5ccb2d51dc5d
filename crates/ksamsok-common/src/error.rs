//! Error types for the shared K-samsök types

use thiserror::Error;

/// Result type alias for operations on shared types
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while interpreting shared domain values
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid record status: {0}")]
    InvalidStatus(String),

    #[error("Invalid service id: {0}")]
    InvalidServiceId(String),
}
