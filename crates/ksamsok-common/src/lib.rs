//! K-samsök Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging setup, and error handling for the K-samsök harvest
//! workspace.
//!
//! # Overview
//!
//! - **Error Handling**: Error type for the shared domain types
//! - **Logging**: `tracing` subscriber setup driven by environment variables
//! - **Types**: The persisted content record and harvest service metadata
//!
//! # Example
//!
//! ```no_run
//! use ksamsok_common::types::RecordStatus;
//!
//! fn main() -> ksamsok_common::Result<()> {
//!     let status: RecordStatus = "pending".parse()?;
//!     assert!(status.is_pending());
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::{ContentRecord, RecordStatus, ServiceMetadata};
