//! Common utilities and types shared across driveocr crates.
//!
//! This module provides the shared error type and the filename sanitizer used
//! wherever a user-supplied name touches the local filesystem.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::SafeFileName;
