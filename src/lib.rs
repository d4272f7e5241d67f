//! Serves pre-compressed static assets. The directory trees are indexed once at
//! startup and every request is negotiated against the variants found for it.

pub mod args;
pub mod compression;
pub mod error;
pub mod file_serving;
pub mod index;
pub mod logging;
pub mod server;

pub use error::{Error, Result};
