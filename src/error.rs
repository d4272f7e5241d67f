use std::io;
use std::path::PathBuf;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("root directory not found: {}", .0.display())]
    RootNotFound(PathBuf),

    #[error("cannot decode request path {path:?}: {reason}")]
    BadRequestPath { path: String, reason: String },

    #[error("no indexed asset for {0:?}")]
    NotIndexed(String),

    #[error("no acceptable encoding for {0:?}")]
    NoAcceptableEncoding(String),

    #[error("indexing did not finish within {}", humantime::format_duration(*.0))]
    IndexTimeout(Duration),

    #[error("indexing worker failed: {0}")]
    IndexWorker(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Per-request outcomes that hand the request to the next handler instead of failing it.
    pub fn is_pass_through(&self) -> bool {
        matches!(
            self,
            Error::BadRequestPath { .. } | Error::NotIndexed(_) | Error::NoAcceptableEncoding(_)
        )
    }
}
