//! Error Taxonomy
//!
//! Every failure the master or a volume server can report to a caller.
//! None of these are fatal to the process: HTTP handlers translate them into
//! `{ "error": ... }` bodies with a matching status code.

use crate::storage::types::{FileId, VolumeId};

use axum::http::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No free volume slot left in the requested scope.
    #[error("no free volume slots left in {0}")]
    NoFreeSpace(String),

    /// The layout has no writable volume; a new one must be grown first.
    #[error("no writable volumes available for collection {collection:?} replication {replication}")]
    NoWritableVolumes {
        collection: String,
        replication: String,
    },

    #[error("volume {0} not found")]
    VolumeNotFound(VolumeId),

    #[error("file {0} not found")]
    NeedleNotFound(FileId),

    /// The caller presented a cookie that does not match the stored needle.
    /// Clients only ever see this as "not found".
    #[error("cookie mismatch for {0}")]
    CookieMismatch(FileId),

    #[error("invalid volume id {0:?}")]
    InvalidVolumeId(String),

    #[error("invalid file id {input:?}: {reason}")]
    InvalidFileId { input: String, reason: String },

    #[error("invalid replication type {0:?}")]
    InvalidReplication(String),

    #[error("volume {0} already exists")]
    VolumeExists(VolumeId),

    #[error("volume {0} is read only")]
    ReadOnly(VolumeId),

    #[error("no free volume slots on this server (max {0})")]
    StoreFull(usize),

    /// A VolumeId showed up under a second (collection, replication) pair.
    #[error("volume {vid} already registered in collection {existing:?}")]
    DuplicateVolume { vid: VolumeId, existing: String },

    #[error("lookup failed: {0}")]
    Lookup(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Errors that the volume server reports to clients as a plain 404.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::VolumeNotFound(_) | Error::NeedleNotFound(_) | Error::CookieMismatch(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidVolumeId(_)
            | Error::InvalidFileId { .. }
            | Error::InvalidReplication(_)
            | Error::VolumeExists(_)
            | Error::ReadOnly(_) => StatusCode::BAD_REQUEST,
            Error::VolumeNotFound(_)
            | Error::NeedleNotFound(_)
            | Error::CookieMismatch(_)
            | Error::Lookup(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
