use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiverError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] ureq::Error),

    #[error("failed to read checkpoint document {path}: {source}")]
    CheckpointUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse checkpoint document {path}: {source}")]
    CheckpointInvalid {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("site list is empty in {path}")]
    EmptySiteList { path: PathBuf },

    #[error("invalid proxy url {url}: {reason}")]
    ProxyInvalid { url: String, reason: String },

    #[error("proxy {addr} is unreachable: {source}")]
    ProxyUnreachable {
        addr: String,
        source: std::io::Error,
    },

    #[error("request failed: {url} (status={status})")]
    HttpStatus { url: String, status: u16 },

    #[error("unable to create site directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("unable to save site content {path}: {source}")]
    WritePage {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ArchiverError>;
