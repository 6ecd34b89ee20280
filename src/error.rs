use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KaggleError {
    #[error("Kaggle API not initialized: import or set a valid API token first")]
    #[diagnostic(help("run `kgd auth import ~/.kaggle/kaggle.json` or `kgd auth set`"))]
    NotInitialized,

    #[error("no Kaggle credential configured")]
    #[diagnostic(help("set KAGGLE_USERNAME and KAGGLE_KEY or run `kgd auth import`"))]
    MissingCredential,

    #[error("Kaggle rejected the API token of {0}")]
    CredentialRejected(String),

    #[error("dataset already downloaded: {0}")]
    AlreadyDownloaded(String),

    #[error("invalid dataset reference: {0}")]
    InvalidDatasetRef(String),

    #[error("invalid file reference: {0}")]
    InvalidFileRef(String),

    #[error("invalid token file: {0}")]
    InvalidTokenFile(String),

    #[error("Kaggle request failed: {0}")]
    CatalogHttp(String),

    #[error("Kaggle returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("download redirect was not a URL: {0}")]
    InvalidRedirect(String),

    #[error("content not found: {0}")]
    StorageNotFound(String),

    #[error("contents request failed: {0}")]
    StorageHttp(String),

    #[error("contents API returned status {status}: {message}")]
    StorageStatus { status: u16, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl KaggleError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, KaggleError::StorageNotFound(_))
    }
}
