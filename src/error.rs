use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepackError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Plist error: {0}")]
    Plist(#[from] plist::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WalkDir error: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid IPA: {0}")]
    InvalidIpa(String),

    #[error("External tool failed: `{command}`: {reason}")]
    ToolFailed { command: String, reason: String },

    #[error("Malformed entitlements: {0}")]
    Format(String),
}

pub type Result<T> = std::result::Result<T, RepackError>;
