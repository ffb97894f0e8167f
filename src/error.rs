use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::pipeline::Stage;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("input error in {path}: {message}")]
    #[diagnostic(help("check that both FASTQ files exist and are well formed"))]
    Input { path: PathBuf, message: String },

    #[error("checkpoint header not found in input: {0}")]
    #[diagnostic(help("run `kira-ri reset-checkpoint` or point --checkpoint at the matching file"))]
    Resume(String),

    #[error("invalid protein accession: {0}")]
    InvalidAccession(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("BLAST search unavailable: {0}")]
    SearchUnavailable(String),

    #[error("BLAST returned status {status}: {message}")]
    SearchStatus { status: u16, message: String },

    #[error("malformed hit {accession}: {reason}")]
    MalformedHit { accession: String, reason: String },

    #[error("annotation unavailable for {accession}: {message}")]
    AnnotationUnavailable { accession: String, message: String },

    #[error("read already stored: {0}")]
    DuplicateRead(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("database schema version {db_version} is newer than supported {latest_supported}")]
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },

    #[error("run halted at {header} during {stage}: {reason}")]
    #[diagnostic(help("rerun to resume from the last checkpoint, or use --on-failure skip"))]
    RunHalted {
        header: String,
        stage: Stage,
        reason: String,
    },

    #[error("failed to write checkpoint: {0}")]
    Checkpoint(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl KiraError {
    pub fn input(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Input {
            path: path.into(),
            message: message.into(),
        }
    }
}
