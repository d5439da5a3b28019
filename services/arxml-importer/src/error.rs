//! Import Errors
//!
//! Failure taxonomy of an import run. Unresolved references and tolerated
//! constraint conflicts are not errors and never show up here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Failed to read {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {file}: {message}")]
    Parse { file: String, message: String },

    #[error("No documents to import")]
    NoDocuments,

    #[error("Store failure during {phase}: {message}")]
    Store { phase: String, message: String },
}

impl ImportError {
    pub fn parse(file: &str, message: impl Into<String>) -> Self {
        ImportError::Parse {
            file: file.to_string(),
            message: message.into(),
        }
    }

    pub fn store(phase: &str, err: anyhow::Error) -> Self {
        ImportError::Store {
            phase: phase.to_string(),
            message: format!("{:#}", err),
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, ImportError>;
