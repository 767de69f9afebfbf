use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt session record: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("failed to read prompt template {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("prompt template {0} has no <<<context>>> placeholder")]
    MissingPlaceholder(String),
}

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error(transparent)]
    Session(#[from] SessionError),
}
