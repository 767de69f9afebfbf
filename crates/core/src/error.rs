use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid configuration: {field}: {reason}")]
    Config { field: &'static str, reason: String },
}

impl CoreError {
    pub fn config(field: &'static str, reason: impl Into<String>) -> Self {
        CoreError::Config { field, reason: reason.into() }
    }
}
