use thiserror::Error;

#[derive(Error, Debug)]
pub enum SortError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Type error: {0}")]
    Type(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Invalid sort configuration: {0}")]
    Config(String),

    #[error("Comparison failed: {0}")]
    Compare(String),

    #[error("Sort was canceled")]
    Canceled,
}

impl SortError {
    /// True if this error reports a cooperative cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, SortError::Canceled)
    }
}

pub type Result<T> = std::result::Result<T, SortError>;
