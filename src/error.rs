use thiserror::Error;

/// Failure raised by the fetch layer. The melt core never retries it.
#[derive(Debug, Error)]
#[error("QuickBooks request failed: {0}")]
pub struct FetchError(pub String);

impl FetchError {
    pub fn new(msg: impl Into<String>) -> Self {
        FetchError(msg.into())
    }
}

#[derive(Debug, Error)]
pub enum MeltError {
    /// Unknown endpoint, malformed mapping node or bad configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Report payload does not have a shape the flattener understands
    #[error("report {report}: {detail}")]
    Shape { report: String, detail: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MeltError {
    pub fn config(msg: impl Into<String>) -> Self {
        MeltError::Config(msg.into())
    }

    pub fn shape(report: impl Into<String>, detail: impl Into<String>) -> Self {
        MeltError::Shape {
            report: report.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MeltError>;
