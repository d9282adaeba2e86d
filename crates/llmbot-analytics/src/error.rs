use thiserror::Error;

/// Failure of a single sink write or read.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Blocking file task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failure of one export run. Never escapes [`crate::ExportJob::run`].
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Reading analytics log failed: {0}")]
    Sink(#[from] SinkError),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] rust_xlsxwriter::XlsxError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blocking export task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid remote storage token")]
    InvalidToken,

    #[error("Remote storage {operation} failed: {message}")]
    Storage { operation: &'static str, message: String },
}
