use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download error: {0}")]
    Download(#[from] pictor_engine::DownloadError),

    #[error("Retrieval error: {0}")]
    Retrieve(#[from] pictor_engine::RetrieveError),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("{failed} of {total} fetches failed")]
    PartialFailure { failed: usize, total: usize },
}
