use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Enrichment error: {0}")]
    Enrichment(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Could not create config file: {0}")]
    Create(String),

    #[error("Could not write config file: {0}")]
    Write(String),

    #[error("Reload error: {0}")]
    Reload(String),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Errors that retrying cannot fix: a broken renderer or a destination we
    /// cannot even create files in.
    pub fn is_integrity(&self) -> bool {
        matches!(self, AppError::Render(_) | AppError::Create(_))
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(e: serde_yaml::Error) -> Self {
        AppError::Render(e.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}
