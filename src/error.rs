use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http transport error: {0}")]
    Transport(#[from] ureq::Error),

    #[error("webdriver {error}: {message}")]
    WebDriver { error: String, message: String },

    #[error("unexpected webdriver payload: {0}")]
    Protocol(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("no element matched the pane locator: {0}")]
    PaneNotFound(String),

    #[error("failed to parse config at {path}: {message}")]
    ConfigInvalid { path: String, message: String },
}

pub type Result<T> = std::result::Result<T, VaultError>;
