use thiserror::Error;

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to load {path}: {message}")]
    DataLoad { path: String, message: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BacktestError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn data_load(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DataLoad {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BacktestError>;
