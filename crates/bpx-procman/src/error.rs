use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcmanError {
    #[error("Failed to start process {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProcmanError>;
