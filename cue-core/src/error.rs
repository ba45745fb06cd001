use thiserror::Error;

#[derive(Error, Debug)]
pub enum CueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Provider error: {0}")]
    Provider(#[from] crate::provider::ProviderError),

    #[error("No agent record for event {0}")]
    MissingAgent(uuid::Uuid),

    #[error("Other error: {0}")]
    Other(String),
}
