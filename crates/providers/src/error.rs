use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The capability cannot be built because a credential is not configured.
    #[error("missing credential: {0}")]
    MissingCredential(String),

    /// The collaborator could not be reached or answered with an error.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("model '{model}' not available")]
    UnknownModel {
        model: String,
        available: Vec<String>,
    },
}
