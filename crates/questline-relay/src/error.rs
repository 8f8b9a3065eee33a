/// Relay error variants.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("transport failure: {0}")]
    Transport(#[source] anyhow::Error),
    #[error("envelope codec failure: {0}")]
    Codec(#[from] serde_json::Error),
}

impl RelayError {
    pub fn transport(err: impl Into<anyhow::Error>) -> Self {
        Self::Transport(err.into())
    }
}
