use thiserror::Error;

#[derive(Debug, Error)]
pub enum DrawError {
    /// The draw service refused the request, e.g. no tickets sold or already drawn.
    #[error("draw refused: {0}")]
    Rejected(String),

    /// The draw service could not be reached or failed mid-request.
    #[error("draw service request failed: {0:#}")]
    Backend(anyhow::Error),

    #[error("a draw is already running for this raffle")]
    DrawInProgress,

    #[error("broadcast channel error: {0}")]
    Relay(String),

    #[error("invalid draw configuration: {0}")]
    Config(String),
}

impl DrawError {
    /// Whether re-invoking the same action may succeed without the user
    /// changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DrawError::Backend(_) | DrawError::Relay(_))
    }
}

pub type Result<T, E = DrawError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(DrawError::Backend(anyhow::anyhow!("timeout")).is_retryable());
        assert!(!DrawError::Rejected("no tickets sold".into()).is_retryable());
        assert!(!DrawError::DrawInProgress.is_retryable());
    }

    #[test]
    fn test_backend_message_keeps_context() {
        let err = anyhow::anyhow!("connection reset").context("conduct_unique_raffle_draw");
        let msg = DrawError::Backend(err).to_string();
        assert_eq!(
            msg,
            "draw service request failed: conduct_unique_raffle_draw: connection reset"
        );
    }
}
