use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// Lets the request governor tell quota rejections apart from other failures.
pub trait RateLimitAware {
    fn is_rate_limited(&self) -> bool;
}

impl RateLimitAware for CoreError {
    fn is_rate_limited(&self) -> bool {
        matches!(self, CoreError::RateLimited(_))
    }
}

impl RateLimitAware for anyhow::Error {
    fn is_rate_limited(&self) -> bool {
        if let Some(core) = self.downcast_ref::<CoreError>() {
            return core.is_rate_limited();
        }
        let message = self.to_string().to_ascii_lowercase();
        message.contains("429") || message.contains("rate limit") || message.contains("quota")
    }
}
