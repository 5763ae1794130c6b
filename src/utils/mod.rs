pub mod config;
pub mod limiter;
pub mod retry;

pub use config::FathomConfig;
pub use limiter::{collect_ordered, RequestLimiter};
pub use retry::{retry_with_backoff, RetryPolicy};
