//! Cross-cutting request middleware that is not tied to authentication.

pub mod rate_limit;
pub mod security_headers;

pub use rate_limit::{RateLimiter, rate_limit};
pub use security_headers::with_security_headers;
