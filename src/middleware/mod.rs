pub mod auth;
pub mod request_logger;

pub use auth::{Caller, Identity, IdentityVerifier, MaybeCaller};
pub use request_logger::{request_logger_middleware, RequestLogging};
