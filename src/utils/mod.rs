pub mod error;
pub mod jwt;
pub mod locale;

pub use error::{ApiError, ApiResult, ErrorCode};
pub use jwt::JwtUtil;
