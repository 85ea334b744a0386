pub mod auth;
pub mod error;
pub mod json;
pub mod response;

pub use auth::{AdminUser, AuthUser, BearerToken};
pub use error::AppError;
pub use json::{parse_id, JsonBody};
