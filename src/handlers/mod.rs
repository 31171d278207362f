pub mod config;
pub mod session;

pub use config::*;
pub use session::*;

use crate::error::AppError;
use actix_web::{HttpRequest, HttpResponse};

/// Fallback for unknown routes, answered in the same JSON error envelope.
pub async fn not_found(req: HttpRequest) -> Result<HttpResponse, AppError> {
    Err(AppError::NotFound(format!("No route for {} {}", req.method(), req.path())))
}
