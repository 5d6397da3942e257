//! REST API handlers

mod events;
mod health;
mod services;
mod transport;

pub use events::*;
pub use health::*;
pub use services::*;
pub use transport::*;

use crate::error::{ApiError, ApiResult};
use harbor_types::ServiceId;

/// Accepts the bare UUID and the `svc:` form
pub(crate) fn parse_service_id(raw: &str) -> ApiResult<ServiceId> {
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid service id {raw}: {e}")))
}
