//! API Models
//!
//! Response bodies for the REST endpoints, annotated for OpenAPI generation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct HealthResponse {
    #[schema(example = true)]
    pub ok: bool,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct GoogleStatusResponse {
    /// Whether a calendar token file is present.
    #[schema(example = true)]
    pub connected: bool,
}
