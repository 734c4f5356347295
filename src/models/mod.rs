//! Response models for the admin API
//!
//! DTOs serialized into the admin endpoints' HTTP response bodies.

pub mod responses;

// Re-export commonly used types
pub use responses::{FlushRepositoryResponse, FlushResponse, HealthResponse, StatsResponse};
