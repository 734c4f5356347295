//! API Module
//!
//! Admin HTTP surface over the caching engine.
//!
//! # Endpoints
//! - `GET /health` - Health check endpoint
//! - `GET /stats` - Backend statistics
//! - `DELETE /repository/:name` - Flush one repository
//! - `DELETE /flush` - Flush the entire backend

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
