//! # crmsync App
//!
//! Application layer - HTTP routes, wiring and the binary entry point.
//!
//! This crate contains:
//! - Application context (dependency injection)
//! - The axum router for webhook ingestion and queue inspection
//! - Tracing initialisation and health reporting
//!
//! ## Architecture
//! - Depends on `common`, `domain`, `core` and `infra`
//! - Wires up the hexagonal architecture

pub mod context;
pub mod routes;
pub mod utils;

pub use context::AppContext;
pub use routes::router;
