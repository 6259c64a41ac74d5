//! Deletion daemon for the DICOM instance index.
//!
//! This crate provides:
//! - The batched deletion orchestrator and its job host
//! - A watchdog for panicked job tasks
//! - Admin HTTP endpoints (health, metrics, job control)

pub mod auth;
pub mod deletion;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::{AppState, JobRegistry};
