#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Thin HTTP boundary for the Quipline joke service: routing, settings
//! loading, and request tracking around the engine pipeline.

/// Environment-driven runtime settings.
#[path = "../config.rs"]
pub mod config;

/// Router, handlers, and request-tracking middleware.
#[path = "../routes.rs"]
pub mod routes;

pub use config::Settings;
pub use routes::{app, AppState};
