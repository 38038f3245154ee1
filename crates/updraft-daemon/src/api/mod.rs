//! HTTP API
//!
//! REST endpoints for inspecting the registry, answering prompts and
//! triggering cycles by hand.

pub mod rest;

pub use rest::{create_router, AppState};
