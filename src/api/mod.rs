//! Gateway HTTP API

pub mod handlers;

pub use handlers::{build_router, AppState};
