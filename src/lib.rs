//! DashGate - session and identity gateway for the metrics dashboard
//!
//! This library provides the session registry, persistent session store,
//! and OAuth sign-in flow behind the gateway's HTTP API.

pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod oauth;
pub mod records;
pub mod registry;
pub mod store;
