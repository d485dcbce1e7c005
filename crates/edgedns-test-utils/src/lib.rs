#![deny(unsafe_code)]

//! Shared test utilities for the edgedns workspace.
//!
//! Provides reusable fixtures, config builders, a scriptable remote API, and
//! tracing helpers so that individual crate tests stay concise and
//! consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! edgedns-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod daemon;
pub mod remote;
pub mod tracing_setup;
