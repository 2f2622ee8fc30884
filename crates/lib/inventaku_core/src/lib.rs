//! # inventaku_core
//!
//! Session and role authority for Inventaku.
//!
//! Holds the signed-in identity, validates it against the Inventaku API,
//! persists a snapshot between runs and answers role questions for
//! navigation and route gating.

pub mod auth;
pub mod config;
pub mod models;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
