//! Domain models shared across the authority and its collaborators.

pub mod auth;
