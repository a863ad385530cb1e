//! Shared foundation for the revpilot workspace: configuration loading and
//! the layered error taxonomy used at the service boundary.

pub mod config;
pub mod errors;
