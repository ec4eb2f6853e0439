//! # Quire Library
//!
//! This library exposes the Quire application modules for testing and
//! integration.
//!
//! The main binary uses these modules through the `main.rs` entry point.

pub mod api;
pub mod cli;
pub mod config;
pub mod modules;
pub mod site;

// Re-export quire_core for convenience
pub use quire_core;
