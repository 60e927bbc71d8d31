//! Core domain + application logic for the dynamic voice channel bot.
//!
//! This crate is framework-agnostic. Discord lives behind the
//! [`platform::Platform`] port, implemented in the adapter crate.

pub mod commands;
pub mod config;
pub mod domain;
pub mod errors;
pub mod lifecycle;
pub mod logging;
pub mod naming;
pub mod platform;
pub mod rate_limit;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
