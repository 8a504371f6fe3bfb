//! modlink host library
//!
//! Configuration and runtime wiring shared by the `modlink` binary and
//! embedding applications.

pub mod config;
pub mod runtime;
