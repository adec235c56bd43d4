//! Configuration
//!
//! The immutable sandbox configuration, its JSON loader and startup validation.

pub mod loader;
pub mod types;
pub mod validator;
