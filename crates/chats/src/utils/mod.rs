//! Internal utilities for the chat system.
//!
//! This module contains utility functions and helpers that are used
//! across multiple modules in the crate.

pub mod permissions;
pub mod validation;

// Re-export utilities
pub use permissions::*;
pub use validation::*;
