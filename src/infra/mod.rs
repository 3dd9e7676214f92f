//! Infrastructure layer for cross-cutting concerns.
//!
//! Provides configuration loading and the error/result types shared by
//! every other layer.

pub mod config;
pub mod error;
