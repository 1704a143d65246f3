//! # nio-core
//!
//! Shared types for the nio buffer/channel layer.
//!
//! This crate holds everything the buffer and channel crates both need
//! and nothing that depends on either of them.
//!
//! ## Modules
//!
//! - `error` - `NioError` taxonomy and `Result` alias
//! - `ops` - Interest / readiness operation sets
//! - `fd` - Reference-counted OS descriptor with close tracking
//! - `config` - Environment-driven configuration
//! - `logging` - Stderr backend for the `log` facade

pub mod error;
pub mod ops;
pub mod fd;
pub mod config;
pub mod logging;

// Re-exports for convenience
pub use error::{NioError, Result};
pub use ops::Ops;
pub use fd::Descriptor;
pub use config::NioConfig;
