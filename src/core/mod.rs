//! Core runtime infrastructure.
//!
//! - [`config`] - Configuration parsing and validation
//! - [`runtime`] - Hosting and wiring partition replicas
//! - [`time`] - Clocks for record timestamps
//! - [`error`] - Error types and their classification

pub mod config;
pub mod error;
pub mod runtime;
pub mod time;
