//! Core types and utilities for hald
//!
//! # Modules
//!
//! - `config`: Environment loading and pipeline configuration
//! - `device`: The device object and its property bag
//! - `error`: Error types and Result alias
//! - `store`: Staging and permanent device lists
//! - `types`: Property values, device kinds and well-known keys

pub mod config;
pub mod device;
pub mod error;
pub mod store;
pub mod types;

// Re-exports
pub use config::{HotplugConfig, DEFAULT_UDI_PREFIX};
pub use device::{Device, DeviceOrigin};
pub use error::{Error, Result};
pub use store::{DeviceStore, StoreEvent};
pub use types::*;
