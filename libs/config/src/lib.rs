//! # CoAP Core Configuration
//!
//! Defaults and loadable settings for the message pool and sessions.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use coap_config::load_config;
//!
//! let config = load_config(None)?;
//! println!("pool capacity: {}", config.pool.capacity);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod core_config;
pub mod defaults;

// Re-export commonly used types
pub use core_config::{load_config, CoreConfig, PoolSettings, SessionSettings};
