//! BIX Common Library
//!
//! Shared error handling and logging bootstrap for the BIX workspace.
//!
//! # Overview
//!
//! - **Error Handling**: the [`BixError`] type used across workspace members
//! - **Logging**: `tracing`-based logging initialisation driven by the
//!   environment
//!
//! # Example
//!
//! ```no_run
//! use bix_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

pub use error::{BixError, Result};
