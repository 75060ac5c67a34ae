//! Tycoon Core Library
//!
//! Transport-free building blocks of the Tycoon client:
//! - Wire codec for form and tab-separated bodies
//! - RPC command set
//! - Connection endpoint parsing
//! - Cursor registry
//! - Record and parameter models
//! - Configuration

pub mod codec;
pub mod command;
pub mod config;
pub mod cursor;
pub mod endpoint;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use codec::EncodingMode;
pub use command::Command;
pub use config::Config;
pub use cursor::{CursorId, CursorLease, CursorRegistry};
pub use endpoint::Endpoint;
pub use error::{CodecError, EndpointError, ProjectionError, UnknownCommand};
pub use models::*;
