//! psytest-client — Content source implementations and client configuration.
//!
//! Implements the `ContentSource` trait over HTTP and in memory, and loads
//! the `psytest.toml` configuration that wires them to a delivery session.

pub mod config;
pub mod error;
pub mod http;
pub mod mock;

pub use config::{create_source, load_config, load_config_from, PsytestConfig, ServerConfig};
pub use error::ClientError;
pub use http::HttpContentSource;
pub use mock::MockContentSource;
