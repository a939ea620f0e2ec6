//! relfga-server: paginated queries and store lifecycle commands
//!
//! This crate contains the query layer on top of `relfga-storage`:
//! - Continuation token codec (noop, base64, HMAC-signed)
//! - ListStores and ReadChanges queries with cursor-resumable pagination
//! - Store lifecycle commands and tuple writes
//! - Configuration management and logging setup
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                relfga-server                 │
//! ├──────────────────────────────────────────────┤
//! │  encoder.rs       - Byte <-> string codecs   │
//! │  token.rs         - Typed cursors            │
//! │  queries/         - ListStores, ReadChanges  │
//! │  commands/        - Create/Delete, Write     │
//! │  server.rs        - Wiring from config       │
//! │  config.rs        - Configuration management │
//! │  observability.rs - Logging setup            │
//! └──────────────────────────────────────────────┘
//! ```

pub mod commands;
pub mod config;
pub mod encoder;
pub mod error;
pub mod observability;
pub mod queries;
pub mod server;
pub mod token;
pub mod types;

// Re-exports for convenience
pub use config::{ConfigLoadError, ServerConfig};
pub use encoder::{Base64Encoder, Encoder, EncoderError, HmacEncoder, NoopEncoder};
pub use error::{ServerError, ServerResult};
pub use server::Server;
pub use token::{ContinuationToken, TokenSerializer};
