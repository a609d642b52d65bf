//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use these types for
//! every media node shared secret and any other credential carried in config.
//!
//! `SecretString` implements `Debug` with redaction, so any struct deriving
//! `Debug` that holds one gets safe logging behavior for free, including
//! through `tracing` fields recorded with `?`.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct MediaNodeCredentials {
//!     hostname: String,
//!     secret: SecretString,
//! }
//!
//! let creds = MediaNodeCredentials {
//!     hostname: "mn1.example.com".to_string(),
//!     secret: SecretString::from("hunter2"),
//! };
//!
//! // Safe - the secret is redacted
//! println!("{:?}", creds);
//!
//! // The actual value requires an explicit call
//! let secret: &str = creds.secret.expose_secret();
//! ```
//!
//! With the `serde` feature of `secrecy`, secrets deserialize straight from
//! the JSON media node list.

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};
