//! Lockbox - Passphrase-based single-file encryption
//!
//! Encrypts a file into a self-describing artifact next to it and turns
//! such an artifact back into its plaintext. Every artifact records the
//! format version and algorithms it was made with, so files written by
//! older versions stay decryptable.

#![forbid(unsafe_code)]

pub mod cipher;
pub mod config;
pub mod digest;
pub mod engine;
pub mod erase;
pub mod error;
pub mod header;
pub mod kdf;
pub mod naming;
pub mod passphrase;
pub mod registry;

pub use config::Config;
pub use engine::{Engine, is_encrypted_artifact};
pub use error::{ErrorCategory, ErrorKind, LockboxError, Result};
pub use header::ArtifactHeader;
pub use registry::CURRENT_VERSION;
