//! # Tessera Storage
//!
//! Storage abstraction for Tessera credential backends.
//!
//! A backend is a flat string key/value namespace. The session core keeps two
//! of them side by side: a durable one (survives restarts) and an ephemeral one
//! (lives as long as the process).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod memory;

pub use backend::StorageBackend;
pub use error::StorageError;
pub use memory::MemoryBackend;
