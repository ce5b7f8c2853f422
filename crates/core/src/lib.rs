//! Keepsake Core - shared primitives for the Keepsake backup engine
//!
//! This crate provides the foundational layer:
//! - Error kinds shared by every Keepsake crate
//! - Editions (the timestamp identifying one backup run)
//! - BLAKE3 content hashing
//! - The codec abstraction (encryption, optionally with error resistance)
//! - Path and atomic-write helpers

pub mod atomic;
pub mod codec;
pub mod edition;
pub mod error;
pub mod hash;
pub mod paths;

// Re-export main types for convenience
pub use codec::{Codec, CodecKind, CodecReader, CodecWriter};
pub use edition::Edition;
pub use error::{Error, Result};
pub use hash::{hash_file, ContentHash};
