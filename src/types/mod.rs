//! Byte-level building blocks shared by the VM and the tooling.
//!
//! - `Bytes`: cheaply clonable immutable byte buffer
//! - `encoding`: deterministic little-endian binary codec
//! - `Hash`: SHA3-256 digest

pub mod bytes;
pub mod encoding;
pub mod hash;
