//! Derive macros for the chainvm crate.
//!
//! - `#[derive(BinaryCodec)]`: deterministic binary `Encode`/`Decode` for structs
//! - `#[derive(Error)]`: `Display` + `std::error::Error` from `#[error("...")]` messages

mod binary_codec;
mod error;

use proc_macro::TokenStream;

/// Implements `crate::types::encoding::{Encode, Decode}` field by field.
#[proc_macro_derive(BinaryCodec)]
pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    binary_codec::derive_binary_codec(input)
}

/// Implements `Display` and `Error` for an error enum or struct.
#[proc_macro_derive(Error, attributes(error))]
pub fn derive_error(input: TokenStream) -> TokenStream {
    error::derive_error(input)
}
