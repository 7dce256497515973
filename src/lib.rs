//! Smart contract virtual machine library.
//!
//! Provides the value model, bytecode interpreter and assembler, plus the
//! shared byte, hash and encoding primitives they are built on.

pub mod types;
pub mod utils;
pub mod virtual_machine;
