//! Register-based bytecode virtual machine for smart contract scripts.
//!
//! Scripts are assembled from text, registered with the host under a context
//! name, and executed by a [`vm::VM`] that dispatches one opcode at a time.
//!
//! # Architecture
//!
//! - **Registers**: a per-frame bank (32 by default) of dynamically typed
//!   [`value::Value`]s; every `CALL` and `SWITCH` starts with a fresh bank
//! - **Evaluation stack**: shared by all frames, all contexts and the host;
//!   it carries arguments, return values and interop parameters
//! - **Numbers**: arbitrary precision integers
//! - **Instruction format**: one opcode byte followed by its operands, see [`isa`]
//! - **Contexts**: named scripts reachable through `CTX` and `SWITCH`
//! - **Interops**: host functions reachable through `EXTCALL`
//!
//! # Modules
//!
//! - [`assembler`]: assembly parsing, diagnostics, and bytecode generation
//! - [`context`]: script contexts and the registry that names them
//! - [`errors`]: assembly and execution error types
//! - [`interop`]: host interop table
//! - [`isa`]: instruction set definition and opcode mappings
//! - [`operand`]: value-type tags, literals and interop targets
//! - [`script`]: compiled scripts and their serialized form
//! - [`value`]: the dynamic value model
//! - [`vm`]: the interpreter

pub mod assembler;
pub mod context;
pub mod errors;
pub mod interop;
pub mod isa;
#[cfg(test)]
mod isa_static_check;
pub mod operand;
pub mod script;
pub mod value;
pub mod vm;
