use chainvm_derive::Error;

/// Errors raised while loading, assembling or executing bytecode.
///
/// Runtime faults terminate the current run; the VM never recovers from one
/// internally. [`VMError::UserThrow`] is kept apart from the internal faults
/// so hosts can map a bytecode `throw` onto their own failure type.
#[derive(Debug, Error)]
pub enum VMError {
    // ---------- runtime faults ----------
    /// Operand held a value of the wrong type.
    #[error("{instruction}: expected {expected} but got {actual}")]
    InvalidCast {
        instruction: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
    /// Pop from an empty evaluation stack.
    #[error("{instruction}: evaluation stack underflow")]
    StackUnderflow { instruction: &'static str },
    /// Evaluation stack grew beyond its configured limit.
    #[error("evaluation stack overflow (limit {limit})")]
    StackOverflow { limit: usize },
    /// Too many nested `call`/`switch` frames.
    #[error("call depth exceeded (limit {limit})")]
    CallDepthExceeded { limit: usize },
    /// Method label not found in the entry script.
    #[error("unknown label: {label}")]
    UnknownLabel { label: String },
    /// Jump or call to an offset outside the current code.
    #[error("jump target {target} outside code of length {length}")]
    InvalidJumpTarget { target: u32, length: usize },
    /// `ctx` named a context that was never registered.
    #[error("unknown context: {name}")]
    UnknownContext { name: String },
    /// `extcall` named an interop that was never registered.
    #[error("unknown interop: {name}")]
    UnknownInterop { name: String },
    /// Explicit `throw` from bytecode.
    #[error("script threw: {message}")]
    UserThrow { message: String },
    /// Host callback signaled failure.
    #[error("interop {name} failed: {reason}")]
    InteropFault { name: String, reason: String },
    /// `execute` or `invoke` called while the VM is already running, i.e.
    /// from inside an interop callback.
    #[error("VM is already running; an interop cannot start a nested run")]
    NestedRun,
    #[error("{instruction}: division by zero")]
    DivisionByZero { instruction: &'static str },
    /// Index, length or shift count outside the accepted range.
    #[error("{instruction}: {reason}")]
    OutOfRange {
        instruction: &'static str,
        reason: String,
    },
    /// `put` would make a struct contain itself.
    #[error("put would create a cyclic structure")]
    CyclicStructure,
    /// Script has public methods but the register bank cannot hold the
    /// dispatcher's scratch registers.
    #[error("{context} has public methods and needs {required} registers, VM has {available}")]
    TooFewRegisters {
        context: String,
        required: usize,
        available: usize,
    },
    /// Register index exceeds the register bank size.
    #[error("register index {index} out of bounds ({available} available)")]
    InvalidRegisterIndex { index: u8, available: usize },

    // ---------- malformed bytecode ----------
    /// Unknown opcode encountered in bytecode.
    #[error("invalid instruction 0x{opcode:02x} at offset {offset}")]
    InvalidInstruction { opcode: u8, offset: usize },
    /// Bytecode ended while reading an instruction.
    #[error("unexpected end of bytecode at {ip}: need {requested} bytes, {available} left")]
    UnexpectedEndOfBytecode {
        ip: usize,
        requested: usize,
        available: usize,
    },
    /// Unknown value-type or target tag.
    #[error("invalid operand tag 0x{tag:02x} at offset {offset}")]
    InvalidOperandTag { tag: u8, offset: usize },
    /// Literal payload could not be decoded.
    #[error("invalid literal at offset {offset}: {reason}")]
    InvalidLiteral { offset: usize, reason: String },

    // ---------- registration, format and tooling ----------
    #[error("context {name} already registered")]
    DuplicateContext { name: String },
    #[error("interop {name} already registered")]
    DuplicateInterop { name: String },
    /// Failed to decode a serialized script.
    #[error("decoding error: {reason}")]
    DecodeError { reason: String },
    /// Assembly error with line and column context.
    #[error("line {line}:{offset}: {source}")]
    AssemblyError {
        line: usize,
        offset: usize,
        source: String,
    },
    #[error("line {line}:{offset}: {message}")]
    ParseError {
        line: usize,
        offset: usize,
        message: String,
    },
    /// Unrecognized instruction mnemonic during assembly.
    #[error("invalid instruction name: {name}")]
    InvalidInstructionName { name: String },
    /// Wrong number of operands for an instruction.
    #[error("{mnemonic} expects {expected} operands, got {actual}")]
    ArityMismatch {
        mnemonic: &'static str,
        expected: usize,
        actual: usize,
    },
    /// Expected a register operand (e.g. `r0`) but got something else.
    #[error("expected register, got {token}")]
    ExpectedRegister { token: String },
    #[error("invalid register {token}")]
    InvalidRegister { token: String },
    /// Token is not a recognized literal form.
    #[error("invalid literal {token}: {reason}")]
    InvalidLiteralToken { token: String, reason: String },
    #[error("duplicate label: {label}")]
    DuplicateLabel { label: String },
    #[error("undefined label: {label}")]
    UndefinedLabel { label: String },
    #[error("io error: {message}")]
    IoError { message: String },
}

impl VMError {
    /// True for a fault raised by the `throw` opcode.
    pub fn is_user_throw(&self) -> bool {
        matches!(self, VMError::UserThrow { .. })
    }

    /// The message carried by a `throw`, if this is one.
    pub fn user_message(&self) -> Option<&str> {
        match self {
            VMError::UserThrow { message } => Some(message),
            _ => None,
        }
    }
}

impl From<std::io::Error> for VMError {
    fn from(err: std::io::Error) -> Self {
        VMError::IoError {
            message: err.to_string(),
        }
    }
}

impl From<crate::types::encoding::DecodeError> for VMError {
    fn from(err: crate::types::encoding::DecodeError) -> Self {
        VMError::DecodeError {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_throw_is_distinguished() {
        let thrown = VMError::UserThrow {
            message: "insufficient balance".into(),
        };
        assert!(thrown.is_user_throw());
        assert_eq!(thrown.user_message(), Some("insufficient balance"));

        let internal = VMError::StackUnderflow { instruction: "POP" };
        assert!(!internal.is_user_throw());
        assert_eq!(internal.user_message(), None);
    }

    #[test]
    fn messages_render_fields() {
        let err = VMError::InvalidCast {
            instruction: "NOT",
            expected: "Bool",
            actual: "String",
        };
        assert_eq!(err.to_string(), "NOT: expected Bool but got String");
        let err = VMError::InvalidInstruction {
            opcode: 0xAB,
            offset: 7,
        };
        assert_eq!(err.to_string(), "invalid instruction 0xab at offset 7");
    }
}
