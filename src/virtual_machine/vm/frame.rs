use crate::types::bytes::Bytes;
use crate::virtual_machine::context::ScriptContext;
use crate::virtual_machine::vm::registers::Registers;
use std::sync::Arc;

/// One activation: a register bank, a resume offset and the context whose
/// code it runs. Created by `CALL` and `SWITCH`, dropped by `RET`.
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) context: Arc<ScriptContext>,
    pub(crate) registers: Registers,
    /// Offset of the next instruction to decode.
    pub(crate) ip: usize,
}

impl Frame {
    pub(crate) fn new(context: Arc<ScriptContext>, register_count: usize, ip: usize) -> Self {
        Self {
            context,
            registers: Registers::new(register_count),
            ip,
        }
    }

    pub(crate) fn code(&self) -> &Bytes {
        self.context.code()
    }

    pub(crate) fn at_end(&self) -> bool {
        self.ip >= self.code().len()
    }
}
