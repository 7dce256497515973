//! Core virtual machine implementation.
//!
//! The VM runs a register-based bytecode against an entry [`ScriptContext`].
//! Each frame owns its own bank of registers. The evaluation stack is shared
//! by every frame and context of one VM, and it is the only channel for
//! passing values between scripts, contexts and host interops.
//!
//! Numbers are arbitrary precision, so arithmetic never wraps or overflows.

mod frame;
pub(crate) mod registers;
mod stack;

use crate::virtual_machine::assembler::DISPATCHER_REGISTERS;
use crate::virtual_machine::context::{ContextHandle, ContextRegistry, ScriptContext};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::interop::InteropTable;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::operand::{Literal, Target, ValueType};
use crate::virtual_machine::script::Script;
use crate::virtual_machine::value::{HostObject, Value, shift_amount, to_index};
use crate::{debug, warn};
use frame::Frame;
use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use registers::Registers;
use stack::EvalStack;
use std::fmt;
use std::sync::Arc;

/// Instruction name reported by faults raised through the host helpers.
const HOST: &str = "interop";

macro_rules! exec_vm {
    // Entry point
    (
        vm = $vm:ident,
        instr = $instr:ident,
        { $( $variant:ident => $handler:ident ( $( $field:ident : $kind:ident ),* $(,)? ) ),* $(,)? }
    ) => {{
        match $instr {
            $(
                Instruction::$variant => {
                    let instr_name = $instr.mnemonic();
                    $( let $field = exec_vm!(@read $vm, $kind)?; )*
                    $vm.$handler(instr_name, $( $field ),*)
                }
            ),*
        }
    }};

    // Decode a u8 register index
    (@read $vm:ident, Reg) => {{
        $vm.read_u8()
    }};

    // Decode an absolute u32 offset (little-endian, 4 bytes)
    (@read $vm:ident, Addr) => {{
        $vm.read_u32()
    }};

    (@read $vm:ident, Literal) => {{
        $vm.read_literal()
    }};

    (@read $vm:ident, Type) => {{
        $vm.read_value_type()
    }};

    (@read $vm:ident, Target) => {{
        $vm.read_target()
    }};
}

/// Execution state of a VM and the verdict a host interop returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionState {
    Running,
    Halt,
    Fault,
}

/// Limits and switches for one VM instance.
#[derive(Clone, Debug)]
pub struct VmConfig {
    /// Registers per frame.
    pub register_count: usize,
    /// Maximum number of live frames, counting the entry frame.
    pub max_call_depth: usize,
    /// Maximum number of values on the evaluation stack.
    pub max_stack_size: usize,
    /// Log every decoded instruction at debug level.
    pub trace: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            register_count: 32,
            max_call_depth: 1024,
            max_stack_size: 65_536,
            trace: false,
        }
    }
}

impl VmConfig {
    /// Fails when `context` has public methods and the register bank is too
    /// small for the dispatcher in front of them.
    pub fn check_context(&self, context: &ScriptContext) -> Result<(), VMError> {
        if !context.script().methods.is_empty() && self.register_count < DISPATCHER_REGISTERS {
            return Err(VMError::TooFewRegisters {
                context: context.name().to_string(),
                required: DISPATCHER_REGISTERS,
                available: self.register_count,
            });
        }
        Ok(())
    }
}

/// Where the last fault happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FaultSite {
    pub context: String,
    /// Offset of the faulting instruction's opcode.
    pub offset: usize,
    pub line: Option<u32>,
}

impl fmt::Display for FaultSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.context, self.offset)?;
        if let Some(line) = self.line {
            write!(f, " (line {line})")?;
        }
        Ok(())
    }
}

/// Bytecode virtual machine.
///
/// A VM is single-threaded and owns its registers, frames and evaluation
/// stack. The context registry and interop table are shared read-only, so
/// any number of VMs can run on different threads against the same
/// registered scripts.
pub struct VM {
    config: VmConfig,
    /// Context that `execute` and `invoke` start in.
    entry: Arc<ScriptContext>,
    contexts: Arc<ContextRegistry>,
    interops: Arc<InteropTable>,
    /// Frame currently executing.
    frame: Frame,
    /// Suspended frames, innermost last.
    call_stack: Vec<Frame>,
    stack: EvalStack,
    state: ExecutionState,
    /// Opcode offset of the instruction being executed.
    instr_offset: usize,
    fault_site: Option<FaultSite>,
}

impl VM {
    /// Creates a VM that starts in `entry` and resolves `CTX` and `EXTCALL`
    /// against the shared tables.
    pub fn new(
        entry: Arc<ScriptContext>,
        contexts: Arc<ContextRegistry>,
        interops: Arc<InteropTable>,
        config: VmConfig,
    ) -> Self {
        let frame = Frame::new(Arc::clone(&entry), config.register_count, 0);
        let stack = EvalStack::new(config.max_stack_size);
        Self {
            config,
            entry,
            contexts,
            interops,
            frame,
            call_stack: Vec::new(),
            stack,
            state: ExecutionState::Halt,
            instr_offset: 0,
            fault_site: None,
        }
    }

    /// A VM over a single script named `main`, with no other contexts and no
    /// interops.
    pub fn for_script(script: Script) -> Self {
        Self::new(
            Arc::new(ScriptContext::new("main", script)),
            Arc::new(ContextRegistry::new()),
            Arc::new(InteropTable::new()),
            VmConfig::default(),
        )
    }

    /// Runs the entry script from offset 0 until it halts or faults.
    ///
    /// Interop callbacks must not call this on the VM they were handed;
    /// doing so is [`VMError::NestedRun`] and faults the outer run.
    pub fn execute(&mut self) -> Result<(), VMError> {
        self.ensure_idle()?;
        let entry = Arc::clone(&self.entry);
        self.run_from(entry, 0)
    }

    /// Runs the entry script from a public method label.
    pub fn invoke(&mut self, method: &str) -> Result<(), VMError> {
        self.ensure_idle()?;
        let entry = Arc::clone(&self.entry);
        match entry.script().method_offset(method) {
            Some(offset) => self.run_from(entry, offset as usize),
            None => {
                warn!("no public method '{method}' in {}", entry.name());
                self.state = ExecutionState::Fault;
                self.fault_site = None;
                Err(VMError::UnknownLabel {
                    label: method.to_string(),
                })
            }
        }
    }

    fn ensure_idle(&self) -> Result<(), VMError> {
        match self.state {
            ExecutionState::Running => Err(VMError::NestedRun),
            _ => Ok(()),
        }
    }

    fn run_from(&mut self, context: Arc<ScriptContext>, ip: usize) -> Result<(), VMError> {
        self.call_stack.clear();
        self.frame = Frame::new(context, self.config.register_count, ip);
        self.state = ExecutionState::Running;
        self.instr_offset = ip;
        self.fault_site = None;

        match self.run() {
            Ok(()) => {
                self.state = ExecutionState::Halt;
                Ok(())
            }
            Err(err) => {
                self.state = ExecutionState::Fault;
                let site = FaultSite {
                    context: self.frame.context.name().to_string(),
                    offset: self.instr_offset,
                    line: self.frame.context.line_for(self.instr_offset),
                };
                warn!("execution faulted at {site}: {err}");
                self.fault_site = Some(site);
                self.call_stack.clear();
                Err(err)
            }
        }
    }

    /// Executes instructions until the state leaves `Running`.
    ///
    /// Running off the end of a frame's code behaves like `RET`.
    fn run(&mut self) -> Result<(), VMError> {
        self.config.check_context(&self.frame.context)?;
        if self.frame.ip > self.frame.code().len() {
            return Err(VMError::InvalidJumpTarget {
                target: u32::try_from(self.frame.ip).unwrap_or(u32::MAX),
                length: self.frame.code().len(),
            });
        }
        while self.state == ExecutionState::Running {
            if self.frame.at_end() {
                self.leave_frame();
                continue;
            }
            let offset = self.frame.ip;
            self.instr_offset = offset;
            let opcode = self.read_u8()?;
            let instr = Instruction::try_from(opcode)
                .map_err(|_| VMError::InvalidInstruction { opcode, offset })?;
            if self.config.trace {
                debug!(
                    "[{}:{:04}] {} (frames={}, stack={})",
                    self.frame.context.name(),
                    offset,
                    instr.mnemonic(),
                    self.call_stack.len() + 1,
                    self.stack.as_slice().len()
                );
            }
            self.exec(instr)?;
        }
        Ok(())
    }

    // ---------- bytecode reading ----------

    /// Reads exactly `count` bytes from the bytecode at the current IP.
    ///
    /// Advances the instruction pointer by `count` bytes.
    fn read_exact(&mut self, count: usize) -> Result<&[u8], VMError> {
        let start = self.frame.ip;
        let length = self.frame.code().len();
        let end = start
            .checked_add(count)
            .filter(|end| *end <= length)
            .ok_or(VMError::UnexpectedEndOfBytecode {
                ip: start,
                requested: count,
                available: length.saturating_sub(start),
            })?;
        self.frame.ip = end;
        Ok(&self.frame.context.code()[start..end])
    }

    fn read_u8(&mut self) -> Result<u8, VMError> {
        Ok(self.read_exact(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, VMError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.read_exact(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    /// Reads an 8-byte little-endian length prefix.
    fn read_len(&mut self, offset: usize) -> Result<usize, VMError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.read_exact(8)?);
        usize::try_from(u64::from_le_bytes(buf)).map_err(|_| VMError::InvalidLiteral {
            offset,
            reason: "length does not fit in memory".to_string(),
        })
    }

    fn read_string(&mut self, offset: usize) -> Result<String, VMError> {
        let len = self.read_len(offset)?;
        let bytes = self.read_exact(len)?.to_vec();
        String::from_utf8(bytes).map_err(|_| VMError::InvalidLiteral {
            offset,
            reason: "string is not valid UTF-8".to_string(),
        })
    }

    fn read_literal(&mut self) -> Result<Literal, VMError> {
        let offset = self.frame.ip;
        let tag = self.read_u8()?;
        let ty = ValueType::try_from(tag).map_err(|_| VMError::InvalidOperandTag { tag, offset })?;
        Ok(match ty {
            ValueType::None => Literal::None,
            ValueType::Bool => match self.read_u8()? {
                0 => Literal::Bool(false),
                1 => Literal::Bool(true),
                other => {
                    return Err(VMError::InvalidLiteral {
                        offset,
                        reason: format!("bool byte {other}"),
                    });
                }
            },
            ValueType::Number => {
                let len = self.read_len(offset)?;
                Literal::Number(BigInt::from_signed_bytes_le(self.read_exact(len)?))
            }
            ValueType::String => Literal::String(self.read_string(offset)?),
            ValueType::Bytes => {
                let len = self.read_len(offset)?;
                Literal::Bytes(self.read_exact(len)?.to_vec())
            }
            ValueType::Timestamp => Literal::Timestamp(self.read_u32()?),
            ValueType::Enum => Literal::Enum(self.read_u32()?),
            ValueType::Struct | ValueType::Object => {
                return Err(VMError::InvalidLiteral {
                    offset,
                    reason: format!("{ty} has no literal form"),
                });
            }
        })
    }

    fn read_value_type(&mut self) -> Result<ValueType, VMError> {
        let offset = self.frame.ip;
        let tag = self.read_u8()?;
        ValueType::try_from(tag).map_err(|_| VMError::InvalidOperandTag { tag, offset })
    }

    fn read_target(&mut self) -> Result<Target, VMError> {
        let offset = self.frame.ip;
        match self.read_u8()? {
            Target::REGISTER_TAG => Ok(Target::Register(self.read_u8()?)),
            Target::NAME_TAG => Ok(Target::Name(self.read_string(offset)?)),
            tag => Err(VMError::InvalidOperandTag { tag, offset }),
        }
    }

    /// Executes a single instruction.
    fn exec(&mut self, instruction: Instruction) -> Result<(), VMError> {
        exec_vm! {
            vm = self,
            instr = instruction,
            {
                Nop => op_nop(),
                // Registers and stack
                Move => op_move(src: Reg, dst: Reg),
                Copy => op_copy(src: Reg, dst: Reg),
                Swap => op_swap(a: Reg, b: Reg),
                Load => op_load(dst: Reg, value: Literal),
                Clear => op_clear(dst: Reg),
                Push => op_push(src: Reg),
                Pop => op_pop(dst: Reg),
                // Control flow
                Jmp => op_jmp(target: Addr),
                JmpIf => op_jmp_if(cond: Reg, target: Addr),
                JmpNot => op_jmp_not(cond: Reg, target: Addr),
                Call => op_call(target: Addr),
                Ret => op_ret(),
                Throw => op_throw(msg: Reg),
                ExtCall => op_ext_call(target: Target),
                Ctx => op_ctx(name: Reg, dst: Reg),
                Switch => op_switch(handle: Reg),
                // Casts, text and bytes
                Cast => op_cast(src: Reg, dst: Reg, ty: Type),
                Cat => op_cat(a: Reg, b: Reg, dst: Reg),
                Range => op_range(src: Reg, dst: Reg, index: Reg, length: Reg),
                Left => op_left(src: Reg, dst: Reg, length: Reg),
                Right => op_right(src: Reg, dst: Reg, length: Reg),
                Size => op_size(src: Reg, dst: Reg),
                Count => op_count(src: Reg, dst: Reg),
                // Logic and comparison
                Not => op_not(src: Reg, dst: Reg),
                And => op_and(a: Reg, b: Reg, dst: Reg),
                Or => op_or(a: Reg, b: Reg, dst: Reg),
                Xor => op_xor(a: Reg, b: Reg, dst: Reg),
                Equal => op_equal(a: Reg, b: Reg, dst: Reg),
                Lt => op_lt(a: Reg, b: Reg, dst: Reg),
                Gt => op_gt(a: Reg, b: Reg, dst: Reg),
                Lte => op_lte(a: Reg, b: Reg, dst: Reg),
                Gte => op_gte(a: Reg, b: Reg, dst: Reg),
                // Arithmetic
                Inc => op_inc(reg: Reg),
                Dec => op_dec(reg: Reg),
                Sign => op_sign(src: Reg, dst: Reg),
                Negate => op_negate(src: Reg, dst: Reg),
                Abs => op_abs(src: Reg, dst: Reg),
                Add => op_add(a: Reg, b: Reg, dst: Reg),
                Sub => op_sub(a: Reg, b: Reg, dst: Reg),
                Mul => op_mul(a: Reg, b: Reg, dst: Reg),
                Div => op_div(a: Reg, b: Reg, dst: Reg),
                Mod => op_mod(a: Reg, b: Reg, dst: Reg),
                Shl => op_shl(a: Reg, b: Reg, dst: Reg),
                Shr => op_shr(a: Reg, b: Reg, dst: Reg),
                Min => op_min(a: Reg, b: Reg, dst: Reg),
                Max => op_max(a: Reg, b: Reg, dst: Reg),
                Pow => op_pow(a: Reg, b: Reg, dst: Reg),
                // Structs
                Put => op_put(value: Reg, container: Reg, key: Reg),
                Get => op_get(container: Reg, dst: Reg, key: Reg),
            }
        }
    }

    // ---------- frames ----------

    fn regs(&self) -> &Registers {
        &self.frame.registers
    }

    fn regs_mut(&mut self) -> &mut Registers {
        &mut self.frame.registers
    }

    fn check_target(&self, target: u32) -> Result<usize, VMError> {
        let length = self.frame.code().len();
        if target as usize > length {
            return Err(VMError::InvalidJumpTarget { target, length });
        }
        Ok(target as usize)
    }

    /// Suspends the current frame and makes a fresh one current.
    fn enter_frame(&mut self, context: Arc<ScriptContext>, ip: usize) -> Result<(), VMError> {
        if self.call_stack.len() + 1 >= self.config.max_call_depth {
            return Err(VMError::CallDepthExceeded {
                limit: self.config.max_call_depth,
            });
        }
        let frame = Frame::new(context, self.config.register_count, ip);
        let caller = std::mem::replace(&mut self.frame, frame);
        self.call_stack.push(caller);
        Ok(())
    }

    /// Resumes the caller, or halts when the entry frame returns.
    fn leave_frame(&mut self) {
        match self.call_stack.pop() {
            Some(caller) => {
                if !Arc::ptr_eq(&caller.context, &self.frame.context) {
                    debug!(
                        "return {} -> {}",
                        self.frame.context.name(),
                        caller.context.name()
                    );
                }
                self.frame = caller;
            }
            None => self.state = ExecutionState::Halt,
        }
    }

    // ---------- registers and stack ----------

    fn op_nop(&mut self, _instr: &'static str) -> Result<(), VMError> {
        Ok(())
    }

    fn op_move(&mut self, _instr: &'static str, src: u8, dst: u8) -> Result<(), VMError> {
        self.regs().get(dst)?;
        if src == dst {
            return Ok(());
        }
        let v = self.regs_mut().take(src)?;
        self.regs_mut().set(dst, v)
    }

    fn op_copy(&mut self, instr: &'static str, src: u8, dst: u8) -> Result<(), VMError> {
        let v = self.regs().get(src)?.deep_copy(instr)?;
        self.regs_mut().set(dst, v)
    }

    fn op_swap(&mut self, _instr: &'static str, a: u8, b: u8) -> Result<(), VMError> {
        self.regs_mut().swap(a, b)
    }

    fn op_load(&mut self, _instr: &'static str, dst: u8, value: Literal) -> Result<(), VMError> {
        self.regs_mut().set(dst, value.into_value())
    }

    fn op_clear(&mut self, _instr: &'static str, dst: u8) -> Result<(), VMError> {
        self.regs_mut().set(dst, Value::None)
    }

    fn op_push(&mut self, _instr: &'static str, src: u8) -> Result<(), VMError> {
        let v = self.regs().get(src)?.clone();
        self.stack.push(v)
    }

    fn op_pop(&mut self, instr: &'static str, dst: u8) -> Result<(), VMError> {
        self.regs().get(dst)?;
        let v = self.stack.pop(instr)?;
        self.regs_mut().set(dst, v)
    }

    // ---------- control flow ----------

    fn op_jmp(&mut self, _instr: &'static str, target: u32) -> Result<(), VMError> {
        self.frame.ip = self.check_target(target)?;
        Ok(())
    }

    fn op_jmp_if(&mut self, instr: &'static str, cond: u8, target: u32) -> Result<(), VMError> {
        if self.regs().get_bool(cond, instr)? {
            self.frame.ip = self.check_target(target)?;
        }
        Ok(())
    }

    fn op_jmp_not(&mut self, instr: &'static str, cond: u8, target: u32) -> Result<(), VMError> {
        if !self.regs().get_bool(cond, instr)? {
            self.frame.ip = self.check_target(target)?;
        }
        Ok(())
    }

    fn op_call(&mut self, _instr: &'static str, target: u32) -> Result<(), VMError> {
        let ip = self.check_target(target)?;
        let context = Arc::clone(&self.frame.context);
        self.enter_frame(context, ip)
    }

    fn op_ret(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.leave_frame();
        Ok(())
    }

    fn op_throw(&mut self, instr: &'static str, msg: u8) -> Result<(), VMError> {
        let message = self.regs().get_str(msg, instr)?.to_string();
        Err(VMError::UserThrow { message })
    }

    fn op_ext_call(&mut self, instr: &'static str, target: Target) -> Result<(), VMError> {
        let name = match target {
            Target::Register(reg) => self.regs().get_str(reg, instr)?.to_string(),
            Target::Name(name) => name,
        };
        let callback = self
            .interops
            .get(&name)
            .ok_or_else(|| VMError::UnknownInterop { name: name.clone() })?;
        if self.config.trace {
            debug!("extcall {name}");
        }
        match callback(self)? {
            ExecutionState::Running => Ok(()),
            ExecutionState::Halt => {
                self.state = ExecutionState::Halt;
                Ok(())
            }
            ExecutionState::Fault => Err(VMError::InteropFault {
                name,
                reason: "host reported a fault".to_string(),
            }),
        }
    }

    fn op_ctx(&mut self, instr: &'static str, name: u8, dst: u8) -> Result<(), VMError> {
        let context = {
            let name = self.regs().get_str(name, instr)?;
            self.contexts.resolve(name)?
        };
        self.regs_mut()
            .set(dst, Value::object(ContextHandle::new(context)))
    }

    fn op_switch(&mut self, instr: &'static str, handle: u8) -> Result<(), VMError> {
        let handle = self.regs().get(handle)?.as_interop::<ContextHandle>(instr)?;
        let context = Arc::clone(handle.context());
        debug!(
            "switch {} -> {}",
            self.frame.context.name(),
            context.name()
        );
        self.config.check_context(&context)?;
        self.enter_frame(context, 0)
    }

    // ---------- casts, text and bytes ----------

    fn op_cast(&mut self, instr: &'static str, src: u8, dst: u8, ty: ValueType) -> Result<(), VMError> {
        let v = self.regs().get(src)?.cast(ty, instr)?;
        self.regs_mut().set(dst, v)
    }

    fn op_cat(&mut self, instr: &'static str, a: u8, b: u8, dst: u8) -> Result<(), VMError> {
        let v = self.regs().get(a)?.cat(self.regs().get(b)?, instr)?;
        self.regs_mut().set(dst, v)
    }

    fn op_range(
        &mut self,
        instr: &'static str,
        src: u8,
        dst: u8,
        index: u8,
        length: u8,
    ) -> Result<(), VMError> {
        let index = to_index(self.regs().get_number(index, instr)?, instr)?;
        let length = to_index(self.regs().get_number(length, instr)?, instr)?;
        let v = self.regs().get(src)?.range(index, length, instr)?;
        self.regs_mut().set(dst, v)
    }

    fn op_left(&mut self, instr: &'static str, src: u8, dst: u8, length: u8) -> Result<(), VMError> {
        let length = to_index(self.regs().get_number(length, instr)?, instr)?;
        let v = self.regs().get(src)?.left(length, instr)?;
        self.regs_mut().set(dst, v)
    }

    fn op_right(&mut self, instr: &'static str, src: u8, dst: u8, length: u8) -> Result<(), VMError> {
        let length = to_index(self.regs().get_number(length, instr)?, instr)?;
        let v = self.regs().get(src)?.right(length, instr)?;
        self.regs_mut().set(dst, v)
    }

    fn op_size(&mut self, instr: &'static str, src: u8, dst: u8) -> Result<(), VMError> {
        let size = self.regs().get(src)?.size(instr)?;
        self.regs_mut().set(dst, Value::Number(BigInt::from(size)))
    }

    fn op_count(&mut self, instr: &'static str, src: u8, dst: u8) -> Result<(), VMError> {
        let count = self.regs().get(src)?.count(instr)?;
        self.regs_mut().set(dst, Value::Number(BigInt::from(count)))
    }

    // ---------- logic and comparison ----------

    fn op_not(&mut self, instr: &'static str, src: u8, dst: u8) -> Result<(), VMError> {
        let v = self.regs().get_bool(src, instr)?;
        self.regs_mut().set(dst, Value::Bool(!v))
    }

    fn op_and(&mut self, instr: &'static str, a: u8, b: u8, dst: u8) -> Result<(), VMError> {
        let va = self.regs().get_bool(a, instr)?;
        let vb = self.regs().get_bool(b, instr)?;
        self.regs_mut().set(dst, Value::Bool(va && vb))
    }

    fn op_or(&mut self, instr: &'static str, a: u8, b: u8, dst: u8) -> Result<(), VMError> {
        let va = self.regs().get_bool(a, instr)?;
        let vb = self.regs().get_bool(b, instr)?;
        self.regs_mut().set(dst, Value::Bool(va || vb))
    }

    fn op_xor(&mut self, instr: &'static str, a: u8, b: u8, dst: u8) -> Result<(), VMError> {
        let va = self.regs().get_bool(a, instr)?;
        let vb = self.regs().get_bool(b, instr)?;
        self.regs_mut().set(dst, Value::Bool(va ^ vb))
    }

    fn op_equal(&mut self, instr: &'static str, a: u8, b: u8, dst: u8) -> Result<(), VMError> {
        let eq = self.regs().get(a)?.try_equals(self.regs().get(b)?, instr)?;
        self.regs_mut().set(dst, Value::Bool(eq))
    }

    fn op_lt(&mut self, instr: &'static str, a: u8, b: u8, dst: u8) -> Result<(), VMError> {
        let r = self.regs().get_number(a, instr)? < self.regs().get_number(b, instr)?;
        self.regs_mut().set(dst, Value::Bool(r))
    }

    fn op_gt(&mut self, instr: &'static str, a: u8, b: u8, dst: u8) -> Result<(), VMError> {
        let r = self.regs().get_number(a, instr)? > self.regs().get_number(b, instr)?;
        self.regs_mut().set(dst, Value::Bool(r))
    }

    fn op_lte(&mut self, instr: &'static str, a: u8, b: u8, dst: u8) -> Result<(), VMError> {
        let r = self.regs().get_number(a, instr)? <= self.regs().get_number(b, instr)?;
        self.regs_mut().set(dst, Value::Bool(r))
    }

    fn op_gte(&mut self, instr: &'static str, a: u8, b: u8, dst: u8) -> Result<(), VMError> {
        let r = self.regs().get_number(a, instr)? >= self.regs().get_number(b, instr)?;
        self.regs_mut().set(dst, Value::Bool(r))
    }

    // ---------- arithmetic ----------

    fn op_inc(&mut self, instr: &'static str, reg: u8) -> Result<(), VMError> {
        let v = self.regs().get_number(reg, instr)? + 1u32;
        self.regs_mut().set(reg, Value::Number(v))
    }

    fn op_dec(&mut self, instr: &'static str, reg: u8) -> Result<(), VMError> {
        let v = self.regs().get_number(reg, instr)? - 1u32;
        self.regs_mut().set(reg, Value::Number(v))
    }

    fn op_sign(&mut self, instr: &'static str, src: u8, dst: u8) -> Result<(), VMError> {
        let v = self.regs().get_number(src, instr)?.signum();
        self.regs_mut().set(dst, Value::Number(v))
    }

    fn op_negate(&mut self, instr: &'static str, src: u8, dst: u8) -> Result<(), VMError> {
        let v = -self.regs().get_number(src, instr)?;
        self.regs_mut().set(dst, Value::Number(v))
    }

    fn op_abs(&mut self, instr: &'static str, src: u8, dst: u8) -> Result<(), VMError> {
        let v = self.regs().get_number(src, instr)?.abs();
        self.regs_mut().set(dst, Value::Number(v))
    }

    fn op_add(&mut self, instr: &'static str, a: u8, b: u8, dst: u8) -> Result<(), VMError> {
        let v = self.regs().get_number(a, instr)? + self.regs().get_number(b, instr)?;
        self.regs_mut().set(dst, Value::Number(v))
    }

    fn op_sub(&mut self, instr: &'static str, a: u8, b: u8, dst: u8) -> Result<(), VMError> {
        let v = self.regs().get_number(a, instr)? - self.regs().get_number(b, instr)?;
        self.regs_mut().set(dst, Value::Number(v))
    }

    fn op_mul(&mut self, instr: &'static str, a: u8, b: u8, dst: u8) -> Result<(), VMError> {
        let v = self.regs().get_number(a, instr)? * self.regs().get_number(b, instr)?;
        self.regs_mut().set(dst, Value::Number(v))
    }

    /// Quotient truncated toward zero.
    fn op_div(&mut self, instr: &'static str, a: u8, b: u8, dst: u8) -> Result<(), VMError> {
        let vb = self.regs().get_number(b, instr)?;
        if vb.is_zero() {
            return Err(VMError::DivisionByZero { instruction: instr });
        }
        let v = self.regs().get_number(a, instr)? / vb;
        self.regs_mut().set(dst, Value::Number(v))
    }

    /// Remainder with the sign of the dividend.
    fn op_mod(&mut self, instr: &'static str, a: u8, b: u8, dst: u8) -> Result<(), VMError> {
        let vb = self.regs().get_number(b, instr)?;
        if vb.is_zero() {
            return Err(VMError::DivisionByZero { instruction: instr });
        }
        let v = self.regs().get_number(a, instr)? % vb;
        self.regs_mut().set(dst, Value::Number(v))
    }

    fn op_shl(&mut self, instr: &'static str, a: u8, b: u8, dst: u8) -> Result<(), VMError> {
        let n = shift_amount(self.regs().get_number(b, instr)?, instr)?;
        let v = self.regs().get_number(a, instr)? << n as usize;
        self.regs_mut().set(dst, Value::Number(v))
    }

    /// Truncates toward zero for negative operands, matching `DIV` by 2^b.
    fn op_shr(&mut self, instr: &'static str, a: u8, b: u8, dst: u8) -> Result<(), VMError> {
        let n = shift_amount(self.regs().get_number(b, instr)?, instr)? as usize;
        let va = self.regs().get_number(a, instr)?;
        let v = if va.is_negative() {
            -((-va) >> n)
        } else {
            va >> n
        };
        self.regs_mut().set(dst, Value::Number(v))
    }

    fn op_min(&mut self, instr: &'static str, a: u8, b: u8, dst: u8) -> Result<(), VMError> {
        let v = self
            .regs()
            .get_number(a, instr)?
            .min(self.regs().get_number(b, instr)?)
            .clone();
        self.regs_mut().set(dst, Value::Number(v))
    }

    fn op_max(&mut self, instr: &'static str, a: u8, b: u8, dst: u8) -> Result<(), VMError> {
        let v = self
            .regs()
            .get_number(a, instr)?
            .max(self.regs().get_number(b, instr)?)
            .clone();
        self.regs_mut().set(dst, Value::Number(v))
    }

    fn op_pow(&mut self, instr: &'static str, a: u8, b: u8, dst: u8) -> Result<(), VMError> {
        let exponent = shift_amount(self.regs().get_number(b, instr)?, instr)?;
        let v = self.regs().get_number(a, instr)?.pow(exponent);
        self.regs_mut().set(dst, Value::Number(v))
    }

    // ---------- structs ----------

    fn op_put(&mut self, instr: &'static str, value: u8, container: u8, key: u8) -> Result<(), VMError> {
        let v = self.regs().get(value)?.clone();
        let k = self.regs().get(key)?.clone();
        self.regs_mut().get_mut(container)?.put(k, v, instr)
    }

    fn op_get(&mut self, instr: &'static str, container: u8, dst: u8, key: u8) -> Result<(), VMError> {
        let v = self
            .regs()
            .get(container)?
            .get(self.regs().get(key)?, instr)?;
        self.regs_mut().set(dst, v)
    }

    // ---------- host interface ----------

    /// Pushes a value for the script or the next interop to consume.
    pub fn push(&mut self, value: Value) -> Result<(), VMError> {
        self.stack.push(value)
    }

    pub fn pop(&mut self) -> Result<Value, VMError> {
        self.stack.pop(HOST)
    }

    pub fn peek(&self) -> Option<&Value> {
        self.stack.peek()
    }

    /// Pops a Bool, also accepting the Strings `"true"` and `"false"`.
    pub fn pop_bool(&mut self) -> Result<bool, VMError> {
        self.pop()?.as_bool(HOST)
    }

    pub fn pop_number(&mut self) -> Result<BigInt, VMError> {
        let v = self.pop()?;
        Ok(v.as_number(HOST)?.clone())
    }

    pub fn pop_string(&mut self) -> Result<String, VMError> {
        self.pop()?.as_string(HOST)
    }

    pub fn pop_bytes(&mut self) -> Result<Vec<u8>, VMError> {
        self.pop()?.as_bytes(HOST)
    }

    /// Pops an Object and clones the host value of type `T` out of it.
    pub fn pop_interop<T: HostObject + Clone>(&mut self) -> Result<T, VMError> {
        self.pop()?.as_interop::<T>(HOST)
    }

    /// Evaluation stack, bottom first.
    pub fn stack(&self) -> &[Value] {
        self.stack.as_slice()
    }

    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// `Halt` before the first run and after a successful one, `Fault` after
    /// a failed one, `Running` only while instructions (or an interop) run.
    pub fn state(&self) -> ExecutionState {
        self.state
    }

    /// Location of the last fault, cleared when a new run starts.
    pub fn fault_site(&self) -> Option<&FaultSite> {
        self.fault_site.as_ref()
    }

    /// Context of the frame that is executing (or that executed last).
    pub fn current_context(&self) -> &Arc<ScriptContext> {
        &self.frame.context
    }

    pub fn contexts(&self) -> &ContextRegistry {
        &self.contexts
    }

    /// Number of live frames, counting the current one.
    pub fn depth(&self) -> usize {
        self.call_stack.len() + 1
    }

    /// Register of the current frame. After a run this is the frame that
    /// returned last.
    pub fn register(&self, index: u8) -> Result<&Value, VMError> {
        self.regs().get(index)
    }
}
