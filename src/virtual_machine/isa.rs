//! Instruction Set Architecture (ISA) definitions.
//!
//! The [`for_each_instruction!`](crate::for_each_instruction) macro holds the
//! canonical instruction table and hands it to a callback macro. The VM
//! dispatcher, the assembler and the ISA hash check all generate their code
//! from this one table.
//!
//! This module generates:
//! - The [`Instruction`] enum with opcode mappings
//! - `TryFrom<u8>` for decoding opcodes
//! - [`Instruction::mnemonic`] and [`Instruction::operand_count`]
//!
//! # Bytecode Format
//!
//! One opcode byte, then the operands in table order:
//! - `Reg`: 1 byte register index
//! - `Addr`: 4 bytes, little-endian absolute offset in the current context
//! - `Literal`: value-type tag byte, then the payload
//!   (see [`operand::Literal`](super::operand::Literal))
//! - `Type`: value-type tag byte
//! - `Target`: tag 0 + register, or tag 1 + 8-byte length + UTF-8 interop name
//!
//! Destinations come last, except for `LOAD` and `POP` whose only register is
//! the destination.

use crate::virtual_machine::errors::VMError;

/// Invokes a callback macro with the complete instruction definition list.
#[macro_export]
macro_rules! for_each_instruction {
    ($callback:ident) => {
        $callback! {
            /// NOP ; does nothing
            Nop = 0x00, "NOP" => [],
            // =========================
            // Registers and stack
            // =========================
            /// MOVE src, dst ; dst = src, src = None
            Move = 0x01, "MOVE" => [src: Reg, dst: Reg],
            /// COPY src, dst ; dst = deep copy of src
            Copy = 0x02, "COPY" => [src: Reg, dst: Reg],
            /// SWAP a, b ; exchange a and b
            Swap = 0x03, "SWAP" => [a: Reg, b: Reg],
            /// LOAD dst, literal ; dst = literal
            Load = 0x04, "LOAD" => [dst: Reg, value: Literal],
            /// CLEAR dst ; dst = None
            Clear = 0x05, "CLEAR" => [dst: Reg],
            /// PUSH src ; push src onto the evaluation stack
            Push = 0x06, "PUSH" => [src: Reg],
            /// POP dst ; dst = pop the evaluation stack
            Pop = 0x07, "POP" => [dst: Reg],
            // =========================
            // Control flow
            // =========================
            /// JMP target ; ip = target
            Jmp = 0x10, "JMP" => [target: Addr],
            /// JMPIF cond, target ; if cond then ip = target
            JmpIf = 0x11, "JMPIF" => [cond: Reg, target: Addr],
            /// JMPNOT cond, target ; if !cond then ip = target
            JmpNot = 0x12, "JMPNOT" => [cond: Reg, target: Addr],
            /// CALL target ; new frame in the current context at target
            Call = 0x13, "CALL" => [target: Addr],
            /// RET ; leave the current frame, halt when it was the last one
            Ret = 0x14, "RET" => [],
            /// THROW msg ; fault with the String in msg
            Throw = 0x15, "THROW" => [msg: Reg],
            /// EXTCALL name|reg ; invoke a host interop
            ExtCall = 0x16, "EXTCALL" => [target: Target],
            /// CTX name, dst ; dst = handle of the context named by name
            Ctx = 0x17, "CTX" => [name: Reg, dst: Reg],
            /// SWITCH handle ; enter the context at offset 0 in a new frame
            Switch = 0x18, "SWITCH" => [handle: Reg],
            // =========================
            // Casts, text and bytes
            // =========================
            /// CAST src, dst, type ; dst = src converted to type
            Cast = 0x20, "CAST" => [src: Reg, dst: Reg, ty: Type],
            /// CAT a, b, dst ; dst = a ++ b
            Cat = 0x21, "CAT" => [a: Reg, b: Reg, dst: Reg],
            /// RANGE src, dst, index, length ; dst = src[index..index + length]
            Range = 0x22, "RANGE" => [src: Reg, dst: Reg, index: Reg, length: Reg],
            /// LEFT src, dst, length ; dst = first length bytes of src
            Left = 0x23, "LEFT" => [src: Reg, dst: Reg, length: Reg],
            /// RIGHT src, dst, length ; dst = last length bytes of src
            Right = 0x24, "RIGHT" => [src: Reg, dst: Reg, length: Reg],
            /// SIZE src, dst ; dst = byte length of src
            Size = 0x25, "SIZE" => [src: Reg, dst: Reg],
            /// COUNT src, dst ; dst = number of struct entries
            Count = 0x26, "COUNT" => [src: Reg, dst: Reg],
            // =========================
            // Logic and comparison
            // =========================
            /// NOT src, dst ; dst = !src
            Not = 0x30, "NOT" => [src: Reg, dst: Reg],
            /// AND a, b, dst ; dst = a && b
            And = 0x31, "AND" => [a: Reg, b: Reg, dst: Reg],
            /// OR a, b, dst ; dst = a || b
            Or = 0x32, "OR" => [a: Reg, b: Reg, dst: Reg],
            /// XOR a, b, dst ; dst = a ^ b
            Xor = 0x33, "XOR" => [a: Reg, b: Reg, dst: Reg],
            /// EQUAL a, b, dst ; dst = (a == b), false across types
            Equal = 0x34, "EQUAL" => [a: Reg, b: Reg, dst: Reg],
            /// LT a, b, dst ; dst = (a < b)
            Lt = 0x35, "LT" => [a: Reg, b: Reg, dst: Reg],
            /// GT a, b, dst ; dst = (a > b)
            Gt = 0x36, "GT" => [a: Reg, b: Reg, dst: Reg],
            /// LTE a, b, dst ; dst = (a <= b)
            Lte = 0x37, "LTE" => [a: Reg, b: Reg, dst: Reg],
            /// GTE a, b, dst ; dst = (a >= b)
            Gte = 0x38, "GTE" => [a: Reg, b: Reg, dst: Reg],
            // =========================
            // Arithmetic
            // =========================
            /// INC reg ; reg = reg + 1
            Inc = 0x40, "INC" => [reg: Reg],
            /// DEC reg ; reg = reg - 1
            Dec = 0x41, "DEC" => [reg: Reg],
            /// SIGN src, dst ; dst = -1, 0 or 1
            Sign = 0x42, "SIGN" => [src: Reg, dst: Reg],
            /// NEGATE src, dst ; dst = -src
            Negate = 0x43, "NEGATE" => [src: Reg, dst: Reg],
            /// ABS src, dst ; dst = |src|
            Abs = 0x44, "ABS" => [src: Reg, dst: Reg],
            /// ADD a, b, dst ; dst = a + b
            Add = 0x45, "ADD" => [a: Reg, b: Reg, dst: Reg],
            /// SUB a, b, dst ; dst = a - b
            Sub = 0x46, "SUB" => [a: Reg, b: Reg, dst: Reg],
            /// MUL a, b, dst ; dst = a * b
            Mul = 0x47, "MUL" => [a: Reg, b: Reg, dst: Reg],
            /// DIV a, b, dst ; dst = a / b, truncated toward zero
            Div = 0x48, "DIV" => [a: Reg, b: Reg, dst: Reg],
            /// MOD a, b, dst ; dst = a % b, sign follows a
            Mod = 0x49, "MOD" => [a: Reg, b: Reg, dst: Reg],
            /// SHL a, b, dst ; dst = a * 2^b
            Shl = 0x4A, "SHL" => [a: Reg, b: Reg, dst: Reg],
            /// SHR a, b, dst ; dst = a / 2^b, truncated toward zero
            Shr = 0x4B, "SHR" => [a: Reg, b: Reg, dst: Reg],
            /// MIN a, b, dst ; dst = min(a, b)
            Min = 0x4C, "MIN" => [a: Reg, b: Reg, dst: Reg],
            /// MAX a, b, dst ; dst = max(a, b)
            Max = 0x4D, "MAX" => [a: Reg, b: Reg, dst: Reg],
            /// POW a, b, dst ; dst = a^b
            Pow = 0x4E, "POW" => [a: Reg, b: Reg, dst: Reg],
            // =========================
            // Structs
            // =========================
            /// PUT value, container, key ; container[key] = value
            Put = 0x50, "PUT" => [value: Reg, container: Reg, key: Reg],
            /// GET container, dst, key ; dst = container[key] or None
            Get = 0x51, "GET" => [container: Reg, dst: Reg, key: Reg],
        }
    };
}

#[macro_export]
macro_rules! define_instructions {
    (@count) => { 0usize };
    (@count $head:ident $( $tail:ident )*) => { 1usize + define_instructions!(@count $( $tail )*) };

    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:literal, $mnemonic:literal => [
                $( $field:ident : $kind:ident ),* $(,)?
            ]
        ),* $(,)?
    ) => {
        // =========================
        // VM instruction enum
        // =========================
        #[repr(u8)]
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub enum Instruction {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl TryFrom<u8> for Instruction {
            type Error = VMError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $opcode => Ok(Instruction::$name), )*
                    _ => Err(VMError::InvalidInstruction {
                        opcode: value,
                        offset: 0,
                    }),
                }
            }
        }

        impl Instruction {
            /// Every instruction in opcode order.
            pub const ALL: &'static [Instruction] = &[ $( Instruction::$name, )* ];

            /// Returns the assembly mnemonic for this instruction.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Instruction::$name => $mnemonic, )*
                }
            }

            /// Number of encoded operands.
            pub const fn operand_count(&self) -> usize {
                match self {
                    $( Instruction::$name => define_instructions!(@count $( $kind )*), )*
                }
            }
        }
    };
}

for_each_instruction!(define_instructions);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_try_from_invalid() {
        assert!(matches!(
            Instruction::try_from(0xFF),
            Err(VMError::InvalidInstruction { opcode: 0xFF, .. })
        ));
    }

    #[test]
    fn opcodes_round_trip_and_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for instr in Instruction::ALL {
            let opcode = *instr as u8;
            assert!(seen.insert(opcode), "duplicate opcode 0x{opcode:02x}");
            assert_eq!(Instruction::try_from(opcode).unwrap(), *instr);
        }
    }

    #[test]
    fn mnemonics_and_arity() {
        assert_eq!(Instruction::Add.mnemonic(), "ADD");
        assert_eq!(Instruction::Add.operand_count(), 3);
        assert_eq!(Instruction::Ret.operand_count(), 0);
        assert_eq!(Instruction::Range.operand_count(), 4);
        assert_eq!(Instruction::ExtCall.mnemonic(), "EXTCALL");
    }
}
