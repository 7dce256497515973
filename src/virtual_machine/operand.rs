//! Encoded operand kinds that carry more than a register index.
//!
//! [`ValueType`] tags name a value type inside bytecode (for `LOAD` literals
//! and `CAST`). [`Literal`] is the inline constant of `LOAD`. [`Target`] is
//! the `EXTCALL` operand, either an inline interop name or a register that
//! holds one.

use crate::types::encoding::{Encode, EncodeSink};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::value::{Timestamp, Value};
use num_bigint::BigInt;
use std::fmt;

/// Type tag of a [`Value`].
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    None = 0,
    Bool = 1,
    Number = 2,
    String = 3,
    Bytes = 4,
    Timestamp = 5,
    Struct = 6,
    Enum = 7,
    Object = 8,
}

impl ValueType {
    pub const fn name(&self) -> &'static str {
        match self {
            ValueType::None => "None",
            ValueType::Bool => "Bool",
            ValueType::Number => "Number",
            ValueType::String => "String",
            ValueType::Bytes => "Bytes",
            ValueType::Timestamp => "Timestamp",
            ValueType::Struct => "Struct",
            ValueType::Enum => "Enum",
            ValueType::Object => "Object",
        }
    }

    /// Case-insensitive lookup used by the assembler.
    pub fn from_name(name: &str) -> Option<ValueType> {
        [
            ValueType::None,
            ValueType::Bool,
            ValueType::Number,
            ValueType::String,
            ValueType::Bytes,
            ValueType::Timestamp,
            ValueType::Struct,
            ValueType::Enum,
            ValueType::Object,
        ]
        .into_iter()
        .find(|ty| ty.name().eq_ignore_ascii_case(name))
    }
}

impl TryFrom<u8> for ValueType {
    type Error = VMError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => ValueType::None,
            1 => ValueType::Bool,
            2 => ValueType::Number,
            3 => ValueType::String,
            4 => ValueType::Bytes,
            5 => ValueType::Timestamp,
            6 => ValueType::Struct,
            7 => ValueType::Enum,
            8 => ValueType::Object,
            _ => {
                return Err(VMError::InvalidOperandTag {
                    tag: value,
                    offset: 0,
                });
            }
        })
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inline constant operand of `LOAD`.
///
/// Struct and Object values have no literal form; scripts build structs with
/// `PUT` and receive objects from interops.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Literal {
    None,
    Bool(bool),
    Number(BigInt),
    String(String),
    Bytes(Vec<u8>),
    Timestamp(u32),
    Enum(u32),
}

impl Literal {
    pub fn value_type(&self) -> ValueType {
        match self {
            Literal::None => ValueType::None,
            Literal::Bool(_) => ValueType::Bool,
            Literal::Number(_) => ValueType::Number,
            Literal::String(_) => ValueType::String,
            Literal::Bytes(_) => ValueType::Bytes,
            Literal::Timestamp(_) => ValueType::Timestamp,
            Literal::Enum(_) => ValueType::Enum,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Literal::None => Value::None,
            Literal::Bool(b) => Value::Bool(b),
            Literal::Number(n) => Value::Number(n),
            Literal::String(s) => Value::String(s),
            Literal::Bytes(b) => Value::Bytes(b.into()),
            Literal::Timestamp(t) => Value::Timestamp(Timestamp(t)),
            Literal::Enum(e) => Value::Enum(e),
        }
    }
}

impl Encode for Literal {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        (self.value_type() as u8).encode(out);
        match self {
            Literal::None => {}
            Literal::Bool(b) => b.encode(out),
            // Numbers travel as little-endian two's complement bytes.
            Literal::Number(n) => n.to_signed_bytes_le().encode(out),
            Literal::String(s) => s.encode(out),
            Literal::Bytes(b) => b.encode(out),
            Literal::Timestamp(t) | Literal::Enum(t) => t.encode(out),
        }
    }
}

/// `EXTCALL` operand: inline interop name or a register holding it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Register(u8),
    Name(String),
}

impl Target {
    pub const REGISTER_TAG: u8 = 0;
    pub const NAME_TAG: u8 = 1;
}

impl Encode for Target {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        match self {
            Target::Register(reg) => {
                Self::REGISTER_TAG.encode(out);
                reg.encode(out);
            }
            Target::Name(name) => {
                Self::NAME_TAG.encode(out);
                name.encode(out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_type_tags() {
        for tag in 0u8..=8 {
            let ty = ValueType::try_from(tag).unwrap();
            assert_eq!(ty as u8, tag);
            assert_eq!(ValueType::from_name(&ty.name().to_lowercase()), Some(ty));
        }
        assert!(matches!(
            ValueType::try_from(9),
            Err(VMError::InvalidOperandTag { tag: 9, .. })
        ));
        assert_eq!(ValueType::from_name("list"), None);
    }

    #[test]
    fn literal_layouts() {
        assert_eq!(Literal::None.to_bytes().as_slice(), &[0]);
        assert_eq!(Literal::Bool(true).to_bytes().as_slice(), &[1, 1]);
        assert_eq!(
            Literal::Enum(3).to_bytes().as_slice(),
            &[ValueType::Enum as u8, 3, 0, 0, 0]
        );
        let number = Literal::Number(BigInt::from(-2)).to_bytes();
        assert_eq!(number[0], ValueType::Number as u8);
        assert_eq!(&number[1..9], &1u64.to_le_bytes());
        assert_eq!(number[9], 0xFE);
    }

    #[test]
    fn target_layouts() {
        assert_eq!(Target::Register(7).to_bytes().as_slice(), &[0, 7]);
        let named = Target::Name("Runtime.Log".into()).to_bytes();
        assert_eq!(named[0], Target::NAME_TAG);
        assert_eq!(&named[1..9], &11u64.to_le_bytes());
        assert_eq!(&named[9..], b"Runtime.Log");
    }
}
