use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::value::Value;
use num_bigint::BigInt;

/// Register bank of one frame.
///
/// Every slot starts as [`Value::None`]. Typed getters report an
/// [`VMError::InvalidCast`] naming the instruction that asked.
#[derive(Debug)]
pub(crate) struct Registers {
    regs: Vec<Value>,
}

impl Registers {
    /// Creates a bank of `count` empty registers.
    pub(crate) fn new(count: usize) -> Self {
        Self {
            regs: vec![Value::None; count],
        }
    }

    fn index_error(&self, idx: u8) -> VMError {
        VMError::InvalidRegisterIndex {
            index: idx,
            available: self.regs.len(),
        }
    }

    /// Returns a reference to the value in register `idx`.
    pub(crate) fn get(&self, idx: u8) -> Result<&Value, VMError> {
        self.regs
            .get(idx as usize)
            .ok_or_else(|| self.index_error(idx))
    }

    pub(crate) fn get_mut(&mut self, idx: u8) -> Result<&mut Value, VMError> {
        let err = self.index_error(idx);
        self.regs.get_mut(idx as usize).ok_or(err)
    }

    /// Strict Bool read; logic and branch operands never accept text.
    pub(crate) fn get_bool(&self, idx: u8, instr: &'static str) -> Result<bool, VMError> {
        match self.get(idx)? {
            Value::Bool(b) => Ok(*b),
            other => Err(VMError::InvalidCast {
                instruction: instr,
                expected: "Bool",
                actual: other.type_name(),
            }),
        }
    }

    pub(crate) fn get_number(&self, idx: u8, instr: &'static str) -> Result<&BigInt, VMError> {
        self.get(idx)?.as_number(instr)
    }

    /// Strict String read; unlike [`Value::as_string`] a Bool is rejected.
    pub(crate) fn get_str(&self, idx: u8, instr: &'static str) -> Result<&str, VMError> {
        match self.get(idx)? {
            Value::String(s) => Ok(s),
            other => Err(VMError::InvalidCast {
                instruction: instr,
                expected: "String",
                actual: other.type_name(),
            }),
        }
    }

    /// Stores a value into register `idx`.
    pub(crate) fn set(&mut self, idx: u8, v: Value) -> Result<(), VMError> {
        *self.get_mut(idx)? = v;
        Ok(())
    }

    /// Moves the value out, leaving `None` behind.
    pub(crate) fn take(&mut self, idx: u8) -> Result<Value, VMError> {
        Ok(std::mem::take(self.get_mut(idx)?))
    }

    pub(crate) fn swap(&mut self, a: u8, b: u8) -> Result<(), VMError> {
        self.get(a)?;
        self.get(b)?;
        self.regs.swap(a as usize, b as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty_and_bounds_checks() {
        let mut regs = Registers::new(4);
        assert!(regs.get(3).unwrap().is_none());
        assert!(matches!(
            regs.get(4),
            Err(VMError::InvalidRegisterIndex {
                index: 4,
                available: 4
            })
        ));
        assert!(regs.set(9, Value::Bool(true)).is_err());
        assert!(regs.swap(0, 9).is_err());
    }

    #[test]
    fn take_leaves_none() {
        let mut regs = Registers::new(2);
        regs.set(0, Value::from(5i64)).unwrap();
        assert_eq!(regs.take(0).unwrap(), Value::from(5i64));
        assert!(regs.get(0).unwrap().is_none());
    }

    #[test]
    fn typed_getters_report_the_instruction() {
        let mut regs = Registers::new(2);
        regs.set(0, Value::Bool(true)).unwrap();
        assert!(matches!(
            regs.get_number(0, "ADD"),
            Err(VMError::InvalidCast {
                instruction: "ADD",
                expected: "Number",
                actual: "Bool"
            })
        ));
        assert!(matches!(regs.get_str(0, "THROW"), Err(VMError::InvalidCast { .. })));
        assert!(regs.get_bool(0, "NOT").unwrap());
        regs.set(1, Value::from("true")).unwrap();
        assert!(matches!(regs.get_bool(1, "NOT"), Err(VMError::InvalidCast { .. })));
    }
}
