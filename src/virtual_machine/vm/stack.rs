use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::value::Value;

/// The evaluation stack shared by every frame and context of one VM.
#[derive(Debug)]
pub(crate) struct EvalStack {
    items: Vec<Value>,
    limit: usize,
}

impl EvalStack {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            items: Vec::new(),
            limit,
        }
    }

    pub(crate) fn push(&mut self, value: Value) -> Result<(), VMError> {
        if self.items.len() >= self.limit {
            return Err(VMError::StackOverflow { limit: self.limit });
        }
        self.items.push(value);
        Ok(())
    }

    pub(crate) fn pop(&mut self, instr: &'static str) -> Result<Value, VMError> {
        self.items
            .pop()
            .ok_or(VMError::StackUnderflow { instruction: instr })
    }

    pub(crate) fn peek(&self) -> Option<&Value> {
        self.items.last()
    }

    pub(crate) fn as_slice(&self) -> &[Value] {
        &self.items
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifo_with_limits() {
        let mut stack = EvalStack::new(2);
        stack.push(Value::from(1i64)).unwrap();
        stack.push(Value::from(2i64)).unwrap();
        assert!(matches!(
            stack.push(Value::None),
            Err(VMError::StackOverflow { limit: 2 })
        ));
        assert_eq!(stack.peek(), Some(&Value::from(2i64)));
        assert_eq!(stack.pop("POP").unwrap(), Value::from(2i64));
        assert_eq!(stack.pop("POP").unwrap(), Value::from(1i64));
        assert!(matches!(
            stack.pop("POP"),
            Err(VMError::StackUnderflow { instruction: "POP" })
        ));
    }
}
