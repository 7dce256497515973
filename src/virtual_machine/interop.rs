//! Host-registered functions invoked by `EXTCALL`.

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::vm::{ExecutionState, VM};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A host callback. It may pop and push the evaluation stack freely and
/// reports how execution should continue:
///
/// - `Ok(Running)`: resume after the `EXTCALL`
/// - `Ok(Halt)`: end the run successfully
/// - `Ok(Fault)`: abort with [`VMError::InteropFault`]
/// - `Err(e)`: abort with `e`
pub type InteropFn = Arc<dyn Fn(&mut VM) -> Result<ExecutionState, VMError> + Send + Sync>;

/// Name → callback bindings. Populated before execution and read-only while
/// any VM runs against it.
#[derive(Default)]
pub struct InteropTable {
    bindings: HashMap<String, InteropFn>,
}

impl InteropTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, callback: F) -> Result<(), VMError>
    where
        F: Fn(&mut VM) -> Result<ExecutionState, VMError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.bindings.contains_key(&name) {
            return Err(VMError::DuplicateInterop { name });
        }
        self.bindings.insert(name, Arc::new(callback));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<InteropFn> {
        self.bindings.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl fmt::Debug for InteropTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.bindings.keys().collect();
        names.sort();
        f.debug_struct("InteropTable").field("bindings", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let mut table = InteropTable::new();
        table
            .register("Runtime.Version", |vm| {
                vm.push(3i64.into())?;
                Ok(ExecutionState::Running)
            })
            .unwrap();

        assert!(table.contains("Runtime.Version"));
        assert!(table.get("Runtime.Version").is_some());
        assert!(table.get("Runtime.Missing").is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut table = InteropTable::new();
        table
            .register("Runtime.Log", |_| Ok(ExecutionState::Running))
            .unwrap();
        assert!(matches!(
            table.register("Runtime.Log", |_| Ok(ExecutionState::Halt)),
            Err(VMError::DuplicateInterop { ref name }) if name == "Runtime.Log"
        ));
    }
}
