//! Named, independently addressable scripts.
//!
//! The host registers one [`ScriptContext`] per deployed contract before
//! execution. Bytecode resolves a name with `CTX`, which yields a
//! [`ContextHandle`] object, and enters it with `SWITCH`. The registry is
//! immutable once shared, so one `Arc<ContextRegistry>` can serve any number
//! of VM instances across threads.

use crate::types::bytes::Bytes;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::script::Script;
use std::collections::HashMap;
use std::sync::Arc;

/// A named script.
#[derive(Debug)]
pub struct ScriptContext {
    name: String,
    script: Script,
}

impl ScriptContext {
    pub fn new(name: impl Into<String>, script: Script) -> Self {
        Self {
            name: name.into(),
            script,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn code(&self) -> &Bytes {
        &self.script.code
    }

    /// Source line for a code offset, when the script carries debug info.
    pub fn line_for(&self, offset: usize) -> Option<u32> {
        self.script.debug.as_ref()?.line_for(offset)
    }
}

/// Name → context table consulted by `CTX`.
#[derive(Debug, Default)]
pub struct ContextRegistry {
    contexts: HashMap<String, Arc<ScriptContext>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `script` under `name`. Names are unique.
    pub fn register(&mut self, name: impl Into<String>, script: Script) -> Result<Arc<ScriptContext>, VMError> {
        let name = name.into();
        if self.contexts.contains_key(&name) {
            return Err(VMError::DuplicateContext { name });
        }
        let context = Arc::new(ScriptContext::new(name.clone(), script));
        self.contexts.insert(name, Arc::clone(&context));
        Ok(context)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ScriptContext>> {
        self.contexts.get(name)
    }

    /// Like [`get`](Self::get) but with the fault `CTX` reports.
    pub fn resolve(&self, name: &str) -> Result<Arc<ScriptContext>, VMError> {
        self.contexts
            .get(name)
            .cloned()
            .ok_or_else(|| VMError::UnknownContext {
                name: name.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.contexts.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Opaque value `CTX` writes into its destination register.
#[derive(Clone, Debug)]
pub struct ContextHandle(Arc<ScriptContext>);

impl ContextHandle {
    pub fn new(context: Arc<ScriptContext>) -> Self {
        Self(context)
    }

    pub fn context(&self) -> &Arc<ScriptContext> {
        &self.0
    }
}

impl PartialEq for ContextHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::value::Value;

    #[test]
    fn register_and_resolve() {
        let mut registry = ContextRegistry::new();
        registry
            .register("token", Script::from_code(vec![0x14]))
            .unwrap();
        registry
            .register("market", Script::from_code(vec![0x00, 0x14]))
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["market", "token"]);
        assert_eq!(registry.resolve("token").unwrap().code().as_slice(), &[0x14]);
        assert!(matches!(
            registry.resolve("nexus"),
            Err(VMError::UnknownContext { ref name }) if name == "nexus"
        ));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = ContextRegistry::new();
        registry.register("token", Script::default()).unwrap();
        assert!(matches!(
            registry.register("token", Script::default()),
            Err(VMError::DuplicateContext { .. })
        ));
    }

    #[test]
    fn handles_compare_by_identity() {
        let mut registry = ContextRegistry::new();
        let a = registry.register("a", Script::default()).unwrap();
        let b = registry.register("b", Script::default()).unwrap();

        let handle = Value::object(ContextHandle::new(Arc::clone(&a)));
        assert!(handle.equals(&Value::object(ContextHandle::new(a))));
        assert!(!handle.equals(&Value::object(ContextHandle::new(b))));
        assert_eq!(
            handle.as_interop::<ContextHandle>("SWITCH").unwrap().context().name(),
            "a"
        );
    }
}
