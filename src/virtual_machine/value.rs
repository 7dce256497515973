//! The VM value model.
//!
//! Scalars (`Bool`, `Number`, `String`, `Bytes`, `Timestamp`, `Enum`) behave
//! as values. `Struct` and `Object` are reference types: cloning a [`Value`]
//! shares the underlying storage, and [`Value::deep_copy`] is the explicit
//! way to get an independent duplicate.

use crate::types::bytes::Bytes;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::operand::ValueType;
use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

/// Seconds since the Unix epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub u32);

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A host-side value carried through the VM without being interpreted.
///
/// Blanket-implemented for every `Clone + PartialEq + Debug` type, so hosts
/// wrap their own types with [`Value::object`] and get them back with
/// [`Value::as_interop`]. Equality is the type's `PartialEq` and deep copy is
/// its `Clone`.
pub trait HostObject: Any + fmt::Debug {
    fn duplicate(&self) -> Rc<RefCell<dyn HostObject>>;
    fn equals(&self, other: &dyn HostObject) -> bool;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Clone + PartialEq + fmt::Debug> HostObject for T {
    fn duplicate(&self) -> Rc<RefCell<dyn HostObject>> {
        Rc::new(RefCell::new(self.clone()))
    }

    fn equals(&self, other: &dyn HostObject) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Ordered key/value entries. Keys are scalar values compared with VM
/// equality; iteration follows insertion order.
#[derive(Debug, Default)]
pub struct VmStruct {
    entries: Vec<(Value, Value)>,
}

impl VmStruct {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.equals(key))
            .map(|(_, v)| v)
    }

    /// Inserts or overwrites. Overwriting keeps the key's original position.
    pub fn insert(&mut self, key: Value, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| k.equals(&key)) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

impl Drop for VmStruct {
    fn drop(&mut self) {
        // Children owned only by this struct are emptied here, one level at a
        // time, so releasing a deep chain never recurses.
        let mut pending: Vec<Value> = self.entries.drain(..).map(|(_, v)| v).collect();
        while let Some(value) = pending.pop() {
            if let Value::Struct(s) = value
                && Rc::strong_count(&s) == 1
                && let Ok(mut inner) = s.try_borrow_mut()
            {
                pending.extend(inner.entries.drain(..).map(|(_, v)| v));
            }
        }
    }
}

/// Every datum the VM manipulates.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Number(BigInt),
    String(String),
    Bytes(Bytes),
    Timestamp(Timestamp),
    Struct(Rc<RefCell<VmStruct>>),
    Enum(u32),
    Object(Rc<RefCell<dyn HostObject>>),
}

/// Largest accepted shift count or exponent.
pub const MAX_SHIFT: u32 = 65_536;

/// Deepest struct nesting `PUT` builds and `COPY`/`EQUAL` walk.
pub const MAX_STRUCT_DEPTH: usize = 128;

/// Nesting printed by `Display` before a struct is elided as `{...}`.
const DISPLAY_DEPTH: usize = 16;

type StructRef = Rc<RefCell<VmStruct>>;

fn too_deep(instruction: &'static str) -> VMError {
    VMError::OutOfRange {
        instruction,
        reason: format!("struct nesting exceeds {MAX_STRUCT_DEPTH}"),
    }
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::None => ValueType::None,
            Value::Bool(_) => ValueType::Bool,
            Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::Bytes(_) => ValueType::Bytes,
            Value::Timestamp(_) => ValueType::Timestamp,
            Value::Struct(_) => ValueType::Struct,
            Value::Enum(_) => ValueType::Enum,
            Value::Object(_) => ValueType::Object,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.value_type().name()
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Wraps a host value as an `Object`.
    pub fn object<T: HostObject>(value: T) -> Value {
        Value::Object(Rc::new(RefCell::new(value)))
    }

    pub fn new_struct() -> Value {
        Value::Struct(Rc::new(RefCell::new(VmStruct::new())))
    }

    fn cast_error(&self, instruction: &'static str, expected: &'static str) -> VMError {
        VMError::InvalidCast {
            instruction,
            expected,
            actual: self.type_name(),
        }
    }

    // ---------- typed accessors ----------

    /// `Bool`, or a String spelled `"true"`/`"false"`.
    pub fn as_bool(&self, instruction: &'static str) -> Result<bool, VMError> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::String(s) if s == "true" => Ok(true),
            Value::String(s) if s == "false" => Ok(false),
            other => Err(other.cast_error(instruction, "Bool")),
        }
    }

    pub fn as_number(&self, instruction: &'static str) -> Result<&BigInt, VMError> {
        match self {
            Value::Number(n) => Ok(n),
            other => Err(other.cast_error(instruction, "Number")),
        }
    }

    /// `String`, or a Bool rendered as `"true"`/`"false"`.
    pub fn as_string(&self, instruction: &'static str) -> Result<String, VMError> {
        match self {
            Value::String(s) => Ok(s.clone()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(other.cast_error(instruction, "String")),
        }
    }

    /// Raw bytes of a `Bytes` or the UTF-8 of a `String`.
    pub fn as_bytes(&self, instruction: &'static str) -> Result<Vec<u8>, VMError> {
        match self {
            Value::Bytes(b) => Ok(b.to_vec()),
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            other => Err(other.cast_error(instruction, "Bytes")),
        }
    }

    pub fn as_struct(&self, instruction: &'static str) -> Result<&Rc<RefCell<VmStruct>>, VMError> {
        match self {
            Value::Struct(s) => Ok(s),
            other => Err(other.cast_error(instruction, "Struct")),
        }
    }

    /// Clones the host value out of an `Object` of type `T`.
    pub fn as_interop<T: HostObject + Clone>(&self, instruction: &'static str) -> Result<T, VMError> {
        let mismatch = || VMError::InvalidCast {
            instruction,
            expected: std::any::type_name::<T>(),
            actual: self.type_name(),
        };
        match self {
            Value::Object(obj) => obj
                .borrow()
                .as_any()
                .downcast_ref::<T>()
                .cloned()
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        }
    }

    // ---------- identity ----------

    /// VM equality: same tag and equal payload. Cross-tag comparison is
    /// `false`, never an error.
    /// Structs nested deeper than [`MAX_STRUCT_DEPTH`] compare unequal; use
    /// [`Value::try_equals`] to get the fault instead.
    pub fn equals(&self, other: &Value) -> bool {
        self.try_equals(other, "EQUAL").unwrap_or(false)
    }

    pub fn try_equals(&self, other: &Value, instruction: &'static str) -> Result<bool, VMError> {
        self.equals_at(other, 1, &mut HashSet::new(), instruction)
    }

    /// `proven` holds struct pairs already found equal, so shared substructure
    /// is compared once.
    fn equals_at(
        &self,
        other: &Value,
        depth: usize,
        proven: &mut HashSet<(usize, usize)>,
        instruction: &'static str,
    ) -> Result<bool, VMError> {
        Ok(match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Enum(a), Value::Enum(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                if depth > MAX_STRUCT_DEPTH {
                    return Err(too_deep(instruction));
                }
                let pair = (Rc::as_ptr(a) as usize, Rc::as_ptr(b) as usize);
                if proven.contains(&pair) {
                    return Ok(true);
                }
                let (a, b) = (a.borrow(), b.borrow());
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (k, v) in a.iter() {
                    match b.get(k) {
                        Some(o) if v.equals_at(o, depth + 1, proven, instruction)? => {}
                        _ => return Ok(false),
                    }
                }
                proven.insert(pair);
                true
            }
            (Value::Object(a), Value::Object(b)) => {
                Rc::ptr_eq(a, b) || a.borrow().equals(&*b.borrow())
            }
            _ => false,
        })
    }

    /// Independent duplicate: structs are copied entry by entry and objects
    /// through their `Clone`. Sharing inside the copied graph is preserved.
    pub fn deep_copy(&self, instruction: &'static str) -> Result<Value, VMError> {
        self.copy_at(1, &mut HashMap::new(), instruction)
    }

    fn copy_at(
        &self,
        depth: usize,
        copies: &mut HashMap<usize, StructRef>,
        instruction: &'static str,
    ) -> Result<Value, VMError> {
        match self {
            Value::Struct(s) => {
                if depth > MAX_STRUCT_DEPTH {
                    return Err(too_deep(instruction));
                }
                let key = Rc::as_ptr(s) as usize;
                if let Some(done) = copies.get(&key) {
                    return Ok(Value::Struct(Rc::clone(done)));
                }
                let mut entries = Vec::with_capacity(s.borrow().len());
                for (k, v) in s.borrow().iter() {
                    entries.push((k.clone(), v.copy_at(depth + 1, copies, instruction)?));
                }
                let copy = Rc::new(RefCell::new(VmStruct { entries }));
                copies.insert(key, Rc::clone(&copy));
                Ok(Value::Struct(copy))
            }
            Value::Object(o) => Ok(Value::Object(o.borrow().duplicate())),
            other => Ok(other.clone()),
        }
    }

    /// Walks the structs reachable from this value without recursion and
    /// reports whether `target` is among them. Nesting of
    /// [`MAX_STRUCT_DEPTH`] or more is `OutOfRange`, so the container it is
    /// put into stays within the bound.
    fn check_nesting(&self, target: &StructRef, instruction: &'static str) -> Result<bool, VMError> {
        let mut pending: Vec<(StructRef, usize)> = match self {
            Value::Struct(s) => vec![(Rc::clone(s), 1)],
            _ => return Ok(false),
        };
        let mut deepest: HashMap<usize, usize> = HashMap::new();
        while let Some((node, depth)) = pending.pop() {
            if Rc::ptr_eq(&node, target) {
                return Ok(true);
            }
            if depth >= MAX_STRUCT_DEPTH {
                return Err(too_deep(instruction));
            }
            let key = Rc::as_ptr(&node) as usize;
            if deepest.get(&key).is_some_and(|seen| *seen >= depth) {
                continue;
            }
            deepest.insert(key, depth);
            for (_, v) in node.borrow().iter() {
                if let Value::Struct(child) = v {
                    pending.push((Rc::clone(child), depth + 1));
                }
            }
        }
        Ok(false)
    }

    // ---------- structs ----------

    /// `container[key] = value`, promoting a `None` container to an empty
    /// struct first. The value may hold at most `MAX_STRUCT_DEPTH - 1`
    /// levels of structs.
    pub fn put(&mut self, key: Value, value: Value, instruction: &'static str) -> Result<(), VMError> {
        check_key(&key, instruction)?;
        if self.is_none() {
            *self = Value::new_struct();
        }
        let container = self.as_struct(instruction)?;
        if value.check_nesting(container, instruction)? {
            return Err(VMError::CyclicStructure);
        }
        container.borrow_mut().insert(key, value);
        Ok(())
    }

    /// `container[key]`, `None` when absent. A `None` container reads as empty.
    pub fn get(&self, key: &Value, instruction: &'static str) -> Result<Value, VMError> {
        check_key(key, instruction)?;
        match self {
            Value::None => Ok(Value::None),
            other => Ok(other
                .as_struct(instruction)?
                .borrow()
                .get(key)
                .cloned()
                .unwrap_or_default()),
        }
    }

    pub fn count(&self, instruction: &'static str) -> Result<usize, VMError> {
        match self {
            Value::None => Ok(0),
            Value::Struct(s) => Ok(s.borrow().len()),
            other => Err(other.cast_error(instruction, "Struct")),
        }
    }

    // ---------- text and bytes ----------

    pub fn size(&self, instruction: &'static str) -> Result<usize, VMError> {
        match self {
            Value::String(s) => Ok(s.len()),
            Value::Bytes(b) => Ok(b.len()),
            other => Err(other.cast_error(instruction, "String or Bytes")),
        }
    }

    /// Concatenation. A single `None` side acts as empty; any `Bytes` side
    /// makes the result `Bytes`.
    pub fn cat(&self, other: &Value, instruction: &'static str) -> Result<Value, VMError> {
        match (self, other) {
            (Value::None, Value::None) => Err(self.cast_error(instruction, "String or Bytes")),
            (Value::None, v @ (Value::String(_) | Value::Bytes(_)))
            | (v @ (Value::String(_) | Value::Bytes(_)), Value::None) => Ok(v.clone()),
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            (a @ (Value::String(_) | Value::Bytes(_)), b @ (Value::String(_) | Value::Bytes(_))) => {
                let mut out = a.as_bytes(instruction)?;
                out.extend(b.as_bytes(instruction)?);
                Ok(Value::Bytes(out.into()))
            }
            (Value::String(_) | Value::Bytes(_) | Value::None, bad) | (bad, _) => {
                Err(bad.cast_error(instruction, "String or Bytes"))
            }
        }
    }

    /// Sub-sequence `[index, index + length)` by byte position.
    pub fn range(&self, index: usize, length: usize, instruction: &'static str) -> Result<Value, VMError> {
        let end = index.checked_add(length).ok_or_else(|| VMError::OutOfRange {
            instruction,
            reason: "range end overflows".to_string(),
        })?;
        let size = self.size(instruction)?;
        if end > size {
            return Err(VMError::OutOfRange {
                instruction,
                reason: format!("range {index}..{end} exceeds length {size}"),
            });
        }
        match self {
            Value::String(s) => s
                .get(index..end)
                .map(|sub| Value::String(sub.to_string()))
                .ok_or_else(|| VMError::OutOfRange {
                    instruction,
                    reason: format!("range {index}..{end} splits a UTF-8 character"),
                }),
            Value::Bytes(b) => Ok(Value::Bytes(Bytes::from(&b[index..end]))),
            other => Err(other.cast_error(instruction, "String or Bytes")),
        }
    }

    pub fn left(&self, length: usize, instruction: &'static str) -> Result<Value, VMError> {
        self.range(0, length, instruction)
    }

    pub fn right(&self, length: usize, instruction: &'static str) -> Result<Value, VMError> {
        let size = self.size(instruction)?;
        let start = size.checked_sub(length).ok_or_else(|| VMError::OutOfRange {
            instruction,
            reason: format!("length {length} exceeds size {size}"),
        })?;
        self.range(start, length, instruction)
    }

    // ---------- casts ----------

    /// Explicit conversion to `target`. Pairs outside the conversion table are
    /// `InvalidCast`.
    pub fn cast(&self, target: ValueType, instruction: &'static str) -> Result<Value, VMError> {
        let invalid = || self.cast_error(instruction, target.name());
        let out_of_range = |reason: String| VMError::OutOfRange { instruction, reason };

        Ok(match target {
            ValueType::None => Value::None,
            ValueType::Bool => match self {
                Value::Bool(_) | Value::String(_) => Value::Bool(self.as_bool(instruction)?),
                Value::Number(n) => Value::Bool(!n.is_zero()),
                _ => return Err(invalid()),
            },
            ValueType::Number => match self {
                Value::Number(n) => Value::Number(n.clone()),
                Value::String(s) => Value::Number(parse_decimal(s).ok_or_else(invalid)?),
                Value::Bool(b) => Value::Number(BigInt::from(*b as u8)),
                Value::Timestamp(t) => Value::Number(BigInt::from(t.0)),
                Value::Enum(e) => Value::Number(BigInt::from(*e)),
                Value::Bytes(b) => Value::Number(BigInt::from_signed_bytes_le(b)),
                _ => return Err(invalid()),
            },
            ValueType::String => match self {
                Value::String(s) => Value::String(s.clone()),
                Value::Bool(b) => Value::String(b.to_string()),
                Value::Number(n) => Value::String(n.to_string()),
                Value::Timestamp(t) => Value::String(t.to_string()),
                Value::Enum(e) => Value::String(e.to_string()),
                Value::Bytes(b) => Value::String(
                    String::from_utf8(b.to_vec())
                        .map_err(|_| out_of_range("bytes are not valid UTF-8".to_string()))?,
                ),
                _ => return Err(invalid()),
            },
            ValueType::Bytes => match self {
                Value::Bytes(b) => Value::Bytes(b.clone()),
                Value::String(s) => Value::Bytes(s.as_bytes().into()),
                Value::Number(n) => Value::Bytes(n.to_signed_bytes_le().into()),
                Value::Bool(b) => Value::Bytes(vec![*b as u8].into()),
                Value::Timestamp(t) => Value::Bytes(t.0.to_le_bytes().into()),
                Value::Enum(e) => Value::Bytes(e.to_le_bytes().into()),
                _ => return Err(invalid()),
            },
            ValueType::Timestamp => match self {
                Value::Timestamp(t) => Value::Timestamp(*t),
                Value::Number(n) => Value::Timestamp(Timestamp(n.to_u32().ok_or_else(|| {
                    out_of_range(format!("{n} does not fit a timestamp"))
                })?)),
                _ => return Err(invalid()),
            },
            ValueType::Enum => match self {
                Value::Enum(e) => Value::Enum(*e),
                Value::Number(n) => Value::Enum(
                    n.to_u32()
                        .ok_or_else(|| out_of_range(format!("{n} does not fit an enum")))?,
                ),
                _ => return Err(invalid()),
            },
            ValueType::Struct => match self {
                Value::Struct(s) => Value::Struct(Rc::clone(s)),
                Value::None => Value::new_struct(),
                _ => return Err(invalid()),
            },
            ValueType::Object => match self {
                Value::Object(o) => Value::Object(Rc::clone(o)),
                _ => return Err(invalid()),
            },
        })
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_nested(f, 0)
    }
}

impl Value {
    fn write_nested(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        match self {
            Value::None => f.write_str("none"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "{b:?}"),
            Value::Timestamp(t) => write!(f, "ts:{t}"),
            Value::Enum(e) => write!(f, "enum:{e}"),
            Value::Struct(_) if depth >= DISPLAY_DEPTH => f.write_str("{...}"),
            Value::Struct(s) => {
                f.write_str("{")?;
                for (i, (k, v)) in s.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: ")?;
                    v.write_nested(f, depth + 1)?;
                }
                f.write_str("}")
            }
            Value::Object(o) => write!(f, "<{}>", o.borrow().type_name()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<BigInt> for Value {
    fn from(n: BigInt) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(BigInt::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<Timestamp> for Value {
    fn from(t: Timestamp) -> Self {
        Value::Timestamp(t)
    }
}

/// Struct keys must be scalars.
fn check_key(key: &Value, instruction: &'static str) -> Result<(), VMError> {
    match key {
        Value::None | Value::Struct(_) | Value::Object(_) => {
            Err(key.cast_error(instruction, "scalar key"))
        }
        _ => Ok(()),
    }
}

/// Decimal integer with an optional sign, nothing else.
pub fn parse_decimal(text: &str) -> Option<BigInt> {
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let magnitude: BigInt = digits.parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Converts a shift count or exponent, bounded by [`MAX_SHIFT`].
pub fn shift_amount(n: &BigInt, instruction: &'static str) -> Result<u32, VMError> {
    n.to_u32()
        .filter(|n| *n <= MAX_SHIFT)
        .ok_or_else(|| VMError::OutOfRange {
            instruction,
            reason: format!("shift {n} outside 0..={MAX_SHIFT}"),
        })
}

/// Converts a Number into an index or length.
pub fn to_index(n: &BigInt, instruction: &'static str) -> Result<usize, VMError> {
    n.to_usize().ok_or_else(|| VMError::OutOfRange {
        instruction,
        reason: format!("{n} is not a valid index"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Address(String);

    fn num(n: i64) -> Value {
        Value::from(n)
    }

    #[test]
    fn equality_is_false_across_tags() {
        assert!(num(1).equals(&num(1)));
        assert!(!num(1).equals(&Value::from("1")));
        assert!(!Value::Bool(true).equals(&Value::from("true")));
        assert!(Value::None.equals(&Value::None));
        assert!(!Value::None.equals(&Value::Bool(false)));
    }

    #[test]
    fn struct_equality_ignores_order() {
        let mut a = Value::None;
        a.put(num(1), Value::from("x"), "PUT").unwrap();
        a.put(num(2), Value::from("y"), "PUT").unwrap();
        let mut b = Value::None;
        b.put(num(2), Value::from("y"), "PUT").unwrap();
        b.put(num(1), Value::from("x"), "PUT").unwrap();
        assert!(a.equals(&b));
        b.put(num(1), Value::from("z"), "PUT").unwrap();
        assert!(!a.equals(&b));
    }

    #[test]
    fn put_promotes_none_and_overwrites_in_place() {
        let mut s = Value::None;
        s.put(Value::from("a"), num(1), "PUT").unwrap();
        s.put(Value::from("b"), num(2), "PUT").unwrap();
        s.put(Value::from("a"), num(3), "PUT").unwrap();
        assert_eq!(s.count("COUNT").unwrap(), 2);
        let keys: Vec<Value> = s.as_struct("").unwrap().borrow().iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![Value::from("a"), Value::from("b")]);
        assert_eq!(s.get(&Value::from("a"), "GET").unwrap(), num(3));
        assert!(s.get(&Value::from("zz"), "GET").unwrap().is_none());
    }

    #[test]
    fn put_rejects_bad_keys_and_cycles() {
        let mut s = Value::new_struct();
        assert!(matches!(
            s.put(Value::None, num(1), "PUT"),
            Err(VMError::InvalidCast { .. })
        ));
        let alias = s.clone();
        assert!(matches!(
            s.put(num(0), alias, "PUT"),
            Err(VMError::CyclicStructure)
        ));

        let mut outer = Value::new_struct();
        outer.put(num(0), s.clone(), "PUT").unwrap();
        assert!(matches!(
            s.put(num(1), outer, "PUT"),
            Err(VMError::CyclicStructure)
        ));
    }

    #[test]
    fn clone_aliases_but_deep_copy_does_not() {
        let mut original = Value::new_struct();
        original.put(num(0), num(10), "PUT").unwrap();

        let mut alias = original.clone();
        alias.put(num(0), num(11), "PUT").unwrap();
        assert_eq!(original.get(&num(0), "GET").unwrap(), num(11));

        let mut copy = original.deep_copy("COPY").unwrap();
        copy.put(num(0), num(12), "PUT").unwrap();
        assert_eq!(original.get(&num(0), "GET").unwrap(), num(11));
        assert_eq!(copy.get(&num(0), "GET").unwrap(), num(12));
    }

    /// Struct chain `height` levels deep, returned with its innermost struct.
    fn chain(height: usize) -> (Value, Value) {
        let leaf = Value::new_struct();
        let mut root = leaf.clone();
        for _ in 1..height {
            let mut outer = Value::new_struct();
            outer.put(num(0), root, "PUT").unwrap();
            root = outer;
        }
        (root, leaf)
    }

    /// Chains stitched together through their leaves, far deeper than `PUT`
    /// alone allows.
    fn stitched(links: usize) -> Value {
        let (root, mut leaf) = chain(MAX_STRUCT_DEPTH);
        for _ in 0..links {
            let (next, next_leaf) = chain(MAX_STRUCT_DEPTH - 1);
            leaf.put(num(0), next, "PUT").unwrap();
            leaf = next_leaf;
        }
        root
    }

    #[test]
    fn put_bounds_struct_nesting() {
        let (root, _) = chain(MAX_STRUCT_DEPTH);
        let copy = root.deep_copy("COPY").unwrap();
        assert!(copy.try_equals(&root, "EQUAL").unwrap());
        assert!(root.to_string().contains("{...}"));

        let mut outer = Value::new_struct();
        assert!(matches!(
            outer.put(num(0), root, "PUT"),
            Err(VMError::OutOfRange {
                instruction: "PUT",
                ..
            })
        ));
        assert_eq!(outer.count("COUNT").unwrap(), 0);
    }

    #[test]
    fn stitched_graphs_fault_instead_of_overflowing() {
        let deep = stitched(1_000);
        assert!(matches!(
            deep.deep_copy("COPY"),
            Err(VMError::OutOfRange {
                instruction: "COPY",
                ..
            })
        ));
        let twin = stitched(1_000);
        assert!(matches!(
            deep.try_equals(&twin, "EQUAL"),
            Err(VMError::OutOfRange { .. })
        ));
        assert!(!deep.equals(&twin));
        assert!(deep.equals(&deep.clone()));
        assert!(deep.to_string().ends_with("{...}}}}}}}}}}}}}}}}}"));
        drop(twin);
        drop(deep);
    }

    #[test]
    fn deep_copy_keeps_shared_substructure() {
        let mut shared = Value::new_struct();
        shared.put(num(0), num(1), "PUT").unwrap();
        let mut pair = Value::new_struct();
        pair.put(num(0), shared.clone(), "PUT").unwrap();
        pair.put(num(1), shared, "PUT").unwrap();

        let copy = pair.deep_copy("COPY").unwrap();
        let (Value::Struct(a), Value::Struct(b)) =
            (copy.get(&num(0), "GET").unwrap(), copy.get(&num(1), "GET").unwrap())
        else {
            panic!("copy lost its structs");
        };
        assert!(Rc::ptr_eq(&a, &b));
        assert!(copy.equals(&pair));
    }

    #[test]
    fn host_objects_round_trip() {
        let value = Value::object(Address("P2K".into()));
        assert_eq!(value.as_interop::<Address>("").unwrap(), Address("P2K".into()));
        assert!(matches!(
            value.as_interop::<String>(""),
            Err(VMError::InvalidCast { .. })
        ));
        assert!(value.equals(&Value::object(Address("P2K".into()))));
        assert!(!value.equals(&Value::object(Address("other".into()))));

        let copy = value.deep_copy("COPY").unwrap();
        if let (Value::Object(a), Value::Object(b)) = (&value, &copy) {
            assert!(!Rc::ptr_eq(a, b));
        }
        assert!(copy.equals(&value));
    }

    #[test]
    fn bool_string_accommodation() {
        assert!(Value::from("true").as_bool("").unwrap());
        assert!(!Value::from("false").as_bool("").unwrap());
        assert!(Value::from("yes").as_bool("").is_err());
        assert_eq!(Value::Bool(true).as_string("").unwrap(), "true");
        assert!(num(1).as_string("").is_err());
    }

    #[test]
    fn cat_rules() {
        assert_eq!(
            Value::from("Hello ").cat(&Value::from("world"), "CAT").unwrap(),
            Value::from("Hello world")
        );
        assert_eq!(
            Value::None.cat(&Value::from("x"), "CAT").unwrap(),
            Value::from("x")
        );
        let bytes = Value::Bytes(vec![1u8].into());
        assert_eq!(
            Value::from("a").cat(&bytes, "CAT").unwrap(),
            Value::Bytes(vec![b'a', 1].into())
        );
        assert!(matches!(
            Value::None.cat(&Value::None, "CAT"),
            Err(VMError::InvalidCast { .. })
        ));
        assert!(matches!(
            num(1).cat(&Value::from("x"), "CAT"),
            Err(VMError::InvalidCast { .. })
        ));
        assert!(matches!(
            Value::from("x").cat(&num(1), "CAT"),
            Err(VMError::InvalidCast { .. })
        ));
    }

    #[test]
    fn left_right_split_reassembles() {
        let s = Value::from("héllo");
        let size = s.size("SIZE").unwrap();
        assert_eq!(size, 6);
        for n in [0, 1, 3, 6] {
            let joined = s
                .left(n, "LEFT")
                .unwrap()
                .cat(&s.right(size - n, "RIGHT").unwrap(), "CAT")
                .unwrap();
            assert_eq!(joined, s);
        }
        assert!(matches!(s.left(2, "LEFT"), Err(VMError::OutOfRange { .. })));
        assert!(matches!(s.right(7, "RIGHT"), Err(VMError::OutOfRange { .. })));
        assert!(matches!(s.range(4, 3, "RANGE"), Err(VMError::OutOfRange { .. })));
    }

    #[test]
    fn cast_table() {
        assert_eq!(Value::from("-42").cast(ValueType::Number, "").unwrap(), num(-42));
        assert!(Value::from("4x").cast(ValueType::Number, "").is_err());
        assert_eq!(num(0).cast(ValueType::Bool, "").unwrap(), Value::Bool(false));
        assert_eq!(num(7).cast(ValueType::String, "").unwrap(), Value::from("7"));
        assert_eq!(
            num(-2).cast(ValueType::Bytes, "").unwrap().cast(ValueType::Number, "").unwrap(),
            num(-2)
        );
        assert_eq!(
            num(1_700_000_000).cast(ValueType::Timestamp, "").unwrap(),
            Value::Timestamp(Timestamp(1_700_000_000))
        );
        assert!(matches!(
            num(-1).cast(ValueType::Enum, ""),
            Err(VMError::OutOfRange { .. })
        ));
        assert!(matches!(
            Value::from("x").cast(ValueType::Struct, ""),
            Err(VMError::InvalidCast { .. })
        ));
        assert_eq!(Value::None.cast(ValueType::Struct, "").unwrap().count("").unwrap(), 0);
        assert!(num(5).cast(ValueType::None, "").unwrap().is_none());
    }

    #[test]
    fn shift_amount_bounds() {
        assert_eq!(shift_amount(&BigInt::from(MAX_SHIFT), "SHL").unwrap(), MAX_SHIFT);
        assert!(shift_amount(&BigInt::from(-1), "SHL").is_err());
        assert!(shift_amount(&BigInt::from(MAX_SHIFT + 1), "SHL").is_err());
    }

    #[test]
    fn parse_decimal_is_strict() {
        assert_eq!(parse_decimal("+15"), Some(BigInt::from(15)));
        assert_eq!(parse_decimal("-0"), Some(BigInt::from(0)));
        assert_eq!(parse_decimal("1_000"), None);
        assert_eq!(parse_decimal("-"), None);
        assert_eq!(parse_decimal(""), None);
    }
}
