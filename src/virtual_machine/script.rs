//! Script representation and serialization.
//!
//! A [`Script`] is immutable bytecode plus the table of public method entry
//! points and, optionally, [`DebugInfo`] mapping offsets back to source
//! lines. Scripts are what the host registers as contexts and what the
//! assembler writes to disk.

use crate::types::bytes::Bytes;
use crate::types::encoding::{Decode, Encode};
use crate::types::hash::Hash;
use crate::virtual_machine::errors::VMError;
use chainvm_derive::BinaryCodec;

/// Magic bytes identifying a serialized script.
const MAGIC: &[u8; 5] = b"CVMSC";

/// Current script format version.
const CURRENT_VERSION: Version = Version::new(0, 1, 0);

const PREFIX: &[u8] = b"SCRIPT";

/// Semantic version for script format compatibility.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, BinaryCodec)]
struct Version {
    major: u8,
    minor: u8,
    patch: u8,
}

impl Version {
    const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

/// Source-level information kept next to the bytecode.
#[derive(Clone, Debug, Default, PartialEq, Eq, BinaryCodec)]
pub struct DebugInfo {
    /// Every label and the offset it resolves to.
    pub labels: Vec<(String, u32)>,
    /// Instruction start offset and the 1-based source line it came from,
    /// sorted by offset.
    pub lines: Vec<(u32, u32)>,
}

impl DebugInfo {
    /// Source line of the instruction covering `offset`.
    pub fn line_for(&self, offset: usize) -> Option<u32> {
        let offset = u32::try_from(offset).ok()?;
        let idx = self.lines.partition_point(|(start, _)| *start <= offset);
        idx.checked_sub(1).map(|i| self.lines[i].1)
    }
}

/// Compiled bytecode with its public entry points.
#[derive(Clone, Debug, Default, PartialEq, Eq, BinaryCodec)]
pub struct Script {
    pub code: Bytes,
    /// Public method labels and their offsets, in declaration order.
    pub methods: Vec<(String, u32)>,
    pub debug: Option<DebugInfo>,
}

impl Script {
    /// A script with no methods and no debug information.
    pub fn from_code(code: impl Into<Bytes>) -> Self {
        Self {
            code: code.into(),
            methods: Vec::new(),
            debug: None,
        }
    }

    /// Offset of a public method.
    pub fn method_offset(&self, name: &str) -> Option<u32> {
        self.methods
            .iter()
            .find(|(method, _)| method == name)
            .map(|(_, offset)| *offset)
    }

    /// SHA3-256 of the code section.
    pub fn hash(&self) -> Hash {
        Hash::of(&self.code)
    }

    /// Serializes the script to a portable binary format.
    ///
    /// The output includes a magic header and version for compatibility checking.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = Vec::new();
        MAGIC.encode(&mut out);
        CURRENT_VERSION.encode(&mut out);
        PREFIX.to_vec().encode(&mut out);
        self.encode(&mut out);
        Bytes::from(out)
    }

    /// Deserializes a script, validating the header.
    pub fn from_bytes(mut input: &[u8]) -> Result<Self, VMError> {
        if input.len() < MAGIC.len() {
            return Err(VMError::DecodeError {
                reason: "truncated".to_string(),
            });
        }

        if &<[u8; 5]>::decode(&mut input)? != MAGIC {
            return Err(VMError::DecodeError {
                reason: "bad magic".to_string(),
            });
        }

        if Version::decode(&mut input)? != CURRENT_VERSION {
            return Err(VMError::DecodeError {
                reason: "unsupported version".to_string(),
            });
        }

        if Vec::<u8>::decode(&mut input)?.as_slice() != PREFIX {
            return Err(VMError::DecodeError {
                reason: "bad prefix".to_string(),
            });
        }

        let script = Script::decode(&mut input)?;
        if !input.is_empty() {
            return Err(VMError::DecodeError {
                reason: "trailing bytes".to_string(),
            });
        }
        Ok(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Script {
        Script {
            code: Bytes::from(vec![0x00, 0x14]),
            methods: vec![("transfer".into(), 1)],
            debug: Some(DebugInfo {
                labels: vec![("transfer".into(), 1)],
                lines: vec![(0, 1), (1, 3)],
            }),
        }
    }

    #[test]
    fn serialized_script_round_trips() {
        let script = sample();
        let bytes = script.to_bytes();
        assert_eq!(&bytes[..5], MAGIC);
        assert_eq!(Script::from_bytes(&bytes).unwrap(), script);
    }

    #[test]
    fn header_errors() {
        let bytes = sample().to_bytes();

        let err = Script::from_bytes(&bytes[..3]).unwrap_err();
        assert!(matches!(err, VMError::DecodeError { ref reason } if reason == "truncated"));

        let mut bad_magic = bytes.to_vec();
        bad_magic[0] = b'X';
        let err = Script::from_bytes(&bad_magic).unwrap_err();
        assert!(matches!(err, VMError::DecodeError { ref reason } if reason == "bad magic"));

        let mut bad_version = bytes.to_vec();
        bad_version[5] = 9;
        let err = Script::from_bytes(&bad_version).unwrap_err();
        assert!(matches!(err, VMError::DecodeError { ref reason } if reason == "unsupported version"));

        let mut trailing = bytes.to_vec();
        trailing.push(0);
        let err = Script::from_bytes(&trailing).unwrap_err();
        assert!(matches!(err, VMError::DecodeError { ref reason } if reason == "trailing bytes"));
    }

    #[test]
    fn debug_lookups() {
        let debug = sample().debug.unwrap();
        assert_eq!(debug.line_for(0), Some(1));
        assert_eq!(debug.line_for(1), Some(3));
        assert_eq!(debug.line_for(50), Some(3));
        assert_eq!(debug.labels, vec![("transfer".to_string(), 1)]);
    }

    #[test]
    fn hash_covers_code_only() {
        let a = sample();
        let mut b = sample();
        b.methods.clear();
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), Script::from_code(vec![0x00]).hash());
        assert_eq!(a.method_offset("transfer"), Some(1));
        assert_eq!(a.method_offset("mint"), None);
    }
}
