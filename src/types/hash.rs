//! 32-byte SHA3-256 digest used to identify scripts.

use sha3::{Digest, Sha3_256};
use std::fmt;

pub const HASH_LEN: usize = 32;

/// Content hash of a script's code section.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    pub fn of(data: &[u8]) -> Hash {
        Hash(Sha3_256::digest(data).into())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_digest() {
        assert_eq!(
            Hash::of(b"").to_string(),
            "a7ffc6f8bf1ed76651c14756a061d662f580ff4de43b49fa82d80a4b80f8434a"
        );
    }

    #[test]
    fn different_input_different_digest() {
        assert_eq!(Hash::of(b"chainvm"), Hash::of(b"chainvm"));
        assert_ne!(Hash::of(b"chainvm"), Hash::of(b"chainvn"));
    }
}
