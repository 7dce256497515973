//! Deterministic binary encoding.
//!
//! Used for the portable script format and for literal operands inside
//! bytecode. Everything is little-endian and fixed-width so two nodes always
//! agree on the bytes of a script:
//!
//! - integers: little-endian, fixed width; `usize` travels as `u64`
//! - `bool`: one byte, 0 or 1
//! - `Vec<T>` / `String`: 8-byte length prefix, then the elements
//! - `Option<T>`: tag byte (0 = None, 1 = Some) then the value
//! - `[T; N]` and tuples: elements back to back, no prefix

use crate::types::bytes::Bytes;
use chainvm_derive::Error;

/// Destination for encoded bytes.
pub trait EncodeSink {
    fn write(&mut self, bytes: &[u8]);
}

impl EncodeSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Types with a canonical binary form.
pub trait Encode {
    fn encode<S: EncodeSink>(&self, out: &mut S);

    /// Encodes into a fresh shared buffer.
    fn to_bytes(&self) -> Bytes {
        let mut out = Vec::new();
        self.encode(&mut out);
        Bytes::from(out)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("invalid value")]
    InvalidValue,
    #[error("length prefix too large")]
    LengthOverflow,
}

/// Types that can be read back from their canonical binary form.
pub trait Decode: Sized {
    /// Reads one value and advances `input` past it.
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError>;

    /// Decodes a value that must span all of `data`.
    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut input = data;
        let value = Self::decode(&mut input)?;
        if !input.is_empty() {
            return Err(DecodeError::InvalidValue);
        }
        Ok(value)
    }
}

/// Splits `n` bytes off the front of `input`.
pub fn read_bytes<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if input.len() < n {
        return Err(DecodeError::UnexpectedEof);
    }
    let (bytes, rest) = input.split_at(n);
    *input = rest;
    Ok(bytes)
}

macro_rules! impl_int {
    ($($t:ty),*) => {
        $(
            impl Encode for $t {
                fn encode<S: EncodeSink>(&self, out: &mut S) {
                    out.write(&self.to_le_bytes());
                }
            }

            impl Decode for $t {
                fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
                    let src = read_bytes(input, std::mem::size_of::<$t>())?;
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(src);
                    Ok(<$t>::from_le_bytes(buf))
                }
            }
        )*
    };
}

impl_int!(u8, u16, u32, u64, i64);

impl Encode for usize {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        (*self as u64).encode(out);
    }
}

impl Decode for usize {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        usize::try_from(u64::decode(input)?).map_err(|_| DecodeError::LengthOverflow)
    }
}

impl Encode for bool {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[*self as u8]);
    }
}

impl Decode for bool {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        match u8::decode(input)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

/// Upper bound on decoded collection lengths; anything larger is rejected
/// before allocating.
const MAX_VEC_LEN: usize = 16 * 1024 * 1024;

impl<T: Encode> Encode for Vec<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.len().encode(out);
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = usize::decode(input)?;
        if len > MAX_VEC_LEN {
            return Err(DecodeError::LengthOverflow);
        }
        // Never trust the prefix for the allocation size.
        let mut vec = Vec::with_capacity(len.min(input.len()));
        for _ in 0..len {
            vec.push(T::decode(input)?);
        }
        Ok(vec)
    }
}

impl Encode for String {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.as_str().encode(out);
    }
}

impl Encode for &str {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.len().encode(out);
        out.write(self.as_bytes());
    }
}

impl Decode for String {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = usize::decode(input)?;
        if len > MAX_VEC_LEN {
            return Err(DecodeError::LengthOverflow);
        }
        let bytes = read_bytes(input, len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidValue)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        match self {
            None => 0u8.encode(out),
            Some(v) => {
                1u8.encode(out);
                v.encode(out);
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        match u8::decode(input)? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(input)?)),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

impl<T: Encode, const N: usize> Encode for [T; N] {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode, const N: usize> Decode for [T; N] {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let mut items = Vec::with_capacity(N);
        for _ in 0..N {
            items.push(T::decode(input)?);
        }
        items.try_into().map_err(|_| DecodeError::InvalidValue)
    }
}

impl<A: Encode, B: Encode> Encode for (A, B) {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.0.encode(out);
        self.1.encode(out);
    }
}

impl<A: Decode, B: Decode> Decode for (A, B) {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok((A::decode(input)?, B::decode(input)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_little_endian() {
        assert_eq!(0x12345678u32.to_bytes().as_slice(), &[0x78, 0x56, 0x34, 0x12]);
        assert_eq!((-1i64).to_bytes().as_slice(), &[0xFF; 8]);
        assert_eq!(42usize.to_bytes().len(), 8);
    }

    #[test]
    fn integers_decode_in_sequence() {
        let mut input: &[u8] = &[0x07, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0xFF, 0xFF];
        assert_eq!(u8::decode(&mut input).unwrap(), 0x07);
        assert_eq!(u16::decode(&mut input).unwrap(), 0x1234);
        assert_eq!(u32::decode(&mut input).unwrap(), 0x12345678);
        assert_eq!(input, &[0xFF, 0xFF]);
        assert!(matches!(u64::decode(&mut input), Err(DecodeError::UnexpectedEof)));
    }

    #[test]
    fn bool_rejects_non_canonical_bytes() {
        assert!(bool::from_bytes(&[1]).unwrap());
        assert!(matches!(bool::from_bytes(&[2]), Err(DecodeError::InvalidValue)));
    }

    #[test]
    fn string_round_trips_and_rejects_bad_utf8() {
        let encoded = "héllo".to_string().to_bytes();
        assert_eq!(String::from_bytes(&encoded).unwrap(), "héllo");

        let mut bad = Vec::new();
        2usize.encode(&mut bad);
        bad.extend_from_slice(&[0xC3, 0x28]);
        assert!(matches!(String::from_bytes(&bad), Err(DecodeError::InvalidValue)));
    }

    #[test]
    fn truncated_input_is_eof() {
        assert!(matches!(u32::from_bytes(&[1, 2]), Err(DecodeError::UnexpectedEof)));
        let mut input: &[u8] = &[5, 0, 0, 0, 0, 0, 0, 0, 1, 2];
        assert!(matches!(
            Vec::<u8>::decode(&mut input),
            Err(DecodeError::UnexpectedEof)
        ));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let encoded = u64::MAX.to_bytes();
        assert!(matches!(
            Vec::<u8>::from_bytes(&encoded),
            Err(DecodeError::LengthOverflow)
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        assert!(matches!(u8::from_bytes(&[1, 2]), Err(DecodeError::InvalidValue)));
    }

    #[test]
    fn option_and_tuple_layout() {
        let value: Option<(u8, u16)> = Some((7, 0x0102));
        assert_eq!(value.to_bytes().as_slice(), &[1, 7, 0x02, 0x01]);
        assert_eq!(Option::<(u8, u16)>::from_bytes(&[0]).unwrap(), None);
    }
}
