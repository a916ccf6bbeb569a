//! Big-endian message codec shared by every fronctocol.
//!
//! Field elements are written at the fixed width of their modulus; strings and
//! vectors carry a 4-byte length prefix.

use num_bigint::BigUint;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("message truncated: needed {needed} bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },
    #[error("{0} unread bytes at end of message")]
    TrailingBytes(usize),
    #[error("invalid role flag {0}")]
    InvalidRole(u8),
    #[error("invalid presence flag {0}")]
    InvalidFlag(u8),
    #[error("field element not below its modulus")]
    ElementOutOfRange,
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
}

/// Types with a wire encoding of their own.
pub trait Wire: Sized {
    fn write(&self, w: &mut MessageWriter);
    fn read(r: &mut MessageReader<'_>) -> Result<Self, WireError>;
}

/// Byte width of elements modulo `modulus`.
pub fn element_width(modulus: &BigUint) -> usize {
    ((modulus.bits() + 7) / 8) as usize
}

#[derive(Clone, Debug, Default)]
pub struct MessageWriter {
    buf: Vec<u8>,
}

impl MessageWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, x: u8) {
        self.buf.push(x);
    }

    pub fn write_bool(&mut self, x: bool) {
        self.buf.push(x as u8);
    }

    pub fn write_u32(&mut self, x: u32) {
        self.buf.extend_from_slice(&x.to_be_bytes());
    }

    pub fn write_u64(&mut self, x: u64) {
        self.buf.extend_from_slice(&x.to_be_bytes());
    }

    pub fn write_u128(&mut self, x: u128) {
        self.buf.extend_from_slice(&x.to_be_bytes());
    }

    pub fn write_len(&mut self, len: usize) {
        self.write_u32(len as u32);
    }

    /// Length-prefixed raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_len(bytes.len());
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    /// Field element at the fixed width of `modulus`.
    pub fn write_elem(&mut self, x: &BigUint, modulus: &BigUint) {
        let width = element_width(modulus);
        let bytes = x.to_bytes_be();
        debug_assert!(bytes.len() <= width, "element wider than its modulus");
        self.buf
            .extend(std::iter::repeat(0).take(width.saturating_sub(bytes.len())));
        self.buf.extend_from_slice(&bytes);
    }

    /// Length-prefixed vector of field elements.
    pub fn write_elems(&mut self, xs: &[BigUint], modulus: &BigUint) {
        self.write_len(xs.len());
        for x in xs {
            self.write_elem(x, modulus);
        }
    }

    /// Length-prefixed vector of bits, one byte each.
    pub fn write_bits(&mut self, bits: &[bool]) {
        self.write_len(bits.len());
        for &bit in bits {
            self.write_bool(bit);
        }
    }

    pub fn write<T: Wire>(&mut self, x: &T) {
        x.write(self);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

#[derive(Clone, Debug)]
pub struct MessageReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> MessageReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let remaining = self.buf.len() - self.pos;
        if remaining < n {
            return Err(WireError::Truncated {
                needed: n,
                remaining,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            flag => Err(WireError::InvalidFlag(flag)),
        }
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    pub fn read_u128(&mut self) -> Result<u128, WireError> {
        Ok(u128::from_be_bytes(self.take_array()?))
    }

    pub fn read_len(&mut self) -> Result<usize, WireError> {
        Ok(self.read_u32()? as usize)
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, WireError> {
        let len = self.read_len()?;
        Ok(self.take(len)?.to_vec())
    }

    pub fn read_str(&mut self) -> Result<String, WireError> {
        String::from_utf8(self.read_bytes()?).map_err(|_| WireError::InvalidUtf8)
    }

    pub fn read_elem(&mut self, modulus: &BigUint) -> Result<BigUint, WireError> {
        let x = BigUint::from_bytes_be(self.take(element_width(modulus))?);
        if &x >= modulus {
            return Err(WireError::ElementOutOfRange);
        }
        Ok(x)
    }

    pub fn read_elems(&mut self, modulus: &BigUint) -> Result<Vec<BigUint>, WireError> {
        let len = self.read_len()?;
        (0..len).map(|_| self.read_elem(modulus)).collect()
    }

    pub fn read_bits(&mut self) -> Result<Vec<bool>, WireError> {
        let len = self.read_len()?;
        (0..len).map(|_| self.read_bool()).collect()
    }

    pub fn read<T: Wire>(&mut self) -> Result<T, WireError> {
        T::read(self)
    }

    /// Fails if anything is left unread.
    pub fn finish(self) -> Result<(), WireError> {
        match self.buf.len() - self.pos {
            0 => Ok(()),
            n => Err(WireError::TrailingBytes(n)),
        }
    }
}
