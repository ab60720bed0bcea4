//! ---
//! nb_section: "02-messaging-wire-format"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Big-endian integer codec and field cursors."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
//! Big-endian integer codec operating on caller-owned buffers.
//!
//! Both directions consume exactly `T::SIZE` bytes and hand back the rest of
//! the buffer, so callers can chain fields without tracking offsets. Nothing
//! here allocates.

use thiserror::Error;

/// Errors raised while reading or writing wire fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Fewer bytes remained in the buffer than the field requires.
    #[error("truncated buffer: needed {needed} bytes, {available} available")]
    TruncatedBuffer {
        /// Bytes required by the field.
        needed: usize,
        /// Bytes left in the buffer.
        available: usize,
    },
}

/// Fixed-width integer that travels big-endian on the wire.
pub trait WireInt: Copy + Sized {
    /// Encoded width in bytes.
    const SIZE: usize;

    /// Read from the first `SIZE` bytes of `bytes`. `bytes` must hold at least `SIZE` bytes.
    fn read_be(bytes: &[u8]) -> Self;

    /// Write into the first `SIZE` bytes of `out`. `out` must hold at least `SIZE` bytes.
    fn write_be(self, out: &mut [u8]);
}

macro_rules! impl_wire_int {
    ($($ty:ty),* $(,)?) => {
        $(
            impl WireInt for $ty {
                const SIZE: usize = core::mem::size_of::<$ty>();

                #[inline]
                fn read_be(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; core::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    <$ty>::from_be_bytes(raw)
                }

                #[inline]
                fn write_be(self, out: &mut [u8]) {
                    out[..Self::SIZE].copy_from_slice(&self.to_be_bytes());
                }
            }
        )*
    };
}

impl_wire_int!(u8, u16, u32, u64, i8, i16, i32, i64);

/// Decode one big-endian `T` from the front of `input`.
///
/// Returns the value and the unconsumed tail.
pub fn decode_uint<T: WireInt>(input: &[u8]) -> Result<(T, &[u8]), CodecError> {
    if input.len() < T::SIZE {
        return Err(CodecError::TruncatedBuffer {
            needed: T::SIZE,
            available: input.len(),
        });
    }
    let (head, tail) = input.split_at(T::SIZE);
    Ok((T::read_be(head), tail))
}

/// Encode `value` big-endian into the front of `output`.
///
/// Returns the part of `output` following the written bytes.
pub fn encode_uint<T: WireInt>(value: T, output: &mut [u8]) -> Result<&mut [u8], CodecError> {
    if output.len() < T::SIZE {
        return Err(CodecError::TruncatedBuffer {
            needed: T::SIZE,
            available: output.len(),
        });
    }
    let (head, tail) = output.split_at_mut(T::SIZE);
    value.write_be(head);
    Ok(tail)
}

/// Cursor that reads consecutive fields from a payload.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    remaining: &'a [u8],
}

impl<'a> Reader<'a> {
    /// Start reading at the beginning of `payload`.
    pub fn new(payload: &'a [u8]) -> Self {
        Self { remaining: payload }
    }

    /// Read the next field.
    pub fn read<T: WireInt>(&mut self) -> Result<T, CodecError> {
        let (value, rest) = decode_uint::<T>(self.remaining)?;
        self.remaining = rest;
        Ok(value)
    }

    /// Bytes not yet consumed. Parsers ignore these.
    pub fn remaining(&self) -> &'a [u8] {
        self.remaining
    }
}

/// Cursor that writes consecutive fields into a buffer.
#[derive(Debug)]
pub struct Writer<'a> {
    buffer: &'a mut [u8],
    position: usize,
}

impl<'a> Writer<'a> {
    /// Start writing at the beginning of `buffer`.
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Append the next field.
    pub fn write<T: WireInt>(&mut self, value: T) -> Result<(), CodecError> {
        encode_uint(value, &mut self.buffer[self.position..])?;
        self.position += T::SIZE;
        Ok(())
    }

    /// Number of bytes written so far.
    pub fn position(&self) -> usize {
        self.position
    }
}
