//! Typed, order-dependent binary codec shared by every notification.
//!
//! A [`Frame`] carries no schema: the writer and the reader must issue the
//! same sequence of typed operations. All scalars are big-endian and 64-bit
//! integers travel as two 32-bit words, high word first.

use thiserror::Error;

/// Errors raised while reading a [`Frame`]. Every variant records the byte
/// offset at which decoding stopped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame truncated at offset {offset}: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },
    #[error("negative length {length} at offset {offset}")]
    NegativeLength { offset: usize, length: i32 },
    #[error("invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 { offset: usize },
    #[error("invalid bool byte {value} at offset {offset}")]
    InvalidBool { offset: usize, value: u8 },
    #[error("unknown {name} value {value} at offset {offset}")]
    UnknownEnumValue {
        name: &'static str,
        value: i32,
        offset: usize,
    },
    #[error("unknown notification tag {tag} at offset {offset}")]
    UnknownTag { tag: i32, offset: usize },
    #[error("{remaining} trailing bytes after notification at offset {offset}")]
    TrailingBytes { offset: usize, remaining: usize },
}

impl FrameError {
    pub fn offset(&self) -> usize {
        match self {
            FrameError::Truncated { offset, .. }
            | FrameError::NegativeLength { offset, .. }
            | FrameError::InvalidUtf8 { offset }
            | FrameError::InvalidBool { offset, .. }
            | FrameError::UnknownEnumValue { offset, .. }
            | FrameError::UnknownTag { offset, .. }
            | FrameError::TrailingBytes { offset, .. } => *offset,
        }
    }

    /// Tag value involved in the failure, when the failure is about a tag.
    pub fn tag(&self) -> Option<i32> {
        match self {
            FrameError::UnknownTag { tag, .. } => Some(*tag),
            _ => None,
        }
    }
}

/// Split a 64-bit integer into its high and low 32-bit words.
pub fn split_i64(value: i64) -> (i32, i32) {
    let high = (value >> 32) as i32;
    let low = (value & 0xFFFF_FFFF) as i32;
    (high, low)
}

/// Reassemble a 64-bit integer from the words produced by [`split_i64`].
pub fn join_i64(high: i32, low: i32) -> i64 {
    ((high as i64) << 32) | ((low as i64) & 0xFFFF_FFFF)
}

/// An ordered byte buffer with a read cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
    cursor: usize,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes, cursor: 0 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Current read offset.
    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Rewind the read cursor to the start of the buffer.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    pub fn write<T: WireEncode + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.encode(self);
        self
    }

    pub fn read<T: WireDecode>(&mut self) -> Result<T, FrameError> {
        T::decode(self)
    }

    /// Fail with [`FrameError::TrailingBytes`] unless every byte was consumed.
    pub fn finish(&self) -> Result<(), FrameError> {
        if self.is_exhausted() {
            Ok(())
        } else {
            Err(FrameError::TrailingBytes {
                offset: self.cursor,
                remaining: self.remaining(),
            })
        }
    }

    pub(crate) fn put(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub(crate) fn take(&mut self, needed: usize) -> Result<&[u8], FrameError> {
        if self.remaining() < needed {
            return Err(FrameError::Truncated {
                offset: self.cursor,
                needed,
                remaining: self.remaining(),
            });
        }
        let start = self.cursor;
        self.cursor += needed;
        Ok(&self.bytes[start..self.cursor])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], FrameError> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    /// Read an `i32` length prefix, rejecting negative values.
    pub(crate) fn read_length(&mut self) -> Result<usize, FrameError> {
        let offset = self.cursor;
        let length = self.read::<i32>()?;
        if length < 0 {
            return Err(FrameError::NegativeLength { offset, length });
        }
        Ok(length as usize)
    }
}

/// Values that can be appended to a [`Frame`].
pub trait WireEncode {
    fn encode(&self, frame: &mut Frame);
}

/// Values that can be consumed from a [`Frame`].
pub trait WireDecode: Sized {
    fn decode(frame: &mut Frame) -> Result<Self, FrameError>;
}

macro_rules! wire_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl WireEncode for $ty {
                fn encode(&self, frame: &mut Frame) {
                    frame.put(&self.to_be_bytes());
                }
            }

            impl WireDecode for $ty {
                fn decode(frame: &mut Frame) -> Result<Self, FrameError> {
                    Ok(<$ty>::from_be_bytes(frame.take_array()?))
                }
            }
        )*
    };
}

wire_scalar!(u8, i32, u32, f32, f64);

impl WireEncode for bool {
    fn encode(&self, frame: &mut Frame) {
        frame.put(&[u8::from(*self)]);
    }
}

impl WireDecode for bool {
    fn decode(frame: &mut Frame) -> Result<Self, FrameError> {
        let offset = frame.position();
        match frame.read::<u8>()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(FrameError::InvalidBool { offset, value }),
        }
    }
}

impl WireEncode for i64 {
    fn encode(&self, frame: &mut Frame) {
        let (high, low) = split_i64(*self);
        frame.write(&high).write(&low);
    }
}

impl WireDecode for i64 {
    fn decode(frame: &mut Frame) -> Result<Self, FrameError> {
        let high = frame.read::<i32>()?;
        let low = frame.read::<i32>()?;
        Ok(join_i64(high, low))
    }
}

impl WireEncode for u64 {
    fn encode(&self, frame: &mut Frame) {
        frame.write(&(*self as i64));
    }
}

impl WireDecode for u64 {
    fn decode(frame: &mut Frame) -> Result<Self, FrameError> {
        Ok(frame.read::<i64>()? as u64)
    }
}

impl WireEncode for str {
    fn encode(&self, frame: &mut Frame) {
        frame.write(&(self.len() as i32));
        frame.put(self.as_bytes());
    }
}

impl WireEncode for String {
    fn encode(&self, frame: &mut Frame) {
        self.as_str().encode(frame);
    }
}

impl WireDecode for String {
    fn decode(frame: &mut Frame) -> Result<Self, FrameError> {
        let length = frame.read_length()?;
        let offset = frame.position();
        let bytes = frame.take(length)?.to_vec();
        String::from_utf8(bytes).map_err(|_| FrameError::InvalidUtf8 { offset })
    }
}

impl<T: WireEncode> WireEncode for Vec<T> {
    fn encode(&self, frame: &mut Frame) {
        frame.write(&(self.len() as i32));
        for item in self {
            item.encode(frame);
        }
    }
}

impl<T: WireDecode> WireDecode for Vec<T> {
    fn decode(frame: &mut Frame) -> Result<Self, FrameError> {
        let count = frame.read_length()?;
        // every element occupies at least one byte
        if count > frame.remaining() {
            return Err(FrameError::Truncated {
                offset: frame.position(),
                needed: count,
                remaining: frame.remaining(),
            });
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::decode(frame)?);
        }
        Ok(items)
    }
}

impl<T: WireEncode> WireEncode for Option<T> {
    fn encode(&self, frame: &mut Frame) {
        match self {
            Some(value) => {
                frame.write(&true);
                value.encode(frame);
            }
            None => {
                frame.write(&false);
            }
        }
    }
}

impl<T: WireDecode> WireDecode for Option<T> {
    fn decode(frame: &mut Frame) -> Result<Self, FrameError> {
        if frame.read::<bool>()? {
            Ok(Some(T::decode(frame)?))
        } else {
            Ok(None)
        }
    }
}

/// Declare a fieldless enum carried on the wire as an `i32` code.
#[macro_export]
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $code:literal ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i32)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant = $code ),*
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),*];

            pub fn code(self) -> i32 {
                self as i32
            }

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant)),*
                }
            }
        }

        impl ::std::convert::TryFrom<i32> for $name {
            type Error = i32;

            fn try_from(value: i32) -> Result<Self, Self::Error> {
                match value {
                    $($code => Ok($name::$variant),)*
                    other => Err(other),
                }
            }
        }

        impl $crate::frame::WireEncode for $name {
            fn encode(&self, frame: &mut $crate::frame::Frame) {
                frame.write(&(*self as i32));
            }
        }

        impl $crate::frame::WireDecode for $name {
            fn decode(
                frame: &mut $crate::frame::Frame,
            ) -> Result<Self, $crate::frame::FrameError> {
                let offset = frame.position();
                let value = frame.read::<i32>()?;
                $name::try_from(value).map_err(|value| {
                    $crate::frame::FrameError::UnknownEnumValue {
                        name: stringify!($name),
                        value,
                        offset,
                    }
                })
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_join_are_bit_exact() {
        for value in [
            0i64,
            1,
            -1,
            i64::MAX,
            i64::MIN,
            0x0000_0001_FFFF_FFFF,
            0x7FFF_FFFF_8000_0000,
            -0x0000_0001_0000_0000,
        ] {
            let (high, low) = split_i64(value);
            assert_eq!(join_i64(high, low), value, "value {value:#x}");
        }
    }

    #[test]
    fn i64_is_written_high_word_first() {
        let mut frame = Frame::new();
        frame.write(&0x0102_0304_0506_0708i64);
        assert_eq!(
            frame.as_bytes(),
            &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]
        );
    }

    #[test]
    fn low_word_sign_does_not_leak_into_high_word() {
        // low word 0xFFFFFFFF is -1 as i32 and must not be sign-extended
        let value = join_i64(0x10, -1);
        assert_eq!(value, 0x0000_0010_FFFF_FFFF);
    }

    #[test]
    fn strings_are_length_prefixed_without_terminator() {
        let mut frame = Frame::new();
        frame.write("ab").write("");
        assert_eq!(frame.as_bytes(), &[0, 0, 0, 2, b'a', b'b', 0, 0, 0, 0]);
        assert_eq!(frame.read::<String>().unwrap(), "ab");
        assert_eq!(frame.read::<String>().unwrap(), "");
        assert!(frame.is_exhausted());
    }

    #[test]
    fn exhausted_buffer_reports_offset() {
        let mut frame = Frame::from_bytes(vec![0, 0, 0, 7, 1]);
        assert_eq!(frame.read::<i32>().unwrap(), 7);
        let err = frame.read::<i32>().unwrap_err();
        assert_eq!(
            err,
            FrameError::Truncated {
                offset: 4,
                needed: 4,
                remaining: 1
            }
        );
    }

    #[test]
    fn negative_string_length_is_rejected() {
        let mut frame = Frame::new();
        frame.write(&-3i32);
        assert!(matches!(
            frame.read::<String>(),
            Err(FrameError::NegativeLength {
                offset: 0,
                length: -3
            })
        ));
    }

    #[test]
    fn invalid_bool_is_rejected() {
        let mut frame = Frame::from_bytes(vec![2]);
        assert_eq!(
            frame.read::<bool>(),
            Err(FrameError::InvalidBool {
                offset: 0,
                value: 2
            })
        );
    }

    #[test]
    fn oversized_sequence_count_fails_before_allocating() {
        let mut frame = Frame::new();
        frame.write(&i32::MAX);
        assert!(matches!(
            frame.read::<Vec<i32>>(),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn finish_flags_trailing_bytes() {
        let mut frame = Frame::new();
        frame.write(&1i32).write(&2i32);
        frame.read::<i32>().unwrap();
        assert_eq!(
            frame.finish(),
            Err(FrameError::TrailingBytes {
                offset: 4,
                remaining: 4
            })
        );
    }
}
