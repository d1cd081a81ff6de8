//! Notification envelopes: a tag followed by tag-specific fields.

use crate::frame::{Frame, FrameError};

/// A message type that travels as `[i32 tag][fields]` inside one [`Frame`].
pub trait Notification: Sized {
    /// Short variant name for logs.
    fn kind_name(&self) -> &'static str;

    fn tag(&self) -> i32;

    /// Append the tag and every field to `frame`.
    fn write_to(&self, frame: &mut Frame);

    /// Decode a complete notification, consuming the whole frame.
    fn read_from(frame: &mut Frame) -> Result<Self, FrameError>;

    fn encode(&self) -> Frame {
        let mut frame = Frame::new();
        self.write_to(&mut frame);
        frame
    }

    fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let mut frame = Frame::from_bytes(bytes.to_vec());
        Self::read_from(&mut frame)
    }
}

/// Generate a closed notification enum, its `#[repr(i32)]` tag enum and the
/// codec from a single table so tags, variants and field order stay in sync.
#[macro_export]
macro_rules! notification_set {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident / $kind:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $tag:literal $({ $($field:ident : $ty:ty),* $(,)? })?
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $(
                $(#[$vmeta])*
                $variant $({ $($field: $ty),* })?,
            )*
        }

        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(i32)]
        $vis enum $kind {
            $($variant = $tag,)*
        }

        impl $kind {
            pub const ALL: &'static [$kind] = &[$($kind::$variant),*];

            pub fn tag(self) -> i32 {
                self as i32
            }

            pub fn name(self) -> &'static str {
                match self {
                    $($kind::$variant => stringify!($variant),)*
                }
            }
        }

        impl ::std::convert::TryFrom<i32> for $kind {
            type Error = i32;

            fn try_from(value: i32) -> Result<Self, Self::Error> {
                match value {
                    $($tag => Ok($kind::$variant),)*
                    other => Err(other),
                }
            }
        }

        impl $name {
            pub fn kind(&self) -> $kind {
                match self {
                    $($name::$variant { .. } => $kind::$variant,)*
                }
            }
        }

        impl $crate::notification::Notification for $name {
            fn kind_name(&self) -> &'static str {
                self.kind().name()
            }

            fn tag(&self) -> i32 {
                self.kind().tag()
            }

            #[allow(unused_variables)]
            fn write_to(&self, frame: &mut $crate::frame::Frame) {
                frame.write(&self.tag());
                match self {
                    $(
                        $name::$variant $({ $($field),* })? => {
                            $($( frame.write($field); )*)?
                        }
                    )*
                }
            }

            fn read_from(
                frame: &mut $crate::frame::Frame,
            ) -> Result<Self, $crate::frame::FrameError> {
                let offset = frame.position();
                let tag = frame.read::<i32>()?;
                let kind = $kind::try_from(tag)
                    .map_err(|tag| $crate::frame::FrameError::UnknownTag { tag, offset })?;
                let notification = match kind {
                    $(
                        $kind::$variant => $name::$variant $({
                            $($field: frame.read::<$ty>()?,)*
                        })?,
                    )*
                };
                frame.finish()?;
                Ok(notification)
            }
        }
    };
}
