//! Length-prefixed framing over byte streams: `[u32 BE length][payload]`.

use std::io::{self, Read, Write};

use thiserror::Error;

/// Default upper bound on a single payload.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: u32, max: u32 },
    #[error("stream closed in the middle of a frame")]
    UnexpectedEof,
    #[error("transport I/O failed: {0}")]
    Io(#[from] io::Error),
}

pub fn write_frame<W: Write + ?Sized>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload too large"))?;
    let mut buffer = Vec::with_capacity(4 + payload.len());
    buffer.extend_from_slice(&len.to_be_bytes());
    buffer.extend_from_slice(payload);
    writer.write_all(&buffer)
}

/// Read one frame. Returns `Ok(None)` on a clean end of stream between frames.
pub fn read_frame<R: Read + ?Sized>(
    reader: &mut R,
    max_len: u32,
) -> Result<Option<Vec<u8>>, TransportError> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match reader.read(&mut len_buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(TransportError::UnexpectedEof),
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    let len = u32::from_be_bytes(len_buf);
    if len > max_len {
        return Err(TransportError::FrameTooLarge { len, max: max_len });
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            TransportError::UnexpectedEof
        } else {
            TransportError::Io(err)
        }
    })?;
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_follow_each_other_on_the_stream() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"abc").unwrap();
        write_frame(&mut wire, b"").unwrap();
        assert_eq!(&wire[..4], &[0, 0, 0, 3]);

        let mut cursor = io::Cursor::new(wire);
        assert_eq!(
            read_frame(&mut cursor, 16).unwrap(),
            Some(b"abc".to_vec())
        );
        assert_eq!(read_frame(&mut cursor, 16).unwrap(), Some(Vec::new()));
        assert_eq!(read_frame(&mut cursor, 16).unwrap(), None);
    }

    #[test]
    fn oversize_frame_is_rejected() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &[0u8; 32]).unwrap();
        let err = read_frame(&mut io::Cursor::new(wire), 8).unwrap_err();
        assert!(matches!(
            err,
            TransportError::FrameTooLarge { len: 32, max: 8 }
        ));
    }

    #[test]
    fn cut_frame_is_unexpected_eof() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"abcdef").unwrap();
        wire.truncate(7);
        let err = read_frame(&mut io::Cursor::new(wire), 64).unwrap_err();
        assert!(matches!(err, TransportError::UnexpectedEof));
    }
}
