//! Replay files: `[i32 BE timestamp][i32 BE size][size bytes]`, repeated.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use thiserror::Error;

use crate::frame::Frame;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("replay record cut short: {0}")]
    Truncated(&'static str),
    #[error("negative replay record size {0}")]
    NegativeSize(i32),
    #[error("replay I/O failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayRecord {
    /// Milliseconds since recording started.
    pub timestamp: i32,
    pub frame: Frame,
}

pub struct ReplayWriter<W: Write> {
    inner: W,
    records: u64,
}

impl ReplayWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> ReplayWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, records: 0 }
    }

    pub fn write_record(&mut self, timestamp: i32, payload: &[u8]) -> io::Result<()> {
        let size = i32::try_from(payload.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "record too large"))?;
        self.inner.write_all(&timestamp.to_be_bytes())?;
        self.inner.write_all(&size.to_be_bytes())?;
        self.inner.write_all(payload)?;
        self.records += 1;
        Ok(())
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

pub struct ReplayReader<R: Read> {
    inner: R,
}

impl ReplayReader<BufReader<File>> {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: Read> ReplayReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Next record, or `Ok(None)` once the timestamp of a new record cannot
    /// be read at all.
    pub fn read_record(&mut self) -> Result<Option<ReplayRecord>, ReplayError> {
        let mut word = [0u8; 4];
        let mut filled = 0;
        while filled < word.len() {
            match self.inner.read(&mut word[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => return Err(ReplayError::Truncated("timestamp")),
                Ok(read) => filled += read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        let timestamp = i32::from_be_bytes(word);

        self.read_exact(&mut word, "size")?;
        let size = i32::from_be_bytes(word);
        if size < 0 {
            return Err(ReplayError::NegativeSize(size));
        }
        let mut payload = vec![0u8; size as usize];
        self.read_exact(&mut payload, "payload")?;
        Ok(Some(ReplayRecord {
            timestamp,
            frame: Frame::from_bytes(payload),
        }))
    }

    fn read_exact(&mut self, buf: &mut [u8], field: &'static str) -> Result<(), ReplayError> {
        self.inner.read_exact(buf).map_err(|err| {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                ReplayError::Truncated(field)
            } else {
                ReplayError::Io(err)
            }
        })
    }
}

impl<R: Read> Iterator for ReplayReader<R> {
    type Item = Result<ReplayRecord, ReplayError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::Notification;
    use crate::server::ServerNotification;

    #[test]
    fn records_read_back_until_eof() {
        let mut writer = ReplayWriter::new(Vec::new());
        let turn = ServerNotification::TurnStarted { turn: 4 }.encode();
        writer.write_record(0, turn.as_bytes()).unwrap();
        writer.write_record(250, &[]).unwrap();
        let bytes = writer.into_inner();
        assert_eq!(&bytes[..8], &[0, 0, 0, 0, 0, 0, 0, 12]);

        let records: Vec<_> = ReplayReader::new(bytes.as_slice())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].frame, turn);
        assert_eq!(records[1].timestamp, 250);
        assert!(records[1].frame.is_empty());
    }

    #[test]
    fn record_cut_after_timestamp_is_an_error() {
        let bytes = [0u8, 0, 0, 1, 0, 0];
        let mut reader = ReplayReader::new(&bytes[..]);
        assert!(matches!(
            reader.read_record(),
            Err(ReplayError::Truncated("size"))
        ));
    }

    #[test]
    fn empty_file_has_no_records() {
        let mut reader = ReplayReader::new(io::empty());
        assert!(reader.read_record().unwrap().is_none());
    }
}
