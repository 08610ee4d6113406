//! Random-access byte source handed to the decoder.
//!
//! Symphonia pulls compressed bytes through [`MediaSource`] (`Read + Seek`). The decoder
//! serializes its own calls, so a source is never used from two threads at once; it only
//! has to be `Send + Sync` to move into the decode worker.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use symphonia::core::io::MediaSource;

use crate::error::{EngineError, Result};

/// Origin for [`ByteSource::seek_whence`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// Anything the byte source can wrap.
pub trait ReadSeek: Read + Seek + Send + Sync {}

impl<T: Read + Seek + Send + Sync> ReadSeek for T {}

/// Seekable byte stream over a file-like resource.
pub struct ByteSource {
    name: String,
    inner: Box<dyn ReadSeek>,
    pos: u64,
    len: Option<u64>,
}

impl ByteSource {
    /// Open a file on disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let open_err = |source| EngineError::Open {
            path: PathBuf::from(path),
            source,
        };
        let file = File::open(path).map_err(open_err)?;
        let len = file.metadata().map_err(open_err)?.len();
        tracing::debug!(path = ?path, bytes = len, "byte source opened");
        Ok(Self {
            name: path.display().to_string(),
            inner: Box::new(file),
            pos: 0,
            len: Some(len),
        })
    }

    /// Wrap an arbitrary reader (in-memory data, custom containers).
    pub fn from_reader(name: impl Into<String>, reader: impl ReadSeek + 'static, len: Option<u64>) -> Self {
        Self {
            name: name.into(),
            inner: Box::new(reader),
            pos: 0,
            len,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current absolute offset.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Seek relative to `whence`, returning the new absolute offset.
    ///
    /// Offsets that would land before the start of the stream are rejected.
    pub fn seek_whence(&mut self, offset: i64, whence: Whence) -> io::Result<u64> {
        let base = match whence {
            Whence::Start => 0,
            Whence::Current => self.pos,
            Whence::End => match self.len {
                Some(len) => len,
                None => self.inner.seek(SeekFrom::End(0))?,
            },
        };
        let Some(target) = base.checked_add_signed(offset) else {
            // Probing the end may have moved the reader.
            self.inner.seek(SeekFrom::Start(self.pos))?;
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek to {offset} from {whence:?} is out of range"),
            ));
        };
        self.pos = self.inner.seek(SeekFrom::Start(target))?;
        Ok(self.pos)
    }
}

impl Read for ByteSource {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let n = self.inner.read(out)?;
        self.pos = self.pos.saturating_add(n as u64);
        Ok(n)
    }
}

impl Seek for ByteSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Start(x) => self.seek_whence(i64::try_from(x).unwrap_or(i64::MAX), Whence::Start),
            SeekFrom::Current(d) => self.seek_whence(d, Whence::Current),
            SeekFrom::End(d) => self.seek_whence(d, Whence::End),
        }
    }
}

impl MediaSource for ByteSource {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn memory_source(len: usize) -> ByteSource {
        let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
        ByteSource::from_reader("memory", Cursor::new(data), Some(len as u64))
    }

    #[test]
    fn open_missing_file_reports_open_error() {
        let err = ByteSource::open("/definitely/not/here.flac").err().unwrap();
        assert!(matches!(err, EngineError::Open { .. }));
    }

    #[test]
    fn read_advances_position() {
        let mut src = memory_source(16);
        let mut buf = [0u8; 6];
        assert_eq!(src.read(&mut buf).unwrap(), 6);
        assert_eq!(buf, [0, 1, 2, 3, 4, 5]);
        assert_eq!(src.position(), 6);
    }

    #[test]
    fn seek_whence_resolves_all_origins() {
        let mut src = memory_source(100);
        assert_eq!(src.seek_whence(10, Whence::Start).unwrap(), 10);
        assert_eq!(src.seek_whence(5, Whence::Current).unwrap(), 15);
        assert_eq!(src.seek_whence(-4, Whence::End).unwrap(), 96);
        let mut one = [0u8; 1];
        src.read_exact(&mut one).unwrap();
        assert_eq!(one[0], 96);
    }

    #[test]
    fn seek_before_start_fails_without_moving() {
        let mut src = memory_source(8);
        src.seek_whence(4, Whence::Start).unwrap();
        let err = src.seek_whence(-5, Whence::Current).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(src.position(), 4);
    }

    #[test]
    fn media_source_reports_length() {
        let src = memory_source(42);
        assert!(src.is_seekable());
        assert_eq!(src.byte_len(), Some(42));
    }
}
