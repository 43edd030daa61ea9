//! Seekable message payload

use bytes::Bytes;
use std::fmt;
use std::io::{self, Cursor, Read, Seek, SeekFrom};

/// Object-safe `Read + Seek` bound for boxed payload readers
pub trait ReadSeek: Read + Seek + Send + Sync {}

impl<T: Read + Seek + Send + Sync> ReadSeek for T {}

enum Inner {
    Bytes(Cursor<Bytes>),
    Reader(Box<dyn ReadSeek>),
}

/// Payload of a message
///
/// Decoded payloads are `Bytes` slices of the receive buffer, so reading them
/// back never copies. Application payloads can be any seekable reader.
pub struct Body {
    inner: Inner,
}

impl Body {
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            inner: Inner::Bytes(Cursor::new(bytes.into())),
        }
    }

    pub fn from_reader(reader: impl Read + Seek + Send + Sync + 'static) -> Self {
        Self {
            inner: Inner::Reader(Box::new(reader)),
        }
    }

    /// Total payload size, leaving the read position untouched
    pub fn size(&mut self) -> io::Result<u64> {
        match &mut self.inner {
            Inner::Bytes(cursor) => Ok(cursor.get_ref().len() as u64),
            Inner::Reader(reader) => {
                let current = reader.stream_position()?;
                let end = reader.seek(SeekFrom::End(0))?;
                reader.seek(SeekFrom::Start(current))?;
                Ok(end)
            }
        }
    }

    /// Whole payload from the start; the read position is rewound afterwards
    pub fn read_all(&mut self) -> io::Result<Bytes> {
        match &mut self.inner {
            Inner::Bytes(cursor) => {
                cursor.set_position(0);
                Ok(cursor.get_ref().clone())
            }
            Inner::Reader(reader) => {
                reader.seek(SeekFrom::Start(0))?;
                let mut payload = Vec::new();
                reader.read_to_end(&mut payload)?;
                reader.seek(SeekFrom::Start(0))?;
                Ok(Bytes::from(payload))
            }
        }
    }

    /// Underlying bytes when the body is buffer-backed
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match &self.inner {
            Inner::Bytes(cursor) => Some(cursor.get_ref()),
            Inner::Reader(_) => None,
        }
    }
}

impl Read for Body {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            Inner::Bytes(cursor) => cursor.read(buf),
            Inner::Reader(reader) => reader.read(buf),
        }
    }
}

impl Seek for Body {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.inner {
            Inner::Bytes(cursor) => cursor.seek(pos),
            Inner::Reader(reader) => reader.seek(pos),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::from_bytes(bytes)
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Body::from_bytes(Bytes::from_static(text.as_bytes()))
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::Bytes(cursor) => f
                .debug_struct("Body")
                .field("len", &cursor.get_ref().len())
                .finish(),
            Inner::Reader(_) => f.debug_struct("Body").field("reader", &"..").finish(),
        }
    }
}
