use std::fmt;

use bytes::Bytes;
use tokio::io::AsyncRead;

/// The byte source for an outgoing request.
///
/// A body with a known length is framed with `Content-Length`; a reader
/// without one is sent with `Transfer-Encoding: chunked`.
pub struct RequestBody {
    kind: Kind,
}

pub(crate) enum Kind {
    Empty,
    Full(Bytes),
    Reader {
        reader: Box<dyn AsyncRead + Send + Unpin>,
        len: Option<u64>,
    },
}

impl RequestBody {
    /// A body with no bytes.
    pub fn empty() -> RequestBody {
        RequestBody { kind: Kind::Empty }
    }

    /// A body streamed from a reader.
    ///
    /// If `len` is given it becomes the `Content-Length` and the reader
    /// must yield exactly that many bytes; otherwise the body is sent
    /// chunked.
    pub fn reader<R>(reader: R, len: Option<u64>) -> RequestBody
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        RequestBody {
            kind: Kind::Reader {
                reader: Box::new(reader),
                len,
            },
        }
    }

    /// The exact length in bytes, when known.
    pub fn len(&self) -> Option<u64> {
        match self.kind {
            Kind::Empty => Some(0),
            Kind::Full(ref b) => Some(b.len() as u64),
            Kind::Reader { len, .. } => len,
        }
    }

    /// Whether this body is known to contain no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    pub(crate) fn into_kind(self) -> Kind {
        self.kind
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> RequestBody {
        if bytes.is_empty() {
            RequestBody::empty()
        } else {
            RequestBody {
                kind: Kind::Full(bytes),
            }
        }
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(vec: Vec<u8>) -> RequestBody {
        RequestBody::from(Bytes::from(vec))
    }
}

impl From<&'static [u8]> for RequestBody {
    fn from(slice: &'static [u8]) -> RequestBody {
        RequestBody::from(Bytes::from_static(slice))
    }
}

impl From<&'static str> for RequestBody {
    fn from(s: &'static str) -> RequestBody {
        RequestBody::from(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for RequestBody {
    fn from(s: String) -> RequestBody {
        RequestBody::from(Bytes::from(s))
    }
}

impl Default for RequestBody {
    fn default() -> RequestBody {
        RequestBody::empty()
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Kind::Empty => f.write_str("RequestBody(Empty)"),
            Kind::Full(ref b) => f.debug_tuple("RequestBody").field(&b.len()).finish(),
            Kind::Reader { len, .. } => f.debug_struct("RequestBody").field("len", &len).finish(),
        }
    }
}
