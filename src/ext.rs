//! HTTP extensions.

use bytes::Bytes;

/// A response's reason phrase, as received on the wire.
///
/// Present in the extensions of a returned `http::Response` only when the
/// server's phrase differs from the canonical phrase for the status code.
/// `HTTP/1.1 200 Awesome` yields one containing `Awesome`; a plain
/// `HTTP/1.1 200 OK` yields none.
///
/// The bytes are unaltered: servers speaking a legacy single-byte
/// encoding show up here exactly as they spoke.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReasonPhrase(Bytes);

impl ReasonPhrase {
    /// The raw phrase bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Wraps a phrase known at compile time.
    ///
    /// # Panics
    ///
    /// Panics if the phrase contains a byte not allowed in a reason
    /// phrase.
    pub fn from_static(phrase: &'static str) -> ReasonPhrase {
        ReasonPhrase::try_new(Bytes::from_static(phrase.as_bytes()))
            .expect("static reason phrase contains a control byte")
    }

    /// Every conversion funnels through here: a phrase may hold anything
    /// except control bytes.
    fn try_new(bytes: Bytes) -> Result<ReasonPhrase, InvalidReasonPhrase> {
        // reason-phrase = *( HTAB / SP / VCHAR / obs-text ), which rules
        // out exactly the controls other than HTAB.
        match bytes.iter().position(|&b| is_forbidden(b)) {
            None => Ok(ReasonPhrase(bytes)),
            Some(offset) => Err(InvalidReasonPhrase { offset }),
        }
    }
}

fn is_forbidden(b: u8) -> bool {
    (b < 0x20 && b != b'\t') || b == 0x7F
}

impl TryFrom<Bytes> for ReasonPhrase {
    type Error = InvalidReasonPhrase;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        ReasonPhrase::try_new(bytes)
    }
}

impl TryFrom<&[u8]> for ReasonPhrase {
    type Error = InvalidReasonPhrase;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        ReasonPhrase::try_new(Bytes::copy_from_slice(bytes))
    }
}

impl TryFrom<Vec<u8>> for ReasonPhrase {
    type Error = InvalidReasonPhrase;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        ReasonPhrase::try_new(Bytes::from(bytes))
    }
}

impl TryFrom<String> for ReasonPhrase {
    type Error = InvalidReasonPhrase;

    fn try_from(phrase: String) -> Result<Self, Self::Error> {
        ReasonPhrase::try_new(Bytes::from(phrase))
    }
}

impl AsRef<[u8]> for ReasonPhrase {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Error constructing a [`ReasonPhrase`]: the input held a control byte.
#[derive(Debug)]
pub struct InvalidReasonPhrase {
    offset: usize,
}

impl std::fmt::Display for InvalidReasonPhrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "control byte in reason phrase at offset {}", self.offset)
    }
}

impl std::error::Error for InvalidReasonPhrase {}
