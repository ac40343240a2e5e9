use std::fmt;

/// The framing that decides where a response body ends.
///
/// This type is a `u64` that also allows for sentinel values that describe
/// bodies without a known byte count:
///
/// - [`BodyFraming::CLOSE_DELIMITED`]: the body runs until the transport
///   reports EOF.
/// - [`BodyFraming::CHUNKED`]: the body uses chunked transfer coding.
/// - [`BodyFraming::TUNNEL`]: the "body" is an opaque bidirectional stream
///   (CONNECT or 101), ending only when the connection closes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct BodyFraming(u64);

const MAX_LEN: u64 = u64::MAX - 3;

impl BodyFraming {
    pub(crate) const CLOSE_DELIMITED: BodyFraming = BodyFraming(u64::MAX);
    pub(crate) const CHUNKED: BodyFraming = BodyFraming(u64::MAX - 1);
    pub(crate) const TUNNEL: BodyFraming = BodyFraming(u64::MAX - 2);
    pub(crate) const ZERO: BodyFraming = BodyFraming(0);

    #[cfg(test)]
    pub(crate) fn new(len: u64) -> Self {
        debug_assert!(len <= MAX_LEN);
        BodyFraming(len)
    }

    /// Takes the value as a content length.
    ///
    /// Should only be called if previously confirmed this isn't a sentinel
    /// value.
    #[inline]
    pub(crate) fn danger_len(self) -> u64 {
        debug_assert!(self.0 <= MAX_LEN);
        self.0
    }

    /// Checks the `u64` is within the maximum allowed for content lengths.
    pub(crate) fn checked_new(len: u64) -> Result<Self, crate::error::Parse> {
        if len <= MAX_LEN {
            Ok(BodyFraming(len))
        } else {
            warn!("content-length bigger than maximum: {} > {}", len, MAX_LEN);
            Err(crate::error::Parse::Header(crate::error::Header::Line))
        }
    }

    pub(crate) fn is_exact(&self) -> bool {
        self.0 <= MAX_LEN
    }
}

impl fmt::Debug for BodyFraming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            BodyFraming::CLOSE_DELIMITED => f.write_str("CLOSE_DELIMITED"),
            BodyFraming::CHUNKED => f.write_str("CHUNKED"),
            BodyFraming::TUNNEL => f.write_str("TUNNEL"),
            BodyFraming(n) => f.debug_tuple("BodyFraming").field(&n).finish(),
        }
    }
}

impl fmt::Display for BodyFraming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            BodyFraming::CLOSE_DELIMITED => f.write_str("close-delimited"),
            BodyFraming::CHUNKED => f.write_str("chunked encoding"),
            BodyFraming::TUNNEL => f.write_str("raw tunnel"),
            BodyFraming::ZERO => f.write_str("empty"),
            BodyFraming(n) => write!(f, "content-length ({} bytes)", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_not_exact() {
        assert!(!BodyFraming::CHUNKED.is_exact());
        assert!(!BodyFraming::CLOSE_DELIMITED.is_exact());
        assert!(!BodyFraming::TUNNEL.is_exact());
        assert!(BodyFraming::ZERO.is_exact());
        assert!(BodyFraming::new(30).is_exact());
    }

    #[test]
    fn checked_new_rejects_sentinel_range() {
        assert!(BodyFraming::checked_new(MAX_LEN).is_ok());
        assert!(BodyFraming::checked_new(MAX_LEN + 1).is_err());
    }

}
