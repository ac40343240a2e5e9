//! Error and Result module.

use std::error::Error as StdError;
use std::fmt;

/// Result type often returned from methods that can have `tether::Error`s.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// Represents errors that can occur handling an HTTP/1 exchange.
///
/// # Formatting
///
/// The `Display` implementation of this type will only print the details of
/// this level of error, even though it may have been caused by another error
/// and contain that error in its source. To print all the relevant
/// information, including the source chain, using something like
/// `std::error::Report`, or equivalent 3rd party types.
///
/// The contents of the formatted error message of this specific `Error` type
/// is unspecified. **You must not depend on it.** The wording and details may
/// change in any version, with the goal of improving error messages.
///
/// # Source
///
/// An `Error` may be caused by another error. To aid in debugging, those are
/// exposed in `Error::source()` as erased types. While it is possible to
/// check the exact type of the sources, they **can not be depended on**. They
/// may come from private internal dependencies, and are subject to change at
/// any moment.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
    retryable: bool,
}

#[derive(Debug)]
pub(super) enum Kind {
    Parse(Parse),
    User(User),
    /// The transport closed before the message could complete.
    IncompleteMessage,
    /// The connection received a message (or bytes) when not waiting for one.
    UnexpectedMessage,
    /// The exchange was canceled before completing.
    Canceled,
    /// An `io::Error` occurred while trying to read or write the transport.
    Io,
    /// Draining the response failed while the connection had to be kept
    /// alive for authentication to continue.
    AuthConnectionBroken,
}

#[derive(Debug)]
pub(super) enum Parse {
    /// The status line was malformed.
    StatusLine,
    /// The status code was not three decimal digits.
    Status,
    /// The reason phrase contained invalid bytes.
    Reason,
    Header(Header),
    /// The status line plus headers exceeded the configured maximum.
    TooLarge,
    /// A chunk size line was malformed or exceeded the line cap.
    ChunkLine,
}

#[derive(Debug)]
pub(super) enum Header {
    /// A header name was empty or contained invalid bytes.
    Name,
    /// A header line was missing its colon, or the value was invalid.
    Line,
    /// An obsolete folded continuation line could not be repaired.
    Fold,
}

#[derive(Debug)]
pub(super) enum User {
    /// A header name or ASCII-only header value contained a byte >= 0x80.
    NonAsciiRequest,
    /// A CONNECT request had no host to write as its target.
    MissingHost,
    /// A request body wrote more or fewer bytes than its declared length.
    BodyLengthMismatch,
    /// The connection was used in a way its state does not allow.
    InvalidState,
}

// ===== impl Error =====

impl Error {
    /// Returns true if this was an HTTP parse error.
    pub fn is_parse(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(_))
    }

    /// Returns true if the error was caused by response headers exceeding
    /// the configured maximum size.
    pub fn is_parse_too_large(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(Parse::TooLarge))
    }

    /// Returns true if the error was caused by an invalid response status
    /// line, status code, or reason phrase.
    pub fn is_parse_status(&self) -> bool {
        matches!(
            self.inner.kind,
            Kind::Parse(Parse::StatusLine) | Kind::Parse(Parse::Status) | Kind::Parse(Parse::Reason)
        )
    }

    /// Returns true if this error was caused by user code.
    pub fn is_user(&self) -> bool {
        matches!(self.inner.kind, Kind::User(_))
    }

    /// Returns true if the exchange was canceled.
    pub fn is_canceled(&self) -> bool {
        matches!(self.inner.kind, Kind::Canceled)
    }

    /// Returns true if the transport closed before the message could
    /// complete.
    pub fn is_incomplete_message(&self) -> bool {
        matches!(self.inner.kind, Kind::IncompleteMessage)
    }

    /// Returns true if the error was caused by an `io::Error` on the
    /// transport.
    pub fn is_io(&self) -> bool {
        matches!(self.inner.kind, Kind::Io)
    }

    /// Returns true if it is safe to transparently retry the request on a
    /// fresh connection.
    ///
    /// This is only ever true when the failure happened before a single
    /// byte of the request body was offered to the transport.
    pub fn is_retry_safe(&self) -> bool {
        self.inner.retryable
    }

    pub(super) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl {
                kind,
                cause: None,
                retryable: false,
            }),
        }
    }

    pub(super) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    pub(super) fn retryable(mut self) -> Error {
        self.inner.retryable = true;
        self
    }

    pub(super) fn new_incomplete() -> Error {
        Error::new(Kind::IncompleteMessage)
    }

    pub(super) fn new_unexpected_message() -> Error {
        Error::new(Kind::UnexpectedMessage)
    }

    pub(super) fn new_canceled() -> Error {
        Error::new(Kind::Canceled)
    }

    pub(super) fn new_io(cause: std::io::Error) -> Error {
        Error::new(Kind::Io).with(cause)
    }

    pub(super) fn new_parse(parse: Parse) -> Error {
        Error::new(Kind::Parse(parse))
    }

    pub(super) fn new_header(header: Header) -> Error {
        Error::new(Kind::Parse(Parse::Header(header)))
    }

    pub(super) fn new_user(user: User) -> Error {
        Error::new(Kind::User(user))
    }

    pub(super) fn new_auth_connection_broken() -> Error {
        Error::new(Kind::AuthConnectionBroken)
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Parse(Parse::StatusLine) => "invalid response status line",
            Kind::Parse(Parse::Status) => "invalid response status code",
            Kind::Parse(Parse::Reason) => "invalid response reason phrase",
            Kind::Parse(Parse::Header(Header::Name)) => "invalid header name",
            Kind::Parse(Parse::Header(Header::Line)) => "invalid header line",
            Kind::Parse(Parse::Header(Header::Fold)) => "invalid folded header line",
            Kind::Parse(Parse::TooLarge) => "response headers exceeded maximum size",
            Kind::Parse(Parse::ChunkLine) => "invalid chunk size line",
            Kind::User(User::NonAsciiRequest) => "request contains non-ASCII bytes",
            Kind::User(User::MissingHost) => "CONNECT request is missing a host",
            Kind::User(User::BodyLengthMismatch) => {
                "request body does not match its declared content length"
            }
            Kind::User(User::InvalidState) => "connection used in an invalid state",
            Kind::IncompleteMessage => "connection closed before message completed",
            Kind::UnexpectedMessage => "received unexpected message from connection",
            Kind::Canceled => "operation was canceled",
            Kind::Io => "connection error",
            Kind::AuthConnectionBroken => {
                "connection required for authentication could not be kept alive"
            }
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("tether::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}
