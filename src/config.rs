//! Connection settings.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::header::HeaderName;

use crate::pool::CookieJar;

/// How a header value's bytes are interpreted or produced.
///
/// Outbound, anything other than `Ascii` lets a header value carry bytes
/// above 0x7F. Inbound, the encoding governs how a response reason phrase
/// is validated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueEncoding {
    /// Reject any byte >= 0x80.
    Ascii,
    /// Pass UTF-8 through; inbound text must be valid UTF-8.
    Utf8,
    /// Treat each byte as a Latin-1 code point.
    Latin1,
}

/// Selects a [`ValueEncoding`] for a given header.
pub type EncodingSelector = Arc<dyn Fn(&HeaderName) -> Option<ValueEncoding> + Send + Sync>;

/// Configuration consumed by connections, normally owned by the pool and
/// handed out through [`Pool::settings`](crate::pool::Pool::settings).
pub struct Settings {
    pub(crate) max_response_headers_len: usize,
    pub(crate) max_response_drain: usize,
    pub(crate) expect_100_continue_timeout: Duration,
    pub(crate) request_value_encoding: Option<EncodingSelector>,
    pub(crate) response_value_encoding: Option<EncodingSelector>,
    pub(crate) reason_phrase_encoding: ValueEncoding,
    pub(crate) use_cookies: bool,
    pub(crate) cookie_jar: Option<Arc<dyn CookieJar>>,
}

impl Settings {
    /// Creates settings with the default limits.
    pub fn new() -> Settings {
        Settings {
            max_response_headers_len: 64 * 1024,
            max_response_drain: 1024 * 1024,
            expect_100_continue_timeout: Duration::from_secs(1),
            request_value_encoding: None,
            response_value_encoding: None,
            reason_phrase_encoding: ValueEncoding::Latin1,
            use_cookies: false,
            cookie_jar: None,
        }
    }

    /// Sets the maximum total size of a response's status line plus
    /// headers, in kibibytes.
    ///
    /// Responses exceeding the cap fail the exchange and dispose of the
    /// connection.
    ///
    /// Default is 64.
    pub fn max_response_headers_len(&mut self, kib: usize) -> &mut Settings {
        self.max_response_headers_len = kib * 1024;
        self
    }

    /// Sets the maximum number of leftover response body bytes that will be
    /// consumed to salvage a connection for reuse.
    ///
    /// Default is 1 MiB.
    pub fn max_response_drain_bytes(&mut self, max: usize) -> &mut Settings {
        self.max_response_drain = max;
        self
    }

    /// Sets how long to wait for a `100 Continue` response before sending
    /// the request body anyway.
    ///
    /// Default is 1 second.
    pub fn expect_100_continue_timeout(&mut self, timeout: Duration) -> &mut Settings {
        self.expect_100_continue_timeout = timeout;
        self
    }

    /// Sets a per-header encoding selector for outbound header values.
    ///
    /// When the selector returns `None` (or no selector is set), header
    /// values must be ASCII.
    pub fn request_header_encoding(&mut self, selector: EncodingSelector) -> &mut Settings {
        self.request_value_encoding = Some(selector);
        self
    }

    /// Sets a per-header encoding selector for inbound header values.
    ///
    /// When the selector yields [`ValueEncoding::Utf8`] for a header,
    /// response values of that header must be valid UTF-8 or the exchange
    /// fails. Without a selector (or when it returns `None`), values pass
    /// through as the opaque Latin-1-ish bytes the server sent.
    pub fn response_header_encoding(&mut self, selector: EncodingSelector) -> &mut Settings {
        self.response_value_encoding = Some(selector);
        self
    }

    /// Sets how response reason phrases are validated.
    ///
    /// The reason phrase is not a header, so it gets its own knob rather
    /// than a slot in the selector. The default, [`ValueEncoding::Latin1`],
    /// accepts any obs-text byte; [`ValueEncoding::Utf8`] rejects phrases
    /// that are not valid UTF-8.
    pub fn reason_phrase_encoding(&mut self, encoding: ValueEncoding) -> &mut Settings {
        self.reason_phrase_encoding = encoding;
        self
    }

    /// Enables cookie handling with the given jar.
    ///
    /// When enabled, the jar's cookie string is appended to the outgoing
    /// `Cookie` header and `Set-Cookie` response headers are offered back
    /// to the jar.
    pub fn cookies(&mut self, jar: Arc<dyn CookieJar>) -> &mut Settings {
        self.use_cookies = true;
        self.cookie_jar = Some(jar);
        self
    }

    pub(crate) fn request_encoding_for(&self, name: &HeaderName) -> ValueEncoding {
        self.request_value_encoding
            .as_ref()
            .and_then(|f| f(name))
            .unwrap_or(ValueEncoding::Ascii)
    }

    pub(crate) fn response_encoding_for(&self, name: &HeaderName) -> ValueEncoding {
        self.response_value_encoding
            .as_ref()
            .and_then(|f| f(name))
            .unwrap_or(ValueEncoding::Latin1)
    }
}

impl Default for Settings {
    fn default() -> Settings {
        Settings::new()
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("max_response_headers_len", &self.max_response_headers_len)
            .field("max_response_drain", &self.max_response_drain)
            .field(
                "expect_100_continue_timeout",
                &self.expect_100_continue_timeout,
            )
            .field("use_cookies", &self.use_cookies)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_len_is_kib() {
        let mut settings = Settings::new();
        settings.max_response_headers_len(16);
        assert_eq!(settings.max_response_headers_len, 16 * 1024);
    }

    #[test]
    fn default_encodings() {
        let settings = Settings::new();
        assert_eq!(
            settings.request_encoding_for(&http::header::USER_AGENT),
            ValueEncoding::Ascii
        );
        assert_eq!(
            settings.response_encoding_for(&http::header::SERVER),
            ValueEncoding::Latin1
        );
        assert_eq!(settings.reason_phrase_encoding, ValueEncoding::Latin1);
    }

    #[test]
    fn reason_phrase_encoding_is_its_own_knob() {
        let mut settings = Settings::new();
        settings.reason_phrase_encoding(ValueEncoding::Utf8);
        assert_eq!(settings.reason_phrase_encoding, ValueEncoding::Utf8);
        // The response selector is untouched by it.
        assert_eq!(
            settings.response_encoding_for(&http::header::SERVER),
            ValueEncoding::Latin1
        );
    }

    #[test]
    fn selector_overrides() {
        let mut settings = Settings::new();
        settings.request_header_encoding(Arc::new(|name: &HeaderName| {
            if name == http::header::USER_AGENT {
                Some(ValueEncoding::Utf8)
            } else {
                None
            }
        }));
        assert_eq!(
            settings.request_encoding_for(&http::header::USER_AGENT),
            ValueEncoding::Utf8
        );
        assert_eq!(
            settings.request_encoding_for(&http::header::ACCEPT),
            ValueEncoding::Ascii
        );
    }
}
