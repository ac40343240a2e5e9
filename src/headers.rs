//! Header parsing helpers and the known-header descriptor table.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, ValueIter, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, Method};

pub(crate) fn connection_keep_alive(value: &HeaderValue) -> bool {
    connection_lists(value, "keep-alive")
}

pub(crate) fn connection_close(value: &HeaderValue) -> bool {
    connection_lists(value, "close")
}

/// A `Connection` value is a comma-separated option list; matching is
/// token-wise and ASCII-case-insensitive. A value that isn't UTF-8 can't
/// spell an option this crate cares about, so it never matches.
fn connection_lists(value: &HeaderValue, option: &str) -> bool {
    value.to_str().map_or(false, |list| {
        list.split(',')
            .any(|token| token.trim().eq_ignore_ascii_case(option))
    })
}

pub(crate) fn content_length_parse_all(headers: &HeaderMap) -> Option<u64> {
    content_length_parse_all_values(headers.get_all(CONTENT_LENGTH).into_iter())
}

/// Repeated `Content-Length` fields, or one field holding a comma-joined
/// list, are tolerated only while every element is the same well-formed
/// number. Any disagreement or junk makes the whole header unusable.
pub(crate) fn content_length_parse_all_values(values: ValueIter<'_, HeaderValue>) -> Option<u64> {
    let mut agreed: Option<u64> = None;
    for value in values {
        let text = value.to_str().ok()?;
        for element in text.split(',') {
            let n = parse_decimal(element.trim().as_bytes())?;
            if *agreed.get_or_insert(n) != n {
                return None;
            }
        }
    }
    agreed
}

/// Strict decimal: ASCII digits only, at least one of them. `u64::from_str`
/// would admit a leading `+`, which the header grammar does not.
fn parse_decimal(digits: &[u8]) -> Option<u64> {
    if digits.is_empty() {
        return None;
    }
    digits.iter().try_fold(0u64, |total, &b| {
        if !b.is_ascii_digit() {
            return None;
        }
        total.checked_mul(10)?.checked_add(u64::from(b - b'0'))
    })
}

/// Whether a request with this method and no body still announces
/// `Content-Length: 0`. The remaining methods carry no body semantics,
/// so announcing an empty one would only confuse servers.
pub(crate) fn method_mandates_body(method: &Method) -> bool {
    !matches!(
        *method,
        Method::GET | Method::HEAD | Method::DELETE | Method::CONNECT | Method::TRACE
    )
}

/// Chunked is only meaningful as the final transfer coding, so only the
/// last element of the last `Transfer-Encoding` field decides.
pub(crate) fn transfer_encoding_is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(TRANSFER_ENCODING)
        .into_iter()
        .next_back()
        .map_or(false, last_coding_is_chunked)
}

fn last_coding_is_chunked(value: &HeaderValue) -> bool {
    value
        .to_str()
        .ok()
        .and_then(|list| list.rsplit(',').next())
        .map_or(false, |coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

/// Splices `chunked` onto the end of an existing `Transfer-Encoding`
/// header, keeping it the final coding.
pub(crate) fn add_chunked(mut entry: http::header::OccupiedEntry<'_, HeaderValue>) {
    match entry.iter_mut().next_back() {
        Some(last) => {
            let mut joined = Vec::with_capacity(last.as_bytes().len() + ", chunked".len());
            joined.extend_from_slice(last.as_bytes());
            joined.extend_from_slice(b", chunked");
            *last = HeaderValue::from_maybe_shared(Bytes::from(joined))
                .expect("valid value joined with ascii stays valid");
        }
        None => {
            entry.insert(HeaderValue::from_static("chunked"));
        }
    }
}

// ===== Known-header descriptors =====

/// Which side of an exchange a header belongs to.
///
/// The category is consulted where it is observable on the wire: the value
/// separator when a multi-valued header is serialized, and whether a header
/// is allowed to appear in chunked trailers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HeaderCategory {
    General,
    Request,
    Response,
    Content,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct HeaderDescriptor {
    pub(crate) category: HeaderCategory,
    /// Separator used when joining multiple values of this header into a
    /// single field line. `", "` unless the header is a product listing.
    pub(crate) separator: &'static str,
    /// Whether the header may legally appear in chunked trailers.
    pub(crate) allowed_in_trailers: bool,
}

const DEFAULT_SEPARATOR: &str = ", ";
const PRODUCT_SEPARATOR: &str = " ";

/// Looks up the descriptor for a header name. Unknown names fall back to a
/// custom-header descriptor (general category, default separator, allowed
/// in trailers).
pub(crate) fn descriptor(name: &HeaderName) -> HeaderDescriptor {
    use HeaderCategory::*;

    let (category, separator, allowed_in_trailers) = match name.as_str() {
        // Product listings are joined with a single space.
        "user-agent" => (Request, PRODUCT_SEPARATOR, true),
        "server" => (Response, PRODUCT_SEPARATOR, true),
        "upgrade" | "via" => (General, DEFAULT_SEPARATOR, false),

        // Framing and routing headers can never appear in trailers.
        "connection" | "keep-alive" | "transfer-encoding" | "te" | "trailer" => {
            (General, DEFAULT_SEPARATOR, false)
        }
        "host" | "expect" | "max-forwards" | "range" | "if-match" | "if-none-match"
        | "if-modified-since" | "if-unmodified-since" | "if-range" => {
            (Request, DEFAULT_SEPARATOR, false)
        }
        "authorization" | "proxy-authorization" | "cookie" => (Request, DEFAULT_SEPARATOR, false),
        "www-authenticate" | "proxy-authenticate" | "set-cookie" | "retry-after" | "age"
        | "location" | "vary" | "accept-ranges" => (Response, DEFAULT_SEPARATOR, false),
        "cache-control" | "pragma" | "date" | "warning" => (General, DEFAULT_SEPARATOR, false),

        "content-length" | "content-type" | "content-encoding" | "content-language"
        | "content-location" | "content-range" | "content-disposition" | "expires"
        | "last-modified" | "allow" => (Content, DEFAULT_SEPARATOR, false),

        _ => (General, DEFAULT_SEPARATOR, true),
    };

    HeaderDescriptor {
        category,
        separator,
        allowed_in_trailers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_directives() {
        let value = HeaderValue::from_static("keep-alive, Upgrade");
        assert!(connection_keep_alive(&value));
        assert!(!connection_close(&value));

        let value = HeaderValue::from_static("CLOSE");
        assert!(connection_close(&value));
    }

    #[test]
    fn content_length_agreement() {
        let mut headers = HeaderMap::new();
        headers.append(CONTENT_LENGTH, HeaderValue::from_static("5"));
        headers.append(CONTENT_LENGTH, HeaderValue::from_static("5"));
        assert_eq!(content_length_parse_all(&headers), Some(5));

        headers.append(CONTENT_LENGTH, HeaderValue::from_static("6"));
        assert_eq!(content_length_parse_all(&headers), None);
    }

    #[test]
    fn content_length_comma_list() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("7, 7"));
        assert_eq!(content_length_parse_all(&headers), Some(7));

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("7, 8"));
        assert_eq!(content_length_parse_all(&headers), None);
    }

    #[test]
    fn content_length_rejects_junk() {
        for bad in ["+5", "-1", "", "5x", "0x5"] {
            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_LENGTH, HeaderValue::from_static(bad));
            assert_eq!(content_length_parse_all(&headers), None, "{bad:?}");
        }
    }

    #[test]
    fn method_body_announcements() {
        assert!(method_mandates_body(&Method::POST));
        assert!(method_mandates_body(&Method::PUT));
        assert!(!method_mandates_body(&Method::GET));
        assert!(!method_mandates_body(&Method::HEAD));
        assert!(!method_mandates_body(&Method::TRACE));
    }

    #[test]
    fn chunked_must_be_last() {
        let mut headers = HeaderMap::new();
        headers.insert(
            TRANSFER_ENCODING,
            HeaderValue::from_static("chunked, gzip"),
        );
        assert!(!transfer_encoding_is_chunked(&headers));

        headers.insert(
            TRANSFER_ENCODING,
            HeaderValue::from_static("gzip, chunked"),
        );
        assert!(transfer_encoding_is_chunked(&headers));
    }

    #[test]
    fn chunked_checks_last_field_only() {
        let mut headers = HeaderMap::new();
        headers.append(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.append(TRANSFER_ENCODING, HeaderValue::from_static("gzip"));
        assert!(!transfer_encoding_is_chunked(&headers));
    }

    #[test]
    fn add_chunked_appends() {
        let mut headers = HeaderMap::new();
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("gzip"));
        match headers.entry(TRANSFER_ENCODING) {
            http::header::Entry::Occupied(e) => add_chunked(e),
            _ => unreachable!(),
        }
        assert_eq!(headers.get(TRANSFER_ENCODING).unwrap(), "gzip, chunked");
    }

    #[test]
    fn descriptor_fallback_is_custom() {
        let name = HeaderName::from_static("x-whatever");
        let desc = descriptor(&name);
        assert_eq!(desc.category, HeaderCategory::General);
        assert_eq!(desc.separator, ", ");
        assert!(desc.allowed_in_trailers);
    }

    #[test]
    fn descriptor_product_headers_join_with_space() {
        assert_eq!(descriptor(&http::header::USER_AGENT).separator, " ");
        assert_eq!(descriptor(&http::header::SERVER).separator, " ");
        assert_eq!(descriptor(&http::header::ACCEPT).separator, ", ");
    }

    #[test]
    fn descriptor_non_trailing() {
        assert!(!descriptor(&TRANSFER_ENCODING).allowed_in_trailers);
        assert!(!descriptor(&CONTENT_LENGTH).allowed_in_trailers);
        assert!(!descriptor(&http::header::HOST).allowed_in_trailers);
    }
}
