use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::ready;
use http::header::{self, Entry, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode, Uri, Version};

use crate::config::{Settings, ValueEncoding};
use crate::error::{Header, Parse, User};
use crate::ext::ReasonPhrase;
use crate::headers;
use crate::pool::PoolKind;
use crate::proto::h1::encode::Encoder;
use crate::proto::h1::io::Buffered;
use crate::rt::Transport;

/// A status line must at least be `HTTP/1.X SP ddd`.
const MIN_STATUS_LINE_LEN: usize = 12;

/// The parsed head of a response: everything before the body.
#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub(crate) version: Version,
    pub(crate) status: StatusCode,
    /// Present only when the wire phrase differs from the canonical one.
    pub(crate) reason: Option<ReasonPhrase>,
    pub(crate) headers: HeaderMap,
}

pub(crate) struct RequestContext<'a> {
    pub(crate) kind: PoolKind,
    pub(crate) pool_host: Option<Bytes>,
    pub(crate) settings: &'a Settings,
}

#[derive(Debug)]
pub(crate) struct EncodedRequest {
    pub(crate) encoder: Option<Encoder>,
    pub(crate) expect_continue: bool,
    pub(crate) connection_close: bool,
}

// ===== Request serialization =====

/// Serializes the request line and header block into the write buffer and
/// decides how the body, if any, will be framed.
pub(crate) async fn encode_request<T: Transport>(
    io: &mut Buffered<T>,
    parts: &mut http::request::Parts,
    body_len: Option<u64>,
    has_body: bool,
    ctx: RequestContext<'_>,
) -> crate::Result<EncodedRequest> {
    let is_connect = parts.method == Method::CONNECT;

    // Resolve the Host value up front; the request target may need it too.
    let host: Option<Bytes> = parts
        .headers
        .get(header::HOST)
        .map(|v| Bytes::copy_from_slice(v.as_bytes()))
        .or_else(|| ctx.pool_host.clone())
        .or_else(|| uri_host_bytes(&parts.uri).map(Bytes::from));

    io.write_ascii(parts.method.as_str()).await?;
    io.write_byte(b' ').await?;

    if is_connect {
        // authority-form: the host, nothing else
        let host = host
            .as_ref()
            .ok_or_else(|| crate::Error::new_user(User::MissingHost))?;
        io.write_ascii_bytes(host).await?;
    } else if ctx.kind == PoolKind::Proxy {
        // absolute-form
        let scheme = parts.uri.scheme_str().unwrap_or("http");
        io.write_ascii(scheme).await?;
        io.write_ascii("://").await?;
        if let Some(h) = parts.uri.host() {
            if h.contains(':') {
                io.write_byte(b'[').await?;
                io.write_ascii(h).await?;
                io.write_byte(b']').await?;
            } else {
                io.write_ascii(h).await?;
            }
        }
        if let Some(port) = parts.uri.port_u16() {
            if Some(port) != default_port(scheme) {
                io.write_byte(b':').await?;
                io.write_decimal(u64::from(port)).await?;
            }
        }
        io.write_ascii(path_and_query(&parts.uri)).await?;
    } else {
        // origin-form
        io.write_ascii(path_and_query(&parts.uri)).await?;
    }

    io.write_byte(b' ').await?;
    if parts.version == Version::HTTP_10 {
        io.write_ascii("HTTP/1.0").await?;
    } else {
        io.write_ascii("HTTP/1.1").await?;
    }
    io.write_crlf().await?;

    if !parts.headers.contains_key(header::HOST) {
        if let Some(ref host) = host {
            io.write_ascii("host: ").await?;
            io.write_ascii_bytes(host).await?;
            io.write_crlf().await?;
        }
    }

    // Framing fix-ups, applied to the map so they serialize with the rest.
    if has_body {
        match body_len {
            Some(n) => {
                if !parts.headers.contains_key(header::CONTENT_LENGTH)
                    && !headers::transfer_encoding_is_chunked(&parts.headers)
                {
                    parts
                        .headers
                        .insert(header::CONTENT_LENGTH, HeaderValue::from(n));
                }
            }
            None => {
                // Unknown length goes out chunked.
                if headers::content_length_parse_all(&parts.headers).is_none()
                    && !headers::transfer_encoding_is_chunked(&parts.headers)
                {
                    match parts.headers.entry(header::TRANSFER_ENCODING) {
                        Entry::Occupied(e) => headers::add_chunked(e),
                        Entry::Vacant(e) => {
                            e.insert(HeaderValue::from_static("chunked"));
                        }
                    }
                }
            }
        }
    } else if headers::method_mandates_body(&parts.method)
        && !parts.headers.contains_key(header::CONTENT_LENGTH)
    {
        parts
            .headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    }

    let expect_continue = has_body && wants_expect_continue(&parts.headers);
    let connection_close = parts
        .headers
        .get_all(header::CONNECTION)
        .iter()
        .any(headers::connection_close);

    let cookie = if ctx.settings.use_cookies {
        ctx.settings
            .cookie_jar
            .as_ref()
            .and_then(|jar| jar.cookie_header(&parts.uri))
            .filter(|c| !c.is_empty())
    } else {
        None
    };
    let mut cookie_written = false;

    for name in parts.headers.keys() {
        let desc = headers::descriptor(name);
        let encoding = ctx.settings.request_encoding_for(name);
        io.write_ascii(name.as_str()).await?;
        io.write_two_bytes(b':', b' ').await?;
        let mut first = true;
        for value in parts.headers.get_all(name) {
            if !first {
                io.write_ascii(desc.separator).await?;
            }
            first = false;
            match encoding {
                ValueEncoding::Ascii => io.write_ascii_bytes(value.as_bytes()).await?,
                ValueEncoding::Utf8 | ValueEncoding::Latin1 => {
                    io.write_bytes(value.as_bytes()).await?
                }
            }
        }
        if name == header::COOKIE {
            if let Some(ref c) = cookie {
                if !first {
                    io.write_ascii("; ").await?;
                }
                io.write_str_encoded(c, encoding).await?;
                cookie_written = true;
            }
        }
        io.write_crlf().await?;
    }

    if let Some(ref c) = cookie {
        if !cookie_written {
            io.write_ascii("cookie: ").await?;
            let encoding = ctx.settings.request_encoding_for(&header::COOKIE);
            io.write_str_encoded(c, encoding).await?;
            io.write_crlf().await?;
        }
    }

    io.write_crlf().await?;

    let encoder = if !has_body {
        None
    } else if headers::transfer_encoding_is_chunked(&parts.headers) {
        Some(Encoder::chunked())
    } else {
        let n = body_len
            .or_else(|| headers::content_length_parse_all(&parts.headers))
            .unwrap_or(0);
        Some(Encoder::length(n))
    };

    Ok(EncodedRequest {
        encoder,
        expect_continue,
        connection_close,
    })
}

fn path_and_query(uri: &Uri) -> &str {
    uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

fn uri_host_bytes(uri: &Uri) -> Option<Vec<u8>> {
    let host = uri.host()?;
    let scheme = uri.scheme_str().unwrap_or("http");
    let mut out = Vec::with_capacity(host.len() + 8);
    if host.contains(':') {
        out.push(b'[');
        out.extend_from_slice(host.as_bytes());
        out.push(b']');
    } else {
        out.extend_from_slice(host.as_bytes());
    }
    if let Some(port) = uri.port_u16() {
        if Some(port) != default_port(scheme) {
            out.push(b':');
            out.extend_from_slice(port.to_string().as_bytes());
        }
    }
    Some(out)
}

fn wants_expect_continue(headers: &HeaderMap) -> bool {
    headers.get_all(header::EXPECT).iter().any(|v| {
        v.to_str()
            .map(|s| {
                s.split(',')
                    .any(|e| e.trim().eq_ignore_ascii_case("100-continue"))
            })
            .unwrap_or(false)
    })
}

// ===== Response parsing =====

/// Parses `HTTP/1.X SP ddd [SP reason]`.
///
/// The prefix is compared as literal bytes, so the check reads the same on
/// any host byte order.
pub(crate) fn parse_status_line(
    line: &Bytes,
    reason_encoding: ValueEncoding,
) -> crate::Result<(Version, StatusCode, Option<ReasonPhrase>)> {
    if line.len() < MIN_STATUS_LINE_LEN {
        return Err(crate::Error::new_parse(Parse::StatusLine));
    }
    if &line[..7] != b"HTTP/1." || !line[7].is_ascii_digit() || line[8] != b' ' {
        return Err(crate::Error::new_parse(Parse::StatusLine));
    }
    let version = if line[7] == b'0' {
        Version::HTTP_10
    } else {
        Version::HTTP_11
    };

    let digits = &line[9..12];
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(crate::Error::new_parse(Parse::Status));
    }
    let code = 100 * u16::from(digits[0] - b'0')
        + 10 * u16::from(digits[1] - b'0')
        + u16::from(digits[2] - b'0');
    let status =
        StatusCode::from_u16(code).map_err(|_| crate::Error::new_parse(Parse::Status))?;

    let reason = if line.len() == MIN_STATUS_LINE_LEN {
        b"".as_slice()
    } else if line[12] == b' ' {
        &line[13..]
    } else {
        return Err(crate::Error::new_parse(Parse::Reason));
    };

    // Well-known phrases short-circuit on byte equality; anything else is
    // preserved as an extension.
    let reason = match status.canonical_reason() {
        Some(canonical) if canonical.as_bytes() == reason => None,
        _ => {
            if reason_encoding == ValueEncoding::Utf8 && std::str::from_utf8(reason).is_err() {
                return Err(crate::Error::new_parse(Parse::Reason));
            }
            let offset = line.len() - reason.len();
            let bytes = line.slice(offset..);
            match ReasonPhrase::try_from(bytes) {
                Ok(phrase) => Some(phrase),
                Err(_) => return Err(crate::Error::new_parse(Parse::Reason)),
            }
        }
    };

    Ok((version, status, reason))
}

/// Parses `name ":" OWS value OWS` out of one logical header line.
pub(crate) fn parse_header_line(line: &Bytes) -> crate::Result<(HeaderName, HeaderValue)> {
    // A line that still begins with whitespace is a continuation with no
    // header line to continue.
    if matches!(line.first(), Some(b' ' | b'\t')) {
        return Err(crate::Error::new_header(Header::Fold));
    }

    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or_else(|| crate::Error::new_header(Header::Line))?;

    // Trailing whitespace in the name is tolerated before the colon.
    let mut name_end = colon;
    while name_end > 0 && matches!(line[name_end - 1], b' ' | b'\t') {
        name_end -= 1;
    }
    if name_end == 0 {
        return Err(crate::Error::new_header(Header::Name));
    }
    let name = HeaderName::from_bytes(&line[..name_end])
        .map_err(|_| crate::Error::new_header(Header::Name))?;

    let mut value_start = colon + 1;
    while value_start < line.len() && matches!(line[value_start], b' ' | b'\t') {
        value_start += 1;
    }
    let mut value_end = line.len();
    while value_end > value_start && matches!(line[value_end - 1], b' ' | b'\t') {
        value_end -= 1;
    }
    let value = HeaderValue::from_maybe_shared(line.slice(value_start..value_end))
        .map_err(|_| crate::Error::new_header(Header::Line))?;

    Ok((name, value))
}

/// Applies the inbound per-header encoding policy: a header the selector
/// pins to UTF-8 must carry valid UTF-8 bytes. Everything else passes
/// through as the opaque bytes the server sent.
pub(crate) fn check_response_values(
    settings: &Settings,
    headers: &HeaderMap,
) -> crate::Result<()> {
    if settings.response_value_encoding.is_none() {
        return Ok(());
    }
    for (name, value) in headers.iter() {
        if settings.response_encoding_for(name) == ValueEncoding::Utf8
            && std::str::from_utf8(value.as_bytes()).is_err()
        {
            return Err(crate::Error::new_header(Header::Line));
        }
    }
    Ok(())
}

/// Reads header lines into `headers` until the empty line, charging every
/// wire byte against `allowed`.
///
/// In trailers, headers whose descriptor forbids trailing placement are
/// silently discarded.
pub(crate) fn poll_read_header_block<T: Transport>(
    io: &mut Buffered<T>,
    cx: &mut Context<'_>,
    headers: &mut HeaderMap,
    allowed: &mut usize,
    for_trailers: bool,
) -> Poll<crate::Result<()>> {
    loop {
        let (line, consumed) = ready!(io.poll_read_line(cx, *allowed, true))?;
        *allowed -= consumed;
        if line.is_empty() {
            return Poll::Ready(Ok(()));
        }
        let (name, value) = parse_header_line(&line)?;
        let desc = headers::descriptor(&name);
        if for_trailers && !desc.allowed_in_trailers {
            trace!("discarding non-trailing header {:?} in trailers", name);
            continue;
        }
        if !for_trailers && desc.category == headers::HeaderCategory::Request {
            // A request-only header on a response carries no declared
            // semantics here; it is kept as an ordinary custom header.
            trace!("request-only header {:?} on a response", name);
        }
        headers.append(name, value);
    }
}
