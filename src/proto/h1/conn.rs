use std::fmt;
use std::future::poll_fn;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::header::{self, HeaderMap};
use http::{Method, Request, Response, StatusCode, Version};
use tokio_util::sync::CancellationToken;

use crate::body::{Body, BodyFraming, OutgoingKind, RequestBody};
use crate::common::gate::Gate;
use crate::error::User;
use crate::headers;
use crate::pool::Pool;
use crate::proto::h1::decode::Decoder;
use crate::proto::h1::encode::Encoder;
use crate::proto::h1::io::{Buffered, Probe};
use crate::proto::h1::role::{self, RequestContext, ResponseHead};
use crate::rt::Transport;

/// When a final error status answers an `Expect: 100-continue` request,
/// bodies above this size (or of unknown size) are never sent.
const EXPECT100_ERROR_SEND_THRESHOLD: u64 = 1024;

/// A single HTTP/1.x session bound to one transport.
///
/// A connection carries at most one request at a time. Sending a request
/// consumes the connection; it rides along inside the returned response
/// [`Body`] and finds its way back to the [`Pool`] (or is disposed) when
/// the body completes.
pub struct Connection<T: Transport> {
    io: Buffered<T>,
    pool: Arc<dyn Pool<T>>,
    state: State,
}

struct State {
    /// The caller exclusively owns the connection.
    in_use: bool,
    /// The method of the request in flight, kept for response framing.
    current_request: Option<Method>,
    /// Sticky: once set, the connection can never go back to the pool.
    connection_close: bool,
    started_sending_request_body: bool,
    /// True only while no request-body byte has been offered to the
    /// transport.
    can_retry: bool,
    /// A raw tunnel took the connection away from the pool.
    detached: bool,
    idle_since: Instant,
    read_ahead: ReadAheadSlot,
}

/// At most one pending read-ahead, consumed by exactly one task.
struct ReadAheadSlot {
    state: AtomicUsize,
}

const READ_AHEAD_EMPTY: usize = 0;
const READ_AHEAD_ARMED: usize = 1;
const READ_AHEAD_SPENT: usize = 2;

impl ReadAheadSlot {
    fn new() -> ReadAheadSlot {
        ReadAheadSlot {
            state: AtomicUsize::new(READ_AHEAD_EMPTY),
        }
    }

    fn arm(&self) {
        self.state.store(READ_AHEAD_ARMED, Ordering::Release);
    }

    /// Losers of the race see the slot as already spent.
    fn try_consume(&self) -> bool {
        self.state
            .compare_exchange(
                READ_AHEAD_ARMED,
                READ_AHEAD_SPENT,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    #[cfg(test)]
    fn is_armed(&self) -> bool {
        self.state.load(Ordering::Acquire) == READ_AHEAD_ARMED
    }
}

impl<T: Transport> Connection<T> {
    /// Wraps a freshly established transport.
    pub fn new(io: T, pool: Arc<dyn Pool<T>>) -> Connection<T> {
        Connection::with_io(Buffered::new(io), pool)
    }

    /// Tiny-buffer constructor for exercising fill/flush split paths.
    #[cfg(test)]
    pub(crate) fn with_buffer_capacity(
        io: T,
        pool: Arc<dyn Pool<T>>,
        buf_size: usize,
    ) -> Connection<T> {
        Connection::with_io(Buffered::with_capacity(io, buf_size), pool)
    }

    fn with_io(io: Buffered<T>, pool: Arc<dyn Pool<T>>) -> Connection<T> {
        Connection {
            io,
            pool,
            state: State {
                in_use: false,
                current_request: None,
                connection_close: false,
                started_sending_request_body: false,
                can_retry: false,
                detached: false,
                idle_since: Instant::now(),
                read_ahead: ReadAheadSlot::new(),
            },
        }
    }

    /// Claims the connection for one request.
    ///
    /// Fails if a request is already in flight or stray response bytes are
    /// sitting in the read buffer.
    pub fn acquire(&mut self) -> crate::Result<()> {
        if self.state.in_use || self.state.current_request.is_some() {
            return Err(crate::Error::new_user(User::InvalidState));
        }
        if !self.io.read_buf().is_empty() {
            return Err(crate::Error::new_unexpected_message());
        }
        self.state.in_use = true;
        Ok(())
    }

    /// Gives up the exclusive claim without sending anything.
    pub fn release(&mut self) {
        self.state.in_use = false;
        self.state.idle_since = Instant::now();
    }

    /// Removes the connection from pool bookkeeping; it will not be
    /// returned when the current exchange completes.
    pub fn detach(&mut self) {
        self.state.detached = true;
    }

    /// Whether the connection can go back to the pool after the current
    /// exchange.
    pub fn is_reusable(&self) -> bool {
        !self.state.connection_close && !self.state.detached
    }

    /// How long the connection has been idle as of `now`.
    pub fn idle_duration(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.state.idle_since)
    }

    /// Scavenge-time liveness check: probes the transport without
    /// blocking. Any immediately-completing read (bytes, EOF, error) on an
    /// idle connection means it is dead.
    pub fn check_usability_on_scavenge(&mut self) -> bool {
        self.state.read_ahead.try_consume();
        matches!(self.io.probe_idle(), Probe::Healthy)
    }

    /// Probes liveness before handing an idle connection to a new request
    /// and arms the read-ahead slot. Returns whether the connection is
    /// still usable.
    pub fn prepare_for_reuse(&mut self) -> bool {
        if self.state.connection_close || self.state.in_use {
            return false;
        }
        if !matches!(self.io.probe_idle(), Probe::Healthy) {
            trace!("idle connection failed liveness probe");
            return false;
        }
        self.state.read_ahead.arm();
        true
    }

    pub(crate) fn io_mut(&mut self) -> &mut Buffered<T> {
        &mut self.io
    }

    pub(crate) fn max_drain(&self) -> usize {
        self.pool.settings().max_response_drain
    }

    /// Sends one request and reads the response head. The connection moves
    /// into the returned response's [`Body`]; when that body reaches its
    /// end the connection goes back to the pool, or is disposed if it can
    /// no longer be reused.
    ///
    /// `token` spans the header send through final status receipt; once
    /// the body is handed back, cancellation belongs to the body. Any
    /// error disposes the connection; [`Error::is_retry_safe`] reports
    /// whether a retry on a fresh connection is safe.
    ///
    /// [`Error::is_retry_safe`]: crate::Error::is_retry_safe
    pub async fn send_request(
        mut self,
        req: Request<RequestBody>,
        token: &CancellationToken,
    ) -> crate::Result<Response<Body<T>>> {
        if !self.state.in_use {
            if let Err(e) = self.acquire() {
                self.dispose();
                return Err(e);
            }
        }
        if self.state.current_request.is_some() {
            let e = crate::Error::new_user(User::InvalidState);
            self.dispose();
            return Err(e);
        }
        let (mut parts, body) = req.into_parts();
        self.state.current_request = Some(parts.method.clone());
        self.state.can_retry = true;
        self.state.started_sending_request_body = false;

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(crate::Error::new_canceled()),
            res = self.exchange(&mut parts, body) => res,
        };

        match result {
            Ok((head, decoder)) => {
                let body = if decoder.is_done() {
                    // Nothing to read; settle the connection right away.
                    let reused = self.complete_response(decoder.requires_close());
                    Body::finished(reused)
                } else {
                    Body::new(self, decoder)
                };
                let mut res = Response::new(body);
                *res.status_mut() = head.status;
                *res.version_mut() = head.version;
                *res.headers_mut() = head.headers;
                if let Some(reason) = head.reason {
                    res.extensions_mut().insert(reason);
                }
                Ok(res)
            }
            Err(e) => {
                // A torn-down transport surfaces as an I/O error; the
                // caller's cancellation outranks it.
                let e = if token.is_cancelled() && (e.is_io() || e.is_incomplete_message()) {
                    crate::Error::new_canceled().with(e)
                } else {
                    e
                };
                debug!("request failed: {}", e);
                self.dispose();
                Err(e)
            }
        }
    }

    async fn exchange(
        &mut self,
        parts: &mut http::request::Parts,
        body: RequestBody,
    ) -> crate::Result<(ResponseHead, Decoder)> {
        let pool = self.pool.clone();
        let settings = pool.settings();
        let body_len = body.len();
        let has_body = body_len != Some(0);
        let method = parts.method.clone();

        let encoded = role::encode_request(
            &mut self.io,
            parts,
            body_len,
            has_body,
            RequestContext {
                kind: pool.kind(),
                pool_host: pool.host_header().cloned(),
                settings,
            },
        )
        .await?;

        if encoded.connection_close {
            self.state.connection_close = true;
        }

        let mut body = Some(body.into_kind());
        let mut encoder = encoded.encoder;
        let expect = encoded.expect_continue;
        let gate = Gate::new();

        if !expect {
            if let Some(ref mut enc) = encoder {
                let kind = body.take().expect("body streamed once");
                self.send_body(enc, kind).await?;
            }
            self.io.flush().await?;
            self.await_response().await?;
        } else {
            trace!("request head flushed, awaiting 100-continue");
            self.io.flush().await?;
            let timeout = settings.expect_100_continue_timeout;
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    trace!("100-continue timer fired, releasing request body");
                    gate.set(true);
                }
                res = self.await_response() => res?,
            }
            if gate.is_resolved() {
                // The timer won; the gate releases the parked sender, then
                // the real response is awaited.
                if gate.wait().await {
                    let enc = encoder.as_mut().expect("expect implies a body");
                    let kind = body.take().expect("body streamed once");
                    self.send_body(enc, kind).await?;
                    self.io.flush().await?;
                }
                self.await_response().await?;
            }
        }

        let reason_encoding = settings.reason_phrase_encoding;
        let mut allowed = settings.max_response_headers_len;
        let head = loop {
            let (line, consumed) = self.io.read_line(allowed, false).await?;
            allowed -= consumed;
            let (version, status, reason) = role::parse_status_line(&line, reason_encoding)?;
            debug!("response status: {}", status);

            // 101 is terminal with a raw body; it falls through.
            if status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS {
                if status == StatusCode::CONTINUE && expect && gate.set(true) {
                    trace!("100-continue received, releasing request body");
                }
                let mut discarded = HeaderMap::new();
                self.read_headers(&mut discarded, &mut allowed).await?;
                if expect && gate.peek() == Some(true) {
                    if let Some(kind) = body.take() {
                        let enc = encoder.as_mut().expect("expect implies a body");
                        self.send_body(enc, kind).await?;
                        self.io.flush().await?;
                    }
                }
                continue;
            }

            let mut headers = HeaderMap::new();
            self.read_headers(&mut headers, &mut allowed).await?;
            role::check_response_values(settings, &headers)?;

            if expect && !gate.is_resolved() {
                let large_or_unknown =
                    body_len.map_or(true, |n| n > EXPECT100_ERROR_SEND_THRESHOLD);
                let auth_challenge = matches!(
                    status,
                    StatusCode::UNAUTHORIZED | StatusCode::PROXY_AUTHENTICATION_REQUIRED
                );
                if status.as_u16() >= 300 && large_or_unknown && !auth_challenge {
                    trace!("final status {} before 100-continue, withholding body", status);
                    gate.set(false);
                    // The server still expects the announced body; this
                    // connection can't be trusted for another exchange.
                    self.state.connection_close = true;
                } else {
                    gate.set(true);
                }
            }
            if expect && gate.peek() == Some(true) {
                if let Some(kind) = body.take() {
                    let enc = encoder.as_mut().expect("expect implies a body");
                    self.send_body(enc, kind).await?;
                    self.io.flush().await?;
                }
            }

            break ResponseHead {
                version,
                status,
                reason,
                headers,
            };
        };

        if head.version == Version::HTTP_10 {
            let keep_alive = head
                .headers
                .get_all(header::CONNECTION)
                .iter()
                .any(headers::connection_keep_alive);
            if !keep_alive {
                self.state.connection_close = true;
            }
        } else if head
            .headers
            .get_all(header::CONNECTION)
            .iter()
            .any(headers::connection_close)
        {
            self.state.connection_close = true;
        }

        if settings.use_cookies {
            if let Some(ref jar) = settings.cookie_jar {
                for value in head.headers.get_all(header::SET_COOKIE) {
                    jar.store(&parts.uri, value);
                }
            }
        }

        let framing = response_framing(&method, head.status, &head.headers)?;
        debug!("incoming body is {}", framing);
        if framing == BodyFraming::TUNNEL {
            trace!("raw tunnel body, detaching connection from pool");
            self.detach();
            self.state.connection_close = true;
        }
        let decoder = Decoder::for_framing(framing, settings.max_response_headers_len);
        Ok((head, decoder))
    }

    /// Waits for the first response bytes, consuming any armed read-ahead.
    /// EOF here, before any request-body byte went out, is retryable.
    async fn await_response(&mut self) -> crate::Result<()> {
        if self.io.read_remaining() > 0 {
            return Ok(());
        }
        self.state.read_ahead.try_consume();
        let n = self.io.initial_fill().await?;
        if n == 0 {
            trace!("EOF while awaiting response (can_retry={})", self.state.can_retry);
            let err = crate::Error::new_incomplete();
            return Err(if self.state.can_retry {
                err.retryable()
            } else {
                err
            });
        }
        Ok(())
    }

    async fn send_body(
        &mut self,
        encoder: &mut Encoder,
        body: OutgoingKind,
    ) -> crate::Result<()> {
        match body {
            OutgoingKind::Empty => {}
            OutgoingKind::Full(bytes) => {
                self.mark_body_started();
                encoder.write_chunk(&mut self.io, &bytes).await?;
            }
            OutgoingKind::Reader { mut reader, .. } => {
                use tokio::io::AsyncReadExt;
                let mut scratch = vec![0u8; 8192];
                loop {
                    let n = reader
                        .read(&mut scratch)
                        .await
                        .map_err(crate::Error::new_io)?;
                    if n == 0 {
                        break;
                    }
                    self.mark_body_started();
                    encoder.write_chunk(&mut self.io, &scratch[..n]).await?;
                }
            }
        }
        encoder.finish(&mut self.io).await
    }

    fn mark_body_started(&mut self) {
        if !self.state.started_sending_request_body {
            trace!("sending request body");
            self.state.started_sending_request_body = true;
            self.state.can_retry = false;
        }
    }

    async fn read_headers(
        &mut self,
        headers: &mut HeaderMap,
        allowed: &mut usize,
    ) -> crate::Result<()> {
        poll_fn(|cx| role::poll_read_header_block(&mut self.io, cx, headers, allowed, false)).await
    }

    /// Called when the response body reaches its terminal state. Settles
    /// the connection's fate and reports whether it went back to the pool.
    pub(crate) fn complete_response(mut self, requires_close: bool) -> bool {
        if requires_close {
            self.state.connection_close = true;
        }
        if self.io.read_remaining() > 0 {
            debug!(
                "{} unread bytes after response completed, disposing",
                self.io.read_remaining()
            );
            self.state.connection_close = true;
        }
        self.state.current_request = None;
        self.state.in_use = false;
        self.state.started_sending_request_body = false;
        self.state.can_retry = false;
        self.state.idle_since = Instant::now();

        if self.state.detached {
            trace!("detached connection finished");
            return false;
        }
        let pool = self.pool.clone();
        if self.state.connection_close {
            pool.invalidate(self);
            false
        } else {
            debug_assert_eq!(self.io.write_buffered(), 0);
            trace!("connection handed back to pool");
            pool.return_connection(self);
            true
        }
    }

    /// Forcibly ends the connection's life; the pool drops it, closing the
    /// transport and waking anything still blocked on it.
    pub(crate) fn dispose(mut self) {
        self.state.connection_close = true;
        self.state.current_request = None;
        if self.state.detached {
            return;
        }
        let pool = self.pool.clone();
        pool.invalidate(self);
    }
}

fn response_framing(
    method: &Method,
    status: StatusCode,
    headers: &HeaderMap,
) -> crate::Result<BodyFraming> {
    if *method == Method::CONNECT && status.is_success() {
        return Ok(BodyFraming::TUNNEL);
    }
    if status == StatusCode::SWITCHING_PROTOCOLS {
        return Ok(BodyFraming::TUNNEL);
    }
    if *method == Method::HEAD
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok(BodyFraming::ZERO);
    }
    if headers::transfer_encoding_is_chunked(headers) {
        return Ok(BodyFraming::CHUNKED);
    }
    if headers.contains_key(header::CONTENT_LENGTH) {
        let len = headers::content_length_parse_all(headers)
            .ok_or_else(|| crate::Error::new_header(crate::error::Header::Line))?;
        return BodyFraming::checked_new(len).map_err(crate::Error::new_parse);
    }
    Ok(BodyFraming::CLOSE_DELIMITED)
}

impl<T: Transport> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("io", &self.io)
            .field("in_use", &self.state.in_use)
            .field("current_request", &self.state.current_request)
            .field("connection_close", &self.state.connection_close)
            .finish()
    }
}
