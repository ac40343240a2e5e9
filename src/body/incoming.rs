use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::HeaderMap;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::proto::h1::conn::Connection;
use crate::proto::h1::decode::Decoder;
use crate::rt::Transport;

/// A response body being read off its connection.
///
/// The body owns the connection for as long as it is incomplete. Reading
/// it to the end (an `AsyncRead` of zero bytes) settles the connection:
/// back to the pool if it can be reused, disposed otherwise. Dropping an
/// unfinished body disposes the connection, since resynchronizing a
/// half-read message is not possible.
///
/// For a CONNECT tunnel or a `101 Switching Protocols` response the body
/// is the raw bidirectional stream; it also accepts writes.
pub struct Body<T: Transport> {
    inner: Option<Inner<T>>,
    trailers: Option<HeaderMap>,
    reused: Option<bool>,
}

struct Inner<T: Transport> {
    conn: Connection<T>,
    decoder: Decoder,
    drain_budget: usize,
    token: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<T: Transport> Body<T> {
    pub(crate) fn new(conn: Connection<T>, decoder: Decoder) -> Body<T> {
        let token = CancellationToken::new();
        let cancelled = Box::pin(token.clone().cancelled_owned());
        let drain_budget = conn.max_drain();
        Body {
            inner: Some(Inner {
                conn,
                decoder,
                drain_budget,
                token,
                cancelled,
            }),
            trailers: None,
            reused: Some(false),
        }
    }

    /// A body that was over before it began (HEAD, 204, 304,
    /// `Content-Length: 0`). The connection was already settled;
    /// `reused` records how.
    pub(crate) fn finished(reused: bool) -> Body<T> {
        Body {
            inner: None,
            trailers: None,
            reused: Some(reused),
        }
    }

    /// Whether the body has reached its terminal state.
    pub fn is_complete(&self) -> bool {
        self.inner.is_none()
    }

    /// Whether this body is a raw bidirectional tunnel.
    pub fn is_tunnel(&self) -> bool {
        matches!(self.inner, Some(ref inner) if inner.decoder.is_tunnel())
    }

    /// A token that wakes and fails any in-flight read on this body,
    /// disposing the connection. `None` once the body is complete.
    pub fn cancellation(&self) -> Option<CancellationToken> {
        self.inner.as_ref().map(|inner| inner.token.clone())
    }

    /// Trailer headers received after a chunked body, once the body is
    /// complete. Each call after the first returns `None`.
    pub fn trailers(&mut self) -> Option<HeaderMap> {
        self.trailers.take()
    }

    /// Consumes the rest of the body, up to the configured drain cap, to
    /// salvage the connection for reuse. Returns whether the connection
    /// made it back to the pool.
    pub async fn drain(mut self) -> crate::Result<bool> {
        use tokio::io::AsyncReadExt;

        let mut budget = match self.inner {
            Some(ref inner) => inner.drain_budget,
            None => return Ok(self.reused.unwrap_or(false)),
        };
        let mut scratch = [0u8; 4096];
        loop {
            if self.is_complete() {
                return Ok(self.reused.unwrap_or(false));
            }
            if budget == 0 {
                debug!("response drain exceeded cap, disposing connection");
                self.dispose();
                return Ok(false);
            }
            let want = budget.min(scratch.len());
            let n = self
                .read(&mut scratch[..want])
                .await
                .map_err(recover_error)?;
            if n == 0 {
                return Ok(self.reused.unwrap_or(false));
            }
            budget -= n;
        }
    }

    /// Like [`drain`](Body::drain), for callers that must keep the
    /// connection alive to finish authenticating on it. Failing to salvage
    /// the connection is an error here, not an option.
    pub async fn drain_for_reuse(self) -> crate::Result<()> {
        if let Some(ref inner) = self.inner {
            if !inner.conn.is_reusable() {
                drop(self);
                return Err(crate::Error::new_auth_connection_broken());
            }
        }
        if self.drain().await? {
            Ok(())
        } else {
            Err(crate::Error::new_auth_connection_broken())
        }
    }

    fn finalize(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            self.trailers = inner.decoder.take_trailers();
            let requires_close = inner.decoder.requires_close();
            self.reused = Some(inner.conn.complete_response(requires_close));
        }
    }

    fn dispose(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.conn.dispose();
        }
        self.reused = Some(false);
    }
}

fn to_io(e: crate::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

/// Pulls a `tether` error back out of the `io::Error` our own `AsyncRead`
/// produced.
fn recover_error(e: io::Error) -> crate::Error {
    let kind = e.kind();
    match e.into_inner() {
        Some(inner) => match inner.downcast::<crate::Error>() {
            Ok(err) => *err,
            Err(other) => crate::Error::new_io(io::Error::new(kind, other)),
        },
        None => crate::Error::new_io(io::Error::from(kind)),
    }
}

impl<T: Transport> AsyncRead for Body<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let inner = match this.inner.as_mut() {
            Some(inner) => inner,
            None => return Poll::Ready(Ok(())),
        };

        if inner.cancelled.as_mut().poll(cx).is_ready() {
            this.dispose();
            return Poll::Ready(Err(to_io(crate::Error::new_canceled())));
        }

        let poll = {
            let Inner {
                ref mut conn,
                ref mut decoder,
                ..
            } = *inner;
            decoder.poll_decode(conn.io_mut(), cx, buf)
        };

        match poll {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(_)) => {
                if inner.decoder.is_done() {
                    this.finalize();
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => {
                let canceled = inner.token.is_cancelled();
                this.dispose();
                let e = if canceled {
                    crate::Error::new_canceled().with(e)
                } else {
                    e
                };
                Poll::Ready(Err(to_io(e)))
            }
        }
    }
}

impl<T: Transport> AsyncWrite for Body<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match this.inner.as_mut() {
            Some(inner) if inner.decoder.is_tunnel() => {
                Pin::new(inner.conn.io_mut().transport_mut()).poll_write(cx, buf)
            }
            _ => Poll::Ready(Err(not_a_tunnel())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.inner.as_mut() {
            Some(inner) if inner.decoder.is_tunnel() => {
                Pin::new(inner.conn.io_mut().transport_mut()).poll_flush(cx)
            }
            _ => Poll::Ready(Err(not_a_tunnel())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.inner.as_mut() {
            Some(inner) if inner.decoder.is_tunnel() => {
                Pin::new(inner.conn.io_mut().transport_mut()).poll_shutdown(cx)
            }
            _ => Poll::Ready(Err(not_a_tunnel())),
        }
    }
}

fn not_a_tunnel() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "writes are only valid on a tunnel body",
    )
}

impl<T: Transport> Drop for Body<T> {
    fn drop(&mut self) {
        if self.inner.is_some() {
            trace!("response body dropped before completion, disposing connection");
            self.dispose();
        }
    }
}

impl<T: Transport> fmt::Debug for Body<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("complete", &self.is_complete())
            .finish()
    }
}
