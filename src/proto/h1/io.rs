use std::future::poll_fn;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_core::ready;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};

use crate::config::ValueEncoding;
use crate::rt::Transport;

/// The initial size of the read and write buffers. Either may be replaced
/// during a request: the read buffer doubles when a message head outgrows
/// it, and payloads at least this large bypass the write buffer entirely.
pub(crate) const INITIAL_BUF_SIZE: usize = 4096;

/// Result of probing an idle transport without blocking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Probe {
    /// Nothing to read; the peer is quiet and the connection looks alive.
    Healthy,
    /// The peer closed the connection.
    Closed,
    /// Bytes arrived while no response was expected.
    UnexpectedData,
    /// The transport reported an error.
    Failed,
}

/// Buffered reader/writer around the transport.
///
/// Unread response bytes live at the front of `read_buf`; consuming
/// advances the buffer, and refills land behind whatever is left, so the
/// residual is implicitly back at offset zero before each transport read.
pub(crate) struct Buffered<T> {
    io: T,
    read_buf: BytesMut,
    /// How far `poll_read_line` has already scanned for a LF, so partial
    /// lines are not rescanned on every fill.
    scanned: usize,
    /// Wire bytes erased from the buffer by fold repair on the line
    /// currently being scanned.
    fold_debt: usize,
    write_buf: BytesMut,
    buf_size: usize,
}

impl<T: Transport> Buffered<T> {
    pub(crate) fn new(io: T) -> Buffered<T> {
        Buffered::with_capacity(io, INITIAL_BUF_SIZE)
    }

    /// A buffer-size knob so tests can force tiny buffers and exercise the
    /// fill/flush split paths. Not a production configuration.
    pub(crate) fn with_capacity(io: T, buf_size: usize) -> Buffered<T> {
        debug_assert!(buf_size > 0);
        Buffered {
            io,
            read_buf: BytesMut::with_capacity(buf_size),
            scanned: 0,
            fold_debt: 0,
            write_buf: BytesMut::with_capacity(buf_size),
            buf_size,
        }
    }

    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.io
    }

    pub(crate) fn read_buf(&self) -> &[u8] {
        &self.read_buf
    }

    pub(crate) fn read_remaining(&self) -> usize {
        self.read_buf.len()
    }

    #[cfg(test)]
    pub(crate) fn read_capacity(&self) -> usize {
        self.read_buf.capacity()
    }

    pub(crate) fn write_buffered(&self) -> usize {
        self.write_buf.len()
    }

    // ===== Read side =====

    /// Reads more bytes from the transport into the read buffer, doubling
    /// the buffer when it is full. Growth is unbounded here; the line caps
    /// bound it from above.
    pub(crate) fn poll_fill(&mut self, cx: &mut Context<'_>) -> Poll<std::io::Result<usize>> {
        if self.read_buf.capacity() - self.read_buf.len() == 0 {
            let grow = self.read_buf.capacity().max(self.buf_size);
            self.read_buf.reserve(grow);
        }
        tokio_util::io::poll_read_buf(Pin::new(&mut self.io), cx, &mut self.read_buf)
    }

    /// Fills the read buffer; a zero-byte result is the caller's problem.
    /// Callers mid-message map it to the incomplete-message error.
    pub(crate) async fn initial_fill(&mut self) -> crate::Result<usize> {
        poll_fn(|cx| self.poll_fill(cx))
            .await
            .map_err(crate::Error::new_io)
    }

    /// Reads one logical line, stripping the trailing LF and optional CR.
    ///
    /// With `allow_folded`, a non-empty line whose LF is followed by SP or
    /// HT is an RFC 7230 obs-fold continuation: the CRLF and that one
    /// whitespace byte are rewritten in place to a single SP and scanning
    /// continues. Returns the line and the number of wire bytes consumed.
    ///
    /// Scanning past `max` wire bytes without a complete line fails with
    /// the headers-too-large error.
    pub(crate) fn poll_read_line(
        &mut self,
        cx: &mut Context<'_>,
        max: usize,
        allow_folded: bool,
    ) -> Poll<crate::Result<(Bytes, usize)>> {
        loop {
            let lf = self.read_buf[self.scanned..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|rel| self.scanned + rel);

            let lf = match lf {
                Some(lf) => lf,
                None => {
                    self.scanned = self.read_buf.len();
                    if self.scanned + self.fold_debt > max {
                        return Poll::Ready(Err(too_large()));
                    }
                    match ready!(self.poll_fill(cx)) {
                        Ok(0) => return Poll::Ready(Err(crate::Error::new_incomplete())),
                        Ok(_) => continue,
                        Err(e) => return Poll::Ready(Err(crate::Error::new_io(e))),
                    }
                }
            };

            let line_is_empty = lf == 0 || (lf == 1 && self.read_buf[0] == b'\r');

            if allow_folded && !line_is_empty {
                if lf + 1 == self.read_buf.len() {
                    // Can't tell yet whether the next line continues this
                    // one; peek one more byte. EOF means no continuation.
                    self.scanned = lf;
                    match ready!(self.poll_fill(cx)) {
                        Ok(0) => {}
                        Ok(_) => continue,
                        Err(e) => return Poll::Ready(Err(crate::Error::new_io(e))),
                    }
                } else if matches!(self.read_buf[lf + 1], b' ' | b'\t') {
                    let cr_start = if self.read_buf[lf - 1] == b'\r' {
                        lf - 1
                    } else {
                        lf
                    };
                    let ws_end = lf + 2;
                    let tail = self.read_buf.split_off(ws_end);
                    self.read_buf.truncate(cr_start);
                    self.read_buf.put_u8(b' ');
                    self.read_buf.unsplit(tail);
                    self.fold_debt += ws_end - cr_start - 1;
                    self.scanned = cr_start + 1;
                    continue;
                }
            }

            let mut line = self.read_buf.split_to(lf + 1);
            self.scanned = 0;
            let consumed = line.len() + std::mem::take(&mut self.fold_debt);
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            if consumed > max {
                return Poll::Ready(Err(too_large()));
            }
            return Poll::Ready(Ok((line.freeze(), consumed)));
        }
    }

    pub(crate) async fn read_line(
        &mut self,
        max: usize,
        allow_folded: bool,
    ) -> crate::Result<(Bytes, usize)> {
        poll_fn(|cx| self.poll_read_line(cx, max, allow_folded)).await
    }

    /// Pops a single buffered byte, if any.
    pub(crate) fn pop_byte(&mut self) -> Option<u8> {
        debug_assert_eq!(self.scanned, 0, "pop_byte during a line scan");
        if self.read_buf.is_empty() {
            None
        } else {
            let b = self.read_buf[0];
            self.read_buf.advance(1);
            Some(b)
        }
    }

    /// Copies buffered bytes into `dst`, or reads from the transport
    /// directly when the buffer is empty. Large reads therefore never pass
    /// through (or grow) the read buffer.
    pub(crate) fn poll_read_into(
        &mut self,
        cx: &mut Context<'_>,
        dst: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<usize>> {
        debug_assert_eq!(self.scanned, 0, "read_into during a line scan");

        if !self.read_buf.is_empty() {
            let n = std::cmp::min(self.read_buf.len(), dst.remaining());
            dst.put_slice(&self.read_buf[..n]);
            self.read_buf.advance(n);
            return Poll::Ready(Ok(n));
        }

        let before = dst.filled().len();
        ready!(Pin::new(&mut self.io).poll_read(cx, dst))?;
        Poll::Ready(Ok(dst.filled().len() - before))
    }

    // ===== Write side =====

    fn write_spare(&self) -> usize {
        self.buf_size.saturating_sub(self.write_buf.len())
    }

    pub(crate) async fn write_byte(&mut self, b: u8) -> crate::Result<()> {
        if self.write_spare() == 0 {
            self.flush().await?;
        }
        self.write_buf.put_u8(b);
        Ok(())
    }

    pub(crate) async fn write_two_bytes(&mut self, b1: u8, b2: u8) -> crate::Result<()> {
        if self.write_spare() < 2 {
            self.flush().await?;
        }
        self.write_buf.put_u8(b1);
        self.write_buf.put_u8(b2);
        Ok(())
    }

    pub(crate) async fn write_crlf(&mut self) -> crate::Result<()> {
        self.write_two_bytes(b'\r', b'\n').await
    }

    /// Appends to the write buffer if the payload fits; otherwise flushes
    /// and then either writes straight through (payloads at least one
    /// buffer large) or starts over in the emptied buffer.
    pub(crate) async fn write_bytes(&mut self, src: &[u8]) -> crate::Result<()> {
        if src.len() <= self.write_spare() {
            self.write_buf.extend_from_slice(src);
            return Ok(());
        }

        self.flush().await?;

        if src.len() >= self.buf_size {
            self.io
                .write_all(src)
                .await
                .map_err(crate::Error::new_io)?;
        } else {
            self.write_buf.extend_from_slice(src);
        }
        Ok(())
    }

    pub(crate) async fn write_ascii(&mut self, s: &str) -> crate::Result<()> {
        self.write_ascii_bytes(s.as_bytes()).await
    }

    pub(crate) async fn write_ascii_bytes(&mut self, src: &[u8]) -> crate::Result<()> {
        if !src.is_ascii() {
            return Err(crate::Error::new_user(crate::error::User::NonAsciiRequest));
        }
        self.write_bytes(src).await
    }

    /// Writes a string under the given header-value encoding. `Ascii`
    /// rejects any code unit at or above 0x80.
    pub(crate) async fn write_str_encoded(
        &mut self,
        s: &str,
        encoding: ValueEncoding,
    ) -> crate::Result<()> {
        match encoding {
            ValueEncoding::Ascii => self.write_ascii(s).await,
            ValueEncoding::Utf8 => self.write_bytes(s.as_bytes()).await,
            ValueEncoding::Latin1 => {
                let mut encoded = Vec::with_capacity(s.len());
                for ch in s.chars() {
                    let cp = ch as u32;
                    if cp > 0xFF {
                        return Err(crate::Error::new_user(crate::error::User::NonAsciiRequest));
                    }
                    encoded.push(cp as u8);
                }
                self.write_bytes(&encoded).await
            }
        }
    }

    pub(crate) async fn write_decimal(&mut self, value: u64) -> crate::Result<()> {
        let mut buf = itoa::Buffer::new();
        let s = buf.format(value);
        self.write_bytes(s.as_bytes()).await
    }

    pub(crate) async fn write_hex(&mut self, value: u64) -> crate::Result<()> {
        const DIGITS: &[u8; 16] = b"0123456789abcdef";
        let mut buf = [0u8; 16];
        let mut pos = buf.len();
        let mut v = value;
        loop {
            pos -= 1;
            buf[pos] = DIGITS[(v & 0xF) as usize];
            v >>= 4;
            if v == 0 {
                break;
            }
        }
        self.write_bytes(&buf[pos..]).await
    }

    /// Writes out everything buffered and flushes the transport.
    pub(crate) async fn flush(&mut self) -> crate::Result<()> {
        if !self.write_buf.is_empty() {
            self.io
                .write_all(&self.write_buf)
                .await
                .map_err(crate::Error::new_io)?;
            self.write_buf.clear();
        }
        self.io.flush().await.map_err(crate::Error::new_io)
    }

    // ===== Liveness =====

    /// Polls for readability once with a no-op waker. An idle peer leaves
    /// the poll pending; anything that completes immediately (bytes, EOF,
    /// or an error) means the connection cannot carry a new request.
    pub(crate) fn probe_idle(&mut self) -> Probe {
        let waker = futures_util::task::noop_waker_ref();
        let mut cx = Context::from_waker(waker);
        match self.poll_fill(&mut cx) {
            Poll::Pending => Probe::Healthy,
            Poll::Ready(Ok(0)) => Probe::Closed,
            Poll::Ready(Ok(_)) => Probe::UnexpectedData,
            Poll::Ready(Err(_)) => Probe::Failed,
        }
    }
}

fn too_large() -> crate::Error {
    crate::Error::new_parse(crate::error::Parse::TooLarge)
}

impl<T> std::fmt::Debug for Buffered<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffered")
            .field("read_buf", &self.read_buf.len())
            .field("write_buf", &self.write_buf.len())
            .finish()
    }
}
