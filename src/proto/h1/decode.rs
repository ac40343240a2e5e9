use std::task::{Context, Poll};

use futures_core::ready;
use http::HeaderMap;
use tokio::io::ReadBuf;

use crate::body::BodyFraming;
use crate::error::Parse;
use crate::proto::h1::io::Buffered;
use crate::proto::h1::role;
use crate::rt::Transport;

/// Cap on one chunk size line, extensions included.
pub(crate) const MAX_CHUNK_LINE_SIZE: usize = 16_384;

/// Decodes a response body out of the buffered transport, one framing per
/// response.
pub(crate) struct Decoder {
    kind: Kind,
}

enum Kind {
    /// Reads exactly this many more bytes; a short read is an error.
    Length(u64),
    Chunked(Chunked),
    /// Reads until the transport closes; EOF is success.
    UntilClose { eof: bool },
    /// Opaque bidirectional stream; ends only on close.
    Tunnel { eof: bool },
}

struct Chunked {
    state: ChunkedState,
    remaining: u64,
    saw_size_digit: bool,
    line_len: usize,
    trailer_budget: usize,
    trailers: HeaderMap,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum ChunkedState {
    Size,
    SizeLws,
    Extension,
    SizeLf,
    Body,
    BodyCr,
    BodyLf,
    Trailers,
    Done,
}

impl Decoder {
    pub(crate) fn for_framing(framing: BodyFraming, trailer_budget: usize) -> Decoder {
        let kind = match framing {
            BodyFraming::CHUNKED => Kind::Chunked(Chunked {
                state: ChunkedState::Size,
                remaining: 0,
                saw_size_digit: false,
                line_len: 0,
                trailer_budget,
                trailers: HeaderMap::new(),
            }),
            BodyFraming::CLOSE_DELIMITED => Kind::UntilClose { eof: false },
            BodyFraming::TUNNEL => Kind::Tunnel { eof: false },
            exact => {
                debug_assert!(exact.is_exact());
                Kind::Length(exact.danger_len())
            }
        };
        Decoder { kind }
    }

    pub(crate) fn is_done(&self) -> bool {
        match self.kind {
            Kind::Length(remaining) => remaining == 0,
            Kind::Chunked(ref chunked) => chunked.state == ChunkedState::Done,
            Kind::UntilClose { eof } | Kind::Tunnel { eof } => eof,
        }
    }

    /// Whether reaching this body's end makes the connection unusable.
    pub(crate) fn requires_close(&self) -> bool {
        matches!(self.kind, Kind::UntilClose { .. } | Kind::Tunnel { .. })
    }

    pub(crate) fn is_tunnel(&self) -> bool {
        matches!(self.kind, Kind::Tunnel { .. })
    }

    pub(crate) fn take_trailers(&mut self) -> Option<HeaderMap> {
        match self.kind {
            Kind::Chunked(ref mut chunked)
                if chunked.state == ChunkedState::Done && !chunked.trailers.is_empty() =>
            {
                Some(std::mem::take(&mut chunked.trailers))
            }
            _ => None,
        }
    }

    /// Decodes some body bytes into `dst`. `Ok(0)` with [`is_done`]
    /// means the body is over.
    ///
    /// [`is_done`]: Decoder::is_done
    pub(crate) fn poll_decode<T: Transport>(
        &mut self,
        io: &mut Buffered<T>,
        cx: &mut Context<'_>,
        dst: &mut ReadBuf<'_>,
    ) -> Poll<crate::Result<usize>> {
        if dst.remaining() == 0 {
            return Poll::Ready(Ok(0));
        }
        match self.kind {
            Kind::Length(ref mut remaining) => {
                if *remaining == 0 {
                    return Poll::Ready(Ok(0));
                }
                let n = ready!(read_limited(io, cx, dst, *remaining))
                    .map_err(crate::Error::new_io)?;
                if n == 0 {
                    return Poll::Ready(Err(crate::Error::new_incomplete()));
                }
                *remaining -= n as u64;
                Poll::Ready(Ok(n))
            }
            Kind::UntilClose { ref mut eof } | Kind::Tunnel { ref mut eof } => {
                if *eof {
                    return Poll::Ready(Ok(0));
                }
                let n = ready!(io.poll_read_into(cx, dst)).map_err(crate::Error::new_io)?;
                if n == 0 {
                    *eof = true;
                }
                Poll::Ready(Ok(n))
            }
            Kind::Chunked(ref mut chunked) => chunked.poll_decode(io, cx, dst),
        }
    }
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            Kind::Length(n) => f.debug_tuple("Length").field(&n).finish(),
            Kind::Chunked(ref c) => f.debug_tuple("Chunked").field(&c.state).finish(),
            Kind::UntilClose { eof } => f.debug_tuple("UntilClose").field(&eof).finish(),
            Kind::Tunnel { eof } => f.debug_tuple("Tunnel").field(&eof).finish(),
        }
    }
}

impl Chunked {
    fn poll_decode<T: Transport>(
        &mut self,
        io: &mut Buffered<T>,
        cx: &mut Context<'_>,
        dst: &mut ReadBuf<'_>,
    ) -> Poll<crate::Result<usize>> {
        loop {
            match self.state {
                ChunkedState::Size => {
                    let b = ready!(self.next_line_byte(io, cx))?;
                    match b {
                        b'0'..=b'9' => self.push_size_digit(u64::from(b - b'0'))?,
                        b'a'..=b'f' => self.push_size_digit(u64::from(b - b'a' + 10))?,
                        b'A'..=b'F' => self.push_size_digit(u64::from(b - b'A' + 10))?,
                        b'\t' | b' ' if self.saw_size_digit => self.state = ChunkedState::SizeLws,
                        b';' if self.saw_size_digit => self.state = ChunkedState::Extension,
                        b'\r' if self.saw_size_digit => self.state = ChunkedState::SizeLf,
                        _ => return Poll::Ready(Err(chunk_err())),
                    }
                }
                ChunkedState::SizeLws => {
                    // Linear whitespace may follow the size, but no more
                    // digits can come.
                    match ready!(self.next_line_byte(io, cx))? {
                        b'\t' | b' ' => {}
                        b';' => self.state = ChunkedState::Extension,
                        b'\r' => self.state = ChunkedState::SizeLf,
                        _ => return Poll::Ready(Err(chunk_err())),
                    }
                }
                ChunkedState::Extension => {
                    // Extensions are discarded; they end at the next CRLF.
                    // A plain LF inside one is rejected rather than let a
                    // sloppy peer desynchronize the framing.
                    match ready!(self.next_line_byte(io, cx))? {
                        b'\r' => self.state = ChunkedState::SizeLf,
                        b'\n' => return Poll::Ready(Err(chunk_err())),
                        _ => {}
                    }
                }
                ChunkedState::SizeLf => match ready!(self.next_line_byte(io, cx))? {
                    b'\n' => {
                        self.line_len = 0;
                        self.saw_size_digit = false;
                        self.state = if self.remaining == 0 {
                            ChunkedState::Trailers
                        } else {
                            ChunkedState::Body
                        };
                    }
                    _ => return Poll::Ready(Err(chunk_err())),
                },
                ChunkedState::Body => {
                    let n = ready!(read_limited(io, cx, dst, self.remaining))
                        .map_err(crate::Error::new_io)?;
                    if n == 0 {
                        return Poll::Ready(Err(crate::Error::new_incomplete()));
                    }
                    self.remaining -= n as u64;
                    if self.remaining == 0 {
                        self.state = ChunkedState::BodyCr;
                    }
                    return Poll::Ready(Ok(n));
                }
                ChunkedState::BodyCr => match ready!(self.next_byte(io, cx))? {
                    b'\r' => self.state = ChunkedState::BodyLf,
                    _ => return Poll::Ready(Err(chunk_err())),
                },
                ChunkedState::BodyLf => match ready!(self.next_byte(io, cx))? {
                    b'\n' => self.state = ChunkedState::Size,
                    _ => return Poll::Ready(Err(chunk_err())),
                },
                ChunkedState::Trailers => {
                    ready!(role::poll_read_header_block(
                        io,
                        cx,
                        &mut self.trailers,
                        &mut self.trailer_budget,
                        true,
                    ))?;
                    self.state = ChunkedState::Done;
                    return Poll::Ready(Ok(0));
                }
                ChunkedState::Done => return Poll::Ready(Ok(0)),
            }
        }
    }

    fn push_size_digit(&mut self, digit: u64) -> crate::Result<()> {
        self.saw_size_digit = true;
        self.remaining = self
            .remaining
            .checked_mul(16)
            .and_then(|v| v.checked_add(digit))
            .ok_or_else(chunk_err)?;
        Ok(())
    }

    /// One byte of the chunk size line, charged against the line cap.
    fn next_line_byte<T: Transport>(
        &mut self,
        io: &mut Buffered<T>,
        cx: &mut Context<'_>,
    ) -> Poll<crate::Result<u8>> {
        self.line_len += 1;
        if self.line_len > MAX_CHUNK_LINE_SIZE {
            return Poll::Ready(Err(chunk_err()));
        }
        self.next_byte(io, cx)
    }

    fn next_byte<T: Transport>(
        &mut self,
        io: &mut Buffered<T>,
        cx: &mut Context<'_>,
    ) -> Poll<crate::Result<u8>> {
        loop {
            if let Some(b) = io.pop_byte() {
                return Poll::Ready(Ok(b));
            }
            match ready!(io.poll_fill(cx)) {
                Ok(0) => return Poll::Ready(Err(crate::Error::new_incomplete())),
                Ok(_) => {}
                Err(e) => return Poll::Ready(Err(crate::Error::new_io(e))),
            }
        }
    }
}

fn chunk_err() -> crate::Error {
    crate::Error::new_parse(Parse::ChunkLine)
}

/// Reads at most `limit` bytes into `dst`, through the buffer or straight
/// from the transport.
fn read_limited<T: Transport>(
    io: &mut Buffered<T>,
    cx: &mut Context<'_>,
    dst: &mut ReadBuf<'_>,
    limit: u64,
) -> Poll<std::io::Result<usize>> {
    let limit = std::cmp::min(limit, dst.remaining() as u64) as usize;
    let mut sub = dst.take(limit);
    ready!(io.poll_read_into(cx, &mut sub))?;
    let n = sub.filled().len();
    unsafe { dst.assume_init(n) };
    dst.advance(n);
    Poll::Ready(Ok(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::poll_fn;
    use std::io::Cursor;

    fn io_for(bytes: &[u8]) -> Buffered<Cursor<Vec<u8>>> {
        Buffered::new(Cursor::new(bytes.to_vec()))
    }

    async fn read_all<T: Transport>(
        decoder: &mut Decoder,
        io: &mut Buffered<T>,
    ) -> crate::Result<Vec<u8>> {
        let mut out = Vec::new();
        // Deliberately tiny so bodies cross read boundaries.
        let mut scratch = [0u8; 7];
        loop {
            let mut dst = ReadBuf::new(&mut scratch);
            let n = poll_fn(|cx| decoder.poll_decode(io, cx, &mut dst)).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(dst.filled());
        }
    }

    #[tokio::test]
    async fn length_reads_exactly() {
        let mut io = io_for(b"hello, worldEXTRA");
        let mut decoder = Decoder::for_framing(BodyFraming::new(12), 1024);
        let body = read_all(&mut decoder, &mut io).await.unwrap();
        assert_eq!(body, b"hello, world");
        assert!(decoder.is_done());
        assert!(!decoder.requires_close());
        // Bytes past the message are left alone.
        assert_eq!(io.read_buf(), b"EXTRA");
    }

    #[tokio::test]
    async fn length_short_read_is_incomplete() {
        let mut io = io_for(b"hel");
        let mut decoder = Decoder::for_framing(BodyFraming::new(12), 1024);
        let err = read_all(&mut decoder, &mut io).await.unwrap_err();
        assert!(err.is_incomplete_message());
    }

    #[tokio::test]
    async fn empty_is_immediately_done() {
        let mut io = io_for(b"never touched");
        let mut decoder = Decoder::for_framing(BodyFraming::ZERO, 1024);
        assert!(decoder.is_done());
        let body = read_all(&mut decoder, &mut io).await.unwrap();
        assert!(body.is_empty());
        assert_eq!(io.read_buf(), b"");
    }

    #[tokio::test]
    async fn chunked_basic() {
        let mut io = io_for(b"5\r\nhello\r\n0\r\n\r\n");
        let mut decoder = Decoder::for_framing(BodyFraming::CHUNKED, 1024);
        let body = read_all(&mut decoder, &mut io).await.unwrap();
        assert_eq!(body, b"hello");
        assert!(decoder.is_done());
        assert!(decoder.take_trailers().is_none());
    }

    #[tokio::test]
    async fn chunked_multiple_chunks_hex_sizes() {
        let mut io = io_for(b"4\r\nwiki\r\nA\r\npedia in \r\nB\r\nchunks yay!\r\n0\r\n\r\n");
        let mut decoder = Decoder::for_framing(BodyFraming::CHUNKED, 1024);
        let body = read_all(&mut decoder, &mut io).await.unwrap();
        assert_eq!(body, b"wikipedia in chunks yay!");
    }

    #[tokio::test]
    async fn chunked_extension_discarded() {
        let mut io = io_for(b"5;ext=1\r\nhello\r\n0\r\n\r\n");
        let mut decoder = Decoder::for_framing(BodyFraming::CHUNKED, 1024);
        let body = read_all(&mut decoder, &mut io).await.unwrap();
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn chunked_size_lws_tolerated() {
        let mut io = io_for(b"5  \r\nhello\r\n0\r\n\r\n");
        let mut decoder = Decoder::for_framing(BodyFraming::CHUNKED, 1024);
        let body = read_all(&mut decoder, &mut io).await.unwrap();
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn chunked_trailers_collected_and_filtered() {
        let mut io =
            io_for(b"5\r\nhello\r\n0\r\nX-Checksum: ok\r\nContent-Length: 99\r\n\r\nrest");
        let mut decoder = Decoder::for_framing(BodyFraming::CHUNKED, 1024);
        let body = read_all(&mut decoder, &mut io).await.unwrap();
        assert_eq!(body, b"hello");
        let trailers = decoder.take_trailers().unwrap();
        assert_eq!(trailers.get("x-checksum").unwrap(), "ok");
        assert!(trailers.get("content-length").is_none());
        assert_eq!(io.read_buf(), b"rest");
    }

    #[tokio::test]
    async fn chunked_missing_data_crlf_rejected() {
        let mut io = io_for(b"5\r\nhelloX0\r\n\r\n");
        let mut decoder = Decoder::for_framing(BodyFraming::CHUNKED, 1024);
        let err = read_all(&mut decoder, &mut io).await.unwrap_err();
        assert!(err.is_parse());
    }

    #[tokio::test]
    async fn chunked_requires_a_digit() {
        let mut io = io_for(b"\r\nhello\r\n0\r\n\r\n");
        let mut decoder = Decoder::for_framing(BodyFraming::CHUNKED, 1024);
        assert!(read_all(&mut decoder, &mut io).await.is_err());
    }

    #[tokio::test]
    async fn chunked_size_overflow_rejected() {
        let mut io = io_for(b"fffffffffffffffff\r\nhello\r\n0\r\n\r\n");
        let mut decoder = Decoder::for_framing(BodyFraming::CHUNKED, 1024);
        assert!(read_all(&mut decoder, &mut io).await.is_err());
    }

    #[tokio::test]
    async fn chunked_line_cap_enforced() {
        let mut line = b"5;".to_vec();
        line.extend(std::iter::repeat(b'x').take(MAX_CHUNK_LINE_SIZE + 8));
        line.extend_from_slice(b"\r\nhello\r\n0\r\n\r\n");
        let mut io = io_for(&line);
        let mut decoder = Decoder::for_framing(BodyFraming::CHUNKED, 1024);
        let err = read_all(&mut decoder, &mut io).await.unwrap_err();
        assert!(err.is_parse());
        assert!(!err.is_parse_too_large());
    }

    #[tokio::test]
    async fn chunked_across_tiny_buffer() {
        let mut io = Buffered::with_capacity(
            Cursor::new(b"10\r\n0123456789abcdef\r\n0\r\n\r\n".to_vec()),
            10,
        );
        let mut decoder = Decoder::for_framing(BodyFraming::CHUNKED, 1024);
        let body = read_all(&mut decoder, &mut io).await.unwrap();
        assert_eq!(body, b"0123456789abcdef");
    }

    #[tokio::test]
    async fn until_close_eof_is_success() {
        let mut io = io_for(b"whatever the server sends");
        let mut decoder = Decoder::for_framing(BodyFraming::CLOSE_DELIMITED, 1024);
        let body = read_all(&mut decoder, &mut io).await.unwrap();
        assert_eq!(body, b"whatever the server sends");
        assert!(decoder.is_done());
        assert!(decoder.requires_close());
    }

    #[tokio::test]
    async fn tunnel_reads_until_close() {
        let mut io = io_for(b"opaque");
        let mut decoder = Decoder::for_framing(BodyFraming::TUNNEL, 1024);
        assert!(decoder.is_tunnel());
        let body = read_all(&mut decoder, &mut io).await.unwrap();
        assert_eq!(body, b"opaque");
        assert!(decoder.requires_close());
    }
}
