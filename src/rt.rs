//! Runtime seam.
//!
//! A connection is generic over any byte-oriented transport: TCP, TLS over
//! TCP, an HTTP-CONNECT tunnel, or an in-memory stream in tests. The only
//! requirement is tokio's async I/O traits.

use tokio::io::{AsyncRead, AsyncWrite};

/// An opaque byte-oriented transport.
///
/// Blanket-implemented for everything that satisfies the bounds; there is
/// nothing to implement manually.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}
