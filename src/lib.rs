#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(test, deny(rust_2018_idioms))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # tether
//!
//! An HTTP/1.0 and HTTP/1.1 **client connection engine**: the state
//! machine, buffered I/O discipline, and request/response protocol core
//! that sits on top of an opaque byte-oriented transport (TCP, TLS, an
//! HTTP-CONNECT tunnel, an in-memory pipe) and carries request–response
//! exchanges for a connection pool that lives outside this crate.
//!
//! ## What it does
//!
//! - Serializes request heads, synthesizing `Host`, `Content-Length: 0`
//!   for bodyless body-mandating methods, and chunked transfer coding for
//!   bodies of unknown length.
//! - Interleaves request-body transmission with `Expect: 100-continue`
//!   negotiation behind a set-once gate and a timer.
//! - Parses status lines, informational responses, header blocks
//!   (tolerating obsolete line folding), and chunked framing with
//!   trailers.
//! - Hands the application a typed body stream — empty, content-length,
//!   chunked, read-until-close, or raw tunnel — that returns the
//!   connection to the pool when it completes.
//! - Detects server-initiated close on idle connections so the pool can
//!   scavenge safely.
//!
//! ## What it leaves to others
//!
//! The pool, DNS, TLS, proxy handshakes, cookies storage, redirects,
//! retries and caching belong to the layers around this crate; the seams
//! they plug into are [`pool::Pool`], [`pool::CookieJar`] and
//! [`rt::Transport`].

#[doc(hidden)]
pub use http;

#[macro_use]
mod trace;

pub mod body;
mod common;
/// Connection settings.
pub mod config;
mod error;
/// HTTP extensions.
pub mod ext;
mod headers;
/// Pool and cookie seams.
pub mod pool;
mod proto;
/// Runtime seam.
pub mod rt;

pub use crate::body::{Body, RequestBody};
pub use crate::config::Settings;
pub use crate::error::{Error, Result};
pub use crate::proto::h1::conn::Connection;
