//! Seams to the connection pool and cookie storage.
//!
//! The pool itself lives outside this crate: it creates transports, wraps
//! them in [`Connection`](crate::Connection)s, hands them to callers, and
//! decides when to scavenge idle ones. Connections only ever call back
//! through the [`Pool`] trait.

use bytes::Bytes;
use http::header::HeaderValue;
use http::Uri;

use crate::config::Settings;
use crate::proto::h1::conn::Connection;
use crate::rt::Transport;

/// What the pool is connected to, which decides the request target form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolKind {
    /// Requests go directly to the origin; targets use origin-form.
    Origin,
    /// Requests go through a plain HTTP proxy; targets use absolute-form.
    Proxy,
}

/// The connection pool as seen from a connection.
pub trait Pool<T: Transport>: Send + Sync {
    /// Accepts a healthy connection back for reuse.
    fn return_connection(&self, conn: Connection<T>);

    /// Accepts a connection that must not be reused. The pool is expected
    /// to drop it, closing the transport.
    fn invalidate(&self, conn: Connection<T>);

    /// The settings connections operate under.
    fn settings(&self) -> &Settings;

    /// Pre-computed bytes for the `Host` header, if the pool has them.
    fn host_header(&self) -> Option<&Bytes>;

    /// What this pool is connected to.
    fn kind(&self) -> PoolKind;
}

/// Cookie storage consulted when cookies are enabled in
/// [`Settings::cookies`](crate::config::Settings::cookies).
pub trait CookieJar: Send + Sync {
    /// The `Cookie` header value to send for a request to `uri`, if any.
    fn cookie_header(&self, uri: &Uri) -> Option<String>;

    /// Called for each `Set-Cookie` header received in a response.
    fn store(&self, uri: &Uri, set_cookie: &HeaderValue);
}
