//! HTTP/1.x client protocol engine.
//!
//! Module layout:
//!
//! - `io`: buffered reads and writes over the transport, line scanning,
//!   obsolete-fold repair
//! - `role`: request serialization and response head parsing
//! - `decode`: response body decoders (content-length / chunked / eof /
//!   tunnel)
//! - `encode`: request body encoders (content-length / chunked)
//! - `conn`: the connection state machine driving all of the above

pub(crate) mod conn;
pub(crate) mod decode;
pub(crate) mod encode;
pub(crate) mod io;
pub(crate) mod role;
