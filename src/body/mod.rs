//! Request and response bodies.
//!
//! A response [`Body`] is a cursor over the connection it arrived on: it
//! reads bytes according to the response's framing and, once the framing
//! says the message is over, settles the connection's fate (back to the
//! pool, or disposed). A [`RequestBody`] is the byte source for an outgoing
//! request, with an optionally known length.

pub use self::incoming::Body;
pub use self::outgoing::RequestBody;

pub(crate) use self::length::BodyFraming;
pub(crate) use self::outgoing::Kind as OutgoingKind;

mod incoming;
mod length;
mod outgoing;
