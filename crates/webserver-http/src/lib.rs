//! A non-blocking HTTP/1.0 connection engine: an elastic input buffer,
//! a GET-only request-line/header parser, a path-traversal-safe
//! resolver under a configured document root, and a resumable response
//! sender (status line, headers, body from memory or a file via
//! zero-copy `sendfile`).
//!
//! This crate contains no accept loop — see the `webserver` binary for
//! that — only the per-connection state machine driven by a
//! [`webserver_reactor::Reactor`].

mod buffer;
mod connection;
mod error;
mod path;
mod request;
mod response;
mod sendfile;

pub use connection::{Connection, ServerContext};
pub use error::{ParseError, PathError};
pub use request::{Method, Request};
pub use response::{Response, SendOutcome};
