use thiserror::Error;

/// Why a request buffer failed to parse as an HTTP/1.0 request.
///
/// Every variant maps to `400 Bad Request` at the call site; the
/// distinction exists for logging, not control flow (§7: typed errors
/// are never used beyond status selection).
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("request line is missing a trailing CRLF")]
    UnterminatedRequestLine,
    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),
    #[error("malformed header line: {0:?}")]
    MalformedHeaderLine(String),
    #[error("request headers are not terminated by an empty line")]
    UnterminatedHeaders,
}

/// Why a request path could not be resolved to a servable file.
///
/// Maps to `404 Not Found` at the call site (the resolver does not
/// distinguish "doesn't exist" from "escapes the root" in its return
/// status, only in its log message, matching the source's treatment of
/// both as "not found" to the client).
#[derive(Debug, Error)]
pub enum PathError {
    #[error("path does not canonicalize to an existing filesystem entry: {0}")]
    NotFound(std::io::Error),
    #[error("canonicalized path escapes the document root")]
    Escape,
}
