use indexmap::IndexMap;

use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Other(String),
}

/// A parsed HTTP/1.0 request. Only the request line and headers are
/// modeled — GET carries no body, and nothing beyond GET is handled
/// beyond recognizing the method name for the `501` response.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub headers: IndexMap<String, String>,
}

/// Scans for the first `CRLFCRLF`, the point at which a full request
/// (request line plus headers) has arrived. `None` means the input pump
/// must keep reading; `Some(n)` is the byte offset just past the blank
/// line terminating the header block.
pub fn headers_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Parses a complete `buf` (as identified by `headers_terminator`) into
/// a request line plus an ordered header map. Duplicate header names
/// overwrite the stored value in place rather than moving to the end,
/// matching an ordered-map `set` (§4.D).
pub fn parse(buf: &[u8]) -> Result<Request, ParseError> {
    let text = std::str::from_utf8(buf)
        .map_err(|_| ParseError::MalformedRequestLine(String::from_utf8_lossy(buf).into_owned()))?;

    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or(ParseError::UnterminatedRequestLine)?;

    let mut parts = request_line.splitn(3, ' ');
    let (method_str, path, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(p), Some(v)) if !m.is_empty() && !p.is_empty() => (m, p, v),
        _ => return Err(ParseError::MalformedRequestLine(request_line.to_string())),
    };
    if !version.starts_with("HTTP/1.") {
        return Err(ParseError::MalformedRequestLine(request_line.to_string()));
    }

    let method = if method_str == "GET" { Method::Get } else { Method::Other(method_str.to_string()) };

    let mut headers = IndexMap::new();
    let mut terminated = false;
    for line in lines {
        if line.is_empty() {
            terminated = true;
            break;
        }
        let (name, value) =
            line.split_once(':').ok_or_else(|| ParseError::MalformedHeaderLine(line.to_string()))?;
        headers.insert(name.trim().to_string(), value.trim().to_string());
    }

    if !terminated {
        return Err(ParseError::UnterminatedHeaders);
    }

    Ok(Request { method, path: path.to_string(), headers })
}
