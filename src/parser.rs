//! Slice-based STOMP frame parser.
//!
//! The parser works on whatever bytes are buffered so far and never consumes
//! anything itself: it reports how many bytes a complete frame occupied so
//! the caller (the codec) can advance its buffer.

/// A frame as it appeared on the wire, before UTF-8 decoding and header
/// unescaping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub command: Vec<u8>,
    pub headers: Vec<(Vec<u8>, Vec<u8>)>,
    pub body: Vec<u8>,
    /// Number of input bytes the frame occupied, including the NUL
    /// terminator and an optional trailing EOL.
    pub consumed: usize,
}

/// Extract the `content-length` header value, if present.
///
/// Returns `Err` when the header is present but not a valid unsigned integer.
fn content_length(headers: &[(Vec<u8>, Vec<u8>)]) -> Result<Option<usize>, String> {
    let Some((_, value)) = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(b"content-length"))
    else {
        return Ok(None);
    };
    let text = std::str::from_utf8(value).map_err(|e| format!("content-length not utf8: {}", e))?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("empty content-length".to_string());
    }
    trimmed
        .parse::<usize>()
        .map(Some)
        .map_err(|e| format!("invalid content-length '{}': {}", trimmed, e))
}

/// Read one line starting at `pos`. Returns the line without its LF (and
/// without a trailing CR) plus the position just past the LF.
fn read_line(input: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rel = input[pos..].iter().position(|&b| b == b'\n')?;
    let mut line = &input[pos..pos + rel];
    if let Some((&b'\r', rest)) = line.split_last() {
        line = rest;
    }
    Some((line, pos + rel + 1))
}

/// Skip an optional EOL (LF or CRLF) after the NUL terminator.
fn skip_trailing_eol(input: &[u8], mut pos: usize) -> usize {
    if input.get(pos) == Some(&b'\r') && input.get(pos + 1) == Some(&b'\n') {
        pos += 2;
    } else if input.get(pos) == Some(&b'\n') {
        pos += 1;
    }
    pos
}

/// Parse a single STOMP frame from a raw byte slice.
///
/// Returns `Ok(Some(frame))` when a full frame was present, `Ok(None)` when
/// more bytes are required and `Err` on protocol errors (malformed header
/// line, bad `content-length`, missing NUL after a sized body).
pub fn parse_frame_slice(input: &[u8]) -> Result<Option<RawFrame>, String> {
    let mut pos = 0usize;

    // leading EOLs are heart-beats; the codec reports them individually but
    // tolerate them here as well
    while pos < input.len() && (input[pos] == b'\n' || input[pos] == b'\r') {
        pos += 1;
    }

    let Some((command, next)) = read_line(input, pos) else {
        return Ok(None);
    };
    let command = command.to_vec();
    pos = next;

    let mut headers: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    loop {
        let Some((line, next)) = read_line(input, pos) else {
            return Ok(None);
        };
        pos = next;
        if line.is_empty() {
            break;
        }
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            return Err(format!(
                "malformed header line: {:?}",
                String::from_utf8_lossy(line)
            ));
        };
        headers.push((line[..colon].to_vec(), line[colon + 1..].to_vec()));
    }

    let body = match content_length(&headers)? {
        Some(len) => {
            let Some(end) = pos.checked_add(len).and_then(|end| end.checked_add(1)) else {
                return Err(format!("content-length too large: {}", len));
            };
            if end > input.len() {
                return Ok(None);
            }
            let body = input[pos..pos + len].to_vec();
            pos += len;
            if input[pos] != 0 {
                return Err("missing NUL terminator after content-length body".to_string());
            }
            pos += 1;
            body
        }
        None => {
            let Some(nul) = input[pos..].iter().position(|&b| b == 0) else {
                return Ok(None);
            };
            let body = input[pos..pos + nul].to_vec();
            pos += nul + 1;
            body
        }
    };

    Ok(Some(RawFrame {
        command,
        headers,
        body,
        consumed: skip_trailing_eol(input, pos),
    }))
}

/// Undo STOMP 1.2 header escaping (`\\`, `\r`, `\n`, `\c`).
///
/// Any other escape sequence, or a trailing lone backslash, is an error.
pub fn unescape_header_value(input: &[u8]) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(input.len());
    let mut bytes = input.iter();
    while let Some(&b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(b'\\') => out.push(b'\\'),
            Some(b'r') => out.push(b'\r'),
            Some(b'n') => out.push(b'\n'),
            Some(b'c') => out.push(b':'),
            Some(&other) => return Err(format!("undefined escape sequence '\\{}'", other as char)),
            None => return Err("dangling backslash at end of header".to_string()),
        }
    }
    Ok(out)
}
