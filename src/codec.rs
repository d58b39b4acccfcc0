use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::Frame;
use crate::parser::{parse_frame_slice, unescape_header_value};

/// Escape a STOMP 1.2 header name or value for wire transmission.
///
/// Backslash, carriage return, line feed and colon are escaped.
fn escape_header(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\r' => result.push_str("\\r"),
            '\n' => result.push_str("\\n"),
            ':' => result.push_str("\\c"),
            _ => result.push(ch),
        }
    }
    result
}

fn invalid_data(what: &str, err: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("{}: {}", what, err))
}

/// Decode one escaped header component into an owned `String`.
fn decode_header_part(raw: &[u8], what: &str) -> Result<String, io::Error> {
    let unescaped = unescape_header_value(raw).map_err(|e| invalid_data(what, e))?;
    String::from_utf8(unescaped).map_err(|e| invalid_data(what, e))
}

/// What travels over the socket: a whole frame or a bare EOL heart-beat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    /// A complete frame
    Frame(Frame),
    /// A single heart-beat pulse (LF or CRLF)
    Heartbeat,
}

/// Framing for STOMP over a byte stream.
///
/// Decoding supports both NUL-terminated frames and frames sized by the
/// `content-length` header. Encoding emits `content-length` whenever the
/// body could not be represented as a NUL-terminated text body.
#[derive(Debug, Default)]
pub struct StompCodec;

impl StompCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for StompCodec {
    type Item = StompItem;
    type Error = io::Error;

    /// Returns `Ok(None)` and leaves `src` untouched when more bytes are
    /// required. Protocol and data errors (invalid UTF-8, malformed frames,
    /// bad escapes) surface as `io::ErrorKind::InvalidData`.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src.chunk() {
            [b'\n', ..] => {
                src.advance(1);
                return Ok(Some(StompItem::Heartbeat));
            }
            [b'\r', b'\n', ..] => {
                src.advance(2);
                return Ok(Some(StompItem::Heartbeat));
            }
            [b'\r'] => return Ok(None),
            _ => {}
        }

        let raw = match parse_frame_slice(src.chunk()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(e) => return Err(invalid_data("parse error", e)),
        };
        src.advance(raw.consumed);

        let command =
            String::from_utf8(raw.command).map_err(|e| invalid_data("invalid utf8 in command", e))?;
        let mut headers = Vec::with_capacity(raw.headers.len());
        for (k, v) in &raw.headers {
            headers.push((
                decode_header_part(k, "header key")?,
                decode_header_part(v, "header value")?,
            ));
        }

        Ok(Some(StompItem::Frame(Frame {
            command,
            headers,
            body: raw.body,
        })))
    }
}

impl Encoder<StompItem> for StompCodec {
    type Error = io::Error;

    fn encode(&mut self, item: StompItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = match item {
            StompItem::Heartbeat => {
                dst.put_u8(b'\n');
                return Ok(());
            }
            StompItem::Frame(frame) => frame,
        };

        dst.extend_from_slice(frame.command.as_bytes());
        dst.put_u8(b'\n');

        let mut headers = frame.headers;
        let has_length = headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("content-length"));
        if !has_length && (frame.body.contains(&0) || std::str::from_utf8(&frame.body).is_err()) {
            headers.push(("content-length".to_string(), frame.body.len().to_string()));
        }

        for (k, v) in headers {
            dst.extend_from_slice(escape_header(&k).as_bytes());
            dst.put_u8(b':');
            dst.extend_from_slice(escape_header(&v).as_bytes());
            dst.put_u8(b'\n');
        }

        dst.put_u8(b'\n');
        dst.extend_from_slice(&frame.body);
        dst.put_u8(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        StompCodec::new()
            .encode(StompItem::Frame(frame), &mut buf)
            .expect("encode failed");
        buf
    }

    #[test]
    fn ack_frame_wire_format() {
        let buf = encode(Frame::new("ACK").header("id", "msg:1"));
        assert_eq!(&buf[..], b"ACK\nid:msg\\c1\n\n\0");
    }

    #[test]
    fn binary_body_gets_content_length() {
        let buf = encode(Frame::new("SEND").set_body(vec![1u8, 0, 2]));
        let text = String::from_utf8_lossy(&buf);
        assert!(text.contains("content-length:3\n"));
    }

    #[test]
    fn crlf_heartbeat_is_one_pulse() {
        let mut codec = StompCodec::new();
        let mut buf = BytesMut::from(&b"\r\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(StompItem::Heartbeat));
        assert!(buf.is_empty());
    }

    #[test]
    fn lone_cr_waits_for_more_bytes() {
        let mut codec = StompCodec::new();
        let mut buf = BytesMut::from(&b"\r"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn decode_unescapes_headers() {
        let mut codec = StompCodec::new();
        let mut buf = BytesMut::from(&b"MESSAGE\nfoo\\cbar:a\\nb\n\n\0"[..]);
        match codec.decode(&mut buf).unwrap() {
            Some(StompItem::Frame(f)) => assert_eq!(f.get_header("foo:bar"), Some("a\nb")),
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn huge_content_length_is_invalid_data() {
        let mut codec = StompCodec::new();
        let mut buf =
            BytesMut::from(&b"MESSAGE\ncontent-length:18446744073709551615\n\nabc\0"[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
