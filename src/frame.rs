use std::fmt;

/// One STOMP frame as exchanged with the broker: a command, headers in wire
/// order and the body bytes. Header values are stored unescaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// STOMP command (e.g. STOMP, SUBSCRIBE, ACK)
    pub command: String,
    /// Headers in the order they were sent or received
    pub headers: Vec<(String, String)>,
    /// Raw body bytes
    pub body: Vec<u8>,
}

impl Frame {
    /// Frame with no headers and an empty body.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Append a header. Repeated keys are kept.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Replace the body.
    pub fn set_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Request a RECEIPT from the broker for this frame (builder style).
    pub fn receipt(self, receipt_id: impl Into<String>) -> Self {
        self.header("receipt", receipt_id)
    }

    /// Value of `key`, matched case-sensitively. When a header repeats, the
    /// first occurrence wins.
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Body decoded as UTF-8 text, replacing invalid sequences.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.command)?;
        for (k, v) in &self.headers {
            // keep credentials out of logs
            if k == "passcode" {
                writeln!(f, "{}: ********", k)?;
            } else {
                writeln!(f, "{}: {}", k, v)?;
            }
        }
        write!(f, "<{} byte body>", self.body.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_repeated_header_wins() {
        let frame = Frame::new("MESSAGE")
            .header("message-id", "first")
            .header("message-id", "second");
        assert_eq!(frame.get_header("message-id"), Some("first"));
        assert_eq!(frame.get_header("missing"), None);
    }

    #[test]
    fn receipt_builder_adds_header() {
        let frame = Frame::new("SUBSCRIBE").receipt("rcpt-7");
        assert_eq!(frame.get_header("receipt"), Some("rcpt-7"));
    }

    #[test]
    fn display_masks_passcode() {
        let frame = Frame::new("STOMP")
            .header("login", "system")
            .header("passcode", "manager");
        let text = format!("{}", frame);
        assert!(text.contains("login: system"));
        assert!(!text.contains("manager"));
        assert!(text.starts_with("STOMP\n"));
        assert!(text.ends_with("<0 byte body>"));
    }

    #[test]
    fn body_text_is_lossy() {
        let frame = Frame::new("MESSAGE").set_body(vec![b'o', b'k', 0xff]);
        assert_eq!(frame.body_text(), "ok\u{fffd}");
    }
}
