use crate::frame::Frame;

/// A MESSAGE frame delivered on a subscription.
///
/// The frame is kept intact; accessors expose the headers the worker cares
/// about. A `Message` is never mutated after delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    frame: Frame,
}

impl Message {
    pub fn new(frame: Frame) -> Self {
        Self { frame }
    }

    /// The `message-id` header, if the broker sent one.
    pub fn id(&self) -> Option<&str> {
        self.frame.get_header("message-id")
    }

    /// The `ack` header a STOMP 1.2 broker attaches for client ack modes.
    pub fn ack_id(&self) -> Option<&str> {
        self.frame.get_header("ack")
    }

    /// The local subscription id this message was delivered under.
    pub fn subscription(&self) -> Option<&str> {
        self.frame.get_header("subscription")
    }

    pub fn destination(&self) -> Option<&str> {
        self.frame.get_header("destination")
    }

    pub fn body(&self) -> &[u8] {
        &self.frame.body
    }

    /// Payload decoded as text (lossy UTF-8).
    pub fn body_text(&self) -> String {
        self.frame.body_text()
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        Self::new(frame)
    }
}
