use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

use crate::connection::{AckMode, ConnError, Outbound, Subscriptions};
use crate::frame::Frame;
use crate::message::Message;

/// A handle returned from `Connection::subscribe` that packages the
/// subscription id, destination and the receiving side of the subscription.
///
/// Messages are queued without limit until `recv` picks them up, so none are
/// lost while the caller is busy with the previous one.
pub struct Subscription {
    id: String,
    destination: String,
    ack_mode: AckMode,
    receiver: mpsc::UnboundedReceiver<Frame>,
    outbound: Outbound,
    subscriptions: Arc<Mutex<Subscriptions>>,
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        destination: String,
        ack_mode: AckMode,
        receiver: mpsc::UnboundedReceiver<Frame>,
        outbound: Outbound,
        subscriptions: Arc<Mutex<Subscriptions>>,
    ) -> Self {
        Self {
            id,
            destination,
            ack_mode,
            receiver,
            outbound,
            subscriptions,
        }
    }

    /// Returns the local subscription id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the destination this subscription listens to.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    /// Wait for the next message. There is no timeout: this waits until the
    /// broker delivers or the connection goes away (`ConnError::Closed`).
    pub async fn recv(&mut self) -> Result<Message, ConnError> {
        self.receiver
            .recv()
            .await
            .map(Message::new)
            .ok_or(ConnError::Closed)
    }

    /// Acknowledge a message delivered on this subscription.
    pub async fn ack(&self, message: &Message) -> Result<(), ConnError> {
        self.acknowledge("ACK", message).await
    }

    /// Negative-acknowledge a message delivered on this subscription.
    pub async fn nack(&self, message: &Message) -> Result<(), ConnError> {
        self.acknowledge("NACK", message).await
    }

    async fn acknowledge(&self, command: &str, message: &Message) -> Result<(), ConnError> {
        if self.ack_mode == AckMode::Auto {
            return Err(ConnError::Protocol(format!(
                "cannot {} on an auto-ack subscription",
                command
            )));
        }
        let frame = self.outbound.ack_frame(command, message)?;
        self.outbound.send(frame).await
    }

    /// Stop the subscription. Messages already queued locally are discarded.
    pub async fn unsubscribe(self) -> Result<(), ConnError> {
        self.subscriptions.lock().await.remove(&self.id);
        self.outbound
            .send(Frame::new("UNSUBSCRIBE").header("id", &self.id))
            .await
    }
}
