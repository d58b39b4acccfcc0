//! The bounded receive, handle, acknowledge loop.
//!
//! `run` owns the whole session: validate, connect, subscribe, consume,
//! unsubscribe, disconnect. `consume` is the loop itself and only needs a
//! `MessageSource`, which keeps it independent of the network.

use std::time::Duration;
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::connection::{AckMode, ConnError, Connection};
use crate::error::WorkerError;
use crate::handler::MessageHandler;
use crate::message::Message;
use crate::subscription::Subscription;

/// Where the loop gets messages from and reports outcomes to.
#[allow(async_fn_in_trait)]
pub trait MessageSource {
    /// Wait for the next message.
    async fn receive(&mut self) -> Result<Message, ConnError>;
    async fn ack(&self, message: &Message) -> Result<(), ConnError>;
    async fn nack(&self, message: &Message) -> Result<(), ConnError>;
}

impl MessageSource for Subscription {
    async fn receive(&mut self) -> Result<Message, ConnError> {
        self.recv().await
    }

    async fn ack(&self, message: &Message) -> Result<(), ConnError> {
        Subscription::ack(self, message).await
    }

    async fn nack(&self, message: &Message) -> Result<(), ConnError> {
        Subscription::nack(self, message).await
    }
}

/// Outcome counts of a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub acked: u64,
    pub nacked: u64,
}

impl RunSummary {
    pub fn total(&self) -> u64 {
        self.acked + self.nacked
    }
}

/// Run one worker session to completion.
///
/// The configuration is validated before anything touches the network.
/// Once connected, the connection is disconnected exactly once no matter how
/// the rest of the run ends.
pub async fn run<H: MessageHandler>(
    config: &WorkerConfig,
    handler: &H,
) -> Result<RunSummary, WorkerError> {
    let limit = config.validate()?;

    info!(address = %config.address, queue = %config.queue, limit, "starting queue worker");
    let conn = Connection::connect(
        &config.address,
        &config.login,
        &config.passcode,
        config.connect_options(),
    )
    .await
    .map_err(|source| WorkerError::Connect {
        address: config.address.clone(),
        source,
    })?;
    info!(
        version = %conn.version(),
        server = conn.server().unwrap_or("unknown"),
        "connected"
    );

    let result = consume_destination(&conn, config, handler, limit).await;

    conn.disconnect().await;
    info!("disconnected");
    result
}

async fn consume_destination<H: MessageHandler>(
    conn: &Connection,
    config: &WorkerConfig,
    handler: &H,
    limit: u64,
) -> Result<RunSummary, WorkerError> {
    let mut subscription = conn
        .subscribe_with_headers(
            &config.queue,
            AckMode::ClientIndividual,
            config.subscription_headers.clone(),
        )
        .await
        .map_err(|source| WorkerError::Subscribe {
            destination: config.queue.clone(),
            source,
        })?;
    info!(
        destination = subscription.destination(),
        id = subscription.id(),
        ack = subscription.ack_mode().as_str(),
        "subscribed"
    );

    let result = consume(&mut subscription, handler, limit, config.receive_timeout).await;

    if let Err(e) = subscription.unsubscribe().await {
        warn!(error = %e, "unable to unsubscribe");
    }
    result
}

/// Receive and resolve exactly `limit` messages, one at a time.
///
/// A handler failure nacks the message and the loop carries on; only a
/// receive failure (connection lost, or `receive_timeout` elapsed) ends the
/// loop early. ACK/NACK send failures are logged and otherwise ignored; the
/// next receive will notice a dead connection.
pub async fn consume<S, H>(
    source: &mut S,
    handler: &H,
    limit: u64,
    receive_timeout: Option<Duration>,
) -> Result<RunSummary, WorkerError>
where
    S: MessageSource,
    H: MessageHandler,
{
    let mut summary = RunSummary::default();

    for index in 1..=limit {
        let received = match receive_timeout {
            Some(wait) => tokio::time::timeout(wait, source.receive())
                .await
                .map_err(|_| WorkerError::ReceiveTimeout(wait))?,
            None => source.receive().await,
        };
        let message = received.map_err(WorkerError::Receive)?;
        let message_id = message.id().unwrap_or("-").to_string();

        match handler.handle(&message).await {
            Ok(()) => {
                info!(index, message_id = %message_id, "acking message");
                if let Err(e) = source.ack(&message).await {
                    warn!(message_id = %message_id, error = %e, "ACK failed");
                }
                summary.acked += 1;
            }
            Err(err) => {
                warn!(index, message_id = %message_id, error = %err, "received error when handling message");
                info!(index, message_id = %message_id, "nacking message");
                if let Err(e) = source.nack(&message).await {
                    warn!(message_id = %message_id, error = %e, "NACK failed");
                }
                summary.nacked += 1;
            }
        }
    }

    info!(
        acked = summary.acked,
        nacked = summary.nacked,
        "message limit hit, finishing up"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::handler::{CommandHandler, HandlerError};
    use std::cell::RefCell;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Outcome {
        Ack(String),
        Nack(String),
    }

    /// In-memory source: hands out queued messages, records outcomes, and
    /// reports `Closed` (or blocks forever) once drained.
    #[derive(Default)]
    struct ScriptedSource {
        queued: VecDeque<Message>,
        outcomes: RefCell<Vec<Outcome>>,
        received: usize,
        hang_when_empty: bool,
    }

    impl ScriptedSource {
        fn with_bodies(bodies: &[&str]) -> Self {
            let queued = bodies
                .iter()
                .enumerate()
                .map(|(i, body)| {
                    Message::new(
                        Frame::new("MESSAGE")
                            .header("message-id", format!("m{}", i + 1))
                            .set_body(body.as_bytes().to_vec()),
                    )
                })
                .collect();
            Self {
                queued,
                ..Self::default()
            }
        }

        fn outcomes(&self) -> Vec<Outcome> {
            self.outcomes.borrow().clone()
        }
    }

    impl MessageSource for ScriptedSource {
        async fn receive(&mut self) -> Result<Message, ConnError> {
            match self.queued.pop_front() {
                Some(message) => {
                    self.received += 1;
                    Ok(message)
                }
                None if self.hang_when_empty => std::future::pending().await,
                None => Err(ConnError::Closed),
            }
        }

        async fn ack(&self, message: &Message) -> Result<(), ConnError> {
            let id = message.id().unwrap_or_default().to_string();
            self.outcomes.borrow_mut().push(Outcome::Ack(id));
            Ok(())
        }

        async fn nack(&self, message: &Message) -> Result<(), ConnError> {
            let id = message.id().unwrap_or_default().to_string();
            self.outcomes.borrow_mut().push(Outcome::Nack(id));
            Ok(())
        }
    }

    /// Succeeds for bodies equal to "ok", fails otherwise.
    struct BodyHandler;

    impl MessageHandler for BodyHandler {
        async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
            if message.body() == b"ok" {
                Ok(())
            } else {
                Err(HandlerError::ExitStatus {
                    code: 1,
                    command: "body-check".to_string(),
                })
            }
        }
    }

    fn ack(id: &str) -> Outcome {
        Outcome::Ack(id.to_string())
    }

    fn nack(id: &str) -> Outcome {
        Outcome::Nack(id.to_string())
    }

    #[tokio::test]
    async fn resolves_each_message_once_in_order() {
        let mut source = ScriptedSource::with_bodies(&["ok", "bad", "ok", "extra"]);
        let summary = consume(&mut source, &BodyHandler, 3, None).await.unwrap();

        assert_eq!(summary, RunSummary { acked: 2, nacked: 1 });
        assert_eq!(source.outcomes(), vec![ack("m1"), nack("m2"), ack("m3")]);
        // the fourth message is never taken off the subscription
        assert_eq!(source.received, 3);
        assert_eq!(source.queued.len(), 1);
    }

    #[tokio::test]
    async fn failures_never_stop_the_loop() {
        let mut source = ScriptedSource::with_bodies(&["bad", "bad", "bad"]);
        let summary = consume(&mut source, &BodyHandler, 3, None).await.unwrap();
        assert_eq!(summary.nacked, 3);
        assert_eq!(summary.total(), 3);
    }

    #[tokio::test]
    async fn true_command_acks_both_messages() {
        let mut source = ScriptedSource::with_bodies(&["first", "second body"]);
        let summary = consume(&mut source, &CommandHandler::new("true"), 2, None)
            .await
            .unwrap();
        assert_eq!(summary, RunSummary { acked: 2, nacked: 0 });
        assert_eq!(source.outcomes(), vec![ack("m1"), ack("m2")]);
    }

    #[tokio::test]
    async fn false_command_nacks() {
        let mut source = ScriptedSource::with_bodies(&["anything"]);
        let summary = consume(&mut source, &CommandHandler::new("false"), 1, None)
            .await
            .unwrap();
        assert_eq!(summary, RunSummary { acked: 0, nacked: 1 });
        assert_eq!(source.outcomes(), vec![nack("m1")]);
    }

    #[tokio::test]
    async fn unstartable_command_nacks_and_continues() {
        let handler = CommandHandler::new("/nonexistent/iridium-worker-handler");
        let mut source = ScriptedSource::with_bodies(&["a", "b"]);
        let summary = consume(&mut source, &handler, 2, None).await.unwrap();
        assert_eq!(source.outcomes(), vec![nack("m1"), nack("m2")]);
        assert_eq!(summary.nacked, 2);
    }

    #[tokio::test]
    async fn closed_source_ends_run_with_receive_error() {
        let mut source = ScriptedSource::with_bodies(&["ok"]);
        let err = consume(&mut source, &BodyHandler, 2, None).await.unwrap_err();
        assert!(matches!(err, WorkerError::Receive(ConnError::Closed)));
        assert_eq!(source.outcomes(), vec![ack("m1")]);
    }

    #[tokio::test(start_paused = true)]
    async fn receive_timeout_ends_run() {
        let mut source = ScriptedSource {
            hang_when_empty: true,
            ..ScriptedSource::with_bodies(&["ok"])
        };
        let wait = Duration::from_secs(5);
        let err = consume(&mut source, &BodyHandler, 2, Some(wait))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::ReceiveTimeout(d) if d == wait));
        assert_eq!(source.outcomes(), vec![ack("m1")]);
    }

    #[tokio::test]
    async fn invalid_config_fails_before_connecting() {
        // validation fails first, so the unreachable address is never dialed
        let config = WorkerConfig {
            address: "127.0.0.1:9".to_string(),
            queue: "/queue/work".to_string(),
            limit: 0,
            ..WorkerConfig::default()
        };
        let err = run(&config, &BodyHandler).await.unwrap_err();
        assert!(matches!(err, WorkerError::Config(_)));
    }
}
