//! A STOMP queue worker.
//!
//! The worker connects to a broker, subscribes to one destination with
//! `client-individual` acknowledgement and, for a fixed number of messages,
//! runs an external command per message: exit status zero ACKs the message,
//! anything else NACKs it.
//!
//! The crate carries its own small STOMP 1.1/1.2 client (`frame`, `parser`,
//! `codec`, `connection`, `subscription`), the `handler` that runs the
//! command and the `consumer` loop tying them together.

pub mod codec;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod frame;
pub mod handler;
pub mod message;
pub mod parser;
pub mod subscription;

pub use codec::{StompCodec, StompItem};
pub use config::{ConfigError, WorkerConfig};
pub use connection::{
    AckMode, ConnError, ConnectOptions, Connection, ServerError, StompVersion,
    negotiate_heartbeats, parse_heartbeat_header,
};
pub use consumer::{MessageSource, RunSummary, consume, run};
pub use error::WorkerError;
pub use frame::Frame;
pub use handler::{CommandHandler, HandlerError, MessageHandler};
pub use message::Message;
pub use subscription::Subscription;
