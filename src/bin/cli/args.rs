use clap::Parser;
use std::time::Duration;

use iridium_worker::WorkerConfig;
use iridium_worker::config::{DEFAULT_ADDRESS, DEFAULT_HEARTBEAT, DEFAULT_LOGIN, DEFAULT_PASSCODE};

#[derive(Parser, Debug)]
#[command(name = "iridium-worker")]
#[command(version)]
#[command(about = "Consume messages from a STOMP destination and run a command for each one")]
pub struct Cli {
    /// STOMP broker address (host:port)
    #[arg(short, long, default_value = DEFAULT_ADDRESS)]
    pub listen: String,

    /// Number of messages to consume before exiting (must be > 0)
    #[arg(short = 'n', long, default_value_t = 0, allow_negative_numbers = true)]
    pub limit: i64,

    /// Destination queue to subscribe to
    #[arg(short, long, default_value = "")]
    pub queue: String,

    /// Command to run for each message; the message body is appended as the last argument
    #[arg(short, long, default_value = "")]
    pub command: String,

    /// Login username
    #[arg(long, env = "IRIDIUM_WORKER_LOGIN", default_value = DEFAULT_LOGIN)]
    pub login: String,

    /// Passcode
    #[arg(long, env = "IRIDIUM_WORKER_PASSCODE", default_value = DEFAULT_PASSCODE, hide_env_values = true)]
    pub passcode: String,

    /// Heartbeat settings (client-send,client-receive in ms)
    #[arg(long, default_value = DEFAULT_HEARTBEAT)]
    pub heartbeat: String,

    /// Virtual host sent in the handshake
    #[arg(long, default_value = "/")]
    pub vhost: String,

    /// Extra SUBSCRIBE header as key:value (can be specified multiple times)
    #[arg(long = "sub-header", value_name = "KEY:VALUE", value_parser = parse_header)]
    pub sub_headers: Vec<(String, String)>,

    /// Give up when no message arrives within this many seconds
    #[arg(long, value_name = "SECONDS")]
    pub receive_timeout: Option<u64>,

    /// Show the command's stdout/stderr instead of discarding it
    #[arg(long)]
    pub show_output: bool,
}

impl Cli {
    pub fn to_config(&self) -> WorkerConfig {
        WorkerConfig {
            address: self.listen.clone(),
            login: self.login.clone(),
            passcode: self.passcode.clone(),
            vhost: self.vhost.clone(),
            heartbeat: self.heartbeat.clone(),
            queue: self.queue.clone(),
            subscription_headers: self.sub_headers.clone(),
            command: self.command.clone(),
            limit: self.limit,
            receive_timeout: self.receive_timeout.map(Duration::from_secs),
            show_output: self.show_output,
        }
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once(':') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY:VALUE, got '{}'", raw)),
    }
}
