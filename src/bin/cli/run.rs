use iridium_worker::{CommandHandler, ConnError, WorkerError};
use tracing::info;

use super::args::Cli;
use super::exit_codes;

/// Run the worker with the parsed flags.
pub async fn run(cli: &Cli) -> Result<(), (String, u8)> {
    let config = cli.to_config();
    let handler = CommandHandler::new(config.command.clone()).forward_output(config.show_output);
    info!(command = handler.command(), "handling messages with command");

    let summary = iridium_worker::run(&config, &handler)
        .await
        .map_err(|e| format_worker_error(&e))?;

    info!(
        acked = summary.acked,
        nacked = summary.nacked,
        "queue worker finished"
    );
    Ok(())
}

/// Turn a failed run into a user-facing message and exit code.
pub fn format_worker_error(err: &WorkerError) -> (String, u8) {
    match err {
        WorkerError::Config(e) => (e.to_string(), exit_codes::CONFIG_ERROR),
        WorkerError::Connect { address, source } => format_connection_error(source, address),
        WorkerError::Subscribe { .. } => (err.to_string(), exit_codes::SUBSCRIBE_ERROR),
        WorkerError::ReceiveTimeout(_) => (err.to_string(), exit_codes::TIMEOUT),
        WorkerError::Receive(_) => (err.to_string(), exit_codes::NETWORK_ERROR),
    }
}

/// Format a connection error with user-friendly messaging.
fn format_connection_error(err: &ConnError, address: &str) -> (String, u8) {
    match err {
        ConnError::Io(io_err) => {
            let message = match io_err.kind() {
                std::io::ErrorKind::ConnectionRefused => {
                    format!("Connection refused: {}", address)
                }
                std::io::ErrorKind::TimedOut => {
                    format!("Connection timed out: {}", address)
                }
                _ => format!("Unable to connect to server {}: {}", address, io_err),
            };
            (message, exit_codes::NETWORK_ERROR)
        }
        ConnError::ServerRejected(server_err) => (
            format!("Authentication failed: {}", server_err),
            exit_codes::AUTH_ERROR,
        ),
        ConnError::Closed => (
            format!("Connection closed by {}", address),
            exit_codes::NETWORK_ERROR,
        ),
        ConnError::Protocol(_) | ConnError::ReceiptTimeout(_) => (
            format!("Protocol error talking to {}: {}", address, err),
            exit_codes::PROTOCOL_ERROR,
        ),
    }
}
