pub mod args;
pub mod run;

/// Exit codes for different error conditions
pub mod exit_codes {
    /// Successful execution (nacked messages included)
    pub const SUCCESS: u8 = 0;
    /// Network/connection error (e.g., host unreachable, connection refused)
    pub const NETWORK_ERROR: u8 = 1;
    /// Authentication error (broker answered the handshake with ERROR)
    pub const AUTH_ERROR: u8 = 2;
    /// Protocol error (e.g., unexpected server response)
    pub const PROTOCOL_ERROR: u8 = 3;
    /// Invalid flags (limit, queue, heart-beat)
    pub const CONFIG_ERROR: u8 = 4;
    /// The broker refused the subscription
    pub const SUBSCRIBE_ERROR: u8 = 5;
    /// No message arrived within --receive-timeout
    pub const TIMEOUT: u8 = 6;
}

/// Install the fmt subscriber. Filter comes from IRIDIUM_WORKER_LOG,
/// defaulting to "info".
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("IRIDIUM_WORKER_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
