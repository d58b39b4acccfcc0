use std::io;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::message::Message;

/// Why a message could not be handled. The consumer nacks the message and
/// moves on; none of these stop the run.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The command could not be started (missing executable, permissions, ...).
    #[error("error starting command '{command}': {source}")]
    Start {
        command: String,
        #[source]
        source: io::Error,
    },
    /// The command ran and exited with a non-zero status.
    #[error("received exit code {code} from command: {command}")]
    ExitStatus { code: i32, command: String },
    /// The command ended without an exit code, e.g. killed by a signal.
    #[error("command '{command}' terminated abnormally: {status}")]
    Terminated { command: String, status: ExitStatus },
    /// Waiting for the command failed at the OS level.
    #[error("error executing: {0}")]
    Wait(#[source] io::Error),
}

/// Processes one message and reports success or failure. Acknowledgement is
/// the caller's job.
#[allow(async_fn_in_trait)]
pub trait MessageHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError>;
}

/// Runs an external command for every message.
///
/// The command template is split on single spaces into the program and its
/// leading arguments; the message body is appended as one final argument.
/// Nothing is interpreted by a shell, so quotes in the template are passed
/// through literally and consecutive spaces produce empty arguments.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    command: String,
    forward_output: bool,
}

impl CommandHandler {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            forward_output: false,
        }
    }

    /// Let the command write to this process's stdout/stderr instead of
    /// discarding its output.
    pub fn forward_output(mut self, forward: bool) -> Self {
        self.forward_output = forward;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// The argument vector used for `payload`: program first.
    pub fn argv(&self, payload: &[u8]) -> Vec<String> {
        let mut args: Vec<String> = self.command.split(' ').map(str::to_string).collect();
        args.push(String::from_utf8_lossy(payload).into_owned());
        args
    }

    /// Run the command for `payload` and wait for it to exit. There is no
    /// timeout.
    pub async fn run(&self, payload: &[u8]) -> Result<(), HandlerError> {
        let argv = self.argv(payload);
        let mut args = argv.iter();
        let program = args.next().map(String::as_str).unwrap_or_default();

        let output = || {
            if self.forward_output {
                Stdio::inherit()
            } else {
                Stdio::null()
            }
        };
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(output())
            .stderr(output())
            .spawn()
            .map_err(|source| HandlerError::Start {
                command: self.command.clone(),
                source,
            })?;
        debug!(command = %self.command, pid = ?child.id(), "command started");

        let status = child.wait().await.map_err(HandlerError::Wait)?;
        if status.success() {
            return Ok(());
        }
        match status.code() {
            Some(code) => Err(HandlerError::ExitStatus {
                code,
                command: self.command.clone(),
            }),
            None => Err(HandlerError::Terminated {
                command: self.command.clone(),
                status,
            }),
        }
    }
}

impl MessageHandler for CommandHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        self.run(message.body()).await
    }
}
