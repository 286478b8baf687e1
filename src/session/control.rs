//! Circuit identity control
//!
//! Asking the anonymizing daemon for a fresh identity goes through its control
//! port: a line protocol of `AUTHENTICATE`, `SIGNAL NEWNYM` and `QUIT`, each
//! answered with a `250` status line on success.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Upper bound for one control conversation
const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from the control port
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control port IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("control port rejected command: {0}")]
    Rejected(String),

    #[error("control port closed the connection")]
    Closed,

    #[error("control port did not answer within {0:?}")]
    Timeout(Duration),
}

/// Signals identity changes for circuits
#[async_trait]
pub trait CircuitControl: Send + Sync {
    /// Requests a new identity for the given circuit
    async fn new_identity(&self, circuit: usize) -> Result<(), ControlError>;
}

/// Control for circuits without a reachable daemon; rotation then relies on
/// stream isolation alone
#[derive(Debug, Default)]
pub struct NoControl;

#[async_trait]
impl CircuitControl for NoControl {
    async fn new_identity(&self, _circuit: usize) -> Result<(), ControlError> {
        Ok(())
    }
}

/// Control-port client for the anonymizing daemon
#[derive(Debug, Clone)]
pub struct TorControl {
    address: String,
    password: Option<String>,
}

impl TorControl {
    pub fn new(address: impl Into<String>, password: Option<String>) -> Self {
        Self {
            address: address.into(),
            password,
        }
    }

    async fn converse(&self) -> Result<(), ControlError> {
        let stream = TcpStream::connect(&self.address).await?;
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        let auth = match &self.password {
            Some(password) => format!(
                "AUTHENTICATE \"{}\"\r\n",
                password.replace('\\', "\\\\").replace('"', "\\\"")
            ),
            None => "AUTHENTICATE\r\n".to_string(),
        };
        write.write_all(auth.as_bytes()).await?;
        expect_ok(&mut lines).await?;

        write.write_all(b"SIGNAL NEWNYM\r\n").await?;
        expect_ok(&mut lines).await?;

        // The daemon may hang up before answering QUIT
        let _ = write.write_all(b"QUIT\r\n").await;
        Ok(())
    }
}

#[async_trait]
impl CircuitControl for TorControl {
    async fn new_identity(&self, circuit: usize) -> Result<(), ControlError> {
        tracing::debug!("Signalling NEWNYM on {} for circuit {}", self.address, circuit);
        tokio::time::timeout(CONTROL_TIMEOUT, self.converse())
            .await
            .map_err(|_| ControlError::Timeout(CONTROL_TIMEOUT))?
    }
}

async fn expect_ok<R>(lines: &mut tokio::io::Lines<R>) -> Result<(), ControlError>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    match lines.next_line().await? {
        Some(line) if line.starts_with("250") => Ok(()),
        Some(line) => Err(ControlError::Rejected(line)),
        None => Err(ControlError::Closed),
    }
}
