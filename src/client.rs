//! Calculation client.
//!
//! `ExprClient` compiles expressions locally, submits them with their RPN
//! over TCP and, once the server agrees on the RPN, sends operand values and
//! collects the result. Every exchange is bounded by a timeout so a stalled
//! server cannot hang the caller.

use std::time::Duration;

use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;
use tracing::debug;

use crate::expr::{compile, Bindings, CompileError, CompileOptions, RpnProgram};
use crate::protocol::framing::{read_frame, write_frame, FrameDecoder};
use crate::protocol::message::{ClientMessage, ServerMessage};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Client-side failures.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Failed to reach the server.
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] std::io::Error),

    /// No reply within the configured timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error on an established connection.
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),

    /// Framing or message encoding failure.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The expression did not compile locally, so nothing was sent.
    #[error("Invalid expression: {0}")]
    Compile(#[from] CompileError),

    /// The server could not parse the expression.
    #[error("Server rejected expression: {0}")]
    ExpressionRejected(String),

    /// Client and server disagree on the RPN.
    #[error("RPN mismatch: client '{client}', server '{server}'")]
    RpnMismatch { client: String, server: String },

    /// Evaluation failed on the server.
    #[error("Calculation failed: {0}")]
    CalculationFailed(String),

    /// The server reported a protocol violation and closed the connection.
    #[error("Server reported protocol violation: {0}")]
    ProtocolViolation(String),

    /// A well-formed reply that does not fit the current exchange.
    #[error("Unexpected reply: {0:?}")]
    UnexpectedReply(ServerMessage),
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                ClientError::ConnectionFailed(err)
            }
            _ => ClientError::Io(err),
        }
    }
}

/// Result of a completed two-phase exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calculation {
    /// RPN agreed by both sides.
    pub rpn: String,
    /// Value as formatted by the server.
    pub value: String,
}

/// Connection to an expression server.
///
/// # Example
///
/// ```ignore
/// use exprcalc::client::ExprClient;
///
/// let mut client = ExprClient::connect("127.0.0.1:12345", Default::default()).await?;
/// let bindings = [("x".to_string(), 41.0)].into();
/// let calc = client.calculate("x+1", &bindings).await?;
/// assert_eq!(calc.value, "42");
/// ```
pub struct ExprClient {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    decoder: FrameDecoder,
    options: CompileOptions,
    timeout: Duration,
}

impl ExprClient {
    /// Connect to the server.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ConnectionFailed` if the address does not
    /// resolve or the connection is refused.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        options: CompileOptions,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(ClientError::ConnectionFailed)?;
        // Frames are small and latency-bound.
        stream.set_nodelay(true).map_err(ClientError::Io)?;
        let (reader, writer) = stream.into_split();

        Ok(Self {
            reader,
            writer,
            decoder: FrameDecoder::new(),
            options,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    /// Connect with exponential backoff: 100ms, 200ms, 400ms, ...
    ///
    /// # Errors
    ///
    /// Returns the last connection error if all attempts fail.
    pub async fn connect_with_retry<A: ToSocketAddrs + Clone>(
        addr: A,
        options: CompileOptions,
        max_attempts: u32,
    ) -> Result<Self, ClientError> {
        let attempts = max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match Self::connect(addr.clone(), options).await {
                Ok(client) => return Ok(client),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    let delay = Duration::from_millis(100 * (1 << (attempt - 1).min(10)));
                    debug!(attempt, error = %e, ?delay, "Connect failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Set the per-request timeout. Default is 30 seconds.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Compile `expression` locally and submit it with its RPN.
    ///
    /// Returns the agreed program when the server asks for coefficients.
    pub async fn submit_expression(&mut self, expression: &str) -> Result<RpnProgram, ClientError> {
        let program = compile(expression, &self.options)?.into_program();
        let client_rpn = program.to_string();

        let reply = self
            .request(&ClientMessage::ExpressionSubmission {
                expression: expression.to_string(),
                client_rpn: client_rpn.clone(),
            })
            .await?;

        match reply {
            ServerMessage::RpnMatchRequestCoefficients => Ok(program),
            ServerMessage::RpnMismatch { server_rpn } => Err(ClientError::RpnMismatch {
                client: client_rpn,
                server: server_rpn,
            }),
            ServerMessage::ExpressionError { message } => {
                Err(ClientError::ExpressionRejected(message))
            }
            ServerMessage::ProtocolError { message } => Err(ClientError::ProtocolViolation(message)),
            other => Err(ClientError::UnexpectedReply(other)),
        }
    }

    /// Send operand values for the expression the server accepted.
    pub async fn submit_coefficients(&mut self, bindings: &Bindings) -> Result<String, ClientError> {
        let reply = self
            .request(&ClientMessage::CoefficientsSubmission {
                bindings: bindings.clone(),
            })
            .await?;

        match reply {
            ServerMessage::FinalResult { value } => Ok(value),
            ServerMessage::CalculationError { message } => {
                Err(ClientError::CalculationFailed(message))
            }
            ServerMessage::ProtocolError { message } => Err(ClientError::ProtocolViolation(message)),
            other => Err(ClientError::UnexpectedReply(other)),
        }
    }

    /// Run the full exchange for one expression.
    pub async fn calculate(
        &mut self,
        expression: &str,
        bindings: &Bindings,
    ) -> Result<Calculation, ClientError> {
        let program = self.submit_expression(expression).await?;
        let value = self.submit_coefficients(bindings).await?;
        Ok(Calculation {
            rpn: program.to_string(),
            value,
        })
    }

    /// Send one message and wait for one reply (with timeout).
    async fn request(&mut self, message: &ClientMessage) -> Result<ServerMessage, ClientError> {
        match timeout(self.timeout, self.send_receive(message)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(self.timeout)),
        }
    }

    async fn send_receive(&mut self, message: &ClientMessage) -> Result<ServerMessage, ClientError> {
        let frame = message
            .encode()
            .map_err(|e| ClientError::Protocol(format!("Failed to encode request: {}", e)))?;

        write_frame(&mut self.writer, &frame)
            .await
            .map_err(|e| ClientError::Protocol(format!("Failed to send request: {}", e)))?;

        let reply = read_frame(&mut self.reader, &mut self.decoder)
            .await
            .map_err(|e| ClientError::Protocol(format!("Failed to read reply: {}", e)))?;

        let reply = ServerMessage::decode(&reply)
            .map_err(|e| ClientError::Protocol(format!("Failed to decode reply: {}", e)))?;
        debug!(reply = ?reply.message_type(), "Received reply");
        Ok(reply)
    }
}
