//! Per-connection protocol state machine.
//!
//! ```text
//!                    ExpressionSubmission
//!                    ├─ compile error ─────► ExpressionError     (stay)
//!                    ├─ RPN differs ───────► RpnMismatch         (stay)
//!  AwaitingExpression┴─ RPN matches ───────► RpnMatchRequestCoefficients
//!          ▲                                          │
//!          │                                          ▼
//!          └── FinalResult / CalculationError ◄─ AwaitingCoefficients
//!                                                CoefficientsSubmission
//! ```
//!
//! Anything else (wrong message for the state, undecodable frame) is a
//! protocol error: it is answered once, recorded, and the session closes.
//!
//! [`Session`] performs no I/O. The server hands it raw bytes and writes back
//! whatever it returns, which keeps every transition testable in isolation.

use std::time::Instant;

use tracing::{debug, warn};

use super::framing::FrameDecoder;
use super::message::{ClientMessage, ServerMessage, MAX_STR_LEN};
use crate::expr::{compile, evaluate, format_value, Bindings, CompileOptions, RpnProgram};
use crate::history::{HistoryRecord, Outcome, RequestKind};

/// Which request the session accepts next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingExpression,
    AwaitingCoefficients,
}

/// Everything produced by one call into the session.
#[derive(Debug, Default)]
pub struct SessionOutput {
    /// Replies to send, in order.
    pub replies: Vec<ServerMessage>,
    /// Terminal outcomes to append to the history log.
    pub records: Vec<HistoryRecord>,
    /// The connection must be closed after the replies are flushed.
    pub close: bool,
}

impl SessionOutput {
    fn merge(&mut self, other: SessionOutput) {
        self.replies.extend(other.replies);
        self.records.extend(other.records);
        self.close |= other.close;
    }
}

/// Protocol state of one connection.
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    options: CompileOptions,
    last_expression: String,
    last_rpn: Option<RpnProgram>,
    started_at: Instant,
    decoder: FrameDecoder,
    closed: bool,
}

impl Session {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            state: SessionState::AwaitingExpression,
            options,
            last_expression: String::new(),
            last_rpn: None,
            started_at: Instant::now(),
            decoder: FrameDecoder::new(),
            closed: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn last_expression(&self) -> &str {
        &self.last_expression
    }

    /// RPN of the last expression that compiled and matched.
    pub fn last_rpn(&self) -> Option<&RpnProgram> {
        self.last_rpn.as_ref()
    }

    /// Bytes of an incomplete frame still waiting for the rest.
    pub fn buffered(&self) -> usize {
        self.decoder.buffered()
    }

    /// Consume raw bytes from the connection.
    ///
    /// Partial frames are kept until a later call completes them. Once the
    /// session has closed, input is ignored.
    pub fn feed(&mut self, bytes: &[u8]) -> SessionOutput {
        let mut out = SessionOutput::default();
        if self.closed {
            return out;
        }
        self.decoder.push(bytes);

        while !self.closed {
            let frame = match self.decoder.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    out.merge(self.protocol_error(RequestKind::Malformed, e.to_string()));
                    break;
                }
            };

            match ClientMessage::decode(&frame) {
                Ok(message) => out.merge(self.handle(message)),
                Err(e) => {
                    out.merge(self.protocol_error(RequestKind::Malformed, e.to_string()));
                }
            }
        }
        out
    }

    /// Apply one decoded client message.
    pub fn handle(&mut self, message: ClientMessage) -> SessionOutput {
        if self.closed {
            return SessionOutput::default();
        }
        match (self.state, message) {
            (
                SessionState::AwaitingExpression,
                ClientMessage::ExpressionSubmission {
                    expression,
                    client_rpn,
                },
            ) => self.on_expression(expression, &client_rpn),

            (SessionState::AwaitingCoefficients, ClientMessage::CoefficientsSubmission { bindings }) => {
                self.on_coefficients(&bindings)
            }

            (SessionState::AwaitingExpression, ClientMessage::CoefficientsSubmission { .. }) => self
                .protocol_error(
                    RequestKind::Coefficients,
                    "coefficients received before an expression was accepted".into(),
                ),

            (SessionState::AwaitingCoefficients, ClientMessage::ExpressionSubmission { .. }) => self
                .protocol_error(
                    RequestKind::Expression,
                    "expected coefficients for the accepted expression".into(),
                ),
        }
    }

    fn on_expression(&mut self, expression: String, client_rpn: &str) -> SessionOutput {
        self.started_at = Instant::now();
        self.last_expression = expression;
        self.last_rpn = None;

        let compiled = match compile(&self.last_expression, &self.options) {
            Ok(compiled) => compiled,
            Err(e) => {
                debug!(expression = %self.last_expression, error = %e, "Expression rejected");
                let message = e.to_string();
                return self.terminal(
                    RequestKind::Expression,
                    String::new(),
                    ServerMessage::ExpressionError {
                        message: message.clone(),
                    },
                    Outcome::ExpressionError(message),
                );
            }
        };

        let program = compiled.into_program();
        let server_rpn = program.to_string();

        if server_rpn.len() > MAX_STR_LEN {
            // The RPN cannot be echoed back, so the client could never match it.
            let message = format!(
                "server RPN of {} bytes exceeds the {}-byte frame limit",
                server_rpn.len(),
                MAX_STR_LEN
            );
            debug!(expression_len = self.last_expression.len(), "{}", message);
            return self.terminal(
                RequestKind::Expression,
                server_rpn,
                ServerMessage::ExpressionError {
                    message: message.clone(),
                },
                Outcome::ExpressionError(message),
            );
        }

        if !program.matches_text(client_rpn) {
            debug!(
                expression = %self.last_expression,
                client_rpn,
                server_rpn = %server_rpn,
                "RPN mismatch"
            );
            return self.terminal(
                RequestKind::Expression,
                server_rpn.clone(),
                ServerMessage::RpnMismatch {
                    server_rpn: server_rpn.clone(),
                },
                Outcome::RpnMismatch(server_rpn),
            );
        }

        debug!(expression = %self.last_expression, rpn = %server_rpn, "RPN agreed");
        self.last_rpn = Some(program);
        self.state = SessionState::AwaitingCoefficients;
        SessionOutput {
            replies: vec![ServerMessage::RpnMatchRequestCoefficients],
            ..Default::default()
        }
    }

    fn on_coefficients(&mut self, bindings: &Bindings) -> SessionOutput {
        self.state = SessionState::AwaitingExpression;

        let Some(program) = self.last_rpn.as_ref() else {
            return self.protocol_error(
                RequestKind::Coefficients,
                "no agreed RPN to evaluate".into(),
            );
        };
        let rpn = program.to_string();

        match evaluate(program, bindings) {
            Ok(value) => {
                let value = format_value(value);
                debug!(expression = %self.last_expression, %value, "Calculated");
                self.terminal(
                    RequestKind::Coefficients,
                    rpn,
                    ServerMessage::FinalResult {
                        value: value.clone(),
                    },
                    Outcome::FinalResult(value),
                )
            }
            Err(e) => {
                debug!(expression = %self.last_expression, error = %e, "Calculation failed");
                let message = e.to_string();
                self.terminal(
                    RequestKind::Coefficients,
                    rpn,
                    ServerMessage::CalculationError {
                        message: message.clone(),
                    },
                    Outcome::CalculationError(message),
                )
            }
        }
    }

    fn protocol_error(&mut self, kind: RequestKind, message: String) -> SessionOutput {
        warn!(state = ?self.state, %kind, "Protocol error: {}", message);
        let rpn = self
            .last_rpn
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        let mut out = self.terminal(
            kind,
            rpn,
            ServerMessage::ProtocolError {
                message: message.clone(),
            },
            Outcome::ProtocolError(message),
        );
        out.close = true;
        self.closed = true;
        out
    }

    fn terminal(
        &self,
        kind: RequestKind,
        rpn: String,
        reply: ServerMessage,
        outcome: Outcome,
    ) -> SessionOutput {
        let record = HistoryRecord::new(
            kind,
            self.last_expression.clone(),
            rpn,
            outcome,
            self.started_at.elapsed(),
        );
        SessionOutput {
            replies: vec![reply.clamped()],
            records: vec![record],
            close: false,
        }
    }
}
