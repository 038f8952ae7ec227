//! Protocol messages and their payload encoding.
//!
//! Payload primitives:
//! - `str` : u16 byte length + UTF-8 bytes
//! - `f64` : IEEE-754 binary64, big-endian
//! - `u16` : big-endian
//!
//! | code   | direction | message                     | payload                          |
//! |--------|-----------|-----------------------------|----------------------------------|
//! | 0x0001 | C → S     | ExpressionSubmission        | str expression, str client_rpn   |
//! | 0x0002 | C → S     | CoefficientsSubmission      | u16 n, n × (str name, f64 value) |
//! | 0x0101 | S → C     | RpnMatchRequestCoefficients | (empty)                          |
//! | 0x0102 | S → C     | RpnMismatch                 | str server_rpn                   |
//! | 0x0103 | S → C     | ExpressionError             | str message                      |
//! | 0x0104 | S → C     | FinalResult                 | str value                        |
//! | 0x0105 | S → C     | CalculationError            | str message                      |
//! | 0x0106 | S → C     | ProtocolError               | str message                      |

use thiserror::Error;

use super::framing::{encode_frame, Frame, FrameError, MAX_PAYLOAD_LEN};
use crate::expr::Bindings;

/// Longest string that fits a frame as the only payload field.
pub const MAX_STR_LEN: usize = MAX_PAYLOAD_LEN - 2;

/// Message type codes carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    ExpressionSubmission = 0x0001,
    CoefficientsSubmission = 0x0002,
    RpnMatchRequestCoefficients = 0x0101,
    RpnMismatch = 0x0102,
    ExpressionError = 0x0103,
    FinalResult = 0x0104,
    CalculationError = 0x0105,
    ProtocolError = 0x0106,
}

impl MessageType {
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Whether clients send this type (as opposed to receiving it).
    pub fn is_client_to_server(self) -> bool {
        matches!(
            self,
            MessageType::ExpressionSubmission | MessageType::CoefficientsSubmission
        )
    }
}

impl TryFrom<u16> for MessageType {
    type Error = MessageError;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        Ok(match code {
            0x0001 => MessageType::ExpressionSubmission,
            0x0002 => MessageType::CoefficientsSubmission,
            0x0101 => MessageType::RpnMatchRequestCoefficients,
            0x0102 => MessageType::RpnMismatch,
            0x0103 => MessageType::ExpressionError,
            0x0104 => MessageType::FinalResult,
            0x0105 => MessageType::CalculationError,
            0x0106 => MessageType::ProtocolError,
            other => return Err(MessageError::UnknownType(other)),
        })
    }
}

/// Encoding and decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("unknown message type 0x{0:04x}")]
    UnknownType(u16),

    #[error("{0:?} is not valid in this direction")]
    WrongDirection(MessageType),

    #[error("payload truncated while reading {0}")]
    Truncated(&'static str),

    #[error("{0} unexpected bytes after the payload")]
    TrailingBytes(usize),

    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("string of {0} bytes does not fit a u16 length prefix")]
    StringTooLong(usize),

    #[error("{0} bindings do not fit a u16 count")]
    TooManyBindings(usize),

    #[error("duplicate binding '{0}'")]
    DuplicateBinding(String),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

// =============================================================================
// Messages
// =============================================================================

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    ExpressionSubmission {
        expression: String,
        client_rpn: String,
    },
    CoefficientsSubmission {
        bindings: Bindings,
    },
}

impl ClientMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            ClientMessage::ExpressionSubmission { .. } => MessageType::ExpressionSubmission,
            ClientMessage::CoefficientsSubmission { .. } => MessageType::CoefficientsSubmission,
        }
    }

    /// Serialize into a complete frame.
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        let mut w = PayloadWriter::default();
        match self {
            ClientMessage::ExpressionSubmission {
                expression,
                client_rpn,
            } => {
                w.put_str(expression)?;
                w.put_str(client_rpn)?;
            }
            ClientMessage::CoefficientsSubmission { bindings } => {
                let count = u16::try_from(bindings.len())
                    .map_err(|_| MessageError::TooManyBindings(bindings.len()))?;
                w.put_u16(count);
                for (name, value) in bindings {
                    w.put_str(name)?;
                    w.put_f64(*value);
                }
            }
        }
        Ok(encode_frame(self.message_type().code(), &w.finish())?)
    }

    /// Decode a frame received by the server.
    pub fn decode(frame: &Frame) -> Result<Self, MessageError> {
        let kind = MessageType::try_from(frame.message_type)?;
        let mut r = PayloadReader::new(&frame.payload);
        let message = match kind {
            MessageType::ExpressionSubmission => ClientMessage::ExpressionSubmission {
                expression: r.get_str("expression")?,
                client_rpn: r.get_str("client RPN")?,
            },
            MessageType::CoefficientsSubmission => {
                let count = r.get_u16("binding count")?;
                let mut bindings = Bindings::new();
                for _ in 0..count {
                    let name = r.get_str("binding name")?;
                    let value = r.get_f64("binding value")?;
                    if bindings.insert(name.clone(), value).is_some() {
                        return Err(MessageError::DuplicateBinding(name));
                    }
                }
                ClientMessage::CoefficientsSubmission { bindings }
            }
            other => return Err(MessageError::WrongDirection(other)),
        };
        r.finish()?;
        Ok(message)
    }
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    RpnMatchRequestCoefficients,
    RpnMismatch { server_rpn: String },
    ExpressionError { message: String },
    FinalResult { value: String },
    CalculationError { message: String },
    ProtocolError { message: String },
}

impl ServerMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            ServerMessage::RpnMatchRequestCoefficients => MessageType::RpnMatchRequestCoefficients,
            ServerMessage::RpnMismatch { .. } => MessageType::RpnMismatch,
            ServerMessage::ExpressionError { .. } => MessageType::ExpressionError,
            ServerMessage::FinalResult { .. } => MessageType::FinalResult,
            ServerMessage::CalculationError { .. } => MessageType::CalculationError,
            ServerMessage::ProtocolError { .. } => MessageType::ProtocolError,
        }
    }

    /// Serialize into a complete frame.
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        let mut w = PayloadWriter::default();
        match self {
            ServerMessage::RpnMatchRequestCoefficients => {}
            ServerMessage::RpnMismatch { server_rpn: text }
            | ServerMessage::ExpressionError { message: text }
            | ServerMessage::FinalResult { value: text }
            | ServerMessage::CalculationError { message: text }
            | ServerMessage::ProtocolError { message: text } => w.put_str(text)?,
        }
        Ok(encode_frame(self.message_type().code(), &w.finish())?)
    }

    /// Shorten the text field to [`MAX_STR_LEN`] bytes so the reply always
    /// encodes. The cut lands on a char boundary.
    pub fn clamped(self) -> Self {
        fn clamp(mut text: String) -> String {
            if text.len() > MAX_STR_LEN {
                let mut end = MAX_STR_LEN;
                while !text.is_char_boundary(end) {
                    end -= 1;
                }
                text.truncate(end);
            }
            text
        }

        match self {
            ServerMessage::RpnMatchRequestCoefficients => self,
            ServerMessage::RpnMismatch { server_rpn } => ServerMessage::RpnMismatch {
                server_rpn: clamp(server_rpn),
            },
            ServerMessage::ExpressionError { message } => ServerMessage::ExpressionError {
                message: clamp(message),
            },
            ServerMessage::FinalResult { value } => ServerMessage::FinalResult {
                value: clamp(value),
            },
            ServerMessage::CalculationError { message } => ServerMessage::CalculationError {
                message: clamp(message),
            },
            ServerMessage::ProtocolError { message } => ServerMessage::ProtocolError {
                message: clamp(message),
            },
        }
    }

    /// Decode a frame received by a client.
    pub fn decode(frame: &Frame) -> Result<Self, MessageError> {
        let kind = MessageType::try_from(frame.message_type)?;
        let mut r = PayloadReader::new(&frame.payload);
        let message = match kind {
            MessageType::RpnMatchRequestCoefficients => ServerMessage::RpnMatchRequestCoefficients,
            MessageType::RpnMismatch => ServerMessage::RpnMismatch {
                server_rpn: r.get_str("server RPN")?,
            },
            MessageType::ExpressionError => ServerMessage::ExpressionError {
                message: r.get_str("message")?,
            },
            MessageType::FinalResult => ServerMessage::FinalResult {
                value: r.get_str("value")?,
            },
            MessageType::CalculationError => ServerMessage::CalculationError {
                message: r.get_str("message")?,
            },
            MessageType::ProtocolError => ServerMessage::ProtocolError {
                message: r.get_str("message")?,
            },
            other => return Err(MessageError::WrongDirection(other)),
        };
        r.finish()?;
        Ok(message)
    }
}

// =============================================================================
// Payload primitives
// =============================================================================

#[derive(Default)]
struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn put_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn put_str(&mut self, value: &str) -> Result<(), MessageError> {
        let len =
            u16::try_from(value.len()).map_err(|_| MessageError::StringTooLong(value.len()))?;
        self.put_u16(len);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], MessageError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(MessageError::Truncated(field))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn get_u16(&mut self, field: &'static str) -> Result<u16, MessageError> {
        let bytes = self.take(2, field)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn get_f64(&mut self, field: &'static str) -> Result<f64, MessageError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8, field)?);
        Ok(f64::from_be_bytes(raw))
    }

    fn get_str(&mut self, field: &'static str) -> Result<String, MessageError> {
        let len = self.get_u16(field)? as usize;
        let bytes = self.take(len, field)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| MessageError::InvalidUtf8(field))
    }

    fn finish(self) -> Result<(), MessageError> {
        match self.buf.len() - self.pos {
            0 => Ok(()),
            extra => Err(MessageError::TrailingBytes(extra)),
        }
    }
}
