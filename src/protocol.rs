//! Binary protocol between calculation clients and the server.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐           TCP               ┌─────────────────────┐
//! │   ExprClient    │  ◄─────────────────────────►│  Server (Session    │
//! │ (local compile) │   length-prefixed frames    │  per connection)    │
//! └─────────────────┘                             └─────────────────────┘
//! ```
//!
//! A client compiles its expression locally and submits both the text and
//! its RPN. The server compiles independently and only asks for operand
//! values once both sides agree on the RPN.
//!
//! - [`framing`] : `[u16 length][u16 type][payload]` frames and reassembly
//! - [`message`] : typed client and server messages
//! - [`session`] : per-connection state machine, free of I/O

pub mod framing;
pub mod message;
pub mod session;

pub use framing::{encode_frame, read_frame, write_frame, Frame, FrameDecoder, FrameError};
pub use message::{ClientMessage, MessageError, MessageType, ServerMessage};
pub use session::{Session, SessionOutput, SessionState};

/// Port used when nothing else is configured.
pub const DEFAULT_PORT: u16 = 12345;
