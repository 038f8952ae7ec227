//! exprcalc library
//!
//! - `expr` - tokenizer, shunting-yard converter and RPN evaluator
//! - `protocol` - binary framing, messages and the per-connection session
//! - `server` - TCP server running one session per client
//! - `client` - client performing the two-phase calculation exchange
//! - `history` - audit log of every finished request
//! - `config`, `definitions`, `cli` - front-end support
//!
//! # Example
//!
//! ```ignore
//! use exprcalc::client::ExprClient;
//! use exprcalc::server::Server;
//!
//! let server = Server::bind("127.0.0.1:0", Default::default()).await?;
//! let addr = server.local_addr()?;
//! tokio::spawn(server.run_until(std::future::pending()));
//!
//! let mut client = ExprClient::connect(addr, Default::default()).await?;
//! let calc = client.calculate("2*(3+4)", &Default::default()).await?;
//! assert_eq!(calc.value, "14");
//! ```

pub mod cli;
pub mod client;
pub mod config;
pub mod definitions;
pub mod expr;
pub mod history;
pub mod protocol;
pub mod server;
