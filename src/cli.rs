//! Command-line argument parsing.
//!
//! Usage:
//!   exprcalc serve  [-H <host>] [-p <port>] [--power] [--json]
//!   exprcalc submit <file> [-H <host>] [-p <port>] [--power]
//!   exprcalc rpn    [--power] [--] <expression>
//!   exprcalc eval   <file> [--power]
//!
//! An expression that starts with `-` followed by a letter (`-x+1`) must come
//! after `--`.

use std::path::PathBuf;

use crate::config::Config;

pub const USAGE: &str = "\
Usage:
  exprcalc serve  [-H <host>] [-p <port>] [--power] [--json]
  exprcalc submit <file> [-H <host>] [-p <port>] [--power]
  exprcalc rpn    [--power] [--] <expression>
  exprcalc eval   <file> [--power]";

// ── Public types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the server until interrupted.
    Serve,
    /// Send a definitions file to a server.
    Submit(PathBuf),
    /// Print the RPN of an expression.
    Rpn(String),
    /// Evaluate a definitions file locally.
    Eval(PathBuf),
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub command: Command,
    /// `-H <host>`
    pub host: Option<String>,
    /// `-p <port>`
    pub port: Option<u16>,
    /// `--power`: accept `^`.
    pub power: bool,
    /// `--json`: print the history as JSON when the server stops.
    pub json: bool,
}

impl CliArgs {
    /// Apply flag overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.host = Some(host.clone());
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.power {
            config.allow_power = true;
        }
    }
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()`.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(raw.get(1..).unwrap_or_default())
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut host = None;
    let mut port = None;
    let mut power = false;
    let mut json = false;
    let mut help = false;
    let mut positional: Vec<String> = Vec::new();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        if arg == "--" {
            positional.extend(argv[i + 1..].iter().cloned());
            break;
        }
        if !is_flag(arg) {
            positional.push(arg.to_owned());
            i += 1;
            continue;
        }

        match arg {
            "-h" | "--help" => help = true,
            "--power" => power = true,
            "--json" => json = true,
            "-H" | "--host" => {
                i += 1;
                let value = argv.get(i).ok_or("-H requires a host argument")?;
                host = Some(value.clone());
            }
            "-p" | "--port" => {
                i += 1;
                let value = argv.get(i).ok_or("-p requires a port argument")?;
                let parsed = value
                    .parse::<u16>()
                    .map_err(|_| format!("invalid port number: {value}"))?;
                port = Some(parsed);
            }
            other => return Err(format!("unknown option: {other}")),
        }
        i += 1;
    }

    let command = if help {
        Command::Help
    } else {
        let mut positional = positional.into_iter();
        let name = positional.next().ok_or("missing command")?;
        let operand = positional.next();
        let command = match (name.as_str(), operand) {
            ("serve", None) => Command::Serve,
            ("submit", Some(file)) => Command::Submit(PathBuf::from(file)),
            ("eval", Some(file)) => Command::Eval(PathBuf::from(file)),
            ("rpn", Some(expression)) => Command::Rpn(expression),
            ("serve", Some(extra)) => return Err(format!("unexpected argument: {extra}")),
            ("submit" | "eval", None) => return Err(format!("{name} requires a file")),
            ("rpn", None) => return Err("rpn requires an expression".to_owned()),
            (other, _) => return Err(format!("unknown command: {other}")),
        };
        if let Some(extra) = positional.next() {
            return Err(format!("unexpected argument: {extra}"));
        }
        command
    };

    Ok(CliArgs {
        command,
        host,
        port,
        power,
        json,
    })
}

/// `-5+3` and `-(a)` are expressions, `-p` and `--power` are flags.
fn is_flag(arg: &str) -> bool {
    let mut chars = arg.chars();
    chars.next() == Some('-')
        && chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '-')
}
