//! exprcalc - expression compiler and calculation server.
//!
//! Runs the TCP server, submits definitions files to it, or compiles and
//! evaluates expressions locally.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use exprcalc::cli::{self, CliArgs, Command};
use exprcalc::client::ExprClient;
use exprcalc::config::Config;
use exprcalc::definitions::{diagnose, Definitions};
use exprcalc::expr::{compile, evaluate, format_value, CompileOptions};
use exprcalc::server::Server;

/// Connection attempts made by `submit` before giving up.
const CONNECT_ATTEMPTS: u32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "exprcalc=info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("exprcalc: {e}\n\n{}", cli::USAGE);
            std::process::exit(2);
        }
    };

    let mut config = Config::load().context("Failed to load configuration")?;
    args.apply(&mut config);

    match &args.command {
        Command::Help => {
            println!("{}", cli::USAGE);
            Ok(())
        }
        Command::Serve => serve(&config, &args).await,
        Command::Submit(path) => submit(&config, path).await,
        Command::Rpn(expression) => {
            let compiled = compile(expression, &config.compile_options())?;
            println!("{}", compiled.program());
            Ok(())
        }
        Command::Eval(path) => eval_file(path, &config.compile_options()),
    }
}

async fn serve(config: &Config, args: &CliArgs) -> Result<()> {
    info!("Starting exprcalc server v{}", env!("CARGO_PKG_VERSION"));
    let server = Server::bind(config.bind_addr(), config.compile_options())
        .await
        .with_context(|| format!("Cannot listen on {}", config.bind_addr()))?;
    let history = server.history();

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Cannot listen for Ctrl-C; stopping");
            }
        })
        .await?;

    if args.json {
        println!("{}", history.to_json()?);
    }
    Ok(())
}

async fn submit(config: &Config, path: &Path) -> Result<()> {
    let defs = Definitions::load(path)?;
    let options = config.compile_options();

    let compiled = compile(&defs.expression, &options)?;
    let diagnosis = diagnose(compiled.identifiers(), &defs.bindings);
    for name in &diagnosis.unused {
        warn!(name = %name, "Operand is defined but not used");
    }
    for name in &diagnosis.undefined {
        warn!(name = %name, "Operand is used but not defined");
    }

    let addr = config.connect_addr();
    let connect = ExprClient::connect_with_retry(addr.clone(), options, CONNECT_ATTEMPTS);
    let mut client = tokio::time::timeout(Duration::from_secs(config.connect_timeout_secs), connect)
        .await
        .with_context(|| format!("Timed out connecting to {addr}"))?
        .with_context(|| format!("Cannot connect to {addr}"))?;
    info!(%addr, "Connected");

    let calculation = client.calculate(&defs.expression, &defs.bindings).await?;
    println!("Expression: {}", defs.expression);
    println!("RPN:        {}", calculation.rpn);
    println!("Result:     {}", calculation.value);
    Ok(())
}

fn eval_file(path: &Path, options: &CompileOptions) -> Result<()> {
    let defs = Definitions::load(path)?;
    let compiled = compile(&defs.expression, options)?;

    let diagnosis = diagnose(compiled.identifiers(), &defs.bindings);
    if !diagnosis.undefined.is_empty() {
        bail!("Undefined operands: {}", diagnosis.undefined.join(", "));
    }
    for name in &diagnosis.unused {
        warn!(name = %name, "Operand is defined but not used");
    }

    let value = evaluate(compiled.program(), &defs.bindings)?;
    println!("RPN:    {}", compiled.program());
    println!("Result: {}", format_value(value));
    Ok(())
}
