//! Integration tests for the calculation server.
//!
//! Each test starts a real server on an ephemeral localhost port and talks to
//! it either through `ExprClient` or over a raw `TcpStream` when the test
//! needs control over individual bytes.
//!
//! # Running
//!
//! ```bash
//! cargo test --test server_integration -- --nocapture
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use exprcalc::client::{ClientError, ExprClient};
use exprcalc::expr::{Bindings, CompileOptions};
use exprcalc::history::{HistoryLog, Outcome, RequestKind, SortKey};
use exprcalc::protocol::{read_frame, ClientMessage, FrameDecoder, ServerMessage};
use exprcalc::server::Server;

/// Test timeout to prevent hanging tests.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

struct TestServer {
    addr: SocketAddr,
    history: HistoryLog,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start(options: CompileOptions) -> Self {
        let server = Server::bind("127.0.0.1:0", options)
            .await
            .expect("Failed to bind test server");
        let addr = server.local_addr().unwrap();
        let history = server.history();
        let (stop, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async move {
            let _ = stop_rx.await;
        }));
        Self {
            addr,
            history,
            stop: Some(stop),
            handle,
        }
    }

    async fn client(&self) -> ExprClient {
        let mut client = ExprClient::connect(self.addr, CompileOptions::default())
            .await
            .expect("Failed to connect");
        client.set_timeout(Duration::from_secs(5));
        client
    }

    async fn shutdown(mut self) -> HistoryLog {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        timeout(TEST_TIMEOUT, self.handle)
            .await
            .expect("Server did not stop")
            .expect("Server task panicked")
            .expect("Server failed");
        self.history
    }
}

fn bindings(pairs: &[(&str, f64)]) -> Bindings {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

async fn next_reply(stream: &mut TcpStream, decoder: &mut FrameDecoder) -> ServerMessage {
    let frame = timeout(TEST_TIMEOUT, read_frame(stream, decoder))
        .await
        .expect("Test timed out")
        .expect("Read failed");
    ServerMessage::decode(&frame).expect("Decode failed")
}

#[tokio::test]
async fn test_full_calculation() {
    let server = TestServer::start(CompileOptions::default()).await;
    let mut client = server.client().await;

    let calc = timeout(
        TEST_TIMEOUT,
        client.calculate("(a+2)*[b-1]", &bindings(&[("a", 3.0), ("b", 4.0)])),
    )
    .await
    .expect("Test timed out")
    .expect("Calculation failed");

    assert_eq!(calc.rpn, "a 2 + b 1 - *");
    assert_eq!(calc.value, "15");

    // The same connection serves a second expression.
    let calc = client
        .calculate("1/3", &Bindings::new())
        .await
        .expect("Calculation failed");
    assert_eq!(calc.value, "0.3333333333");

    let history = server.shutdown().await;
    let records = history.snapshot();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].expression, "(a+2)*[b-1]");
    assert_eq!(records[0].rpn, "a 2 + b 1 - *");
    assert_eq!(records[0].outcome, Outcome::FinalResult("15".into()));
    assert!(records[0].elapsed_ms >= 0.0);
}

#[tokio::test]
async fn test_calculation_errors_are_recoverable() {
    let server = TestServer::start(CompileOptions::default()).await;
    let mut client = server.client().await;

    let err = client
        .calculate("x/(y-y)", &bindings(&[("x", 1.0), ("y", 2.0)]))
        .await
        .unwrap_err();
    assert!(
        matches!(&err, ClientError::CalculationFailed(m) if m == "division by zero"),
        "got {err:?}"
    );

    let err = client
        .calculate("x+z", &bindings(&[("x", 1.0)]))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::CalculationFailed(_)));

    let calc = client.calculate("-5+3", &Bindings::new()).await.unwrap();
    assert_eq!(calc.rpn, "5 ~ 3 +");
    assert_eq!(calc.value, "-2");

    let summary = server.shutdown().await.summary();
    assert_eq!(summary.calculation_errors, 2);
    assert_eq!(summary.results, 1);
}

#[tokio::test]
async fn test_rpn_mismatch_over_the_wire() {
    let server = TestServer::start(CompileOptions::default()).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let mut decoder = FrameDecoder::new();

    let submission = ClientMessage::ExpressionSubmission {
        expression: "x+1".into(),
        client_rpn: "x 1 -".into(),
    };
    stream.write_all(&submission.encode().unwrap()).await.unwrap();
    assert_eq!(
        next_reply(&mut stream, &mut decoder).await,
        ServerMessage::RpnMismatch {
            server_rpn: "x 1 +".into()
        }
    );

    // Extra whitespace in the client RPN still matches.
    let submission = ClientMessage::ExpressionSubmission {
        expression: "x+1".into(),
        client_rpn: "  x   1 + ".into(),
    };
    stream.write_all(&submission.encode().unwrap()).await.unwrap();
    assert_eq!(
        next_reply(&mut stream, &mut decoder).await,
        ServerMessage::RpnMatchRequestCoefficients
    );

    let history = server.shutdown().await;
    let records = history.snapshot();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, Outcome::RpnMismatch("x 1 +".into()));
}

#[tokio::test]
async fn test_expression_error_reports_position() {
    let server = TestServer::start(CompileOptions::default()).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let mut decoder = FrameDecoder::new();

    let submission = ClientMessage::ExpressionSubmission {
        expression: "1+2)".into(),
        client_rpn: String::new(),
    };
    stream.write_all(&submission.encode().unwrap()).await.unwrap();
    match next_reply(&mut stream, &mut decoder).await {
        ServerMessage::ExpressionError { message } => {
            assert!(message.contains("position 3"), "got: {message}")
        }
        other => panic!("Expected ExpressionError, got {:?}", other),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_protocol_error_closes_connection() {
    let server = TestServer::start(CompileOptions::default()).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let mut decoder = FrameDecoder::new();

    let coefficients = ClientMessage::CoefficientsSubmission {
        bindings: bindings(&[("x", 1.0)]),
    };
    stream.write_all(&coefficients.encode().unwrap()).await.unwrap();
    assert!(matches!(
        next_reply(&mut stream, &mut decoder).await,
        ServerMessage::ProtocolError { .. }
    ));

    // The server shuts the socket down after the error.
    let mut rest = Vec::new();
    let n = timeout(TEST_TIMEOUT, stream.read_to_end(&mut rest))
        .await
        .expect("Test timed out")
        .unwrap_or(0);
    assert_eq!(n, 0);

    // Other clients are unaffected.
    let mut client = server.client().await;
    let calc = client.calculate("2*3", &Bindings::new()).await.unwrap();
    assert_eq!(calc.value, "6");

    let history = server.shutdown().await;
    let slowest_first = history.sorted(SortKey::ProcessingTime);
    assert_eq!(slowest_first.len(), 2);
    let violation = history
        .snapshot()
        .into_iter()
        .find(|r| matches!(r.outcome, Outcome::ProtocolError(_)))
        .expect("protocol error recorded");
    assert_eq!(violation.request_kind, RequestKind::Coefficients);
    assert_eq!(violation.expression, "");
}

#[tokio::test]
async fn test_frames_split_across_writes() {
    let server = TestServer::start(CompileOptions::default()).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.set_nodelay(true).unwrap();
    let mut decoder = FrameDecoder::new();

    let mut bytes = ClientMessage::ExpressionSubmission {
        expression: "{x*x}".into(),
        client_rpn: "x x *".into(),
    }
    .encode()
    .unwrap();
    bytes.extend(
        ClientMessage::CoefficientsSubmission {
            bindings: bindings(&[("x", 1.5)]),
        }
        .encode()
        .unwrap(),
    );

    for byte in &bytes {
        stream.write_all(std::slice::from_ref(byte)).await.unwrap();
        stream.flush().await.unwrap();
    }

    assert_eq!(
        next_reply(&mut stream, &mut decoder).await,
        ServerMessage::RpnMatchRequestCoefficients
    );
    assert_eq!(
        next_reply(&mut stream, &mut decoder).await,
        ServerMessage::FinalResult {
            value: "2.25".into()
        }
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_clients() {
    let server = TestServer::start(CompileOptions::default()).await;

    let mut tasks = Vec::new();
    for i in 0..8 {
        let mut client = server.client().await;
        tasks.push(tokio::spawn(async move {
            let calc = client
                .calculate("n*10+1", &bindings(&[("n", f64::from(i))]))
                .await
                .expect("Calculation failed");
            (i, calc.value)
        }));
    }

    for task in tasks {
        let (i, value) = timeout(TEST_TIMEOUT, task)
            .await
            .expect("Test timed out")
            .unwrap();
        assert_eq!(value, (i * 10 + 1).to_string());
    }

    assert_eq!(server.shutdown().await.len(), 8);
}

#[tokio::test]
async fn test_power_operator_is_opt_in() {
    let plain = TestServer::start(CompileOptions::default()).await;
    let mut stream = TcpStream::connect(plain.addr).await.unwrap();
    let mut decoder = FrameDecoder::new();
    let submission = ClientMessage::ExpressionSubmission {
        expression: "2^3".into(),
        client_rpn: "2 3 ^".into(),
    };
    stream.write_all(&submission.encode().unwrap()).await.unwrap();
    assert!(matches!(
        next_reply(&mut stream, &mut decoder).await,
        ServerMessage::ExpressionError { .. }
    ));
    plain.shutdown().await;

    let options = CompileOptions { allow_power: true };
    let server = TestServer::start(options).await;
    let mut client = ExprClient::connect(server.addr, options).await.unwrap();
    let calc = client.calculate("2^3^2", &Bindings::new()).await.unwrap();
    assert_eq!(calc.rpn, "2 3 2 ^ ^");
    assert_eq!(calc.value, "512");
    server.shutdown().await;
}
