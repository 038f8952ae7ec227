//! Calculation history.
//!
//! Every terminal outcome of a session (result, rejected expression, RPN
//! mismatch, failed calculation, protocol violation) becomes one
//! [`HistoryRecord`]. Records serialize with serde so reporting front ends
//! can consume them as JSON.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which client request produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Expression,
    Coefficients,
    /// A frame that could not be decoded into any request.
    Malformed,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Expression => "Expression",
            RequestKind::Coefficients => "Coefficients",
            RequestKind::Malformed => "Malformed",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    FinalResult(String),
    ExpressionError(String),
    RpnMismatch(String),
    CalculationError(String),
    ProtocolError(String),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::FinalResult(_) => "Result",
            Outcome::ExpressionError(_) => "Expression error",
            Outcome::RpnMismatch(_) => "RPN mismatch",
            Outcome::CalculationError(_) => "Calculation error",
            Outcome::ProtocolError(_) => "Protocol error",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Outcome::FinalResult(s)
            | Outcome::ExpressionError(s)
            | Outcome::RpnMismatch(s)
            | Outcome::CalculationError(s)
            | Outcome::ProtocolError(s) => s,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::FinalResult(_))
    }
}

/// One audited request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub request_kind: RequestKind,
    pub expression: String,
    /// Server RPN, empty when the expression never compiled.
    pub rpn: String,
    pub outcome: Outcome,
    /// Time since the expression was submitted, in milliseconds.
    pub elapsed_ms: f64,
}

impl HistoryRecord {
    pub fn new(
        request_kind: RequestKind,
        expression: impl Into<String>,
        rpn: impl Into<String>,
        outcome: Outcome,
        elapsed: Duration,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            request_kind,
            expression: expression.into(),
            rpn: rpn.into(),
            outcome,
            elapsed_ms: elapsed.as_micros() as f64 / 1000.0,
        }
    }
}

/// Orderings offered to history viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// Most recent first.
    Newest,
    /// Grouped by request kind, stable within a kind.
    RequestKind,
    /// Longest expression first.
    ExpressionLength,
    /// Slowest first.
    ProcessingTime,
}

/// Outcome counts over the whole log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HistorySummary {
    pub total: usize,
    pub results: usize,
    pub expression_errors: usize,
    pub rpn_mismatches: usize,
    pub calculation_errors: usize,
    pub protocol_errors: usize,
}

impl HistorySummary {
    /// Share of records that did not end in a result (0.0 for an empty log).
    pub fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.total - self.results) as f64 / self.total as f64
        }
    }
}

impl fmt::Display for HistorySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requests: {} results, {} expression errors, {} RPN mismatches, \
             {} calculation errors, {} protocol errors",
            self.total,
            self.results,
            self.expression_errors,
            self.rpn_mismatches,
            self.calculation_errors,
            self.protocol_errors
        )
    }
}

/// Shared append-only history.
///
/// Clones share the same log. Appends are serialized by the lock, so the
/// stored order is the order in which outcomes happened.
#[derive(Debug, Clone, Default)]
pub struct HistoryLog {
    records: Arc<Mutex<Vec<HistoryRecord>>>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<HistoryRecord>> {
        // A panic while holding the lock cannot leave a half-pushed record.
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append(&self, record: HistoryRecord) {
        self.lock().push(record);
    }

    pub fn extend(&self, records: impl IntoIterator<Item = HistoryRecord>) {
        self.lock().extend(records);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the log in insertion order.
    pub fn snapshot(&self) -> Vec<HistoryRecord> {
        self.lock().clone()
    }

    /// Copy of the log in the requested order.
    pub fn sorted(&self, key: SortKey) -> Vec<HistoryRecord> {
        let mut records = self.snapshot();
        match key {
            SortKey::Newest => records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
            SortKey::RequestKind => records.sort_by_key(|r| r.request_kind),
            SortKey::ExpressionLength => {
                records.sort_by_key(|r| std::cmp::Reverse(r.expression.chars().count()))
            }
            SortKey::ProcessingTime => {
                records.sort_by(|a, b| b.elapsed_ms.total_cmp(&a.elapsed_ms))
            }
        }
        records
    }

    pub fn summary(&self) -> HistorySummary {
        let records = self.lock();
        let mut summary = HistorySummary {
            total: records.len(),
            ..Default::default()
        };
        for record in records.iter() {
            match record.outcome {
                Outcome::FinalResult(_) => summary.results += 1,
                Outcome::ExpressionError(_) => summary.expression_errors += 1,
                Outcome::RpnMismatch(_) => summary.rpn_mismatches += 1,
                Outcome::CalculationError(_) => summary.calculation_errors += 1,
                Outcome::ProtocolError(_) => summary.protocol_errors += 1,
            }
        }
        summary
    }

    /// The log as a JSON array.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&*self.lock())
    }
}
