use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Classification every stage failure is reduced to before it reaches the
/// Ledger. The Ledger owns all retry policy; runners and adapters never
/// retry internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Timeouts, rate limits, connection resets. Retried with exponential
    /// backoff and jitter up to the attempt budget.
    Transient,
    /// Unsupported format, corrupt bytes, empty content. Terminal on the
    /// first attempt.
    Malformed,
    /// Storage or quota limits. Longer backoff, smaller attempt budget.
    ResourceExhausted,
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureKind::Malformed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "TRANSIENT",
            FailureKind::Malformed => "MALFORMED",
            FailureKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
        }
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRANSIENT" => Ok(FailureKind::Transient),
            "MALFORMED" => Ok(FailureKind::Malformed),
            "RESOURCE_EXHAUSTED" => Ok(FailureKind::ResourceExhausted),
            _ => Err(format!("Invalid failure kind: {}", s)),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a stage runner reports to `JobLedger::fail`.
#[derive(Debug, Clone, PartialEq)]
pub struct StageFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Server-provided retry hint (e.g. a 429 Retry-After). Honored when it
    /// exceeds the computed backoff.
    pub retry_after: Option<Duration>,
}

impl StageFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Malformed,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::ResourceExhausted,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, hint: Option<Duration>) -> Self {
        self.retry_after = hint;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
