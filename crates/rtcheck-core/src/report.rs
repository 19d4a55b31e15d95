//! Probe outcomes and the suite summary.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::error::ProbeError;
use crate::probe::ProbeKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    /// A measured property violated its threshold.
    Failed { message: String },
    /// The harness could not complete the probe.
    Errored { message: String },
    /// The capability under test cannot run this probe.
    Skipped { reason: String },
}

impl Verdict {
    pub fn from_error(err: &ProbeError) -> Self {
        match err {
            ProbeError::Unsupported(_) => Verdict::Skipped {
                reason: err.to_string(),
            },
            err if err.is_assertion() => Verdict::Failed {
                message: err.to_string(),
            },
            err => Verdict::Errored {
                message: err.to_string(),
            },
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Verdict::Failed { .. } | Verdict::Errored { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Passed => "PASS",
            Verdict::Failed { .. } => "FAIL",
            Verdict::Errored { .. } => "ERROR",
            Verdict::Skipped { .. } => "SKIP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeOutcome {
    pub probe: ProbeKind,
    pub verdict: Verdict,
    /// Measured values, when the probe produced any.
    pub details: Value,
    pub elapsed_ms: u64,
}

impl ProbeOutcome {
    pub fn new(probe: ProbeKind, verdict: Verdict, details: Value, elapsed: Duration) -> Self {
        Self {
            probe,
            verdict,
            details,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.verdict.label(), self.probe)?;
        match &self.verdict {
            Verdict::Passed => {}
            Verdict::Failed { message } | Verdict::Errored { message } => write!(f, ": {message}")?,
            Verdict::Skipped { reason } => write!(f, ": {reason}")?,
        }
        write!(f, " ({:.1} s)", self.elapsed_ms as f64 / 1000.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SuiteReport {
    pub outcomes: Vec<ProbeOutcome>,
}

impl SuiteReport {
    pub fn outcome(&self, probe: ProbeKind) -> Option<&ProbeOutcome> {
        self.outcomes.iter().find(|outcome| outcome.probe == probe)
    }

    pub fn passed(&self) -> usize {
        self.count(|verdict| matches!(verdict, Verdict::Passed))
    }

    pub fn failed(&self) -> usize {
        self.count(Verdict::is_failure)
    }

    pub fn skipped(&self) -> usize {
        self.count(|verdict| matches!(verdict, Verdict::Skipped { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, predicate: impl Fn(&Verdict) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| predicate(&outcome.verdict))
            .count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.outcomes {
            writeln!(f, "{outcome}")?;
        }
        write!(
            f,
            "{} passed, {} failed, {} skipped",
            self.passed(),
            self.failed(),
            self.skipped()
        )
    }
}
