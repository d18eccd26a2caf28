use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::test_case::TestCase;
use crate::test_vector::TestVector;

/// Artifacts demonstrating a property violation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evidence {
    pub test_case: TestCase,
    pub vector: TestVector,
    pub harness: Option<PathBuf>,
    pub witness: Option<PathBuf>,
}

impl Evidence {
    pub fn new(test_case: TestCase, vector: TestVector) -> Self {
        Self {
            test_case,
            vector,
            harness: None,
            witness: None,
        }
    }

    pub fn with_harness(mut self, harness: impl Into<PathBuf>) -> Self {
        self.harness = Some(harness.into());
        self
    }

    pub fn with_witness(mut self, witness: impl Into<PathBuf>) -> Self {
        self.witness = Some(witness.into());
        self
    }
}

/// Outcome of a run. A `False` verdict always carries its evidence.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// No violation found and naive verification was requested.
    True,
    /// A test case reached the error function.
    False(Box<Evidence>),
    Unknown,
}

impl Verdict {
    pub fn violation(evidence: Evidence) -> Self {
        Verdict::False(Box::new(evidence))
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, Verdict::False(_))
    }

    pub fn evidence(&self) -> Option<&Evidence> {
        match self {
            Verdict::False(evidence) => Some(evidence),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::True => "TRUE",
            Verdict::False(_) => "FALSE",
            Verdict::Unknown => "UNKNOWN",
        }
    }

    pub fn summary(&self) -> VerdictSummary {
        let evidence = self.evidence();
        VerdictSummary {
            verdict: self.as_str(),
            test_case: evidence.map(|e| e.test_case.name().to_string()),
            vector: evidence.map(|e| {
                e.vector
                    .entries()
                    .iter()
                    .map(|entry| entry.value.to_string())
                    .collect()
            }),
            harness: evidence.and_then(|e| e.harness.clone()),
            witness: evidence.and_then(|e| e.witness.clone()),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable view of a verdict for machine-readable output.
#[derive(Debug, Clone, Serialize)]
pub struct VerdictSummary {
    pub verdict: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_case: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub harness: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub witness: Option<PathBuf>,
}

/// Result of validating a single test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseOutcome {
    Violation,
    NotConfirmed,
    Error(String),
}

impl CaseOutcome {
    pub fn is_violation(&self) -> bool {
        matches!(self, CaseOutcome::Violation)
    }
}

/// Turn the candidate verdict of a finished validation into the final one.
///
/// A violation is kept unchanged. Without one, naive verification claims
/// `TRUE`; otherwise the candidate stands.
pub fn decide_final_verdict(candidate: Verdict, naive_verification: bool) -> Verdict {
    match candidate {
        Verdict::False(_) => candidate,
        _ if naive_verification => Verdict::True,
        other => other,
    }
}
