//! Risk classification result types.
//!
//! [`InferenceResult`] is always well-formed: scores live in `[0, 100]`,
//! text fields are non-blank and the suggested test list is bounded. Parsing
//! of untrusted model output lives in `prism-inference`; these types only
//! carry values that already satisfy the invariants.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{NonEmptyStaticStr, NonEmptyString};

/// Upper bound on the number of suggested tests carried in a result.
pub const MAX_SUGGESTED_TESTS: usize = 15;

/// Summary used when the model could not be consulted.
pub const FALLBACK_SUMMARY: NonEmptyStaticStr =
    NonEmptyStaticStr::new("Automated risk analysis is unavailable; review this change manually.");
/// Reason used when the model could not be consulted.
pub const FALLBACK_REASON: NonEmptyStaticStr =
    NonEmptyStaticStr::new("The inference service did not return a usable response.");
/// Summary substituted when the model answered without one.
pub const DEFAULT_SUMMARY: NonEmptyStaticStr =
    NonEmptyStaticStr::new("No summary was provided for this change.");
/// Reason substituted when the model answered without one.
pub const DEFAULT_REASON: NonEmptyStaticStr =
    NonEmptyStaticStr::new("No reasoning was provided for this assessment.");

#[derive(Debug, Error)]
#[error("percentage {0} is outside 0..=100")]
pub struct PercentOutOfRange(pub u8);

/// An integer percentage in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Percent(u8);

impl Percent {
    pub const MIN: Self = Self(0);
    pub const MIDPOINT: Self = Self(50);
    pub const MAX: Self = Self(100);

    pub const fn new(value: u8) -> Result<Self, PercentOutOfRange> {
        if value <= 100 {
            Ok(Self(value))
        } else {
            Err(PercentOutOfRange(value))
        }
    }

    /// Clamp an arbitrary score into range, rounding to the nearest integer
    /// (halves round away from zero).
    ///
    /// Returns `None` for NaN and infinities, which carry no usable score.
    #[must_use]
    pub fn from_score(score: f64) -> Option<Self> {
        if !score.is_finite() {
            return None;
        }
        let clamped = score.clamp(0.0, 100.0).round();
        Some(Self(clamped as u8))
    }

    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Percent {
    type Error = PercentOutOfRange;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Percent> for u8 {
    fn from(value: Percent) -> Self {
        value.0
    }
}

impl std::fmt::Display for Percent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Blast radius of a change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Low,
    #[default]
    Medium,
    High,
}

impl Impact {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Exact, case-sensitive match against the three wire names.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for Impact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The change under review, as handed to the risk model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    pub changed_files: Vec<String>,
    pub commit_message: String,
}

impl ChangeSet {
    #[must_use]
    pub fn new(changed_files: Vec<String>, commit_message: impl Into<String>) -> Self {
        Self {
            changed_files,
            commit_message: commit_message.into(),
        }
    }
}

/// Normalized outcome of a risk classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceResult {
    risk: Percent,
    confidence: Percent,
    impact: Impact,
    summary: NonEmptyString,
    reason: NonEmptyString,
    suggested_tests: Vec<String>,
}

impl InferenceResult {
    /// Build a result, keeping at most [`MAX_SUGGESTED_TESTS`] suggestions.
    #[must_use]
    pub fn new(
        risk: Percent,
        confidence: Percent,
        impact: Impact,
        summary: NonEmptyString,
        reason: NonEmptyString,
        mut suggested_tests: Vec<String>,
    ) -> Self {
        suggested_tests.truncate(MAX_SUGGESTED_TESTS);
        Self {
            risk,
            confidence,
            impact,
            summary,
            reason,
            suggested_tests,
        }
    }

    /// The fixed result returned whenever the model cannot be trusted.
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            risk: Percent::MIDPOINT,
            confidence: Percent::MIDPOINT,
            impact: Impact::Medium,
            summary: FALLBACK_SUMMARY.into(),
            reason: FALLBACK_REASON.into(),
            suggested_tests: Vec::new(),
        }
    }

    #[must_use]
    pub fn risk(&self) -> Percent {
        self.risk
    }

    #[must_use]
    pub fn confidence(&self) -> Percent {
        self.confidence
    }

    #[must_use]
    pub fn impact(&self) -> Impact {
        self.impact
    }

    #[must_use]
    pub fn summary(&self) -> &str {
        self.summary.as_str()
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        self.reason.as_str()
    }

    #[must_use]
    pub fn suggested_tests(&self) -> &[String] {
        &self.suggested_tests
    }
}
