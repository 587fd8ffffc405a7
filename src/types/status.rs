use std::fmt;

use serde::{Deserialize, Serialize};

/// DefectStatus is the canonical defect state machine.
///
/// The permitted transition graph is declared in [`DefectStatus::can_transition`]
/// and nowhere else. Databases migrated from older deployments may still carry
/// the strings `pending` and `verified`; those are normalized on read by
/// [`DefectStatus::parse`] and are never written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectStatus {
    Open,
    InProgress,
    Completed,
    Accepted,
    Rejected,
    Reopened,
    Closed,
}

impl DefectStatus {
    /// Parses a status string. Canonical names plus the legacy aliases
    /// `pending` (-> open) and `verified` (-> completed).
    pub fn parse(s: &str) -> Option<DefectStatus> {
        match s {
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "reopened" => Some(Self::Reopened),
            "closed" => Some(Self::Closed),
            // Legacy vocabulary from pre-migration rows.
            "pending" => Some(Self::Open),
            "verified" => Some(Self::Completed),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Reopened => "reopened",
            Self::Closed => "closed",
        }
    }

    /// Returns true if the edge `from -> to` is part of the permitted graph.
    ///
    /// ```text
    /// open        -> in_progress | closed | rejected
    /// in_progress -> completed
    /// completed   -> accepted | rejected
    /// accepted    -> (terminal)
    /// rejected    -> reopened
    /// reopened    -> open
    /// closed      -> rejected | reopened
    /// ```
    #[must_use]
    pub const fn can_transition(from: DefectStatus, to: DefectStatus) -> bool {
        matches!(
            (from, to),
            (Self::Open, Self::InProgress)
                | (Self::Open, Self::Closed)
                | (Self::Open, Self::Rejected)
                | (Self::InProgress, Self::Completed)
                | (Self::Completed, Self::Accepted)
                | (Self::Completed, Self::Rejected)
                | (Self::Rejected, Self::Reopened)
                | (Self::Reopened, Self::Open)
                | (Self::Closed, Self::Rejected)
                | (Self::Closed, Self::Reopened)
        )
    }

    /// Accepted is the only state with no outgoing edges.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

impl fmt::Display for DefectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Defect priority, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn parse(s: &str) -> Option<Priority> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
