//! Conflict resolution decisions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// User answer for a job paused in `FileConflict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictDecision {
    /// Replace the existing file and continue.
    Overwrite,
    /// Keep the existing file; the job ends `Cancelled`.
    Discard,
}

impl ConflictDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictDecision::Overwrite => "overwrite",
            ConflictDecision::Discard => "discard",
        }
    }
}

impl fmt::Display for ConflictDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Ok(ConflictDecision::Overwrite),
            "discard" => Ok(ConflictDecision::Discard),
            other => Err(format!("unknown conflict decision: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_decisions() {
        assert_eq!("overwrite".parse(), Ok(ConflictDecision::Overwrite));
        assert_eq!(" Discard ".parse(), Ok(ConflictDecision::Discard));
        assert!("skip".parse::<ConflictDecision>().is_err());
    }
}
