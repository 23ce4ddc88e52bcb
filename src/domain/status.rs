//! Run status and run kind discriminators.

use rusqlite::ToSql;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Which of the three run tables a record lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Data,
    Train,
    Generation,
}

impl RunKind {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Data => "data",
            RunKind::Train => "train",
            RunKind::Generation => "generation",
        }
    }
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a run.
///
/// Not every kind uses every state: data runs go `running -> success|failed`,
/// training runs go `pending -> running -> success|failed`, and generation runs
/// are only ever created as `success` or `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Persisted, worker not yet known to be started
    Pending,
    /// Worker is executing
    Running,
    /// Worker exited 0 and produced its outputs
    Success,
    /// Worker exited non-zero, could not be launched, or was interrupted
    Failed,
}

impl RunStatus {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    /// Parse the stored representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "success" => Some(RunStatus::Success),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }

    /// Terminal status for a worker exit.
    pub fn from_exit(success: bool) -> Self {
        if success { RunStatus::Success } else { RunStatus::Failed }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ToSql for RunStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for RunStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        RunStatus::parse(s).ok_or_else(|| FromSqlError::Other(format!("unknown run status: {}", s).into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_matches_as_str() {
        for status in [RunStatus::Pending, RunStatus::Running, RunStatus::Success, RunStatus::Failed] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::parse("complete"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Success.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn test_from_exit() {
        assert_eq!(RunStatus::from_exit(true), RunStatus::Success);
        assert_eq!(RunStatus::from_exit(false), RunStatus::Failed);
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&RunStatus::Success).unwrap();
        assert_eq!(json, "\"success\"");
        let kind: RunKind = serde_json::from_str("\"generation\"").unwrap();
        assert_eq!(kind, RunKind::Generation);
    }
}
