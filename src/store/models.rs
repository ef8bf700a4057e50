use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use siteaudit_common::{AuditMode, AuditStatus};

/// Lifecycle of one phase entry in an audit's history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Running,
    Completed,
    Failed,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for PhaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid phase status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditPhase {
    pub id: i64,
    pub audit_id: i64,
    pub phase: AuditStatus,
    pub status: PhaseStatus,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

/// A row of the durable check queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: i64,
    pub page_id: i64,
    pub check_key: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub worker_id: Option<String>,
    pub last_error: Option<String>,
}

/// Result counts for one category, as shown to a polling client.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CategoryCounts {
    pub passed: u32,
    pub failed: u32,
    pub warning: u32,
    pub not_applicable: u32,
}

impl CategoryCounts {
    pub fn total(&self) -> u32 {
        self.passed + self.failed + self.warning + self.not_applicable
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobCounts {
    pub queued: u32,
    pub running: u32,
    pub done: u32,
    pub failed: u32,
}

/// Read model behind `siteaudit status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditProgress {
    pub audit_id: i64,
    pub url: String,
    pub mode: AuditMode,
    pub status: AuditStatus,
    pub current_phase: Option<String>,
    pub overall_score: Option<f64>,
    pub error_message: Option<String>,
    pub pages_total: u32,
    /// Page counts keyed by testing status
    pub pages_by_testing_status: BTreeMap<String, u32>,
    pub categories: BTreeMap<String, CategoryCounts>,
    pub jobs: JobCounts,
}

impl AuditProgress {
    pub fn results_total(&self) -> u32 {
        self.categories.values().map(CategoryCounts::total).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_and_job_status_round_trip() {
        for s in [PhaseStatus::Running, PhaseStatus::Completed, PhaseStatus::Failed] {
            assert_eq!(s.as_str().parse::<PhaseStatus>().unwrap(), s);
        }
        for s in [JobStatus::Queued, JobStatus::Running, JobStatus::Done, JobStatus::Failed] {
            assert_eq!(s.as_str().parse::<JobStatus>().unwrap(), s);
        }
        assert!("paused".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_category_counts_total() {
        let counts = CategoryCounts {
            passed: 2,
            failed: 1,
            warning: 1,
            not_applicable: 3,
        };
        assert_eq!(counts.total(), 7);
    }
}
