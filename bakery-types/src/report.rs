use crate::tag::Tag;
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one driver run.
///
/// `Initialized → Resolving → Executing → Committing → {Completed, RolledBack}`;
/// any failure lands in `RolledBack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Initialized,
    Resolving,
    Executing,
    Committing,
    Completed,
    RolledBack,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::RolledBack)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Initialized => "initialized",
            RunState::Resolving => "resolving",
            RunState::Executing => "executing",
            RunState::Committing => "committing",
            RunState::Completed => "completed",
            RunState::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub schema: String,
    pub run_id: String,
    pub transform: String,
    pub state: RunState,
    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// In commit (tag) order.
    #[serde(default)]
    pub outputs: Vec<CommittedOutput>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunFailure>,
}

impl RunReport {
    pub fn new(run_id: impl Into<String>, transform: impl Into<String>) -> Self {
        Self {
            schema: crate::schema::BAKERY_RUN_V1.to_string(),
            run_id: run_id.into(),
            transform: transform.into(),
            state: RunState::Initialized,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            outputs: vec![],
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunState::Completed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedOutput {
    pub tag: Tag,
    /// Position within a fileset output; absent for plain tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<usize>,
    pub path: Utf8PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    /// `composition`, `resolution`, `execution` or `commit`.
    pub category: String,
    /// Taxonomy name, e.g. `OutputNotWrittenError`.
    pub kind: String,
    pub message: String,
}
