//! # Task Model
//!
//! Parent grouping of the items a user submitted together. `status` is a
//! roll-up recomputed from the items by
//! [`crate::orchestration::StatusAggregator`]; only pause/resume, which live
//! outside the pipeline core, set it directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::state_machine::{StateMachineError, TaskStatus};

/// Which stages a task asked for at submission time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TaskFlow {
    /// extract + denoise + fast recognition
    Fast,
    /// extract + denoise + transcription
    Full,
}

impl TaskFlow {
    pub fn code(self) -> u8 {
        match self {
            Self::Fast => 1,
            Self::Full => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, StateMachineError> {
        match code {
            1 => Ok(Self::Fast),
            2 => Ok(Self::Full),
            other => Err(StateMachineError::InvalidCode {
                kind: "task flow",
                code: i64::from(other),
            }),
        }
    }
}

impl From<TaskFlow> for u8 {
    fn from(flow: TaskFlow) -> Self {
        flow.code()
    }
}

impl TryFrom<u8> for TaskFlow {
    type Error = StateMachineError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}

impl fmt::Display for TaskFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Full => write!(f, "full"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: i64,
    pub owner_id: i64,
    pub name: String,
    pub status: TaskStatus,
    pub flow: Option<TaskFlow>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub owner_id: i64,
    pub name: String,
    pub flow: Option<TaskFlow>,
}

impl NewTask {
    pub fn new(owner_id: i64, name: impl Into<String>) -> Self {
        Self {
            owner_id,
            name: name.into(),
            flow: None,
        }
    }

    pub fn with_flow(mut self, flow: TaskFlow) -> Self {
        self.flow = Some(flow);
        self
    }

    /// Tasks start empty
    pub fn into_task(self, task_id: i64, now: DateTime<Utc>) -> Task {
        Task {
            task_id,
            owner_id: self.owner_id,
            name: self.name,
            status: TaskStatus::Empty,
            flow: self.flow,
            created_at: now,
            updated_at: now,
        }
    }
}
