//! # Continuation Policy
//!
//! Decides whether a successful stage callback should immediately dispatch
//! the next stage. Deployments have disagreed on this over time, so it is an
//! explicit setting instead of a baked-in heuristic:
//!
//! - `manual` - never continue; clients dispatch every stage themselves
//! - `follow_task_flow` - the task's flow picks the route
//!   (fast: extract → clear → fast, full: extract → clear → transcribe)
//! - `full_chain` - extract → clear → fast → transcribe

use serde::{Deserialize, Serialize};

use crate::models::{Item, TaskFlow};
use crate::state_machine::StageAction;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationPolicy {
    #[default]
    Manual,
    FollowTaskFlow,
    FullChain,
}

impl ContinuationPolicy {
    /// Stage to dispatch after `completed` succeeded on `item`, if any.
    ///
    /// Stages the item already finished for its current state are skipped
    /// over rather than re-dispatched.
    pub fn next_stage(
        self,
        completed: StageAction,
        item: &Item,
        flow: Option<TaskFlow>,
    ) -> Option<StageAction> {
        let mut current = completed;
        loop {
            let next = self.successor(current, flow)?;
            if !item.progress().has_completed(next) {
                return Some(next);
            }
            current = next;
        }
    }

    fn successor(self, stage: StageAction, flow: Option<TaskFlow>) -> Option<StageAction> {
        use StageAction::*;
        match self {
            Self::Manual => None,
            Self::FollowTaskFlow => match (flow?, stage) {
                (_, Extract) => Some(Clear),
                (TaskFlow::Fast, Clear) => Some(Fast),
                (TaskFlow::Full, Clear) => Some(Transcribe),
                _ => None,
            },
            Self::FullChain => match stage {
                Extract => Some(Clear),
                Clear => Some(Fast),
                Fast => Some(Transcribe),
                Transcribe => None,
            },
        }
    }
}
