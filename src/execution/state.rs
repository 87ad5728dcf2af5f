//! Per-host lifecycle state machine
//!
//! `pending -> scheduled -> running -> (success | failed | timeout)`.
//! Transitions are monotone. `failed` and `timeout` are strict sinks; the
//! single re-entry edge `success -> scheduled` exists for the sync-mode
//! barrier, which re-dispatches surviving hosts for the next command.

use crate::core::error::{Error, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Scheduled,
    Running,
    Success,
    Failed,
    TimedOut,
}

impl NodeState {
    /// Whether this state contributes to success-ratio accounting
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeState::Success | NodeState::Failed | NodeState::TimedOut)
    }

    pub fn name(self) -> &'static str {
        match self {
            NodeState::Pending => "pending",
            NodeState::Scheduled => "scheduled",
            NodeState::Running => "running",
            NodeState::Success => "success",
            NodeState::Failed => "failed",
            NodeState::TimedOut => "timeout",
        }
    }

    /// Validate a transition, returning the new state
    pub fn transition(self, next: NodeState) -> Result<NodeState> {
        let valid = matches!(
            (self, next),
            (NodeState::Pending, NodeState::Scheduled)
                | (NodeState::Scheduled, NodeState::Running)
                | (NodeState::Running, NodeState::Success)
                | (NodeState::Running, NodeState::Failed)
                | (NodeState::Running, NodeState::TimedOut)
                | (NodeState::Success, NodeState::Scheduled)
        );
        if valid {
            Ok(next)
        } else {
            Err(Error::InvalidState {
                from: self.name(),
                to: next.name(),
            })
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
