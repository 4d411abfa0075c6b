use serde::{Deserialize, Serialize};

use crate::id::fresh_id;

/// The five phases of the cognitive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Perceive,
    Recall,
    Plan,
    Execute,
    Learn,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Perceive => "perceive",
            Phase::Recall => "recall",
            Phase::Plan => "plan",
            Phase::Execute => "execute",
            Phase::Learn => "learn",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent working state as a tagged variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AgentState {
    Blank,
    Working { ticket_id: String, phase: Phase },
}

impl AgentState {
    pub fn is_blank(&self) -> bool {
        matches!(self, AgentState::Blank)
    }
}

/// A candidate course of action produced during perception.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Idea {
    pub id: String,
    pub summary: String,
    pub approach: String,
}

impl Idea {
    pub fn new(summary: impl Into<String>, approach: impl Into<String>) -> Self {
        Self {
            id: fresh_id(),
            summary: summary.into(),
            approach: approach.into(),
        }
    }
}

/// Snapshot taken at the start of the loop: current state plus the ideas the
/// agent sees for the ticket. An empty idea list aborts the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Perception {
    pub id: String,
    pub current_state: AgentState,
    pub ideas: Vec<Idea>,
}

impl Perception {
    pub fn new(current_state: AgentState, ideas: Vec<Idea>) -> Self {
        Self {
            id: fresh_id(),
            current_state,
            ideas,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_state_is_blank() {
        assert!(AgentState::Blank.is_blank());
        let working = AgentState::Working {
            ticket_id: "t-1".into(),
            phase: Phase::Plan,
        };
        assert!(!working.is_blank());
    }

    #[test]
    fn phases_render_lowercase() {
        assert_eq!(Phase::Perceive.to_string(), "perceive");
        assert_eq!(Phase::Learn.as_str(), "learn");
    }
}
