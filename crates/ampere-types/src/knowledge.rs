use serde::{Deserialize, Serialize};

use crate::id::fresh_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeType {
    FromIdea,
    FromOutcome,
    FromPerception,
    FromPlan,
    FromTask,
}

impl KnowledgeType {
    pub fn as_str(self) -> &'static str {
        match self {
            KnowledgeType::FromIdea => "from_idea",
            KnowledgeType::FromOutcome => "from_outcome",
            KnowledgeType::FromPerception => "from_perception",
            KnowledgeType::FromPlan => "from_plan",
            KnowledgeType::FromTask => "from_task",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "from_idea" => Some(KnowledgeType::FromIdea),
            "from_outcome" => Some(KnowledgeType::FromOutcome),
            "from_perception" => Some(KnowledgeType::FromPerception),
            "from_plan" => Some(KnowledgeType::FromPlan),
            "from_task" => Some(KnowledgeType::FromTask),
            _ => None,
        }
    }
}

/// Episodic memory record: how something was approached and what was
/// learned, tied to the artifact that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Knowledge {
    FromIdea {
        idea_id: String,
        approach: String,
        learnings: String,
        timestamp_ms: i64,
    },
    FromOutcome {
        outcome_id: String,
        approach: String,
        learnings: String,
        timestamp_ms: i64,
    },
    FromPerception {
        perception_id: String,
        approach: String,
        learnings: String,
        timestamp_ms: i64,
    },
    FromPlan {
        plan_id: String,
        approach: String,
        learnings: String,
        timestamp_ms: i64,
    },
    FromTask {
        task_id: String,
        approach: String,
        learnings: String,
        timestamp_ms: i64,
    },
}

impl Knowledge {
    pub fn knowledge_type(&self) -> KnowledgeType {
        match self {
            Knowledge::FromIdea { .. } => KnowledgeType::FromIdea,
            Knowledge::FromOutcome { .. } => KnowledgeType::FromOutcome,
            Knowledge::FromPerception { .. } => KnowledgeType::FromPerception,
            Knowledge::FromPlan { .. } => KnowledgeType::FromPlan,
            Knowledge::FromTask { .. } => KnowledgeType::FromTask,
        }
    }

    pub fn source_id(&self) -> &str {
        match self {
            Knowledge::FromIdea { idea_id, .. } => idea_id,
            Knowledge::FromOutcome { outcome_id, .. } => outcome_id,
            Knowledge::FromPerception { perception_id, .. } => perception_id,
            Knowledge::FromPlan { plan_id, .. } => plan_id,
            Knowledge::FromTask { task_id, .. } => task_id,
        }
    }

    pub fn approach(&self) -> &str {
        match self {
            Knowledge::FromIdea { approach, .. }
            | Knowledge::FromOutcome { approach, .. }
            | Knowledge::FromPerception { approach, .. }
            | Knowledge::FromPlan { approach, .. }
            | Knowledge::FromTask { approach, .. } => approach,
        }
    }

    pub fn learnings(&self) -> &str {
        match self {
            Knowledge::FromIdea { learnings, .. }
            | Knowledge::FromOutcome { learnings, .. }
            | Knowledge::FromPerception { learnings, .. }
            | Knowledge::FromPlan { learnings, .. }
            | Knowledge::FromTask { learnings, .. } => learnings,
        }
    }

    pub fn timestamp_ms(&self) -> i64 {
        match self {
            Knowledge::FromIdea { timestamp_ms, .. }
            | Knowledge::FromOutcome { timestamp_ms, .. }
            | Knowledge::FromPerception { timestamp_ms, .. }
            | Knowledge::FromPlan { timestamp_ms, .. }
            | Knowledge::FromTask { timestamp_ms, .. } => *timestamp_ms,
        }
    }
}

/// Persisted form of a [`Knowledge`] value. Exactly one source reference is
/// set, matching `knowledge_type`, and equals `source_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub knowledge_type: KnowledgeType,
    pub approach: String,
    pub learnings: String,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity_level: Option<u32>,
    pub source_id: String,
}

impl KnowledgeEntry {
    pub fn from_knowledge(
        knowledge: &Knowledge,
        agent_id: Option<String>,
        tags: Vec<String>,
        task_type: Option<String>,
        complexity_level: Option<u32>,
    ) -> Self {
        Self {
            id: fresh_id(),
            agent_id,
            knowledge_type: knowledge.knowledge_type(),
            approach: knowledge.approach().to_string(),
            learnings: knowledge.learnings().to_string(),
            timestamp_ms: knowledge.timestamp_ms(),
            tags,
            task_type,
            complexity_level,
            source_id: knowledge.source_id().to_string(),
        }
    }

    /// Reconstruct the typed knowledge value this entry was stored from.
    pub fn to_knowledge(&self) -> Knowledge {
        let approach = self.approach.clone();
        let learnings = self.learnings.clone();
        let timestamp_ms = self.timestamp_ms;
        let source = self.source_id.clone();
        match self.knowledge_type {
            KnowledgeType::FromIdea => Knowledge::FromIdea {
                idea_id: source,
                approach,
                learnings,
                timestamp_ms,
            },
            KnowledgeType::FromOutcome => Knowledge::FromOutcome {
                outcome_id: source,
                approach,
                learnings,
                timestamp_ms,
            },
            KnowledgeType::FromPerception => Knowledge::FromPerception {
                perception_id: source,
                approach,
                learnings,
                timestamp_ms,
            },
            KnowledgeType::FromPlan => Knowledge::FromPlan {
                plan_id: source,
                approach,
                learnings,
                timestamp_ms,
            },
            KnowledgeType::FromTask => Knowledge::FromTask {
                task_id: source,
                approach,
                learnings,
                timestamp_ms,
            },
        }
    }
}
