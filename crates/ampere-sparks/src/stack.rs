// Immutable stack of sparks over a fixed affinity. push/pop return new
// stacks; effective capabilities fold by intersection, so depth only ever
// narrows what an agent may do.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::scope::FileAccessScope;
use crate::spark::{Spark, SparkKind};

/// Fixed cognitive base of an agent; chosen at construction, never swapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Affinity {
    Engineering,
    Research,
    Operations,
    Coordination,
}

impl Affinity {
    pub fn as_str(self) -> &'static str {
        match self {
            Affinity::Engineering => "engineering",
            Affinity::Research => "research",
            Affinity::Operations => "operations",
            Affinity::Coordination => "coordination",
        }
    }

    fn prompt_header(self) -> &'static str {
        match self {
            Affinity::Engineering => {
                "You are an autonomous engineering agent. You own tickets end to \
                 end: understand, plan, implement, verify."
            }
            Affinity::Research => {
                "You are an autonomous research agent. You turn open questions \
                 into grounded, sourced answers."
            }
            Affinity::Operations => {
                "You are an autonomous operations agent. You keep the system \
                 healthy and its runbooks current."
            }
            Affinity::Coordination => {
                "You are a coordination agent. You decompose work, delegate to \
                 the right agents, and track it to completion."
            }
        }
    }
}

impl std::fmt::Display for Affinity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparkStack {
    affinity: Affinity,
    sparks: Vec<Spark>,
}

impl SparkStack {
    pub fn new(affinity: Affinity) -> Self {
        Self {
            affinity,
            sparks: Vec::new(),
        }
    }

    pub fn affinity(&self) -> Affinity {
        self.affinity
    }

    pub fn depth(&self) -> usize {
        self.sparks.len()
    }

    pub fn push(&self, spark: Spark) -> SparkStack {
        let mut sparks = self.sparks.clone();
        sparks.push(spark);
        SparkStack {
            affinity: self.affinity,
            sparks,
        }
    }

    /// Returns the shrunk stack and the removed spark, or `None` on an empty
    /// stack.
    pub fn pop(&self) -> Option<(SparkStack, Spark)> {
        let mut sparks = self.sparks.clone();
        let removed = sparks.pop()?;
        Some((
            SparkStack {
                affinity: self.affinity,
                sparks,
            },
            removed,
        ))
    }

    pub fn peek(&self) -> Option<&Spark> {
        self.sparks.last()
    }

    pub fn contains(&self, kind: SparkKind) -> bool {
        self.find_spark(kind).is_some()
    }

    /// Topmost spark of the given kind.
    pub fn find_spark(&self, kind: SparkKind) -> Option<&Spark> {
        self.sparks.iter().rev().find(|spark| spark.kind == kind)
    }

    /// Affinity header plus each contribution in push order, separated by a
    /// horizontal rule. Deterministic for a given stack.
    pub fn build_system_prompt(&self) -> String {
        let mut sections = vec![self.affinity.prompt_header().to_string()];
        sections.extend(
            self.sparks
                .iter()
                .map(|spark| spark.prompt_contribution.clone()),
        );
        sections.join("\n\n---\n\n")
    }

    /// Intersection over all constraining sparks; `None` when nothing
    /// constrains tools.
    pub fn effective_allowed_tools(&self) -> Option<BTreeSet<String>> {
        let mut effective: Option<BTreeSet<String>> = None;
        for spark in &self.sparks {
            let Some(tools) = &spark.allowed_tools else {
                continue;
            };
            effective = Some(match effective {
                None => tools.clone(),
                Some(current) => current.intersection(tools).cloned().collect(),
            });
        }
        effective
    }

    /// Fold of `intersect` starting from `Permissive`.
    pub fn effective_file_access(&self) -> FileAccessScope {
        self.sparks
            .iter()
            .filter_map(|spark| spark.file_access.as_ref())
            .fold(FileAccessScope::Permissive, |acc, scope| {
                acc.intersect(scope)
            })
    }

    /// `[affinity] → [spark] → …` for logs.
    pub fn describe(&self) -> String {
        let mut parts = vec![format!("[{}]", self.affinity)];
        parts.extend(self.sparks.iter().map(|spark| format!("[{}]", spark.name)));
        parts.join(" → ")
    }
}
