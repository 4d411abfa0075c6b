// Bridges an agent's in-RAM working memory with the knowledge repository.
// The repository never scores; relevance is a query-time heuristic owned by
// this service.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use ampere_types::{now_ms, Knowledge, KnowledgeEntry};

use crate::repository::{ContextFilter, KnowledgeRepository, KnowledgeResult};

/// What an agent is currently trying to do, used to pull relevant episodes.
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    pub task_type: Option<String>,
    pub tags: Vec<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeWithScore {
    pub entry: KnowledgeEntry,
    pub knowledge: Knowledge,
    /// In `[0, 1]`; assigned by the memory service at query time.
    pub relevance_score: f64,
}

/// Agent-owned key/value facts. Mutation goes through [`WorkingMemory::set`]
/// which also notifies observers via a revision counter.
#[derive(Debug)]
pub struct WorkingMemory {
    facts: BTreeMap<String, String>,
    revision: u64,
    notify: watch::Sender<u64>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            facts: BTreeMap::new(),
            revision: 0,
            notify,
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.facts.insert(key.into(), value.into());
        self.revision += 1;
        self.notify.send_replace(self.revision);
    }

    pub fn forget(&mut self, key: &str) -> Option<String> {
        let removed = self.facts.remove(key);
        if removed.is_some() {
            self.revision += 1;
            self.notify.send_replace(self.revision);
        }
        removed
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.facts.get(key).map(String::as_str)
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.facts.clone()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn observe(&self) -> watch::Receiver<u64> {
        self.notify.subscribe()
    }
}

impl Default for WorkingMemory {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MemoryService {
    agent_id: String,
    repository: Arc<KnowledgeRepository>,
    working: Mutex<WorkingMemory>,
}

impl MemoryService {
    pub fn new(agent_id: impl Into<String>, repository: Arc<KnowledgeRepository>) -> Self {
        Self {
            agent_id: agent_id.into(),
            repository,
            working: Mutex::new(WorkingMemory::new()),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub async fn remember(&self, key: impl Into<String>, fact: impl Into<String>) {
        self.working.lock().await.set(key, fact);
    }

    pub async fn working_snapshot(&self) -> BTreeMap<String, String> {
        self.working.lock().await.snapshot()
    }

    pub async fn observe_working_memory(&self) -> watch::Receiver<u64> {
        self.working.lock().await.observe()
    }

    pub async fn store_knowledge(
        &self,
        knowledge: &Knowledge,
        tags: &[String],
        task_type: Option<&str>,
    ) -> KnowledgeResult<KnowledgeEntry> {
        self.repository
            .store_knowledge(Some(&self.agent_id), knowledge, tags, task_type, None)
            .await
    }

    /// Pull episodes relevant to `context`: context search plus similarity
    /// search, deduplicated, scored, newest-preferred, capped at `limit`.
    pub async fn recall_relevant_knowledge(
        &self,
        context: &MemoryContext,
        limit: usize,
    ) -> KnowledgeResult<Vec<KnowledgeWithScore>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<KnowledgeEntry> = Vec::new();
        if context.task_type.is_some() || !context.tags.is_empty() {
            candidates.extend(
                self.repository
                    .search_knowledge_by_context(&ContextFilter {
                        task_type: context.task_type.clone(),
                        tags: context.tags.clone(),
                        limit: Some(limit * 4),
                        ..ContextFilter::default()
                    })
                    .await?,
            );
        }
        if !context.description.trim().is_empty() {
            candidates.extend(
                self.repository
                    .find_similar_knowledge(&context.description, limit * 4)
                    .await?,
            );
        }

        let mut seen = std::collections::BTreeSet::new();
        candidates.retain(|entry| seen.insert(entry.id.clone()));

        let now = now_ms();
        let mut scored: Vec<KnowledgeWithScore> = candidates
            .into_iter()
            .map(|entry| {
                let relevance_score = relevance_score(&entry, context, now);
                KnowledgeWithScore {
                    knowledge: entry.to_knowledge(),
                    entry,
                    relevance_score,
                }
            })
            .collect();
        scored.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.entry.timestamp_ms.cmp(&a.entry.timestamp_ms))
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }
}

/// Weighted blend of tag overlap, token coverage, task-type match, and
/// recency. Clamped to `[0, 1]`.
fn relevance_score(entry: &KnowledgeEntry, context: &MemoryContext, now_ms: i64) -> f64 {
    let tag_overlap = if context.tags.is_empty() {
        0.0
    } else {
        let hits = context
            .tags
            .iter()
            .filter(|tag| {
                entry
                    .tags
                    .iter()
                    .any(|have| have.eq_ignore_ascii_case(tag))
            })
            .count();
        hits as f64 / context.tags.len() as f64
    };

    let token_coverage = {
        let tokens: Vec<String> = context
            .description
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect();
        if tokens.is_empty() {
            0.0
        } else {
            let haystack = format!("{} {}", entry.approach, entry.learnings).to_lowercase();
            let hits = tokens
                .iter()
                .filter(|token| haystack.contains(token.as_str()))
                .count();
            hits as f64 / tokens.len() as f64
        }
    };

    let task_type_match = match (&context.task_type, &entry.task_type) {
        (Some(wanted), Some(have)) if wanted.eq_ignore_ascii_case(have) => 1.0,
        _ => 0.0,
    };

    // Linear decay over thirty days.
    let age_ms = (now_ms - entry.timestamp_ms).max(0) as f64;
    let recency = (1.0 - age_ms / (30.0 * 86_400_000.0)).clamp(0.0, 1.0);

    (0.35 * tag_overlap + 0.3 * token_coverage + 0.2 * task_type_match + 0.15 * recency)
        .clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ampere_store::Database;
    use ampere_types::Knowledge;

    async fn service() -> MemoryService {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        MemoryService::new("eng", Arc::new(KnowledgeRepository::new(db)))
    }

    fn knowledge(approach: &str, timestamp_ms: i64) -> Knowledge {
        Knowledge::FromOutcome {
            outcome_id: ampere_types::fresh_id(),
            approach: approach.to_string(),
            learnings: String::new(),
            timestamp_ms,
        }
    }

    #[tokio::test]
    async fn working_memory_notifies_observers() {
        let service = service().await;
        let mut observer = service.observe_working_memory().await;
        service.remember("branch", "feature/x").await;
        observer.changed().await.unwrap();
        assert_eq!(*observer.borrow(), 1);
        assert_eq!(
            service.working_snapshot().await.get("branch").map(String::as_str),
            Some("feature/x")
        );
    }

    #[test]
    fn forgetting_bumps_the_revision_only_when_present() {
        let mut working = WorkingMemory::new();
        working.set("k", "v");
        assert_eq!(working.revision(), 1);
        assert_eq!(working.forget("k"), Some("v".to_string()));
        assert_eq!(working.revision(), 2);
        assert_eq!(working.forget("k"), None);
        assert_eq!(working.revision(), 2);
        assert_eq!(working.get("k"), None);
    }

    #[tokio::test]
    async fn recall_combines_tag_and_similarity_hits() {
        let service = service().await;
        service
            .store_knowledge(
                &knowledge("database migration plan", now_ms()),
                &["database".into()],
                Some("chore"),
            )
            .await
            .unwrap();
        service
            .store_knowledge(&knowledge("ui polish", now_ms()), &["frontend".into()], None)
            .await
            .unwrap();

        let recalled = service
            .recall_relevant_knowledge(
                &MemoryContext {
                    task_type: Some("chore".into()),
                    tags: vec!["database".into()],
                    description: "migration".into(),
                },
                5,
            )
            .await
            .unwrap();
        assert_eq!(recalled.len(), 1);
        assert!(recalled[0].relevance_score > 0.5);
        assert_eq!(recalled[0].entry.approach, "database migration plan");
        assert_eq!(recalled[0].knowledge, recalled[0].entry.to_knowledge());
    }

    #[tokio::test]
    async fn recall_is_empty_without_matches() {
        let service = service().await;
        let recalled = service
            .recall_relevant_knowledge(
                &MemoryContext {
                    description: "anything".into(),
                    ..MemoryContext::default()
                },
                5,
            )
            .await
            .unwrap();
        assert!(recalled.is_empty());
    }

    #[tokio::test]
    async fn recall_honours_limit_and_ranks_by_score() {
        let service = service().await;
        let now = now_ms();
        service
            .store_knowledge(
                &knowledge("migration with rollback", now),
                &["database".into()],
                None,
            )
            .await
            .unwrap();
        service
            .store_knowledge(&knowledge("migration notes", now - 1_000), &[], None)
            .await
            .unwrap();
        service
            .store_knowledge(&knowledge("migration draft", now - 2_000), &[], None)
            .await
            .unwrap();

        let recalled = service
            .recall_relevant_knowledge(
                &MemoryContext {
                    tags: vec!["database".into()],
                    description: "migration".into(),
                    ..MemoryContext::default()
                },
                2,
            )
            .await
            .unwrap();
        assert_eq!(recalled.len(), 2);
        assert_eq!(recalled[0].entry.approach, "migration with rollback");
        assert!(recalled[0].relevance_score >= recalled[1].relevance_score);
    }
}
