// Append-only knowledge rows with tag relations. Re-storing the same
// knowledge always produces a new entry; there is no update path. Every
// list query orders by (timestamp DESC, id) so results are deterministic.

use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use thiserror::Error;

use ampere_store::{Database, StoreError};
use ampere_types::{Knowledge, KnowledgeEntry, KnowledgeType};

#[derive(Error, Debug)]
pub enum KnowledgeError {
    #[error("knowledge entry not found: {id}")]
    EntryNotFound { id: String },

    #[error("database error: {0}")]
    Database(#[from] StoreError),

    #[error("{0}")]
    Validation(String),
}

impl From<rusqlite::Error> for KnowledgeError {
    fn from(err: rusqlite::Error) -> Self {
        KnowledgeError::Database(StoreError::Sqlite(err))
    }
}

pub type KnowledgeResult<T> = Result<T, KnowledgeError>;

/// AND-combined filter for [`KnowledgeRepository::search_knowledge_by_context`].
/// Tags OR-match within the set.
#[derive(Debug, Clone, Default)]
pub struct ContextFilter {
    pub knowledge_type: Option<KnowledgeType>,
    pub task_type: Option<String>,
    pub tags: Vec<String>,
    pub complexity_level: Option<u32>,
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
    pub limit: Option<usize>,
}

#[derive(Clone)]
pub struct KnowledgeRepository {
    db: Arc<Database>,
}

impl KnowledgeRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist a knowledge value plus its tag relations. Always inserts.
    pub async fn store_knowledge(
        &self,
        agent_id: Option<&str>,
        knowledge: &Knowledge,
        tags: &[String],
        task_type: Option<&str>,
        complexity_level: Option<u32>,
    ) -> KnowledgeResult<KnowledgeEntry> {
        let entry = KnowledgeEntry::from_knowledge(
            knowledge,
            agent_id.map(str::to_string),
            normalize_tags(tags),
            task_type.map(str::to_string),
            complexity_level,
        );
        let stored = entry.clone();
        self.db
            .with_tx(move |tx| {
                let source_columns = source_column_values(&stored);
                tx.execute(
                    "INSERT INTO knowledge_entry (id, agent_id, knowledge_type, approach, \
                     learnings, timestamp, task_type, complexity_level, source_id, \
                     idea_id, outcome_id, perception_id, plan_id, task_id) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                    params![
                        stored.id,
                        stored.agent_id,
                        stored.knowledge_type.as_str(),
                        stored.approach,
                        stored.learnings,
                        stored.timestamp_ms,
                        stored.task_type,
                        stored.complexity_level,
                        stored.source_id,
                        source_columns[0],
                        source_columns[1],
                        source_columns[2],
                        source_columns[3],
                        source_columns[4],
                    ],
                )?;
                for tag in &stored.tags {
                    tx.execute(
                        "INSERT OR IGNORE INTO knowledge_tag (knowledge_id, tag) VALUES (?1, ?2)",
                        params![stored.id, tag],
                    )?;
                }
                Ok::<(), KnowledgeError>(())
            })
            .await?;
        Ok(entry)
    }

    pub async fn get_knowledge_by_id(&self, id: &str) -> KnowledgeResult<KnowledgeEntry> {
        let id = id.to_string();
        self.db
            .with_conn(move |conn| {
                let entry = conn
                    .query_row(
                        &format!("{ENTRY_SELECT} WHERE id = ?1"),
                        params![id],
                        entry_from_row,
                    )
                    .optional()?
                    .ok_or(KnowledgeError::EntryNotFound { id })?;
                Ok(attach_tags_all(conn, vec![entry])?.remove(0))
            })
            .await
    }

    pub async fn find_knowledge_by_type(
        &self,
        knowledge_type: KnowledgeType,
    ) -> KnowledgeResult<Vec<KnowledgeEntry>> {
        self.query_entries(
            &format!("{ENTRY_SELECT} WHERE knowledge_type = ?1 {ENTRY_ORDER}"),
            vec![Value::from(knowledge_type.as_str().to_string())],
        )
        .await
    }

    pub async fn find_knowledge_by_task_type(
        &self,
        task_type: &str,
    ) -> KnowledgeResult<Vec<KnowledgeEntry>> {
        self.query_entries(
            &format!("{ENTRY_SELECT} WHERE task_type = ?1 {ENTRY_ORDER}"),
            vec![Value::from(task_type.to_string())],
        )
        .await
    }

    pub async fn find_knowledge_by_tag(&self, tag: &str) -> KnowledgeResult<Vec<KnowledgeEntry>> {
        self.find_knowledge_by_tags(std::slice::from_ref(&tag.to_string()))
            .await
    }

    /// OR-matching across the tag set.
    pub async fn find_knowledge_by_tags(
        &self,
        tags: &[String],
    ) -> KnowledgeResult<Vec<KnowledgeEntry>> {
        let tags = normalize_tags(tags);
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = placeholders(tags.len());
        self.query_entries(
            &format!(
                "{ENTRY_SELECT} WHERE id IN \
                 (SELECT DISTINCT knowledge_id FROM knowledge_tag WHERE tag IN ({placeholders})) \
                 {ENTRY_ORDER}"
            ),
            tags.into_iter().map(Value::from).collect(),
        )
        .await
    }

    /// Inclusive on both ends, newest first.
    pub async fn find_knowledge_by_time_range(
        &self,
        from_ms: i64,
        to_ms: i64,
    ) -> KnowledgeResult<Vec<KnowledgeEntry>> {
        self.query_entries(
            &format!("{ENTRY_SELECT} WHERE timestamp >= ?1 AND timestamp <= ?2 {ENTRY_ORDER}"),
            vec![Value::from(from_ms), Value::from(to_ms)],
        )
        .await
    }

    /// Token containment search over `approach ∪ learnings`, ranked by token
    /// coverage then recency. Case-insensitive.
    pub async fn find_similar_knowledge(
        &self,
        query: &str,
        limit: usize,
    ) -> KnowledgeResult<Vec<KnowledgeEntry>> {
        let tokens = tokenize(query);
        if tokens.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let candidates = self
            .query_entries(&format!("{ENTRY_SELECT} {ENTRY_ORDER}"), Vec::new())
            .await?;
        let mut scored: Vec<(usize, KnowledgeEntry)> = candidates
            .into_iter()
            .filter_map(|entry| {
                let haystack =
                    format!("{} {}", entry.approach, entry.learnings).to_lowercase();
                let hits = tokens
                    .iter()
                    .filter(|token| haystack.contains(token.as_str()))
                    .count();
                (hits > 0).then_some((hits, entry))
            })
            .collect();
        // Entries arrive newest-first, so a stable sort on coverage keeps
        // recency as the tiebreaker.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, entry)| entry)
            .collect())
    }

    /// AND across the non-empty filters; tags OR within the set.
    pub async fn search_knowledge_by_context(
        &self,
        filter: &ContextFilter,
    ) -> KnowledgeResult<Vec<KnowledgeEntry>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Value> = Vec::new();

        if let Some(knowledge_type) = filter.knowledge_type {
            args.push(Value::from(knowledge_type.as_str().to_string()));
            clauses.push(format!("knowledge_type = ?{}", args.len()));
        }
        if let Some(task_type) = &filter.task_type {
            args.push(Value::from(task_type.clone()));
            clauses.push(format!("task_type = ?{}", args.len()));
        }
        if let Some(complexity) = filter.complexity_level {
            args.push(Value::from(i64::from(complexity)));
            clauses.push(format!("complexity_level = ?{}", args.len()));
        }
        if let Some(from_ms) = filter.from_ms {
            args.push(Value::from(from_ms));
            clauses.push(format!("timestamp >= ?{}", args.len()));
        }
        if let Some(to_ms) = filter.to_ms {
            args.push(Value::from(to_ms));
            clauses.push(format!("timestamp <= ?{}", args.len()));
        }
        let tags = normalize_tags(&filter.tags);
        if !tags.is_empty() {
            let start = args.len();
            args.extend(tags.into_iter().map(Value::from));
            let slots: Vec<String> = (start + 1..=args.len()).map(|i| format!("?{i}")).collect();
            clauses.push(format!(
                "id IN (SELECT DISTINCT knowledge_id FROM knowledge_tag WHERE tag IN ({}))",
                slots.join(", ")
            ));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let limit_clause = filter
            .limit
            .map(|limit| format!(" LIMIT {limit}"))
            .unwrap_or_default();
        self.query_entries(
            &format!("{ENTRY_SELECT} {where_clause} {ENTRY_ORDER}{limit_clause}"),
            args,
        )
        .await
    }

    pub async fn get_tags_for_knowledge(&self, id: &str) -> KnowledgeResult<Vec<String>> {
        let id = id.to_string();
        self.db
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT tag FROM knowledge_tag WHERE knowledge_id = ?1 ORDER BY tag",
                )?;
                let rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
    }

    async fn query_entries(
        &self,
        sql: &str,
        args: Vec<Value>,
    ) -> KnowledgeResult<Vec<KnowledgeEntry>> {
        let sql = sql.to_string();
        self.db
            .with_conn(move |conn| {
                let entries = {
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt.query_map(params_from_iter(args.iter()), entry_from_row)?;
                    let mut out = Vec::new();
                    for row in rows {
                        out.push(row?);
                    }
                    out
                };
                attach_tags_all(conn, entries)
            })
            .await
    }
}

const ENTRY_SELECT: &str = "SELECT id, agent_id, knowledge_type, approach, learnings, \
     timestamp, task_type, complexity_level, source_id FROM knowledge_entry";
const ENTRY_ORDER: &str = "ORDER BY timestamp DESC, id";

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<KnowledgeEntry> {
    let type_raw: String = row.get(2)?;
    Ok(KnowledgeEntry {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        knowledge_type: KnowledgeType::parse(&type_raw).unwrap_or(KnowledgeType::FromTask),
        approach: row.get(3)?,
        learnings: row.get(4)?,
        timestamp_ms: row.get(5)?,
        task_type: row.get(6)?,
        complexity_level: row.get::<_, Option<i64>>(7)?.map(|v| v as u32),
        source_id: row.get(8)?,
        tags: Vec::new(),
    })
}

fn attach_tags_all(
    conn: &rusqlite::Connection,
    mut entries: Vec<KnowledgeEntry>,
) -> KnowledgeResult<Vec<KnowledgeEntry>> {
    let mut stmt =
        conn.prepare("SELECT tag FROM knowledge_tag WHERE knowledge_id = ?1 ORDER BY tag")?;
    for entry in &mut entries {
        let tag_rows = stmt.query_map(params![entry.id], |row| row.get::<_, String>(0))?;
        for tag in tag_rows {
            entry.tags.push(tag?);
        }
    }
    Ok(entries)
}

/// Exactly one of the five source columns is non-null, in variant order.
fn source_column_values(entry: &KnowledgeEntry) -> [Option<&str>; 5] {
    let mut columns = [None; 5];
    let slot = match entry.knowledge_type {
        KnowledgeType::FromIdea => 0,
        KnowledgeType::FromOutcome => 1,
        KnowledgeType::FromPerception => 2,
        KnowledgeType::FromPlan => 3,
        KnowledgeType::FromTask => 4,
    };
    columns[slot] = Some(entry.source_id.as_str());
    columns
}

fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = tags
        .iter()
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

fn tokenize(query: &str) -> Vec<String> {
    let mut tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect();
    tokens.sort();
    tokens.dedup();
    tokens
}

fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ampere_types::Knowledge;

    async fn repo() -> KnowledgeRepository {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        KnowledgeRepository::new(db)
    }

    fn knowledge(approach: &str, learnings: &str, timestamp_ms: i64) -> Knowledge {
        Knowledge::FromOutcome {
            outcome_id: ampere_types::fresh_id(),
            approach: approach.to_string(),
            learnings: learnings.to_string(),
            timestamp_ms,
        }
    }

    #[tokio::test]
    async fn store_then_get_round_trips_fields_and_tags() {
        let repo = repo().await;
        let k = knowledge("DB migration", "use transactions", 1_000);
        let entry = repo
            .store_knowledge(
                Some("eng"),
                &k,
                &["Database".into(), "migration".into()],
                Some("chore"),
                Some(2),
            )
            .await
            .unwrap();

        let read = repo.get_knowledge_by_id(&entry.id).await.unwrap();
        assert_eq!(read.approach, "DB migration");
        assert_eq!(read.learnings, "use transactions");
        assert_eq!(read.timestamp_ms, 1_000);
        assert_eq!(read.knowledge_type, KnowledgeType::FromOutcome);
        assert_eq!(read.source_id, entry.source_id);
        let tags = repo.get_tags_for_knowledge(&entry.id).await.unwrap();
        assert_eq!(tags, vec!["database", "migration"]);
    }

    #[tokio::test]
    async fn restoring_creates_a_new_entry() {
        let repo = repo().await;
        let k = knowledge("same", "same", 1);
        let first = repo.store_knowledge(None, &k, &[], None, None).await.unwrap();
        let second = repo.store_knowledge(None, &k, &[], None, None).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(
            repo.find_knowledge_by_type(KnowledgeType::FromOutcome)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn tags_or_match_across_the_set() {
        let repo = repo().await;
        repo.store_knowledge(
            None,
            &knowledge("DB migration", "", 1),
            &["database".into(), "migration".into()],
            None,
            None,
        )
        .await
        .unwrap();
        repo.store_knowledge(
            None,
            &knowledge("API design", "", 2),
            &["api".into()],
            None,
            None,
        )
        .await
        .unwrap();

        let both = repo
            .find_knowledge_by_tags(&["migration".into(), "api".into()])
            .await
            .unwrap();
        assert_eq!(both.len(), 2);

        let none = repo.find_knowledge_by_tag("security").await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn time_range_is_inclusive_and_descending() {
        let repo = repo().await;
        for ts in [100, 200, 300] {
            repo.store_knowledge(None, &knowledge("a", "b", ts), &[], None, None)
                .await
                .unwrap();
        }
        let range = repo.find_knowledge_by_time_range(100, 200).await.unwrap();
        let stamps: Vec<_> = range.iter().map(|e| e.timestamp_ms).collect();
        assert_eq!(stamps, vec![200, 100]);
    }

    #[tokio::test]
    async fn similar_knowledge_ranks_by_token_coverage() {
        let repo = repo().await;
        repo.store_knowledge(
            None,
            &knowledge("database schema migration", "kept it reversible", 100),
            &[],
            None,
            None,
        )
        .await
        .unwrap();
        repo.store_knowledge(
            None,
            &knowledge("migration scripts", "plain sql", 200),
            &[],
            None,
            None,
        )
        .await
        .unwrap();
        repo.store_knowledge(None, &knowledge("frontend styling", "css", 300), &[], None, None)
            .await
            .unwrap();

        let similar = repo
            .find_similar_knowledge("database migration", 5)
            .await
            .unwrap();
        assert_eq!(similar.len(), 2);
        assert_eq!(similar[0].approach, "database schema migration");

        let capped = repo.find_similar_knowledge("migration", 1).await.unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn context_search_ands_filters() {
        let repo = repo().await;
        repo.store_knowledge(
            Some("eng"),
            &knowledge("a", "b", 100),
            &["db".into()],
            Some("bugfix"),
            Some(1),
        )
        .await
        .unwrap();
        repo.store_knowledge(
            Some("eng"),
            &knowledge("c", "d", 200),
            &["db".into()],
            Some("feature"),
            Some(3),
        )
        .await
        .unwrap();

        let hits = repo
            .search_knowledge_by_context(&ContextFilter {
                task_type: Some("bugfix".into()),
                tags: vec!["db".into()],
                ..ContextFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].approach, "a");

        let timed = repo
            .search_knowledge_by_context(&ContextFilter {
                from_ms: Some(150),
                limit: Some(10),
                ..ContextFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(timed.len(), 1);
        assert_eq!(timed[0].approach, "c");
    }

    #[tokio::test]
    async fn missing_entry_reports_not_found() {
        let repo = repo().await;
        assert!(matches!(
            repo.get_knowledge_by_id("nope").await.unwrap_err(),
            KnowledgeError::EntryNotFound { .. }
        ));
    }
}
