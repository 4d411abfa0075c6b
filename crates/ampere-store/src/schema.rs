// Schema bootstrap. All timestamps are epoch milliseconds.

pub const SCHEMA_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS ticket (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        ticket_type TEXT NOT NULL,
        priority TEXT NOT NULL,
        status TEXT NOT NULL,
        assigned_agent_id TEXT,
        created_by_agent_id TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        due_date INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS ticket_meeting (
        ticket_id TEXT NOT NULL,
        meeting_id TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (ticket_id, meeting_id)
    )",
    "CREATE TABLE IF NOT EXISTS knowledge_entry (
        id TEXT PRIMARY KEY,
        agent_id TEXT,
        knowledge_type TEXT NOT NULL,
        approach TEXT NOT NULL,
        learnings TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        task_type TEXT,
        complexity_level INTEGER,
        source_id TEXT NOT NULL,
        idea_id TEXT,
        outcome_id TEXT,
        perception_id TEXT,
        plan_id TEXT,
        task_id TEXT
    )",
    "CREATE TABLE IF NOT EXISTS knowledge_tag (
        knowledge_id TEXT NOT NULL,
        tag TEXT NOT NULL,
        PRIMARY KEY (knowledge_id, tag)
    )",
    "CREATE TABLE IF NOT EXISTS event_log (
        event_id TEXT PRIMARY KEY,
        event_type TEXT NOT NULL,
        event_class TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        urgency TEXT NOT NULL,
        source_kind TEXT NOT NULL,
        source_id TEXT,
        payload TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_event_log_timestamp ON event_log (timestamp, event_id)",
    "CREATE TABLE IF NOT EXISTS message_thread (
        id TEXT PRIMARY KEY,
        channel TEXT NOT NULL,
        status TEXT NOT NULL,
        ticket_id TEXT,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS message (
        id TEXT PRIMARY KEY,
        thread_id TEXT NOT NULL,
        author_kind TEXT NOT NULL,
        author_id TEXT,
        content TEXT NOT NULL,
        timestamp INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_message_thread_id ON message (thread_id, timestamp)",
    "CREATE TABLE IF NOT EXISTS thread_participant (
        thread_id TEXT NOT NULL,
        agent_id TEXT NOT NULL,
        PRIMARY KEY (thread_id, agent_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_knowledge_timestamp ON knowledge_entry (timestamp DESC, id)",
    "CREATE INDEX IF NOT EXISTS idx_knowledge_tag_tag ON knowledge_tag (tag)",
];
