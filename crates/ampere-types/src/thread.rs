use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::event::EventSource;
use crate::id::{fresh_id, now_ms};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadChannel {
    EngineeringPublic,
    EngineeringPrivate,
    Operations,
}

impl ThreadChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            ThreadChannel::EngineeringPublic => "engineering.public",
            ThreadChannel::EngineeringPrivate => "engineering.private",
            ThreadChannel::Operations => "operations",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "engineering.public" => Some(ThreadChannel::EngineeringPublic),
            "engineering.private" => Some(ThreadChannel::EngineeringPrivate),
            "operations" => Some(ThreadChannel::Operations),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Open,
    WaitingForHuman,
    Closed,
}

impl ThreadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ThreadStatus::Open => "open",
            ThreadStatus::WaitingForHuman => "waiting_for_human",
            ThreadStatus::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(ThreadStatus::Open),
            "waiting_for_human" => Some(ThreadStatus::WaitingForHuman),
            "closed" => Some(ThreadStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub author: EventSource,
    pub content: String,
    pub timestamp_ms: i64,
}

impl Message {
    pub fn new(thread_id: impl Into<String>, author: EventSource, content: impl Into<String>) -> Self {
        Self {
            id: fresh_id(),
            thread_id: thread_id.into(),
            author,
            content: content.into(),
            timestamp_ms: now_ms(),
        }
    }
}

/// A conversation surface tied to a ticket. While `WaitingForHuman`, only
/// human authors may post until the thread is reopened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageThread {
    pub id: String,
    pub participants: BTreeSet<String>,
    pub channel: ThreadChannel,
    pub status: ThreadStatus,
    pub created_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
}

impl MessageThread {
    pub fn new(participants: BTreeSet<String>, channel: ThreadChannel) -> Self {
        Self {
            id: fresh_id(),
            participants,
            channel,
            status: ThreadStatus::Open,
            created_at_ms: now_ms(),
            ticket_id: None,
        }
    }

    pub fn accepts_message_from(&self, author: &EventSource) -> bool {
        match self.status {
            ThreadStatus::Open => true,
            ThreadStatus::WaitingForHuman => author.is_human(),
            ThreadStatus::Closed => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread() -> MessageThread {
        MessageThread::new(
            BTreeSet::from(["pm".to_string()]),
            ThreadChannel::EngineeringPublic,
        )
    }

    #[test]
    fn open_thread_accepts_any_author() {
        let t = thread();
        assert!(t.accepts_message_from(&EventSource::agent("eng")));
        assert!(t.accepts_message_from(&EventSource::human("alice")));
        assert!(t.accepts_message_from(&EventSource::System));
    }

    #[test]
    fn waiting_thread_accepts_only_humans() {
        let mut t = thread();
        t.status = ThreadStatus::WaitingForHuman;
        assert!(!t.accepts_message_from(&EventSource::agent("eng")));
        assert!(!t.accepts_message_from(&EventSource::System));
        assert!(t.accepts_message_from(&EventSource::human("alice")));
    }

    #[test]
    fn closed_thread_accepts_nobody() {
        let mut t = thread();
        t.status = ThreadStatus::Closed;
        assert!(!t.accepts_message_from(&EventSource::human("alice")));
    }

    #[test]
    fn channel_round_trips_through_strings() {
        for channel in [
            ThreadChannel::EngineeringPublic,
            ThreadChannel::EngineeringPrivate,
            ThreadChannel::Operations,
        ] {
            assert_eq!(ThreadChannel::parse(channel.as_str()), Some(channel));
        }
    }
}
