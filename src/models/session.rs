//! Conversation sessions and their bounded turn history

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::Locale;
use super::pipeline::ChartKind;

/// One completed (utterance, sql, visualization, confidence) record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub query: String,
    pub sql: String,
    pub visualization: ChartKind,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// Rolling context fed back into SQL generation for follow-up questions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    pub last_query: Option<String>,
    pub last_sql: Option<String>,
    pub last_tables: Vec<String>,
    pub data_source_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: String,
    pub locale: Locale,
    pub conversation_turns: VecDeque<ConversationTurn>,
    pub current_context: SessionContext,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: Uuid, user_id: &str, locale: Locale, ttl_seconds: i64) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            user_id: user_id.to_string(),
            locale,
            conversation_turns: VecDeque::new(),
            current_context: SessionContext::default(),
            created_at: now,
            last_activity_at: now,
            expires_at: now + Duration::seconds(ttl_seconds),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Append a completed turn, evicting the oldest when the ring is full,
    /// and fold the turn into `current_context`.
    pub fn push_turn(&mut self, turn: ConversationTurn, capacity: usize, tables: Vec<String>) {
        self.current_context.last_query = Some(turn.query.clone());
        self.current_context.last_sql = Some(turn.sql.clone());
        if !tables.is_empty() {
            self.current_context.data_source_hint = tables.first().cloned();
            self.current_context.last_tables = tables;
        }

        self.conversation_turns.push_back(turn);
        while self.conversation_turns.len() > capacity {
            self.conversation_turns.pop_front();
        }
    }

    /// Refresh activity and slide the expiry forward, capped at
    /// `created_at + max_ttl`.
    pub fn touch(&mut self, ttl_seconds: i64, max_ttl_seconds: i64) {
        let now = Utc::now();
        self.last_activity_at = now;
        let hard_cap = self.created_at + Duration::seconds(max_ttl_seconds);
        self.expires_at = (now + Duration::seconds(ttl_seconds)).min(hard_cap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(query: &str) -> ConversationTurn {
        ConversationTurn {
            id: Uuid::new_v4(),
            query: query.to_string(),
            sql: format!("SELECT 1 -- {}", query),
            visualization: ChartKind::Table,
            confidence: 80.0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn ring_never_exceeds_capacity_and_keeps_order() {
        let mut session = Session::new(Uuid::new_v4(), "u-1", Locale::En, 3600);
        for i in 0..10 {
            session.push_turn(turn(&format!("q{}", i)), 4, vec!["billing".into()]);
        }
        assert_eq!(session.conversation_turns.len(), 4);
        let queries: Vec<_> = session
            .conversation_turns
            .iter()
            .map(|t| t.query.as_str())
            .collect();
        assert_eq!(queries, vec!["q6", "q7", "q8", "q9"]);
        assert_eq!(session.current_context.last_query.as_deref(), Some("q9"));
        assert_eq!(session.current_context.data_source_hint.as_deref(), Some("billing"));
    }

    #[test]
    fn touch_respects_the_hard_ttl_cap() {
        let mut session = Session::new(Uuid::new_v4(), "u-1", Locale::En, 60);
        session.touch(86_400, 120);
        assert!(session.expires_at <= session.created_at + Duration::seconds(121));
    }
}
