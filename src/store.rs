use async_trait::async_trait;
use serde::Serialize;
use std::sync::Mutex;

use crate::types::{Verdict, VerificationSession};

/// Append capability handed to the orchestrator. Sessions are immutable once
/// appended; there is no update or delete.
#[async_trait]
pub trait SessionSink: Send + Sync {
    async fn append(&self, session: VerificationSession);
}

/// Listing capability handed to the dashboard side.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Snapshot of all recorded sessions, newest first.
    async fn list(&self) -> Vec<VerificationSession>;
    async fn len(&self) -> usize;
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total: usize,
    pub approved: usize,
    pub rejected: usize,
    pub manual_review: usize,
}

/// In-memory, append-only session history. Single writer (the flow), any
/// number of snapshot readers.
pub struct InMemorySessionStore {
    sessions: Mutex<Vec<VerificationSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub async fn stats(&self) -> SessionStats {
        let sessions = self.sessions.lock().unwrap();
        let mut stats = SessionStats {
            total: sessions.len(),
            approved: 0,
            rejected: 0,
            manual_review: 0,
        };
        for session in sessions.iter() {
            match session.result.as_ref().map(|r| r.verdict) {
                Some(Verdict::Approved) => stats.approved += 1,
                Some(Verdict::Rejected) => stats.rejected += 1,
                Some(Verdict::ManualReview) | None => stats.manual_review += 1,
            }
        }
        stats
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionSink for InMemorySessionStore {
    async fn append(&self, session: VerificationSession) {
        self.sessions.lock().unwrap().push(session);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn list(&self) -> Vec<VerificationSession> {
        let sessions = self.sessions.lock().unwrap();
        sessions.iter().rev().cloned().collect()
    }

    async fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::fallback_result;
    use crate::types::{SessionStatus, VerificationResult};

    fn session(id: &str, verdict: Verdict) -> VerificationSession {
        VerificationSession {
            id: id.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            status: SessionStatus::Completed,
            user_provided_name: "Jane Doe".to_string(),
            result: Some(VerificationResult {
                verdict,
                ..fallback_result()
            }),
        }
    }

    #[tokio::test]
    async fn lists_sessions_newest_first() {
        let store = InMemorySessionStore::new();
        assert!(store.is_empty().await);

        store.append(session("first", Verdict::Approved)).await;
        store.append(session("second", Verdict::Rejected)).await;

        let listed = store.list().await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "second");
        assert_eq!(listed[1].id, "first");
    }

    #[tokio::test]
    async fn stats_count_by_verdict() {
        let store = InMemorySessionStore::new();
        store.append(session("a", Verdict::Approved)).await;
        store.append(session("b", Verdict::Approved)).await;
        store.append(session("c", Verdict::Rejected)).await;
        store.append(session("d", Verdict::ManualReview)).await;

        let stats = store.stats().await;
        assert_eq!(stats.total, 4);
        assert_eq!(stats.approved, 2);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.manual_review, 1);
    }
}
