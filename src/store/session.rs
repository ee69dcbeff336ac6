//! In-memory session store.
//!
//! Operations on one session serialise through that session's own async
//! mutex; cross-session operations never contend. Lock lifetime piggy-backs
//! on session lifetime: the expiry sweeper drops the slot (and therefore the
//! mutex) together with the session, and bounds each lock acquisition so it
//! cannot deadlock against live traffic.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::Message;

/// Bound on per-session lock waits inside the sweeper; busy sessions are
/// skipped to the next run.
const SWEEP_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

struct SessionData {
    created_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
    messages: Vec<Message>,
}

struct SessionSlot {
    codebase_id: Uuid,
    data: tokio::sync::Mutex<SessionData>,
}

pub struct SessionStore {
    slots: RwLock<HashMap<Uuid, Arc<SessionSlot>>>,
    ttl: ChronoDuration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            ttl: ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::days(7)),
        }
    }

    pub fn create(&self, codebase_id: Uuid) -> Uuid {
        let session_id = Uuid::new_v4();
        let now = Utc::now();
        let slot = Arc::new(SessionSlot {
            codebase_id,
            data: tokio::sync::Mutex::new(SessionData {
                created_at: now,
                last_active: now,
                messages: Vec::new(),
            }),
        });
        self.slots.write().insert(session_id, slot);
        tracing::info!("session {session_id} created for codebase {codebase_id}");
        session_id
    }

    /// The codebase a session is bound to. Sessions never cross codebases.
    pub fn codebase_of(&self, session_id: Uuid) -> Option<Uuid> {
        self.slots.read().get(&session_id).map(|s| s.codebase_id)
    }

    pub fn exists(&self, session_id: Uuid) -> bool {
        self.slots.read().contains_key(&session_id)
    }

    /// Append a message, refreshing `last_active`. Expired sessions reject
    /// the append and are left for the sweeper.
    pub async fn append(&self, session_id: Uuid, message: Message) -> Result<(), EngineError> {
        let slot = self
            .slot(session_id)
            .ok_or(EngineError::SessionNotFound(session_id))?;

        let mut data = slot.data.lock().await;
        if self.is_expired(data.last_active) {
            return Err(EngineError::SessionExpired(session_id));
        }
        data.messages.push(message);
        data.last_active = Utc::now();
        Ok(())
    }

    /// The last `n` messages in insertion order.
    pub async fn recent(&self, session_id: Uuid, n: usize) -> Result<Vec<Message>, EngineError> {
        let slot = self
            .slot(session_id)
            .ok_or(EngineError::SessionNotFound(session_id))?;

        let data = slot.data.lock().await;
        let start = data.messages.len().saturating_sub(n);
        Ok(data.messages[start..].to_vec())
    }

    pub fn delete(&self, session_id: Uuid) -> bool {
        self.slots.write().remove(&session_id).is_some()
    }

    /// Cascade delete with the owning codebase.
    pub fn delete_by_codebase(&self, codebase_id: Uuid) -> usize {
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|_, slot| slot.codebase_id != codebase_id);
        before - slots.len()
    }

    /// Remove sessions idle beyond the TTL. Lock acquisition per session is
    /// bounded; a session busy longer than the bound is retried next sweep.
    pub async fn cleanup_expired(&self) -> usize {
        let candidates: Vec<(Uuid, Arc<SessionSlot>)> = self
            .slots
            .read()
            .iter()
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();

        let mut removed = 0usize;
        for (session_id, slot) in candidates {
            let expired = match tokio::time::timeout(SWEEP_LOCK_TIMEOUT, slot.data.lock()).await {
                Ok(data) => self.is_expired(data.last_active),
                Err(_) => {
                    tracing::debug!("session {session_id} busy, skipping this sweep");
                    continue;
                }
            };

            if expired && self.slots.write().remove(&session_id).is_some() {
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!("expired {removed} idle session(s)");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    fn slot(&self, session_id: Uuid) -> Option<Arc<SessionSlot>> {
        self.slots.read().get(&session_id).cloned()
    }

    fn is_expired(&self, last_active: DateTime<Utc>) -> bool {
        Utc::now() - last_active > self.ttl
    }

    #[cfg(test)]
    async fn backdate(&self, session_id: Uuid, by: ChronoDuration) {
        let slot = self.slot(session_id).unwrap();
        let mut data = slot.data.lock().await;
        data.last_active = data.last_active - by;
        data.created_at = data.created_at - by;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(Duration::from_secs(604_800))
    }

    #[tokio::test]
    async fn test_append_and_recent_in_order() {
        let sessions = store();
        let id = sessions.create(Uuid::new_v4());

        sessions.append(id, Message::user("first".into())).await.unwrap();
        sessions
            .append(id, Message::assistant("second".into(), vec![], vec![]))
            .await
            .unwrap();
        sessions.append(id, Message::user("third".into())).await.unwrap();

        let recent = sessions.recent(id, 10).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "first");
        assert_eq!(recent[2].content, "third");

        let last_two = sessions.recent(id, 2).await.unwrap();
        assert_eq!(last_two[0].content, "second");
        assert_eq!(last_two[1].content, "third");
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let sessions = store();
        let a = sessions.create(Uuid::new_v4());
        let b = sessions.create(Uuid::new_v4());

        sessions.append(a, Message::user("only in a".into())).await.unwrap();

        let from_b = sessions.recent(b, 10).await.unwrap();
        assert!(from_b.iter().all(|m| m.content != "only in a"));
    }

    #[tokio::test]
    async fn test_unknown_session_errors() {
        let sessions = store();
        let missing = Uuid::new_v4();
        assert!(matches!(
            sessions.append(missing, Message::user("x".into())).await,
            Err(EngineError::SessionNotFound(_))
        ));
        assert!(matches!(
            sessions.recent(missing, 5).await,
            Err(EngineError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_session_rejects_append() {
        let sessions = SessionStore::new(Duration::from_secs(60));
        let id = sessions.create(Uuid::new_v4());
        sessions.backdate(id, ChronoDuration::seconds(3600)).await;

        assert!(matches!(
            sessions.append(id, Message::user("late".into())).await,
            Err(EngineError::SessionExpired(_))
        ));
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired() {
        let sessions = SessionStore::new(Duration::from_secs(60));
        let stale = sessions.create(Uuid::new_v4());
        let fresh = sessions.create(Uuid::new_v4());
        sessions.backdate(stale, ChronoDuration::seconds(3600)).await;

        let removed = sessions.cleanup_expired().await;
        assert_eq!(removed, 1);
        assert!(!sessions.exists(stale));
        assert!(sessions.exists(fresh));
    }

    #[tokio::test]
    async fn test_delete_by_codebase_cascades() {
        let sessions = store();
        let codebase = Uuid::new_v4();
        let other = Uuid::new_v4();
        sessions.create(codebase);
        sessions.create(codebase);
        let kept = sessions.create(other);

        assert_eq!(sessions.delete_by_codebase(codebase), 2);
        assert_eq!(sessions.len(), 1);
        assert!(sessions.exists(kept));
    }

    #[tokio::test]
    async fn test_codebase_binding() {
        let sessions = store();
        let codebase = Uuid::new_v4();
        let id = sessions.create(codebase);
        assert_eq!(sessions.codebase_of(id), Some(codebase));
        assert_eq!(sessions.codebase_of(Uuid::new_v4()), None);
    }

    #[tokio::test]
    async fn test_concurrent_appends_serialise() {
        let sessions = Arc::new(store());
        let id = sessions.create(Uuid::new_v4());

        let mut handles = Vec::new();
        for i in 0..20 {
            let sessions = sessions.clone();
            handles.push(tokio::spawn(async move {
                sessions.append(id, Message::user(format!("msg {i}"))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let all = sessions.recent(id, 100).await.unwrap();
        assert_eq!(all.len(), 20);
    }
}
