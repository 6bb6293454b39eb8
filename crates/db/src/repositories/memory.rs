use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use goosebot_core::audit::AuditEvent;
use goosebot_core::domain::user::UserMapping;

use super::{
    AuditLogRepository, QueryHistoryRecord, QueryHistoryRepository, RepositoryError,
    SessionRepository, UserMappingRepository, UserSession,
};

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, UserSession>>,
}

impl InMemorySessionRepository {
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn find_active(
        &self,
        user_id: &str,
        channel_id: &str,
    ) -> Result<Option<UserSession>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .filter(|s| s.is_active && s.user_id == user_id && s.channel_id == channel_id)
            .max_by_key(|s| s.last_activity)
            .cloned())
    }

    async fn save(&self, session: UserSession) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(session_id) {
            session.last_activity = at;
            session.updated_at = at;
        }
        Ok(())
    }

    async fn expire_idle(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let mut expired = 0;
        for session in sessions.values_mut().filter(|s| s.is_active && s.last_activity < cutoff) {
            session.is_active = false;
            expired += 1;
        }
        Ok(expired)
    }
}

#[derive(Default)]
pub struct InMemoryQueryHistoryRepository {
    records: RwLock<HashMap<String, QueryHistoryRecord>>,
}

#[async_trait::async_trait]
impl QueryHistoryRepository for InMemoryQueryHistoryRepository {
    async fn save(&self, record: QueryHistoryRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        records.insert(record.query_id.clone(), record);
        Ok(())
    }

    async fn find_by_query_id(
        &self,
        query_id: &str,
    ) -> Result<Option<QueryHistoryRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.get(query_id).cloned())
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<QueryHistoryRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut matching: Vec<QueryHistoryRecord> =
            records.values().filter(|r| r.user_id == user_id).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryUserMappingRepository {
    mappings: RwLock<HashMap<String, UserMapping>>,
}

#[async_trait::async_trait]
impl UserMappingRepository for InMemoryUserMappingRepository {
    async fn find_by_slack_id(
        &self,
        slack_user_id: &str,
    ) -> Result<Option<UserMapping>, RepositoryError> {
        let mappings = self.mappings.read().await;
        Ok(mappings.get(slack_user_id).cloned())
    }

    async fn save(&self, mapping: UserMapping) -> Result<(), RepositoryError> {
        let mut mappings = self.mappings.write().await;
        mappings.insert(mapping.slack_user_id.clone(), mapping);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<UserMapping>, RepositoryError> {
        let mappings = self.mappings.read().await;
        let mut all: Vec<UserMapping> = mappings.values().cloned().collect();
        all.sort_by(|a, b| a.slack_user_id.cmp(&b.slack_user_id));
        Ok(all)
    }

    async fn deactivate(&self, slack_user_id: &str) -> Result<bool, RepositoryError> {
        let mut mappings = self.mappings.write().await;
        match mappings.get_mut(slack_user_id) {
            Some(mapping) if mapping.is_active => {
                mapping.is_active = false;
                mapping.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryAuditLogRepository {
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditLogRepository {
    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait::async_trait]
impl AuditLogRepository for InMemoryAuditLogRepository {
    async fn record(&self, event: AuditEvent) -> Result<(), RepositoryError> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<AuditEvent>, RepositoryError> {
        let events = self.events.read().await;
        Ok(events.iter().rev().take(limit as usize).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use goosebot_core::audit::{AuditEvent, AuditOutcome};
    use goosebot_core::domain::user::{Role, UserMapping};

    use crate::repositories::{
        AuditLogRepository, InMemoryAuditLogRepository, InMemorySessionRepository,
        InMemoryUserMappingRepository, SessionRepository, UserMappingRepository,
    };

    #[tokio::test]
    async fn in_memory_session_repo_reuses_active_session() {
        let repo = InMemorySessionRepository::default();
        let first = repo.open_or_touch("alice", "U1", "C1").await.expect("open");
        let second = repo.open_or_touch("alice", "U1", "C1").await.expect("touch");

        assert_eq!(first, second);
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn in_memory_mapping_repo_round_trip() {
        let repo = InMemoryUserMappingRepository::default();
        let mapping = UserMapping::new("U1", "alice", vec![Role::Analyst], &[]);

        repo.save(mapping.clone()).await.expect("save");
        assert_eq!(repo.find_by_slack_id("U1").await.expect("find"), Some(mapping));
        assert!(repo.deactivate("U1").await.expect("deactivate"));
    }

    #[tokio::test]
    async fn in_memory_audit_repo_lists_newest_first() {
        let repo = InMemoryAuditLogRepository::default();
        repo.record(AuditEvent::new("a", "first", AuditOutcome::Success)).await.expect("first");
        repo.record(AuditEvent::new("a", "second", AuditOutcome::Success)).await.expect("second");

        let recent = repo.list_recent(1).await.expect("list");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].action, "second");
    }
}
