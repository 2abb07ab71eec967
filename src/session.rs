// 会话解析：30 分钟不活跃即过期，过期 id 永不复用。
use crate::storage::{now_ts, ConversationRecord, StorageBackend};
use anyhow::Result;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct SessionManager {
    storage: Arc<dyn StorageBackend>,
    timeout_s: f64,
}

impl SessionManager {
    pub fn new(storage: Arc<dyn StorageBackend>, timeout_minutes: i64) -> Self {
        Self {
            storage,
            timeout_s: (timeout_minutes.max(1) * 60) as f64,
        }
    }

    /// 解析请求归属的会话：优先显式 id，其次最近活跃会话，否则新建。
    pub async fn resolve(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
    ) -> Result<ConversationRecord> {
        let storage = self.storage.clone();
        let user = user_id.to_string();
        let requested = conversation_id.map(str::to_string);
        let timeout_s = self.timeout_s;
        tokio::task::spawn_blocking(move || {
            resolve_blocking(storage, &user, requested.as_deref(), timeout_s)
        })
        .await?
    }

    /// 消息处理完成后推进活跃时间。
    pub async fn touch(&self, conversation_id: &str) -> Result<()> {
        let storage = self.storage.clone();
        let id = conversation_id.to_string();
        tokio::task::spawn_blocking(move || storage.touch_conversation(&id, now_ts())).await?
    }
}

fn resolve_blocking(
    storage: Arc<dyn StorageBackend>,
    user_id: &str,
    requested: Option<&str>,
    timeout_s: f64,
) -> Result<ConversationRecord> {
    let now = now_ts();
    let cutoff = now - timeout_s;

    if let Some(id) = requested {
        if let Some(conversation) = storage.get_conversation(user_id, id)? {
            if conversation.last_activity >= cutoff {
                return Ok(conversation);
            }
            // 过期会话保留在库里供查询，但不再接收新消息。
            debug!(conversation_id = id, "请求的会话已过期，改为新建");
        }
    }

    if let Some(conversation) = storage.find_active_conversation(user_id, cutoff)? {
        return Ok(conversation);
    }

    // 已知竞态：同一用户并发首条消息可能各建一个会话。
    // 不加锁，后续 resolve 总是取 last_activity 最新的那个收敛。
    let record = ConversationRecord {
        conversation_id: format!("conv_{}", Uuid::new_v4().simple()),
        user_id: user_id.to_string(),
        created_at: now,
        last_activity: now,
    };
    storage.insert_conversation(&record)?;
    debug!(
        conversation_id = record.conversation_id.as_str(),
        "为用户创建新会话"
    );
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    fn temp_sessions() -> (tempfile::TempDir, SessionManager, Arc<dyn StorageBackend>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("taskwise.db");
        let storage: Arc<dyn StorageBackend> =
            Arc::new(SqliteStorage::new(path.to_string_lossy().to_string()));
        let sessions = SessionManager::new(storage.clone(), 30);
        (dir, sessions, storage)
    }

    fn seed_conversation(storage: &Arc<dyn StorageBackend>, id: &str, user: &str, age_s: f64) {
        storage
            .insert_conversation(&ConversationRecord {
                conversation_id: id.to_string(),
                user_id: user.to_string(),
                created_at: now_ts() - age_s,
                last_activity: now_ts() - age_s,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn recent_conversation_is_reused() {
        let (_dir, sessions, storage) = temp_sessions();
        seed_conversation(&storage, "conv_recent", "user-1", 60.0);

        let resolved = sessions.resolve("user-1", None).await.unwrap();
        assert_eq!(resolved.conversation_id, "conv_recent");
    }

    #[tokio::test]
    async fn stale_conversation_spawns_a_new_one() {
        let (_dir, sessions, storage) = temp_sessions();
        // 31 分钟前的活跃时间，已超时。
        seed_conversation(&storage, "conv_stale", "user-1", 31.0 * 60.0);

        let resolved = sessions.resolve("user-1", None).await.unwrap();
        assert_ne!(resolved.conversation_id, "conv_stale");
        assert_eq!(resolved.user_id, "user-1");
    }

    #[tokio::test]
    async fn expired_id_is_never_reused_even_when_requested() {
        let (_dir, sessions, storage) = temp_sessions();
        seed_conversation(&storage, "conv_expired", "user-1", 31.0 * 60.0);

        let resolved = sessions
            .resolve("user-1", Some("conv_expired"))
            .await
            .unwrap();
        assert_ne!(resolved.conversation_id, "conv_expired");
        // 过期会话仍然可查，只是不再续命。
        assert!(storage
            .get_conversation("user-1", "conv_expired")
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn foreign_conversation_id_is_ignored() {
        let (_dir, sessions, storage) = temp_sessions();
        seed_conversation(&storage, "conv_other", "user-2", 10.0);

        let resolved = sessions
            .resolve("user-1", Some("conv_other"))
            .await
            .unwrap();
        assert_ne!(resolved.conversation_id, "conv_other");
        assert_eq!(resolved.user_id, "user-1");
    }
}
