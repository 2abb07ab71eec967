// 存储抽象：任务/会话/消息三张表的统一后端接口。
mod sqlite;

use crate::config::StorageConfig;
use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub use sqlite::SqliteStorage;

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub task_id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: String,
    pub category: String,
    pub completed: bool,
    pub completed_at: Option<f64>,
    pub created_at: f64,
    pub updated_at: f64,
}

#[derive(Debug, Clone)]
pub struct ConversationRecord {
    pub conversation_id: String,
    pub user_id: String,
    pub created_at: f64,
    pub last_activity: f64,
}

#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub message_id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub created_at: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFilter {
    All,
    Pending,
    Completed,
}

pub trait StorageBackend: Send + Sync {
    fn ensure_initialized(&self) -> Result<()>;

    fn insert_task(&self, record: &TaskRecord) -> Result<()>;
    fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>>;
    fn update_task(&self, record: &TaskRecord) -> Result<()>;
    fn delete_task(&self, task_id: &str) -> Result<()>;
    /// 按创建时间倒序返回指定用户的任务。
    fn list_tasks(&self, user_id: &str, filter: TaskFilter) -> Result<Vec<TaskRecord>>;

    fn insert_conversation(&self, record: &ConversationRecord) -> Result<()>;
    fn get_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<ConversationRecord>>;
    /// 返回该用户 last_activity 不早于 cutoff 的最近会话。
    fn find_active_conversation(
        &self,
        user_id: &str,
        cutoff: f64,
    ) -> Result<Option<ConversationRecord>>;
    fn touch_conversation(&self, conversation_id: &str, last_activity: f64) -> Result<()>;
    fn list_conversations(&self, user_id: &str, limit: i64) -> Result<Vec<ConversationRecord>>;

    fn append_message(&self, record: &MessageRecord) -> Result<()>;
    /// 最近 limit 条消息，按插入顺序（从旧到新）返回。
    fn load_recent_messages(&self, conversation_id: &str, limit: i64)
        -> Result<Vec<MessageRecord>>;
    fn count_messages(&self, conversation_id: &str) -> Result<i64>;
    fn first_user_message(&self, conversation_id: &str) -> Result<Option<String>>;
}

pub fn build_storage(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    match config.backend.trim().to_ascii_lowercase().as_str() {
        "sqlite" | "" | "default" => Ok(Arc::new(SqliteStorage::new(config.db_path.clone()))),
        other => Err(anyhow!("未知存储后端: {other}")),
    }
}

pub fn now_ts() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs_f64())
        .unwrap_or(0.0)
}
