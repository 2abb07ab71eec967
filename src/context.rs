// 上下文窗口：只读取最近 N 条已持久化消息，从旧到新排列。
use crate::llm::ChatMessage;
use crate::storage::StorageBackend;
use anyhow::Result;
use std::sync::Arc;

#[derive(Clone)]
pub struct ContextWindowBuilder {
    storage: Arc<dyn StorageBackend>,
    limit: i64,
}

impl ContextWindowBuilder {
    pub fn new(storage: Arc<dyn StorageBackend>, limit: i64) -> Self {
        Self {
            storage,
            limit: limit.max(1),
        }
    }

    /// 纯读取，不修改任何状态。工具往返内容从不进入这里。
    pub async fn load(&self, conversation_id: &str) -> Result<Vec<ChatMessage>> {
        let storage = self.storage.clone();
        let id = conversation_id.to_string();
        let limit = self.limit;
        let records =
            tokio::task::spawn_blocking(move || storage.load_recent_messages(&id, limit)).await??;
        Ok(records
            .into_iter()
            .filter(|record| record.role == "user" || record.role == "assistant")
            .map(|record| ChatMessage {
                role: record.role,
                content: record.content,
                tool_calls: None,
                tool_call_id: None,
            })
            .collect())
    }
}
