// 会话 API：发消息、会话列表与历史查询。
use crate::api::errors::{error_response, error_response_with_code, status_for_error_code};
use crate::schemas::{
    ChatRequest, ConversationSummary, MessagePayload, MAX_MESSAGE_CHARS,
};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

const PREVIEW_CHARS: usize = 100;
const DEFAULT_CONVERSATION_LIMIT: i64 = 20;
const DEFAULT_MESSAGE_LIMIT: i64 = 50;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/agent/chat", post(send_message))
        .route("/agent/chat/conversations", get(list_conversations))
        .route(
            "/agent/chat/conversations/{conversation_id}/messages",
            get(get_messages),
        )
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: String,
    #[serde(default)]
    limit: Option<i64>,
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Response {
    if request.user_id.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "user_id 不能为空");
    }
    let message = request.message.trim();
    if message.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "message 不能为空");
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("message 长度不能超过 {MAX_MESSAGE_CHARS} 字符"),
        );
    }

    match state
        .orchestrator
        .handle_message(
            &request.user_id,
            message,
            request.conversation_id.as_deref(),
        )
        .await
    {
        Ok(response) => Json(response).into_response(),
        Err(err) => error_response_with_code(
            status_for_error_code(err.code()),
            Some(err.code()),
            err.message().to_string(),
        ),
    }
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> Response {
    let user_id = query.user_id.trim().to_string();
    if user_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "user_id 不能为空");
    }
    let limit = query
        .limit
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_CONVERSATION_LIMIT);

    let storage = state.storage.clone();
    let result = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<ConversationSummary>> {
        let conversations = storage.list_conversations(&user_id, limit)?;
        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let count = storage.count_messages(&conversation.conversation_id)?;
            let preview = storage
                .first_user_message(&conversation.conversation_id)?
                .map(|text| truncate_preview(&text));
            summaries.push(ConversationSummary {
                id: conversation.conversation_id,
                created_at: conversation.created_at,
                last_activity: conversation.last_activity,
                message_count: count,
                preview,
            });
        }
        Ok(summaries)
    })
    .await;

    match result {
        Ok(Ok(items)) => Json(json!({ "data": { "items": items } })).into_response(),
        Ok(Err(err)) => {
            error!("查询会话列表失败: {err}");
            error_response_with_code(
                StatusCode::SERVICE_UNAVAILABLE,
                Some("DATABASE_ERROR"),
                "failed to list conversations",
            )
        }
        Err(err) => {
            error!("会话列表任务失败: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

async fn get_messages(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Query(query): Query<UserQuery>,
) -> Response {
    let user_id = query.user_id.trim().to_string();
    if user_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "user_id 不能为空");
    }
    let limit = query
        .limit
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_MESSAGE_LIMIT);

    let storage = state.storage.clone();
    let result = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<Vec<MessagePayload>>> {
        // 归属校验：他人会话与不存在的会话一视同仁返回 None。
        if storage.get_conversation(&user_id, &conversation_id)?.is_none() {
            return Ok(None);
        }
        let messages = storage.load_recent_messages(&conversation_id, limit)?;
        Ok(Some(
            messages
                .into_iter()
                .map(|record| MessagePayload {
                    id: record.message_id,
                    role: record.role,
                    content: record.content,
                    created_at: record.created_at,
                })
                .collect(),
        ))
    })
    .await;

    match result {
        Ok(Ok(Some(items))) => Json(json!({ "data": { "items": items } })).into_response(),
        Ok(Ok(None)) => error_response_with_code(
            StatusCode::NOT_FOUND,
            Some("NOT_FOUND"),
            "conversation not found",
        ),
        Ok(Err(err)) => {
            error!("查询会话消息失败: {err}");
            error_response_with_code(
                StatusCode::SERVICE_UNAVAILABLE,
                Some("DATABASE_ERROR"),
                "failed to load messages",
            )
        }
        Err(err) => {
            error!("会话消息任务失败: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

fn truncate_preview(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let mut preview: String = trimmed.chars().take(PREVIEW_CHARS).collect();
    preview.push_str("...");
    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_on_char_boundary() {
        let short = truncate_preview("  hello  ");
        assert_eq!(short, "hello");

        let long: String = "任务".repeat(80);
        let preview = truncate_preview(&long);
        assert_eq!(preview.chars().count(), PREVIEW_CHARS + 3);
        assert!(preview.ends_with("..."));
    }
}
