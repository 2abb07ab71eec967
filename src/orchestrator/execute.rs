// 消息处理主流程：RECEIVE → 上下文 → 模型 → 工具 → 回写。
use crate::llm::ChatMessage;
use crate::orchestrator::error::OrchestratorError;
use crate::orchestrator::templates;
use crate::orchestrator::tool_calls::collect_tool_calls;
use crate::orchestrator::Orchestrator;
use crate::schemas::{ChatResponse, ToolCallSummary, MAX_MESSAGE_CHARS};
use crate::storage::MessageRecord;
use crate::tools::ErrorCode;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

impl Orchestrator {
    /// 处理一条用户消息，返回最终回复。每轮最多 max_tool_rounds 次模型调用，
    /// 超限后本地合成总结，保证必然终止。
    pub async fn handle_message(
        &self,
        user_id: &str,
        message: &str,
        conversation_id: Option<&str>,
    ) -> Result<ChatResponse, OrchestratorError> {
        let user_id = user_id.trim();
        let message = message.trim();
        if user_id.is_empty() {
            return Err(OrchestratorError::invalid_request("user_id 不能为空"));
        }
        if message.is_empty() {
            return Err(OrchestratorError::invalid_request("message 不能为空"));
        }
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(OrchestratorError::invalid_request(format!(
                "message 长度不能超过 {MAX_MESSAGE_CHARS} 字符"
            )));
        }

        let started = Instant::now();
        let conversation = self
            .sessions
            .resolve(user_id, conversation_id)
            .await
            .map_err(|err| OrchestratorError::internal(format!("会话解析失败: {err}")))?;

        self.persist_message(&conversation.conversation_id, "user", message)
            .await?;

        let mut messages = vec![ChatMessage::system(self.agent.system_instructions())];
        let history = self
            .context
            .load(&conversation.conversation_id)
            .await
            .map_err(|err| OrchestratorError::internal(format!("加载上下文失败: {err}")))?;
        messages.extend(history);

        let tools = crate::tools::tool_specs();
        let mut summaries: Vec<ToolCallSummary> = Vec::new();
        let mut answer: Option<String> = None;
        let max_rounds = self.agent.max_tool_rounds.max(1);
        let model_deadline = Duration::from_secs(self.model_timeout_s.saturating_add(5));
        let tool_deadline = Duration::from_secs(self.agent.tool_timeout_s.max(1));

        'rounds: for round in 1..=max_rounds {
            let reply = match timeout(model_deadline, self.model.complete(&messages, &tools)).await
            {
                Err(_) => {
                    warn!(
                        conversation = conversation.conversation_id.as_str(),
                        round, "模型调用超时"
                    );
                    answer = Some(templates::APOLOGY_UNAVAILABLE.to_string());
                    break 'rounds;
                }
                Ok(Err(err)) => {
                    warn!(
                        conversation = conversation.conversation_id.as_str(),
                        round,
                        error = %err,
                        "模型调用失败"
                    );
                    answer = Some(templates::APOLOGY_UNAVAILABLE.to_string());
                    break 'rounds;
                }
                Ok(Ok(reply)) => reply,
            };

            let calls = collect_tool_calls(reply.tool_calls.as_ref());
            if calls.is_empty() {
                let text = reply.content.trim();
                answer = Some(if text.is_empty() {
                    templates::EMPTY_REPLY_FALLBACK.to_string()
                } else {
                    text.to_string()
                });
                break 'rounds;
            }

            debug!(
                conversation = conversation.conversation_id.as_str(),
                round,
                count = calls.len(),
                "模型请求工具调用"
            );
            if let Some(tool_calls) = reply.tool_calls.clone() {
                messages.push(ChatMessage::assistant_tool_calls(reply.content, tool_calls));
            }

            for call in calls {
                let outcome =
                    match timeout(tool_deadline, self.gateway.execute(&call.name, &call.arguments, user_id))
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            warn!(
                                conversation = conversation.conversation_id.as_str(),
                                tool = call.name.as_str(),
                                "工具调用超时"
                            );
                            answer = Some(templates::APOLOGY_UNAVAILABLE.to_string());
                            break 'rounds;
                        }
                    };

                summaries.push(ToolCallSummary {
                    tool: outcome.tool.clone(),
                    success: outcome.success(),
                    result_preview: Some(outcome.result_preview()),
                });

                // 存储不可用直接收尾，其余失败作为数据喂回模型自行纠正。
                if outcome.error_code() == Some(ErrorCode::DatabaseError) {
                    answer = Some(templates::APOLOGY_UNAVAILABLE.to_string());
                    break 'rounds;
                }

                let observation = outcome.to_observation();
                match &call.id {
                    Some(id) => messages.push(ChatMessage::tool(id, observation)),
                    None => {
                        messages.push(ChatMessage::user(format!("[tool result] {observation}")))
                    }
                }
            }
        }

        let answer = answer.unwrap_or_else(|| {
            info!(
                conversation = conversation.conversation_id.as_str(),
                rounds = max_rounds,
                "达到轮次上限，本地合成总结"
            );
            templates::round_limit_summary(&summaries)
        });

        self.persist_message(&conversation.conversation_id, "assistant", &answer)
            .await?;
        self.sessions
            .touch(&conversation.conversation_id)
            .await
            .map_err(|err| OrchestratorError::internal(format!("更新会话活跃时间失败: {err}")))?;

        info!(
            conversation = conversation.conversation_id.as_str(),
            tool_calls = summaries.len(),
            latency_ms = started.elapsed().as_secs_f64() * 1000.0,
            "消息处理完成"
        );

        Ok(ChatResponse {
            message: answer,
            conversation_id: conversation.conversation_id,
            tool_calls: (!summaries.is_empty()).then_some(summaries),
        })
    }

    async fn persist_message(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str,
    ) -> Result<(), OrchestratorError> {
        let storage = self.storage.clone();
        let record = MessageRecord {
            message_id: format!("msg_{}", Uuid::new_v4().simple()),
            conversation_id: conversation_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            created_at: crate::storage::now_ts(),
        };
        tokio::task::spawn_blocking(move || storage.append_message(&record))
            .await
            .map_err(|err| OrchestratorError::internal(format!("写入消息任务失败: {err}")))?
            .map_err(|err| OrchestratorError::internal(format!("写入消息失败: {err}")))
    }
}
