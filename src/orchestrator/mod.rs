// 编排引擎：接收消息、组装上下文、驱动模型与工具的有限轮次循环。
mod error;
mod execute;
mod templates;
mod tool_calls;

pub use error::OrchestratorError;
pub use templates::APOLOGY_UNAVAILABLE;

use crate::config::{AgentConfig, Config};
use crate::context::ContextWindowBuilder;
use crate::llm::ModelClient;
use crate::session::SessionManager;
use crate::storage::StorageBackend;
use crate::tools::ToolGateway;
use std::sync::Arc;

#[derive(Clone)]
pub struct Orchestrator {
    storage: Arc<dyn StorageBackend>,
    gateway: Arc<ToolGateway>,
    model: Arc<dyn ModelClient>,
    sessions: SessionManager,
    context: ContextWindowBuilder,
    agent: AgentConfig,
    model_timeout_s: u64,
}

impl Orchestrator {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        gateway: Arc<ToolGateway>,
        model: Arc<dyn ModelClient>,
        config: &Config,
    ) -> Self {
        let sessions = SessionManager::new(storage.clone(), config.agent.session_timeout_minutes);
        let context =
            ContextWindowBuilder::new(storage.clone(), config.agent.context_message_limit);
        Self {
            storage,
            gateway,
            model,
            sessions,
            context,
            agent: config.agent.clone(),
            model_timeout_s: config.llm.timeout_seconds(),
        }
    }
}
