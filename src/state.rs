// 应用状态装配：配置、存储、网关与编排器。
use crate::config::Config;
use crate::llm::{LlmClient, ModelClient};
use crate::orchestrator::Orchestrator;
use crate::storage::{build_storage, StorageBackend};
use crate::tools::ToolGateway;
use anyhow::Result;
use std::sync::Arc;

pub struct AppState {
    pub config: Config,
    pub storage: Arc<dyn StorageBackend>,
    pub gateway: Arc<ToolGateway>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let model: Arc<dyn ModelClient> = Arc::new(LlmClient::new(config.llm.clone()));
        Self::with_model(config, model)
    }

    /// 注入自定义模型客户端，测试时用脚本化实现替换真实接口。
    pub fn with_model(config: Config, model: Arc<dyn ModelClient>) -> Result<Self> {
        let storage = build_storage(&config.storage)?;
        storage.ensure_initialized()?;
        let gateway = Arc::new(ToolGateway::new(storage.clone()));
        let orchestrator = Arc::new(Orchestrator::new(
            storage.clone(),
            gateway.clone(),
            model,
            &config,
        ));
        Ok(Self {
            config,
            storage,
            gateway,
            orchestrator,
        })
    }
}
