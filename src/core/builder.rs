//! 编排器构建器：统一的组件初始化
//!
//! 未显式注入的组件按配置创建：生成后端、嵌入、SQLite、仓库、工作记忆。
//! 测试与 fixture 模式通过 with_* 注入 Mock 后端与内存仓库。

use std::sync::Arc;

use crate::actions::{AnalyzeRecordAction, GeneratePlanAction, ModifyPlanAction};
use crate::config::AppConfig;
use crate::core::{ActionRouter, AgentError, CoachAgent};
use crate::llm::{create_embedder_from_config, create_llm_client, EmbeddingProvider, LlmClient, TimedLlm};
use crate::memory::{MemoryManager, WorkingStore};
use crate::store::{Database, PlanRepository, RecordRepository, SqliteRepository};
use crate::tools::{default_registry, ToolExecutor};

pub struct CoachBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    database: Option<Database>,
    plans: Option<Arc<dyn PlanRepository>>,
    records: Option<Arc<dyn RecordRepository>>,
    working: Option<Arc<WorkingStore>>,
}

impl CoachBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            embedder: None,
            database: None,
            plans: None,
            records: None,
            working: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_database(mut self, db: Database) -> Self {
        self.database = Some(db);
        self
    }

    /// 计划与记录来自同一个仓库
    pub fn with_repository<R>(mut self, repo: Arc<R>) -> Self
    where
        R: PlanRepository + RecordRepository + 'static,
    {
        let plans: Arc<dyn PlanRepository> = repo.clone();
        let records: Arc<dyn RecordRepository> = repo;
        self.plans = Some(plans);
        self.records = Some(records);
        self
    }

    /// 共享工作记忆（由调用方启动后台清理）
    pub fn with_working_store(mut self, working: Arc<WorkingStore>) -> Self {
        self.working = Some(working);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn build(self) -> Result<CoachAgent, AgentError> {
        let cfg = self.config;

        let db = match self.database {
            Some(db) => db,
            None => Database::open_optional(cfg.memory.database_path.as_deref())
                .map_err(|e| AgentError::Config(format!("cannot open database: {}", e)))?,
        };
        let sqlite = Arc::new(SqliteRepository::new(db.clone()));
        let plans: Arc<dyn PlanRepository> = match self.plans {
            Some(plans) => plans,
            None => sqlite.clone(),
        };
        let records: Arc<dyn RecordRepository> = match self.records {
            Some(records) => records,
            None => sqlite,
        };

        let embedder = self
            .embedder
            .unwrap_or_else(|| create_embedder_from_config(&cfg.embedding, &cfg.llm));
        let working = self
            .working
            .unwrap_or_else(|| Arc::new(WorkingStore::from_config(&cfg.memory)));
        let memory = Arc::new(MemoryManager::from_config(&cfg.memory, db, embedder, working));

        let client = self.llm.unwrap_or_else(|| create_llm_client(&cfg.llm));
        tracing::info!(provider = client.provider(), model = client.model(), "generation backend ready");
        let llm = TimedLlm::from_config(client, &cfg.llm);

        let router = ActionRouter::new()
            .with_handler(Arc::new(GeneratePlanAction::new(llm.clone(), cfg.agent.cycle_weeks)))
            .with_handler(Arc::new(ModifyPlanAction::new(llm.clone())))
            .with_handler(Arc::new(AnalyzeRecordAction::new(llm)));

        let registry = default_registry(&cfg.tools, plans, records);
        tracing::debug!(tools = ?registry.tool_names(), "tool registry built");
        let tools = ToolExecutor::new(registry, cfg.tools.tool_timeout_secs);

        Ok(CoachAgent::new(memory, router, tools).with_trace(cfg.agent.trace_enabled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{HashEmbedder, MockLlmClient};
    use crate::store::InMemoryRepository;

    #[test]
    fn test_build_with_injected_components() {
        let agent = CoachBuilder::new(AppConfig::default())
            .with_llm(Arc::new(MockLlmClient::default()))
            .with_embedder(Arc::new(HashEmbedder::new(64)))
            .with_repository(Arc::new(InMemoryRepository::new()))
            .build()
            .unwrap();
        assert_eq!(agent.router().actions().len(), 3);
    }
}
