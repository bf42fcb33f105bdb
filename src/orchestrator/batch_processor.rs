//! 多模型批量评估 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责资源装配和批次并发。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：读取运行配置、题目、提示词，创建客户端和路由（配置错误在这里终止运行）
//! 2. **并发控制**：每个查询模型一个任务，使用 Semaphore 限制同时运行的批次数
//! 3. **全局统计**：等待所有批次结束，输出成功/失败数量和按平均分排名
//! 4. **收尾**：全部批次成功时清理所有检查点，否则保留以便恢复
//!
//! 不同批次之间没有共享的可变状态，每个批次只写自己的检查点文件。

use anyhow::{Context, Result};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::clients::{BigQueryClient, OpenRouterClient, QueryExecutor, RequestyClient};
use crate::config::{Config, Prompts, RunConfig};
use crate::error::ConfigError;
use crate::infrastructure::{FsStore, KeyValueStore, Sleeper, TokioSleeper};
use crate::models::{load_questions, ModelId, Provider};
use crate::orchestrator::model_batch::{BatchOrchestrator, BatchOutcome};
use crate::services::{
    CheckpointStore, JudgePool, ProviderRegistry, ResilientRouter, ResultExporter, RoutedModel,
};
use crate::utils::logging::{log_startup, print_final_stats, print_ranking};
use crate::workflow::QuestionFlow;

/// 外部依赖：生产环境使用真实客户端，测试中替换为假实现
pub struct AppServices {
    pub registry: ProviderRegistry,
    pub executor: Arc<dyn QueryExecutor>,
    pub checkpoint_store: Arc<dyn KeyValueStore>,
    pub export_store: Arc<dyn KeyValueStore>,
    pub sleeper: Arc<dyn Sleeper>,
}

/// 一次运行的结果
#[derive(Debug, Default)]
pub struct RunSummary {
    pub completed: Vec<BatchOutcome>,
    /// `(模型, 错误信息)`
    pub failed: Vec<(String, String)>,
}

impl RunSummary {
    /// 按平均分从高到低排列
    pub fn ranking(&self) -> Vec<(String, f64)> {
        let mut ranking: Vec<(String, f64)> = self
            .completed
            .iter()
            .map(|o| (o.query_model.to_string(), o.statistics.average_score))
            .collect();
        ranking.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranking
    }
}

/// 应用主结构
pub struct App {
    run_config: RunConfig,
    questions: Arc<Vec<String>>,
    prompts: Arc<Prompts>,
    router: Arc<ResilientRouter>,
    query_models: Vec<RoutedModel>,
    judge_pool: Arc<JudgePool>,
    executor: Arc<dyn QueryExecutor>,
    checkpoints: Arc<CheckpointStore>,
    exporter: Arc<ResultExporter>,
}

impl App {
    /// 从环境变量和配置文件初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        let run_config = RunConfig::load(&config.run_file)
            .await
            .with_context(|| format!("加载运行配置失败: {}", config.run_file.display()))?;
        let prompts = run_config.load_prompts().await?;
        let questions = load_questions(&config.questions_file).await?;

        let mut registry = ProviderRegistry::new();
        for provider in run_config.providers() {
            let key = config.api_key(provider)?;
            registry = match provider {
                Provider::Requesty => {
                    registry.with_client(provider, Arc::new(RequestyClient::new(key)))
                }
                Provider::OpenRouter => {
                    registry.with_client(provider, Arc::new(OpenRouterClient::new(key)))
                }
            };
        }

        let executor = Arc::new(BigQueryClient::new(
            config.bigquery_project_id()?,
            config.bigquery_access_token()?,
            run_config.query_constraints.clone(),
        ));

        let services = AppServices {
            registry,
            executor,
            checkpoint_store: Arc::new(FsStore::new(&config.checkpoint_dir)),
            export_store: Arc::new(FsStore::new(&config.output_dir)),
            sleeper: Arc::new(TokioSleeper),
        };

        Ok(Self::new(run_config, prompts, questions, services)?)
    }

    /// 用已加载的配置和外部依赖装配应用，模型在这里一次性解析到具体客户端
    pub fn new(
        run_config: RunConfig,
        prompts: Prompts,
        questions: Vec<String>,
        services: AppServices,
    ) -> Result<Self, ConfigError> {
        run_config.validate()?;

        let router = Arc::new(ResilientRouter::new(
            services.registry,
            run_config.provider_retry.clone(),
            services.sleeper,
        ));

        let query_models = run_config
            .query_models
            .iter()
            .map(|m| router.resolve(m))
            .collect::<Result<Vec<_>, _>>()?;
        let judges = run_config
            .judges
            .iter()
            .map(|m| router.resolve(m))
            .collect::<Result<Vec<_>, _>>()?;

        let judge_pool = Arc::new(JudgePool::new(
            Arc::clone(&router),
            judges,
            prompts.evaluation.clone(),
            run_config.judge_retry,
        ));

        Ok(Self {
            run_config,
            questions: Arc::new(questions),
            prompts: Arc::new(prompts),
            router,
            query_models,
            judge_pool,
            executor: services.executor,
            checkpoints: Arc::new(CheckpointStore::new(services.checkpoint_store)),
            exporter: Arc::new(ResultExporter::new(services.export_store)),
        })
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<RunSummary> {
        log_startup(
            self.query_models.len(),
            &self.judge_pool.judge_ids(),
            self.questions.len(),
            self.run_config.max_concurrent_batches,
        );

        // 空题目列表照常跑完，每个模型导出一份空统计
        if self.questions.is_empty() {
            warn!("⚠️ 题目列表为空，仅导出空统计");
        }

        let semaphore = Arc::new(Semaphore::new(self.run_config.max_concurrent_batches));
        let mut handles = Vec::new();

        for query_model in &self.query_models {
            let orchestrator = Arc::new(self.orchestrator_for(query_model.clone()));
            let questions = Arc::clone(&self.questions);
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .context("批次信号量已关闭")?;

            let handle = tokio::spawn(async move {
                let _permit = permit;
                orchestrator.run(&questions).await
            });
            handles.push((query_model.model().clone(), handle));
        }

        // 等待所有批次完成
        let (models, handles): (Vec<ModelId>, Vec<_>) = handles.into_iter().unzip();
        let joined = join_all(handles).await;

        let mut summary = RunSummary::default();
        for (model, joined) in models.into_iter().zip(joined) {
            match joined {
                Ok(Ok(outcome)) => summary.completed.push(outcome),
                Ok(Err(e)) => {
                    error!("[{}] ❌ 批次失败: {}", model, e);
                    summary.failed.push((model.to_string(), e.to_string()));
                }
                Err(e) => {
                    error!("[{}] ❌ 任务执行失败: {}", model, e);
                    summary.failed.push((model.to_string(), e.to_string()));
                }
            }
        }

        print_final_stats(summary.completed.len(), &summary.failed);
        print_ranking(&summary.ranking());

        if summary.failed.is_empty() {
            match self.checkpoints.cleanup_all().await {
                Ok(removed) => info!("🧹 检查点清理完成 ({} 个)", removed),
                Err(e) => warn!("⚠️ 清理检查点失败: {}", e),
            }
        } else {
            info!("💾 存在失败的批次，保留检查点以便恢复");
        }

        Ok(summary)
    }

    fn orchestrator_for(&self, query_model: RoutedModel) -> BatchOrchestrator {
        let flow = QuestionFlow::new(
            Arc::clone(&self.router),
            query_model,
            self.prompts.system.clone(),
            self.run_config.question_suffix.clone(),
            Arc::clone(&self.executor),
            Arc::clone(&self.judge_pool),
        );
        BatchOrchestrator::new(
            flow,
            Arc::clone(&self.checkpoints),
            Arc::clone(&self.exporter),
            Arc::clone(&self.prompts),
            self.run_config.question_timeout(),
        )
    }

    pub fn query_models(&self) -> Vec<ModelId> {
        self.query_models.iter().map(|m| m.model().clone()).collect()
    }
}
