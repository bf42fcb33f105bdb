//! 单个查询模型的批次编排 - 编排层
//!
//! ## 职责
//!
//! 1. **断点恢复**：启动时加载检查点，配置一致则从 `completed_questions` 继续
//! 2. **顺序处理**：题目严格逐个处理，第 i+1 题开始前第 i 题已经记录并落盘
//! 3. **超时控制**：整条单题流水线与固定时长赛跑，超时按普通失败记录
//! 4. **收尾**：统计、导出、删除检查点、打印汇总
//!
//! 单题内的任何错误都只会变成一条失败的 `QuestionResult`，不会中断批次。

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::Prompts;
use crate::error::{AppError, AppResult};
use crate::models::{ModelId, QuestionResult};
use crate::services::{
    aggregate, AggregateStatistics, CheckpointLoad, CheckpointStore, ExportedFiles,
    ResultExporter, RunInfo,
};
use crate::utils::logging::{log_batch_start, print_batch_summary};
use crate::workflow::{PipelineStage, QuestionCtx, QuestionFlow};

/// 一个批次的最终产出
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub query_model: ModelId,
    pub results: Vec<QuestionResult>,
    pub statistics: AggregateStatistics,
    pub exported: ExportedFiles,
}

/// 单个查询模型的批次编排器
pub struct BatchOrchestrator {
    flow: QuestionFlow,
    judges: Vec<ModelId>,
    checkpoints: Arc<CheckpointStore>,
    exporter: Arc<ResultExporter>,
    prompts: Arc<Prompts>,
    question_timeout: Duration,
}

impl BatchOrchestrator {
    pub fn new(
        flow: QuestionFlow,
        checkpoints: Arc<CheckpointStore>,
        exporter: Arc<ResultExporter>,
        prompts: Arc<Prompts>,
        question_timeout: Duration,
    ) -> Self {
        let judges = flow
            .judge_pool()
            .judges()
            .iter()
            .map(|j| j.model().clone())
            .collect();
        Self {
            flow,
            judges,
            checkpoints,
            exporter,
            prompts,
            question_timeout,
        }
    }

    pub fn query_model(&self) -> &ModelId {
        self.flow.query_model().model()
    }

    /// 跑完整个题目列表
    pub async fn run(&self, questions: &[String]) -> AppResult<BatchOutcome> {
        let span = info_span!("batch", model = %self.query_model());
        self.run_inner(questions).instrument(span).await
    }

    async fn run_inner(&self, questions: &[String]) -> AppResult<BatchOutcome> {
        let query_model = self.query_model().clone();
        let total = questions.len();

        let mut results = self.restore(&query_model, total).await;
        let start_index = results.len();
        log_batch_start(&query_model.to_string(), start_index, total);

        for (i, question) in questions.iter().enumerate().skip(start_index) {
            let ctx = QuestionCtx::new(query_model.clone(), i + 1, total);
            let span = info_span!("question", index = i + 1);
            let result = self.process_question(&ctx, question).instrument(span).await;
            results.push(result);

            // 落盘失败不中断批次
            if let Err(e) = self
                .checkpoints
                .save(&query_model, &self.judges, &results)
                .await
            {
                warn!("{} ⚠️ 检查点保存失败: {}", ctx, e);
            }
        }

        let statistics = aggregate(&results);
        let run_info = RunInfo {
            query_model: &query_model,
            judges: &self.judges,
            system_prompt: &self.prompts.system,
            evaluation_prompt: &self.prompts.evaluation,
        };

        // 导出失败时保留检查点，下次运行直接进入收尾
        let exported = self
            .exporter
            .export(run_info, &results, &statistics, Utc::now())
            .await
            .map_err(|e| {
                error!("❌ 导出结果失败，保留检查点: {}", e);
                AppError::from(e)
            })?;

        if let Err(e) = self.checkpoints.delete(&query_model).await {
            warn!("⚠️ 删除检查点失败: {}", e);
        }

        let successful = results.iter().filter(|r| r.is_success()).count();
        let judge_ids: Vec<String> = self.judges.iter().map(ToString::to_string).collect();
        print_batch_summary(&query_model.to_string(), &judge_ids, &statistics, successful);

        Ok(BatchOutcome {
            query_model,
            results,
            statistics,
            exported,
        })
    }

    /// 加载检查点，返回已完成的结果（无可用检查点时为空）
    async fn restore(&self, query_model: &ModelId, total: usize) -> Vec<QuestionResult> {
        match self.checkpoints.load(query_model, &self.judges, total).await {
            Ok(CheckpointLoad::Resume(record)) => record.results,
            Ok(CheckpointLoad::Fresh) | Ok(CheckpointLoad::Mismatch { .. }) => Vec::new(),
            Err(e) => {
                warn!("⚠️ 读取检查点失败，从头开始: {}", e);
                Vec::new()
            }
        }
    }

    /// 处理一道题，任何失败（包括超时）都转换为失败结果
    pub async fn process_question(&self, ctx: &QuestionCtx, question: &str) -> QuestionResult {
        info!("{} 🔍 开始处理: {}", ctx, question);

        let started = Instant::now();
        let mut result = QuestionResult::pending(question);
        let mut stage = PipelineStage::Pending;

        let outcome = tokio::time::timeout(
            self.question_timeout,
            self.flow.run(ctx, question, &mut result, &mut stage),
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(())) => {
                result.execution_time_ms = elapsed_ms;
                info!("{} ⏱️ 处理耗时: {}ms", ctx, elapsed_ms);
            }
            Ok(Err(e)) => {
                error!("{} ❌ 处理失败 (阶段: {}): {}", ctx, stage, e);
                result.mark_failed(e.to_string(), elapsed_ms);
            }
            Err(_) => {
                let e = AppError::timeout(elapsed_ms, self.question_timeout.as_millis() as u64);
                error!("{} ❌ 处理超时 (阶段: {}): {}", ctx, stage, e);
                result.mark_failed(format!("{} (阶段: {})", e, stage), elapsed_ms);
            }
        }

        result
    }
}
