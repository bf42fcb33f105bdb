//! 题目处理流程 - 流程层
//!
//! 核心职责：定义"一道题"的完整处理流程
//!
//! 流程顺序：
//! 1. 查询模型生成回答
//! 2. 提取代码块中的查询
//! 3. 执行查询
//! 4. 评估模型打分
//!
//! 任何一步失败都直接返回错误，由编排层记为失败结果。

use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::clients::{ChatMessage, QueryExecutor};
use crate::error::{AppResult, ParseError};
use crate::models::QuestionResult;
use crate::services::{extract_query, JudgePool, ResilientRouter, RoutedModel};
use crate::utils::logging::truncate_text;
use crate::workflow::question_ctx::QuestionCtx;

/// 单题流水线所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Pending,
    Generating,
    Executing,
    Judging,
    Scored,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PipelineStage::Pending => "等待",
            PipelineStage::Generating => "生成查询",
            PipelineStage::Executing => "执行查询",
            PipelineStage::Judging => "评分",
            PipelineStage::Scored => "完成",
        };
        f.write_str(label)
    }
}

/// 题目处理流程
///
/// - 不持有任何资源，只依赖业务能力（services / clients）
/// - 结果写入调用方传入的 `QuestionResult`，超时被取消时已完成阶段的数据仍然保留
pub struct QuestionFlow {
    router: Arc<ResilientRouter>,
    query_model: RoutedModel,
    system_prompt: String,
    question_suffix: String,
    executor: Arc<dyn QueryExecutor>,
    judges: Arc<JudgePool>,
}

impl QuestionFlow {
    pub fn new(
        router: Arc<ResilientRouter>,
        query_model: RoutedModel,
        system_prompt: impl Into<String>,
        question_suffix: impl Into<String>,
        executor: Arc<dyn QueryExecutor>,
        judges: Arc<JudgePool>,
    ) -> Self {
        Self {
            router,
            query_model,
            system_prompt: system_prompt.into(),
            question_suffix: question_suffix.into(),
            executor,
            judges,
        }
    }

    pub fn query_model(&self) -> &RoutedModel {
        &self.query_model
    }

    pub fn judge_pool(&self) -> &JudgePool {
        &self.judges
    }

    pub async fn run(
        &self,
        ctx: &QuestionCtx,
        question: &str,
        result: &mut QuestionResult,
        stage: &mut PipelineStage,
    ) -> AppResult<()> {
        // ========== 1. 生成 ==========
        *stage = PipelineStage::Generating;
        let messages = [
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user(self.user_message(question)),
        ];
        let response = self.router.send(&self.query_model, &messages).await?;

        let answer = extract_query(&response);
        let query = answer.extracted_query.ok_or(ParseError::MissingQuery)?;
        result.query = query.clone();
        info!("{} 📝 生成的查询: {}", ctx, truncate_text(&query, 200));

        // ========== 2. 执行 ==========
        *stage = PipelineStage::Executing;
        let execution = self.executor.execute(&query).await?;
        result.result_count = execution.row_count;
        result.execution_time_ms = execution.elapsed_ms;
        result.query_results = execution.rows;

        if execution.row_count == 0 {
            warn!("{} ⚠️ 查询没有返回任何结果", ctx);
        } else {
            info!(
                "{} ✓ 查询返回 {} 行 ({}ms)",
                ctx, execution.row_count, execution.elapsed_ms
            );
        }

        // ========== 3. 评分 ==========
        *stage = PipelineStage::Judging;
        let score = self
            .judges
            .evaluate(&query, &answer.free_text, &result.query_results)
            .await?;
        result.score = score.value;
        result.explanation = score.explanation;

        *stage = PipelineStage::Scored;
        info!("{} ✓ 得分: {:.2}", ctx, result.score);
        Ok(())
    }

    fn user_message(&self, question: &str) -> String {
        if self.question_suffix.trim().is_empty() {
            format!("User Query: {}", question)
        } else {
            format!("User Query: {} \n{}", question, self.question_suffix)
        }
    }
}
