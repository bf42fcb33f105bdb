//! # Batch SQL Evaluator
//!
//! 批量评估生成模型回答数据分析问题的能力：让模型写查询、执行查询、
//! 再由一个或多个评估模型给结果打分，最后汇总统计。
//!
//! ## 架构设计
//!
//! 本系统采用严格的分层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源，只暴露能力
//! - `KeyValueStore` - 检查点 / 导出文件的存储（文件系统或内存）
//! - `Sleeper` - 可注入的休眠，退避时长在测试中可直接校验
//!
//! ### ② 外部接口（Clients）
//! - `clients/` - 补全接口（Requesty / OpenRouter）和查询执行服务（BigQuery）
//!
//! ### ③ 业务能力层（Services）
//! - `ResilientRouter` + `RetryPolicy` - 模型解析与重试
//! - `response_parser` - 提取查询、解析评分 JSON
//! - `JudgePool` - 多评估模型打分取平均
//! - `CheckpointStore` - 断点保存 / 恢复
//! - `statistics` / `ResultExporter` - 汇总统计与导出
//!
//! ### ④ 流程层（Workflow）
//! - `QuestionCtx` - 上下文封装（查询模型 + 题目序号）
//! - `QuestionFlow` - 单题流程（generate → extract → execute → judge）
//!
//! ### ⑤ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 多模型并发、排名、清理
//! - `orchestrator/model_batch` - 单模型批次：恢复、超时、检查点、导出
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::{Config, Prompts, RunConfig};
pub use error::{AppError, AppResult};
pub use models::{ModelId, Provider, QuestionResult};
pub use orchestrator::{App, AppServices, BatchOrchestrator, RunSummary};
pub use services::{AggregateStatistics, ResilientRouter, RetryPolicy};
pub use workflow::{QuestionCtx, QuestionFlow};
