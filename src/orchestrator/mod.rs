//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和流程调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 多模型批量评估
//! - 装配配置、客户端、路由和存储
//! - 每个查询模型一个并发任务（Semaphore 限流）
//! - 输出全局统计和排名，成功后清理检查点
//!
//! ### `model_batch` - 单个查询模型的批次
//! - 检查点恢复
//! - 逐题处理，每题带超时
//! - 每题之后保存检查点
//! - 统计、导出、删除检查点
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<ModelId>)
//!     ↓
//! model_batch (处理 Vec<Question>)
//!     ↓
//! workflow::QuestionFlow (处理单个 Question)
//!     ↓
//! services (能力层：router / parser / judges / checkpoint / statistics / exporter)
//!     ↓
//! clients + infrastructure (补全接口、查询执行、键值存储、休眠)
//! ```

pub mod batch_processor;
pub mod model_batch;

// 重新导出主要类型
pub use batch_processor::{App, AppServices, RunSummary};
pub use model_batch::{BatchOrchestrator, BatchOutcome};
