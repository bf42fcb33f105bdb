//! 业务能力层：每个服务只负责一种能力

pub mod checkpoint;
pub mod exporter;
pub mod judge_pool;
pub mod response_parser;
pub mod retry_policy;
pub mod router;
pub mod statistics;

pub use checkpoint::{CheckpointLoad, CheckpointStore};
pub use exporter::{ExportedFiles, ResultExporter, RunInfo};
pub use judge_pool::{JudgePool, JudgeRetryConfig};
pub use response_parser::{extract_query, parse_score_payload};
pub use retry_policy::{RetryOn, RetryPolicy};
pub use router::{ProviderRegistry, ResilientRouter, RoutedModel};
pub use statistics::{aggregate, AggregateStatistics, ScoreDistribution};
