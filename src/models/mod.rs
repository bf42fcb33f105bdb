pub mod checkpoint;
pub mod loaders;
pub mod model_id;
pub mod result;

pub use checkpoint::CheckpointRecord;
pub use loaders::load_questions;
pub use model_id::{ModelId, Provider};
pub use result::{AggregatedScore, ExecutionResult, GeneratedAnswer, JudgeScore, QuestionResult, Row};
