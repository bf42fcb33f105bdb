use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::model_id::ModelId;
use crate::models::result::QuestionResult;

/// 批次进度快照
///
/// 只有 `(query_model, evaluation_models)` 与当前运行完全一致时才能用于恢复。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRecord {
    pub query_model: ModelId,
    pub evaluation_models: Vec<ModelId>,
    pub completed_questions: usize,
    pub results: Vec<QuestionResult>,
    pub timestamp: DateTime<Utc>,
}

impl CheckpointRecord {
    /// 由当前结果列表生成快照，`completed_questions` 始终等于结果数量
    pub fn new(
        query_model: &ModelId,
        evaluation_models: &[ModelId],
        results: &[QuestionResult],
    ) -> Self {
        Self {
            query_model: query_model.clone(),
            evaluation_models: evaluation_models.to_vec(),
            completed_questions: results.len(),
            results: results.to_vec(),
            timestamp: Utc::now(),
        }
    }

    /// 模型配置是否与当前运行一致（评估模型按顺序比较）
    pub fn matches(&self, query_model: &ModelId, evaluation_models: &[ModelId]) -> bool {
        &self.query_model == query_model && self.evaluation_models.as_slice() == evaluation_models
    }

    /// 快照内部是否自洽
    pub fn is_consistent(&self) -> bool {
        self.completed_questions == self.results.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::model_id::Provider;

    fn model(name: &str) -> ModelId {
        ModelId::new(Provider::OpenRouter, name)
    }

    #[test]
    fn test_new_counts_results() {
        let results = vec![QuestionResult::pending("a"), QuestionResult::pending("b")];
        let record = CheckpointRecord::new(&model("q"), &[model("j")], &results);
        assert_eq!(record.completed_questions, 2);
        assert!(record.is_consistent());
    }

    #[test]
    fn test_matches_requires_same_judge_order() {
        let record = CheckpointRecord::new(&model("q"), &[model("j1"), model("j2")], &[]);
        assert!(record.matches(&model("q"), &[model("j1"), model("j2")]));
        assert!(!record.matches(&model("q"), &[model("j2"), model("j1")]));
        assert!(!record.matches(&model("q"), &[model("j1")]));
        assert!(!record.matches(&model("other"), &[model("j1"), model("j2")]));
    }

    #[test]
    fn test_wire_format() {
        let record = CheckpointRecord::new(&model("q"), &[model("j")], &[]);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["queryModel"], "open_router:q");
        assert_eq!(value["evaluationModels"][0], "open_router:j");
        assert_eq!(value["completedQuestions"], 0);
        assert!(value["timestamp"].is_string());
    }
}
