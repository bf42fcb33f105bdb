//! 检查点存储
//!
//! 每个查询模型一个快照，键由模型标识确定性生成，不同批次之间互不影响。

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::infrastructure::KeyValueStore;
use crate::models::{CheckpointRecord, ModelId, QuestionResult};

const KEY_PREFIX: &str = "checkpoint_";
const KEY_SUFFIX: &str = ".json";

/// 加载检查点的结果
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointLoad {
    /// 配置一致，可以从 `completed_questions` 继续
    Resume(CheckpointRecord),
    /// 没有检查点
    Fresh,
    /// 存在检查点但不可用（配置不一致 / 内容损坏），从头开始
    Mismatch { reason: String },
}

pub struct CheckpointStore {
    store: Arc<dyn KeyValueStore>,
}

impl CheckpointStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// 检查点的键，例如 `checkpoint_open_router_google_gemini-2.5-pro.json`
    pub fn key_for(query_model: &ModelId) -> String {
        format!("{}{}{}", KEY_PREFIX, query_model.sanitized(), KEY_SUFFIX)
    }

    /// 用当前结果覆盖写入检查点
    pub async fn save(
        &self,
        query_model: &ModelId,
        judges: &[ModelId],
        results: &[QuestionResult],
    ) -> Result<(), StoreError> {
        let key = Self::key_for(query_model);
        let record = CheckpointRecord::new(query_model, judges, results);
        let bytes = serde_json::to_vec_pretty(&record).map_err(|e| StoreError::json(&key, e))?;

        self.store.put(&key, &bytes).await?;
        debug!("检查点已保存: {} ({} 题)", key, record.completed_questions);
        Ok(())
    }

    /// 读取检查点并判断能否用于恢复
    pub async fn load(
        &self,
        query_model: &ModelId,
        judges: &[ModelId],
        total_questions: usize,
    ) -> Result<CheckpointLoad, StoreError> {
        let key = Self::key_for(query_model);
        let Some(bytes) = self.store.get(&key).await? else {
            return Ok(CheckpointLoad::Fresh);
        };

        let record: CheckpointRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!("检查点 {} 无法解析，忽略并从头开始: {}", key, e);
                return Ok(CheckpointLoad::Mismatch {
                    reason: format!("无法解析: {}", e),
                });
            }
        };

        let outcome = if !record.matches(query_model, judges) {
            CheckpointLoad::Mismatch {
                reason: format!(
                    "模型配置不一致 (检查点: {} / [{}])",
                    record.query_model,
                    join_ids(&record.evaluation_models)
                ),
            }
        } else if !record.is_consistent() {
            CheckpointLoad::Mismatch {
                reason: format!(
                    "完成数 {} 与结果数 {} 不一致",
                    record.completed_questions,
                    record.results.len()
                ),
            }
        } else if record.completed_questions > total_questions {
            CheckpointLoad::Mismatch {
                reason: format!(
                    "完成数 {} 超过题目总数 {}",
                    record.completed_questions, total_questions
                ),
            }
        } else {
            info!(
                "发现检查点 {} (保存于 {}), 已完成 {}/{} 题",
                key, record.timestamp, record.completed_questions, total_questions
            );
            CheckpointLoad::Resume(record)
        };

        if let CheckpointLoad::Mismatch { reason } = &outcome {
            info!("忽略检查点 {}: {}，从头开始", key, reason);
        }
        Ok(outcome)
    }

    /// 删除某个模型的检查点
    pub async fn delete(&self, query_model: &ModelId) -> Result<bool, StoreError> {
        let key = Self::key_for(query_model);
        let existed = self.store.delete(&key).await?;
        if existed {
            info!("检查点已删除: {}", key);
        }
        Ok(existed)
    }

    /// 删除所有检查点，返回删除数量
    pub async fn cleanup_all(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        for key in self.store.list_keys().await? {
            if key.starts_with(KEY_PREFIX) && key.ends_with(KEY_SUFFIX) && self.store.delete(&key).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("已清理 {} 个检查点", removed);
        }
        Ok(removed)
    }
}

fn join_ids(ids: &[ModelId]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}
