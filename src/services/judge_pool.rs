//! 多评估模型评分
//!
//! 评估模型按配置顺序依次调用（不并发），单个模型失败只会被排除，
//! 全部失败时才算这道题评分失败。

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clients::ChatMessage;
use crate::error::{AppError, AppResult};
use crate::infrastructure::Sleeper;
use crate::models::{AggregatedScore, JudgeScore, Row};
use crate::services::response_parser::parse_score_payload;
use crate::services::router::{ResilientRouter, RoutedModel};

/// 评分提示中最多展示的结果行数
pub const MAX_ROWS_IN_PROMPT: usize = 10;

/// 单个评估模型的重试配置（线性退避：第 n 次失败后等待 `n * base_delay`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct JudgeRetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for JudgeRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl JudgeRetryConfig {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(u64::from(attempt)))
    }
}

/// 评估模型池
pub struct JudgePool {
    router: Arc<ResilientRouter>,
    judges: Vec<RoutedModel>,
    evaluation_prompt: String,
    retry: JudgeRetryConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl JudgePool {
    pub fn new(
        router: Arc<ResilientRouter>,
        judges: Vec<RoutedModel>,
        evaluation_prompt: impl Into<String>,
        retry: JudgeRetryConfig,
    ) -> Self {
        let sleeper = router.sleeper();
        Self {
            router,
            judges,
            evaluation_prompt: evaluation_prompt.into(),
            retry,
            sleeper,
        }
    }

    pub fn judges(&self) -> &[RoutedModel] {
        &self.judges
    }

    pub fn judge_ids(&self) -> Vec<String> {
        self.judges.iter().map(|j| j.model().to_string()).collect()
    }

    /// 让所有评估模型给查询结果打分，返回成功者的平均分
    pub async fn evaluate(
        &self,
        query: &str,
        rationale: &str,
        rows: &[Row],
    ) -> AppResult<AggregatedScore> {
        let content = build_evaluation_content(query, rationale, rows);
        let mut scores: Vec<JudgeScore> = Vec::with_capacity(self.judges.len());

        for judge in &self.judges {
            match self.score_with_retry(judge, &content).await {
                Ok(score) => {
                    debug!("评估模型 {} 评分: {:.2}", score.judge_id, score.value);
                    scores.push(score);
                }
                Err(e) => warn!("评估模型 {} 最终失败，已排除: {}", judge.model(), e),
            }
        }

        if scores.is_empty() {
            return Err(AppError::all_judges_failed(self.judge_ids()));
        }

        let value = scores.iter().map(|s| s.value).sum::<f64>() / scores.len() as f64;
        let explanation = scores
            .iter()
            .map(|s| format!("[{}]: {}", s.judge_id, s.explanation))
            .collect::<Vec<_>>()
            .join("\n\n");

        info!(
            "评分完成: {:.3} ({}/{} 个评估模型成功)",
            value,
            scores.len(),
            self.judges.len()
        );
        Ok(AggregatedScore { value, explanation })
    }

    async fn score_with_retry(&self, judge: &RoutedModel, content: &str) -> AppResult<JudgeScore> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.score_once(judge, content).await {
                Ok(score) => return Ok(score),
                Err(e) if attempt < max_attempts => {
                    let wait = self.retry.delay_after(attempt);
                    warn!(
                        "评估模型 {} 评分失败 (尝试 {}/{}), {:?} 后重试: {}",
                        judge.model(),
                        attempt,
                        max_attempts,
                        wait,
                        e
                    );
                    self.sleeper.sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn score_once(&self, judge: &RoutedModel, content: &str) -> AppResult<JudgeScore> {
        let messages = [
            ChatMessage::system(self.evaluation_prompt.as_str()),
            ChatMessage::user(content),
        ];
        let text = self.router.send(judge, &messages).await?;
        let (value, explanation) = parse_score_payload(&text)?;

        let judge_id = judge.model().to_string();
        let clamped = value.clamp(0.0, 1.0);
        if clamped != value {
            warn!("评估模型 {} 给出的分数 {} 超出 [0, 1]，已截断", judge_id, value);
        }

        Ok(JudgeScore {
            judge_id,
            value: clamped,
            explanation,
        })
    }
}

/// 组装发给评估模型的内容，结果行截断到前 [`MAX_ROWS_IN_PROMPT`] 行
pub fn build_evaluation_content(query: &str, rationale: &str, rows: &[Row]) -> String {
    let shown = &rows[..rows.len().min(MAX_ROWS_IN_PROMPT)];
    let rows_json = serde_json::to_string_pretty(shown).unwrap_or_else(|_| "[]".to_string());

    let mut content = format!(
        "SQL Query: {}\n\nThought Process: {}\n\nResults: {}",
        query, rationale, rows_json
    );
    if rows.len() > MAX_ROWS_IN_PROMPT {
        content.push_str(&format!(
            "\n\n...and {} more rows",
            rows.len() - MAX_ROWS_IN_PROMPT
        ));
    }
    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{CompletionClient, CompletionRequest};
    use crate::error::ProviderError;
    use crate::infrastructure::RecordingSleeper;
    use crate::models::{ModelId, Provider};
    use crate::services::retry_policy::RetryPolicy;
    use crate::services::router::ProviderRegistry;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// 按模型名返回脚本化结果，并记录调用顺序
    #[derive(Default)]
    struct JudgeScript {
        replies: Mutex<HashMap<String, VecDeque<Result<String, ProviderError>>>>,
        order: Mutex<Vec<String>>,
    }

    impl JudgeScript {
        fn reply(self, model: &str, reply: Result<String, ProviderError>) -> Self {
            self.replies
                .lock()
                .unwrap()
                .entry(model.to_string())
                .or_default()
                .push_back(reply);
            self
        }
    }

    #[async_trait]
    impl CompletionClient for JudgeScript {
        async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, ProviderError> {
            let name = request.model.name().to_string();
            self.order.lock().unwrap().push(name.clone());
            self.replies
                .lock()
                .unwrap()
                .get_mut(&name)
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| {
                    Err(ProviderError::InvalidRequest {
                        model: name,
                        message: "no scripted reply".to_string(),
                    })
                })
        }
    }

    fn bad_request(model: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Http {
            model: model.to_string(),
            status: 400,
            body: "bad".to_string(),
        })
    }

    fn pool(script: Arc<JudgeScript>, judges: &[&str]) -> (JudgePool, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::new());
        let router = Arc::new(ResilientRouter::new(
            ProviderRegistry::new().with_client(Provider::OpenRouter, script),
            RetryPolicy::default(),
            sleeper.clone(),
        ));
        let routed = judges
            .iter()
            .map(|name| router.resolve(&ModelId::new(Provider::OpenRouter, *name)).unwrap())
            .collect();
        let retry = JudgeRetryConfig {
            max_attempts: 2,
            base_delay_ms: 50,
        };
        (JudgePool::new(router, routed, "grade it", retry), sleeper)
    }

    #[tokio::test]
    async fn test_mean_over_successful_judges_only() {
        let script = Arc::new(
            JudgeScript::default()
                .reply("broken", bad_request("broken"))
                .reply("broken", bad_request("broken"))
                .reply("good", Ok(r#"{"value": 0.8, "explanation": "fine"}"#.to_string())),
        );
        let (pool, _sleeper) = pool(script.clone(), &["broken", "good"]);

        let score = pool.evaluate("SELECT 1", "because", &[]).await.unwrap();

        assert_eq!(score.value, 0.8);
        assert_eq!(score.explanation, "[open_router:good]: fine");
        // 依次调用：先耗尽 broken 的重试，再调用 good
        assert_eq!(
            script.order.lock().unwrap().as_slice(),
            &["broken", "broken", "good"]
        );
    }

    #[tokio::test]
    async fn test_all_judges_failed() {
        let script = Arc::new(JudgeScript::default());
        let (pool, _sleeper) = pool(script, &["a", "b"]);

        let err = pool.evaluate("SELECT 1", "", &[]).await.unwrap_err();
        match err {
            AppError::AllJudgesFailed { judges } => {
                assert_eq!(judges, vec!["open_router:a", "open_router:b"])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_retried_linearly() {
        let script = Arc::new(
            JudgeScript::default()
                .reply("j", Ok("I think it is good".to_string()))
                .reply("j", Ok("```json\n{\"value\": 0.4, \"explanation\": \"meh\"}\n```".to_string())),
        );
        let (pool, sleeper) = pool(script, &["j"]);

        let score = pool.evaluate("SELECT 1", "", &[]).await.unwrap();

        assert_eq!(score.value, 0.4);
        assert_eq!(sleeper.calls(), vec![Duration::from_millis(50)]);
    }

    #[tokio::test]
    async fn test_out_of_range_value_is_clamped() {
        let script = Arc::new(
            JudgeScript::default()
                .reply("a", Ok(r#"{"value": 1.5}"#.to_string()))
                .reply("b", Ok(r#"{"value": -0.5}"#.to_string())),
        );
        let (pool, _sleeper) = pool(script, &["a", "b"]);

        let score = pool.evaluate("SELECT 1", "", &[]).await.unwrap();
        assert_eq!(score.value, 0.5);
        assert_eq!(
            score.explanation,
            "[open_router:a]: \n\n[open_router:b]: "
        );
    }

    #[test]
    fn test_evaluation_content_truncates_rows() {
        let rows: Vec<Row> = (0..12)
            .map(|i| json!({ "n": i }).as_object().cloned().unwrap())
            .collect();

        let content = build_evaluation_content("SELECT n", "count", &rows);

        assert!(content.starts_with("SQL Query: SELECT n\n\nThought Process: count\n\nResults: ["));
        assert!(content.contains("\"n\": 9"));
        assert!(!content.contains("\"n\": 10"));
        assert!(content.ends_with("\n\n...and 2 more rows"));

        let short = build_evaluation_content("SELECT n", "", &rows[..3]);
        assert!(!short.contains("more rows"));
    }

    #[test]
    fn test_linear_delay() {
        let retry = JudgeRetryConfig::default();
        assert_eq!(retry.delay_after(1), Duration::from_millis(1000));
        assert_eq!(retry.delay_after(3), Duration::from_millis(3000));
    }
}
