//! 模型路由 - 业务能力层
//!
//! 配置加载时把 `ModelId` 解析成 [`RoutedModel`]（具体的客户端 + 温度），
//! 之后每次调用都只走重试循环，不再做服务商判断。
//!
//! 状态流转：`Idle → Attempting → {Success | Backoff → Attempting} → {Success | Exhausted}`

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::clients::{ChatMessage, CompletionClient, CompletionRequest};
use crate::error::{ConfigError, ProviderError};
use crate::infrastructure::Sleeper;
use crate::models::{ModelId, Provider};
use crate::services::retry_policy::RetryPolicy;

/// 服务商 → 客户端
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    requesty: Option<Arc<dyn CompletionClient>>,
    open_router: Option<Arc<dyn CompletionClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册某个服务商的客户端
    pub fn with_client(mut self, provider: Provider, client: Arc<dyn CompletionClient>) -> Self {
        match provider {
            Provider::Requesty => self.requesty = Some(client),
            Provider::OpenRouter => self.open_router = Some(client),
        }
        self
    }

    fn client_for(&self, provider: Provider) -> Option<&Arc<dyn CompletionClient>> {
        match provider {
            Provider::Requesty => self.requesty.as_ref(),
            Provider::OpenRouter => self.open_router.as_ref(),
        }
    }
}

/// 已解析的模型：调用时不再查表
#[derive(Clone)]
pub struct RoutedModel {
    model: ModelId,
    client: Arc<dyn CompletionClient>,
    temperature: f32,
}

impl RoutedModel {
    pub fn model(&self) -> &ModelId {
        &self.model
    }
}

/// 带重试的模型路由
pub struct ResilientRouter {
    registry: ProviderRegistry,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl ResilientRouter {
    pub fn new(registry: ProviderRegistry, policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            registry,
            policy,
            sleeper,
        }
    }

    pub fn sleeper(&self) -> Arc<dyn Sleeper> {
        Arc::clone(&self.sleeper)
    }

    /// 把模型解析到唯一的补全接口
    pub fn resolve(&self, model: &ModelId) -> Result<RoutedModel, ConfigError> {
        let client = self.registry.client_for(model.provider()).ok_or_else(|| {
            ConfigError::invalid(format!(
                "模型 {} 需要服务商 {}，但未配置其客户端（检查 {}）",
                model,
                model.provider(),
                model.provider().api_key_env()
            ))
        })?;

        Ok(RoutedModel {
            model: model.clone(),
            client: Arc::clone(client),
            temperature: model.temperature(),
        })
    }

    /// 发送消息，按策略重试，返回模型文本
    pub async fn send(
        &self,
        target: &RoutedModel,
        messages: &[ChatMessage],
    ) -> Result<String, ProviderError> {
        let request = CompletionRequest {
            model: &target.model,
            messages,
            temperature: target.temperature,
        };
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let err = match target.client.complete(request).await {
                Ok(text) if !text.trim().is_empty() => {
                    if attempt > 1 {
                        debug!("模型 {} 第 {} 次尝试成功", target.model, attempt);
                    }
                    return Ok(text);
                }
                Ok(_) => ProviderError::NoContent {
                    model: target.model.to_string(),
                },
                Err(e) => e,
            };

            if !self.policy.should_retry(&err) {
                warn!(
                    "模型 {} 调用失败且不可重试 (尝试 {}/{}): {}",
                    target.model, attempt, max_attempts, err
                );
                return Err(err);
            }

            if attempt >= max_attempts {
                error!(
                    "模型 {} 在 {} 次尝试后仍然失败，最后状态码: {:?}",
                    target.model,
                    attempt,
                    err.status()
                );
                return Err(ProviderError::Exhausted {
                    model: target.model.to_string(),
                    attempts: attempt,
                    status: err.status(),
                    last_error: Box::new(err),
                });
            }

            let wait = self.policy.delay_for(attempt - 1);
            warn!(
                "模型 {} 调用失败 (尝试 {}/{}, 状态码: {:?}), {:?} 后重试: {}",
                target.model,
                attempt,
                max_attempts,
                err.status(),
                wait,
                err
            );
            self.sleeper.sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::RecordingSleeper;
    use crate::services::retry_policy::RetryOn;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// 按脚本返回结果的假客户端
    struct ScriptedClient {
        script: Mutex<VecDeque<Result<String, ProviderError>>>,
        temperatures: Mutex<Vec<f32>>,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                temperatures: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.temperatures.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, ProviderError> {
            self.temperatures.lock().unwrap().push(request.temperature);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("fallback".to_string()))
        }
    }

    fn http(status: u16) -> Result<String, ProviderError> {
        Err(ProviderError::Http {
            model: "m".to_string(),
            status,
            body: "err".to_string(),
        })
    }

    fn policy(retry_on: RetryOn) -> RetryPolicy {
        RetryPolicy::new(
            4,
            Duration::from_millis(100),
            2.0,
            Duration::from_millis(250),
            retry_on,
        )
        .unwrap()
    }

    fn router(
        client: Arc<ScriptedClient>,
        retry_on: RetryOn,
    ) -> (ResilientRouter, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::new());
        let registry = ProviderRegistry::new().with_client(Provider::OpenRouter, client);
        (
            ResilientRouter::new(registry, policy(retry_on), sleeper.clone()),
            sleeper,
        )
    }

    fn codes() -> RetryOn {
        RetryOn::StatusCodes([429, 503].into_iter().collect())
    }

    fn model() -> ModelId {
        ModelId::new(Provider::OpenRouter, "google/gemini-2.5-pro")
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let client = ScriptedClient::new(vec![http(429), http(503), Ok("SELECT 1".to_string())]);
        let (router, sleeper) = router(client.clone(), codes());
        let target = router.resolve(&model()).unwrap();

        let text = router.send(&target, &[ChatMessage::user("q")]).await.unwrap();

        assert_eq!(text, "SELECT 1");
        assert_eq!(client.calls(), 3);
        assert_eq!(
            sleeper.calls(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
        assert!(sleeper.total() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_stops_on_non_retryable_status() {
        let client = ScriptedClient::new(vec![http(400), Ok("never".to_string())]);
        let (router, sleeper) = router(client.clone(), codes());
        let target = router.resolve(&model()).unwrap();

        let err = router.send(&target, &[]).await.unwrap_err();

        assert_eq!(err.status(), Some(400));
        assert!(!matches!(err, ProviderError::Exhausted { .. }));
        assert_eq!(client.calls(), 1);
        assert!(sleeper.calls().is_empty());
    }

    #[tokio::test]
    async fn test_any_failure_policy_retries_everything() {
        let client = ScriptedClient::new(vec![http(400), http(401), Ok("ok".to_string())]);
        let (router, _sleeper) = router(client.clone(), RetryOn::AnyFailure);
        let target = router.resolve(&model()).unwrap();

        assert_eq!(router.send(&target, &[]).await.unwrap(), "ok");
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_keeps_attempts_and_last_status() {
        let client = ScriptedClient::new(vec![http(503), http(503), http(503), http(429)]);
        let (router, sleeper) = router(client.clone(), codes());
        let target = router.resolve(&model()).unwrap();

        let err = router.send(&target, &[]).await.unwrap_err();

        match err {
            ProviderError::Exhausted {
                attempts, status, ..
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(status, Some(429));
            }
            other => panic!("unexpected error: {other}"),
        }
        // 100 → 200 → 250(截断)
        assert_eq!(
            sleeper.calls(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(250)
            ]
        );
    }

    #[tokio::test]
    async fn test_blank_text_is_retried_as_no_content() {
        let client = ScriptedClient::new(vec![Ok("   ".to_string()), Ok("real".to_string())]);
        let (router, sleeper) = router(client.clone(), codes());
        let target = router.resolve(&model()).unwrap();

        assert_eq!(router.send(&target, &[]).await.unwrap(), "real");
        assert_eq!(sleeper.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_fixed_temperature_is_resolved_before_call() {
        let client = ScriptedClient::new(vec![Ok("a".to_string())]);
        let (router, _sleeper) = router(client.clone(), codes());
        let target = router
            .resolve(&ModelId::new(Provider::OpenRouter, "openai/gpt-5"))
            .unwrap();

        router.send(&target, &[]).await.unwrap();
        assert_eq!(client.temperatures.lock().unwrap().as_slice(), &[1.0]);
    }

    #[test]
    fn test_resolve_without_client_is_config_error() {
        let client = ScriptedClient::new(vec![]);
        let (router, _sleeper) = router(client, codes());
        let err = router
            .resolve(&ModelId::new(Provider::Requesty, "openai/o4-mini"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("REQUESTY_API_KEY"));
    }
}
