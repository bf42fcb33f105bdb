//! 补全接口客户端
//!
//! 两个服务商家族的请求信封不同，但逻辑契约相同：
//! 发送消息列表，返回第一个 choice 的文本，或者带状态码的错误。
//! 客户端本身无状态、不重试，重试由 `ResilientRouter` 负责。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProviderError;
use crate::models::ModelId;
use crate::utils::logging::truncate_text;

pub const REQUESTY_BASE_URL: &str = "https://router.requesty.ai/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// 在请求元数据中标识本应用
const APP_TITLE: &str = "EvaluateGPT";
const APP_REFERER: &str = "https://evaluategpt.com";

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// 聊天消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// 单次补全请求
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub model: &'a ModelId,
    pub messages: &'a [ChatMessage],
    pub temperature: f32,
}

/// 单个补全接口
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// 发送一次请求，返回模型文本（可能为空，由调用方判定）
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, ProviderError>;
}

// ========== 响应格式（两个家族相同） ==========

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

// ========== Requesty ==========

#[derive(Serialize)]
struct RequestyBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    requesty: RequestyMetadata<'a>,
}

#[derive(Serialize)]
struct RequestyMetadata<'a> {
    user_id: &'a str,
    extra: RequestyExtra<'a>,
}

#[derive(Serialize)]
struct RequestyExtra<'a> {
    title: &'a str,
}

/// Requesty 路由客户端
pub struct RequestyClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl RequestyClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, REQUESTY_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl CompletionClient for RequestyClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, ProviderError> {
        let body = RequestyBody {
            model: request.model.name(),
            messages: request.messages,
            temperature: request.temperature,
            requesty: RequestyMetadata {
                user_id: APP_TITLE,
                extra: RequestyExtra { title: APP_TITLE },
            },
        };

        let builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body);

        send_chat(builder, request.model).await
    }
}

// ========== OpenRouter ==========

#[derive(Serialize)]
struct OpenRouterBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    user: &'a str,
}

/// OpenRouter 路由客户端
pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, OPENROUTER_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl CompletionClient for OpenRouterClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, ProviderError> {
        let body = OpenRouterBody {
            model: request.model.name(),
            messages: request.messages,
            temperature: request.temperature,
            user: APP_TITLE,
        };

        let builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", APP_REFERER)
            .header("X-Title", APP_TITLE)
            .json(&body);

        send_chat(builder, request.model).await
    }
}

/// 发送请求并提取第一个 choice 的文本
async fn send_chat(
    builder: reqwest::RequestBuilder,
    model: &ModelId,
) -> Result<String, ProviderError> {
    debug!("调用补全接口，模型: {}", model);

    let response = builder.send().await.map_err(|e| {
        if e.is_builder() {
            ProviderError::InvalidRequest {
                model: model.to_string(),
                message: e.to_string(),
            }
        } else {
            ProviderError::Transport {
                model: model.to_string(),
                message: e.to_string(),
            }
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Http {
            model: model.to_string(),
            status: status.as_u16(),
            body: truncate_text(&body, 500),
        });
    }

    let parsed: ChatResponse = response.json().await.map_err(|e| ProviderError::Transport {
        model: model.to_string(),
        message: format!("响应解码失败: {}", e),
    })?;

    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| ProviderError::NoContent {
            model: model.to_string(),
        })?;

    debug!("补全接口调用成功，模型: {}，响应长度: {}", model, content.len());
    Ok(content)
}
