//! 程序配置
//!
//! 两部分：
//! - [`Config`]：环境变量（路径、日志过滤、凭据），带默认值
//! - [`RunConfig`]：运行配置文件（被测模型、评估模型、超时、重试策略、提示词文件）
//!
//! 配置错误是整个运行中唯一的致命错误。

use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::clients::QueryConstraints;
use crate::error::ConfigError;
use crate::models::{ModelId, Provider};
use crate::services::{JudgeRetryConfig, RetryPolicy};

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    /// 运行配置文件
    pub run_file: PathBuf,
    /// 题目列表文件
    pub questions_file: PathBuf,
    /// 导出目录
    pub output_dir: PathBuf,
    /// 检查点目录
    pub checkpoint_dir: PathBuf,
    /// 日志过滤规则（`RUST_LOG` 语法）
    pub log_filter: String,
    // --- 模型服务商 ---
    pub requesty_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    // --- BigQuery ---
    /// 服务账号 JSON，读取其中的 `project_id`
    pub google_credentials_json: Option<String>,
    /// 覆盖服务账号中的项目
    pub bigquery_project_id: Option<String>,
    pub bigquery_access_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            run_file: PathBuf::from("eval.toml"),
            questions_file: PathBuf::from("questions.toml"),
            output_dir: PathBuf::from("output"),
            checkpoint_dir: PathBuf::from("checkpoints"),
            log_filter: "info".to_string(),
            requesty_api_key: None,
            openrouter_api_key: None,
            google_credentials_json: None,
            bigquery_project_id: None,
            bigquery_access_token: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            run_file: env_path("EVAL_RUN_FILE").unwrap_or(default.run_file),
            questions_file: env_path("EVAL_QUESTIONS_FILE").unwrap_or(default.questions_file),
            output_dir: env_path("EVAL_OUTPUT_DIR").unwrap_or(default.output_dir),
            checkpoint_dir: env_path("EVAL_CHECKPOINT_DIR").unwrap_or(default.checkpoint_dir),
            log_filter: env_string("RUST_LOG").unwrap_or(default.log_filter),
            requesty_api_key: env_string("REQUESTY_API_KEY"),
            openrouter_api_key: env_string("OPENROUTER_API_KEY"),
            google_credentials_json: env_string("GOOGLE_APPLICATION_CREDENTIALS_JSON"),
            bigquery_project_id: env_string("BIGQUERY_PROJECT_ID"),
            bigquery_access_token: env_string("BIGQUERY_ACCESS_TOKEN"),
        }
    }

    /// 某个服务商的 API Key
    pub fn api_key(&self, provider: Provider) -> Result<&str, ConfigError> {
        let key = match provider {
            Provider::Requesty => self.requesty_api_key.as_deref(),
            Provider::OpenRouter => self.openrouter_api_key.as_deref(),
        };
        key.ok_or_else(|| ConfigError::missing_env(provider.api_key_env()))
    }

    /// BigQuery 项目：`BIGQUERY_PROJECT_ID` 优先，其次服务账号 JSON 中的 `project_id`
    pub fn bigquery_project_id(&self) -> Result<String, ConfigError> {
        if let Some(project) = &self.bigquery_project_id {
            return Ok(project.clone());
        }

        let raw = self
            .google_credentials_json
            .as_deref()
            .ok_or_else(|| ConfigError::missing_env("GOOGLE_APPLICATION_CREDENTIALS_JSON"))?;
        let credentials: JsonValue =
            serde_json::from_str(raw).map_err(|_| ConfigError::EnvVarParseFailed {
                var_name: "GOOGLE_APPLICATION_CREDENTIALS_JSON".to_string(),
                value: crate::utils::logging::truncate_text(raw, 20),
                expected_type: "JSON".to_string(),
            })?;

        credentials
            .get("project_id")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ConfigError::invalid("GOOGLE_APPLICATION_CREDENTIALS_JSON 中缺少 project_id")
            })
    }

    pub fn bigquery_access_token(&self) -> Result<&str, ConfigError> {
        self.bigquery_access_token
            .as_deref()
            .ok_or_else(|| ConfigError::missing_env("BIGQUERY_ACCESS_TOKEN"))
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_path(name: &str) -> Option<PathBuf> {
    env_string(name).map(PathBuf::from)
}

// ========== 运行配置 ==========

/// 运行配置文件
///
/// ```toml
/// query_models = ["open_router:openai/gpt-4.1", "requesty:google/gemini-2.5-pro"]
/// judges = ["open_router:anthropic/claude-sonnet-4"]
/// question_timeout_secs = 240
/// system_prompt_file = "prompts/system.md"
/// evaluation_prompt_file = "prompts/evaluation.md"
///
/// [provider_retry]
/// retry_on = [429, 500, 502, 503, 504]
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub query_models: Vec<ModelId>,
    pub judges: Vec<ModelId>,
    #[serde(default = "default_question_timeout_secs")]
    pub question_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
    #[serde(default)]
    pub provider_retry: RetryPolicy,
    #[serde(default)]
    pub judge_retry: JudgeRetryConfig,
    pub system_prompt_file: PathBuf,
    pub evaluation_prompt_file: PathBuf,
    /// 追加在每道题后面的固定说明
    #[serde(default)]
    pub question_suffix: String,
    #[serde(default)]
    pub query_constraints: QueryConstraints,
}

fn default_question_timeout_secs() -> u64 {
    240
}

fn default_max_concurrent_batches() -> usize {
    4
}

/// 读取后的提示词
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub system: String,
    pub evaluation: String,
}

impl RunConfig {
    /// 读取并校验运行配置，相对路径的提示词文件以配置文件所在目录为基准
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::FileReadFailed {
                path: path.display().to_string(),
                source,
            })?;
        let mut config = Self::from_toml_str(&text, &path.display().to_string())?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.system_prompt_file = base.join(&config.system_prompt_file);
        config.evaluation_prompt_file = base.join(&config.evaluation_prompt_file);
        Ok(config)
    }

    pub fn from_toml_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::TomlParseFailed {
            path: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.query_models.is_empty() {
            return Err(ConfigError::invalid("query_models 不能为空"));
        }
        if self.judges.is_empty() {
            return Err(ConfigError::invalid("judges 不能为空"));
        }
        if let Some(dup) = first_duplicate(&self.query_models) {
            return Err(ConfigError::invalid(format!("query_models 中重复的模型: {}", dup)));
        }
        if let Some(dup) = first_duplicate(&self.judges) {
            return Err(ConfigError::invalid(format!("judges 中重复的模型: {}", dup)));
        }
        if self.question_timeout_secs == 0 {
            return Err(ConfigError::invalid("question_timeout_secs 必须大于 0"));
        }
        if self.max_concurrent_batches == 0 {
            return Err(ConfigError::invalid("max_concurrent_batches 必须大于 0"));
        }
        if self.judge_retry.max_attempts == 0 {
            return Err(ConfigError::invalid("judge_retry.max_attempts 必须大于 0"));
        }
        Ok(())
    }

    pub fn question_timeout(&self) -> Duration {
        Duration::from_secs(self.question_timeout_secs)
    }

    /// 本次运行实际用到的服务商
    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<Provider> = Vec::new();
        for model in self.query_models.iter().chain(&self.judges) {
            if !providers.contains(&model.provider()) {
                providers.push(model.provider());
            }
        }
        providers
    }

    pub async fn load_prompts(&self) -> Result<Prompts, ConfigError> {
        Ok(Prompts {
            system: read_prompt(&self.system_prompt_file).await?,
            evaluation: read_prompt(&self.evaluation_prompt_file).await?,
        })
    }
}

async fn read_prompt(path: &Path) -> Result<String, ConfigError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::FileReadFailed {
            path: path.display().to_string(),
            source,
        })?;
    if text.trim().is_empty() {
        return Err(ConfigError::invalid(format!(
            "提示词文件为空: {}",
            path.display()
        )));
    }
    Ok(text)
}

fn first_duplicate(models: &[ModelId]) -> Option<&ModelId> {
    let mut seen = HashSet::new();
    models.iter().find(|m| !seen.insert(*m))
}
