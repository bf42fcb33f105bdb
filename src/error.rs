use thiserror::Error;

/// 应用程序错误类型
///
/// 单题流水线内的所有错误最终都会被编排层转换为一条失败的 `QuestionResult`，
/// 只有 [`AppError::Config`] 会在启动阶段终止整个运行。
#[derive(Debug, Error)]
pub enum AppError {
    /// 模型调用错误
    #[error("模型调用错误: {0}")]
    Provider(#[from] ProviderError),
    /// 响应解析错误
    #[error("解析错误: {0}")]
    Parse(#[from] ParseError),
    /// 查询执行错误
    #[error("{0}")]
    Execution(#[from] ExecutionError),
    /// 单题处理超时
    #[error("处理超时: 已耗时 {elapsed_ms}ms (上限 {timeout_ms}ms)")]
    Timeout { elapsed_ms: u64, timeout_ms: u64 },
    /// 所有评估模型都未能给出有效评分
    #[error("所有评估模型均失败: {}", judges.join(", "))]
    AllJudgesFailed { judges: Vec<String> },
    /// 检查点 / 导出存储错误
    #[error("存储错误: {0}")]
    Store(#[from] StoreError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
}

/// 模型调用错误
#[derive(Debug, Error)]
pub enum ProviderError {
    /// 接口返回非 2xx 状态码
    #[error("HTTP {status} (模型: {model}): {body}")]
    Http {
        model: String,
        status: u16,
        body: String,
    },
    /// 网络层失败（无状态码）
    #[error("网络请求失败 (模型: {model}): {message}")]
    Transport { model: String, message: String },
    /// 传输成功但没有可用文本
    #[error("模型返回内容为空 (模型: {model})")]
    NoContent { model: String },
    /// 请求无法构建，重试也不会成功
    #[error("请求无效 (模型: {model}): {message}")]
    InvalidRequest { model: String, message: String },
    /// 重试次数耗尽
    #[error("模型 {model} 在 {attempts} 次尝试后仍然失败 (最后状态码: {status:?}): {last_error}")]
    Exhausted {
        model: String,
        attempts: u32,
        status: Option<u16>,
        last_error: Box<ProviderError>,
    },
}

impl ProviderError {
    /// 最后一次观察到的 HTTP 状态码
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Http { status, .. } => Some(*status),
            ProviderError::Exhausted { status, .. } => *status,
            _ => None,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            ProviderError::Http { model, .. }
            | ProviderError::Transport { model, .. }
            | ProviderError::NoContent { model }
            | ProviderError::InvalidRequest { model, .. }
            | ProviderError::Exhausted { model, .. } => model,
        }
    }
}

/// 响应解析错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// 生成结果中没有代码块
    #[error("响应中未找到 SQL 查询")]
    MissingQuery,
    /// 评分响应中没有 JSON 对象
    #[error("评分响应中未找到 JSON 对象")]
    MissingJson,
    /// JSON 语法错误
    #[error("评分 JSON 无法解析: {0}")]
    InvalidJson(String),
    /// `value` 字段缺失或不是数字
    #[error("评分结果缺少数值型 \"value\" 字段")]
    MissingValue,
}

/// 查询执行错误，始终带上原始 SQL 便于排查
#[derive(Debug, Error)]
#[error("查询执行失败: {message}\nSQL: {query}")]
pub struct ExecutionError {
    pub query: String,
    pub message: String,
}

impl ExecutionError {
    pub fn new(query: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            message: message.into(),
        }
    }
}

/// 键值存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 文件读写失败
    #[error("读写 {key} 失败: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    /// 序列化 / 反序列化失败
    #[error("JSON 序列化失败 ({key}): {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量不存在
    #[error("环境变量 {var_name} 不存在")]
    EnvVarNotFound { var_name: String },
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 配置文件读取失败
    #[error("读取配置文件失败 ({path}): {source}")]
    FileReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML 解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    /// 重试策略不合法
    #[error("重试策略不合法: {0}")]
    InvalidRetryPolicy(String),
    /// 运行配置不合法
    #[error("运行配置不合法: {0}")]
    Invalid(String),
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建超时错误
    pub fn timeout(elapsed_ms: u64, timeout_ms: u64) -> Self {
        AppError::Timeout {
            elapsed_ms,
            timeout_ms,
        }
    }

    /// 创建所有评估模型失败错误
    pub fn all_judges_failed(judges: impl IntoIterator<Item = impl ToString>) -> Self {
        AppError::AllJudgesFailed {
            judges: judges.into_iter().map(|j| j.to_string()).collect(),
        }
    }
}

impl StoreError {
    pub fn io(key: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            key: key.into(),
            source,
        }
    }

    pub fn json(key: impl Into<String>, source: serde_json::Error) -> Self {
        StoreError::Json {
            key: key.into(),
            source,
        }
    }
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid(message.into())
    }

    pub fn missing_env(var_name: impl Into<String>) -> Self {
        ConfigError::EnvVarNotFound {
            var_name: var_name.into(),
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_keeps_last_status() {
        let err = ProviderError::Exhausted {
            model: "open_router:a/b".to_string(),
            attempts: 3,
            status: Some(503),
            last_error: Box::new(ProviderError::Http {
                model: "open_router:a/b".to_string(),
                status: 503,
                body: "busy".to_string(),
            }),
        };

        assert_eq!(err.status(), Some(503));
        assert_eq!(err.model(), "open_router:a/b");
        let text = err.to_string();
        assert!(text.contains("3 次尝试"));
        assert!(text.contains("busy"));
    }

    #[test]
    fn test_execution_error_mentions_query() {
        let err = AppError::from(ExecutionError::new("SELECT 1", "quota exceeded"));
        let text = err.to_string();
        assert!(text.contains("SELECT 1"));
        assert!(text.contains("quota exceeded"));
    }

    #[test]
    fn test_all_judges_failed_lists_judges() {
        let err = AppError::all_judges_failed(["requesty:x", "open_router:y"]);
        assert_eq!(
            err.to_string(),
            "所有评估模型均失败: requesty:x, open_router:y"
        );
    }
}
