use phf::phf_map;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// 默认采样温度
pub const DEFAULT_TEMPERATURE: f32 = 0.0;

/// 只接受固定温度的模型（推理类模型拒绝非默认温度）
static FIXED_TEMPERATURES: phf::Map<&'static str, f32> = phf_map! {
    "openai/o3" => 1.0,
    "openai/o4-mini" => 1.0,
    "openai/gpt-5" => 1.0,
    "openai/gpt-5-mini" => 1.0,
    "openai/gpt-5-nano" => 1.0,
};

/// 模型服务商
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Requesty 路由
    Requesty,
    /// OpenRouter 路由
    OpenRouter,
}

impl Provider {
    /// 获取标准名称
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Requesty => "requesty",
            Provider::OpenRouter => "open_router",
        }
    }

    /// 对应的 API Key 环境变量
    pub fn api_key_env(self) -> &'static str {
        match self {
            Provider::Requesty => "REQUESTY_API_KEY",
            Provider::OpenRouter => "OPENROUTER_API_KEY",
        }
    }
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "requesty" => Ok(Provider::Requesty),
            "open_router" | "openrouter" => Ok(Provider::OpenRouter),
            other => Err(ConfigError::invalid(format!("未知的服务商: {}", other))),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 模型标识
///
/// 配置加载时一次性解析为 `服务商 + 模型名`，之后路由只做穷尽匹配。
/// 文本形式为 `provider:name`，例如 `open_router:google/gemini-2.5-pro`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelId {
    provider: Provider,
    name: String,
}

impl ModelId {
    pub fn new(provider: Provider, name: impl Into<String>) -> Self {
        Self {
            provider,
            name: name.into(),
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// 服务商侧的模型名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 调用该模型时使用的采样温度
    pub fn temperature(&self) -> f32 {
        FIXED_TEMPERATURES
            .get(self.name.as_str())
            .copied()
            .unwrap_or(DEFAULT_TEMPERATURE)
    }

    /// 文件名安全的形式，用于检查点和导出文件名
    ///
    /// 不同的模型标识一定得到不同的结果：`/` 写作 `_`，
    /// 其余不安全字符（包括 `_` 本身）写作 `~十六进制码点~`。
    pub fn sanitized(&self) -> String {
        let mut out = String::with_capacity(self.provider.as_str().len() + 1 + self.name.len());
        out.push_str(self.provider.as_str());
        out.push('_');
        for c in self.name.chars() {
            match c {
                '/' => out.push('_'),
                c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-') => out.push(c),
                c => out.push_str(&format!("~{:x}~", c as u32)),
            }
        }
        out
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.name)
    }
}

impl FromStr for ModelId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, name) = s
            .split_once(':')
            .ok_or_else(|| ConfigError::invalid(format!("模型标识缺少服务商前缀: {}", s)))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::invalid(format!("模型名为空: {}", s)));
        }
        Ok(Self::new(provider.parse()?, name))
    }
}

impl TryFrom<String> for ModelId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelId> for String {
    fn from(value: ModelId) -> Self {
        value.to_string()
    }
}

/// 将任意文本转换为文件名安全的形式
pub fn sanitize_for_filename(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_id() {
        let id: ModelId = "open_router:google/gemini-2.5-pro".parse().unwrap();
        assert_eq!(id.provider(), Provider::OpenRouter);
        assert_eq!(id.name(), "google/gemini-2.5-pro");
        assert_eq!(id.to_string(), "open_router:google/gemini-2.5-pro");
    }

    #[test]
    fn test_parse_model_id_rejects_unknown_provider() {
        assert!("bedrock:foo".parse::<ModelId>().is_err());
        assert!("no-prefix".parse::<ModelId>().is_err());
        assert!("requesty:".parse::<ModelId>().is_err());
    }

    #[test]
    fn test_fixed_temperature_allow_list() {
        let reasoning = ModelId::new(Provider::Requesty, "openai/o4-mini");
        let regular = ModelId::new(Provider::Requesty, "google/gemini-2.0-flash-001");
        assert_eq!(reasoning.temperature(), 1.0);
        assert_eq!(regular.temperature(), DEFAULT_TEMPERATURE);
    }

    #[test]
    fn test_same_name_on_two_providers_does_not_collide() {
        let a = ModelId::new(Provider::Requesty, "google/gemini-2.0-flash-001");
        let b = ModelId::new(Provider::OpenRouter, "google/gemini-2.0-flash-001");
        assert_ne!(a.sanitized(), b.sanitized());
        assert_eq!(a.sanitized(), "requesty_google_gemini-2.0-flash-001");
    }

    #[test]
    fn test_sanitized_keeps_slash_and_underscore_apart() {
        let slash = ModelId::new(Provider::OpenRouter, "vendor/model");
        let underscore = ModelId::new(Provider::OpenRouter, "vendor_model");
        assert_eq!(slash.sanitized(), "open_router_vendor_model");
        assert_eq!(underscore.sanitized(), "open_router_vendor~5f~model");
        assert_ne!(slash.sanitized(), underscore.sanitized());

        let colon = ModelId::new(Provider::Requesty, "openai/gpt-4o:free");
        assert_eq!(colon.sanitized(), "requesty_openai_gpt-4o~3a~free");
        assert!(colon
            .sanitized()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '~')));
    }

    #[test]
    fn test_serde_uses_text_form() {
        let id = ModelId::new(Provider::OpenRouter, "meta-llama/llama-4-maverick");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"open_router:meta-llama/llama-4-maverick\"");
        let back: ModelId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
