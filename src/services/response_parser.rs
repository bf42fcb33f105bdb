//! 模型响应解析
//!
//! 两个纯函数：从生成结果里取出查询语句，从评分结果里容错地取出 JSON。

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::error::ParseError;
use crate::models::GeneratedAnswer;

/// 代码块：语言标签可选，开头的换行必须有
static CODE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```[\w+-]*[ \t]*\r?\n([\s\S]*?)```").expect("静态正则")
});

static JSON_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```json[ \t]*\r?\n([\s\S]*?)```").expect("静态正则")
});

/// 贪婪匹配第一个 `{` 到最后一个 `}`
static JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[\s\S]*\}").expect("静态正则"));

/// 从生成结果中提取查询
///
/// 找到代码块时：`extracted_query` 为去掉首尾空白的块内容，`free_text` 为去掉该块之后的文本；
/// 找不到（或块内容为空）时 `extracted_query` 为 `None`，`free_text` 为原文。
pub fn extract_query(text: &str) -> GeneratedAnswer {
    let Some(caps) = CODE_BLOCK.captures(text) else {
        return GeneratedAnswer {
            free_text: text.to_string(),
            extracted_query: None,
        };
    };

    let query = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
    if query.is_empty() {
        return GeneratedAnswer {
            free_text: text.to_string(),
            extracted_query: None,
        };
    }

    let free_text = CODE_BLOCK.replace(text, "").trim().to_string();
    GeneratedAnswer {
        free_text,
        extracted_query: Some(query.to_string()),
    }
}

/// 从评分结果中解析 `(value, explanation)`
pub fn parse_score_payload(text: &str) -> Result<(f64, String), ParseError> {
    let candidate = JSON_BLOCK
        .captures(text)
        .and_then(|caps| caps.get(1))
        .or_else(|| JSON_OBJECT.find(text))
        .map(|m| m.as_str())
        .unwrap_or(text)
        .trim();

    let json_text = if candidate.starts_with('{') {
        candidate
    } else {
        let start = candidate.find('{').ok_or(ParseError::MissingJson)?;
        &candidate[start..]
    };

    let payload: Value =
        serde_json::from_str(json_text).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    let value = payload
        .get("value")
        .and_then(Value::as_f64)
        .ok_or(ParseError::MissingValue)?;

    let explanation = match payload.get("explanation") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    Ok((value, explanation))
}
