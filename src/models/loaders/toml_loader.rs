use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tokio::fs;

/// 题目列表文件格式
///
/// ```toml
/// questions = [
///     "What AI stocks have the highest market cap?",
///     "What was Microsoft's free cash flow in 2024?",
/// ]
/// ```
#[derive(Debug, Deserialize)]
struct QuestionFile {
    questions: Vec<String>,
}

/// 从 TOML 文件加载题目列表
///
/// 空白题目会被丢弃，其余题目保持原有顺序（顺序即题目编号）。
pub async fn load_questions(toml_file_path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(toml_file_path)
        .await
        .with_context(|| format!("无法读取题目文件: {}", toml_file_path.display()))?;

    let questions = parse_questions(&content)
        .with_context(|| format!("无法解析题目文件: {}", toml_file_path.display()))?;

    tracing::info!(
        "成功加载 {} 道题目: {}",
        questions.len(),
        toml_file_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
    );

    Ok(questions)
}

fn parse_questions(content: &str) -> Result<Vec<String>> {
    let file: QuestionFile = toml::from_str(content)?;
    let total = file.questions.len();

    let questions: Vec<String> = file
        .questions
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();

    if questions.len() < total {
        tracing::warn!("忽略了 {} 道空白题目", total - questions.len());
    }

    Ok(questions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_questions_keeps_order_and_drops_blank() {
        let content = r#"
questions = [
    "What AI stocks have the highest market cap?",
    "   ",
    "  Which sector had the best performance in the most recent quarter?  ",
]
"#;
        let questions = parse_questions(content).unwrap();
        assert_eq!(
            questions,
            vec![
                "What AI stocks have the highest market cap?".to_string(),
                "Which sector had the best performance in the most recent quarter?".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_questions_rejects_missing_key() {
        assert!(parse_questions("items = []").is_err());
    }

    #[tokio::test]
    async fn test_load_questions_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("questions.toml");
        tokio::fs::write(&path, "questions = [\"a\", \"b\"]").await.unwrap();

        let questions = load_questions(&path).await.unwrap();
        assert_eq!(questions.len(), 2);
    }
}
