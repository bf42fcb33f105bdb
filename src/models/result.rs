use serde::{Deserialize, Serialize};

/// 查询结果中的一行：列名 → 标量值
pub type Row = serde_json::Map<String, serde_json::Value>;

/// 生成模型的回答
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedAnswer {
    /// 去掉代码块之后的说明文字（思路）
    pub free_text: String,
    /// 代码块中的查询语句
    pub extracted_query: Option<String>,
}

/// 查询执行结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub elapsed_ms: u64,
}

impl ExecutionResult {
    pub fn new(rows: Vec<Row>, elapsed_ms: u64) -> Self {
        Self {
            row_count: rows.len(),
            rows,
            elapsed_ms,
        }
    }
}

/// 单个评估模型的评分
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeScore {
    pub judge_id: String,
    pub value: f64,
    pub explanation: String,
}

/// 多个评估模型的汇总评分
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedScore {
    pub value: f64,
    pub explanation: String,
}

/// 单道题目的处理结果
///
/// 不变式：`error_occurred == true` 时 `score == 0`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResult {
    pub question: String,
    #[serde(rename = "sql")]
    pub query: String,
    pub score: f64,
    pub explanation: String,
    pub result_count: usize,
    pub execution_time_ms: u64,
    pub error_occurred: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// 查询返回的原始数据行
    #[serde(default)]
    pub query_results: Vec<Row>,
}

impl QuestionResult {
    /// 流水线开始时创建的空结果
    pub fn pending(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            query: String::new(),
            score: 0.0,
            explanation: String::new(),
            result_count: 0,
            execution_time_ms: 0,
            error_occurred: false,
            error_message: None,
            query_results: Vec::new(),
        }
    }

    /// 标记为失败，分数强制为 0
    pub fn mark_failed(&mut self, message: impl Into<String>, elapsed_ms: u64) {
        self.error_occurred = true;
        self.error_message = Some(message.into());
        self.score = 0.0;
        self.execution_time_ms = elapsed_ms;
    }

    pub fn is_success(&self) -> bool {
        !self.error_occurred
    }
}
