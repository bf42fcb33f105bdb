//! 结果导出
//!
//! 每个批次完成后写出三个文件：CSV 摘要、完整 JSON、统计 JSON。

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::error::StoreError;
use crate::infrastructure::KeyValueStore;
use crate::models::model_id::sanitize_for_filename;
use crate::models::{ModelId, QuestionResult};
use crate::services::statistics::AggregateStatistics;

const CSV_HEADER: [&str; 8] = [
    "Question",
    "SQL Query",
    "Score",
    "Result Count",
    "Execution Time (ms)",
    "Error Occurred",
    "Error Message",
    "Sample Results (First 3 Rows)",
];

/// 导出时需要的运行信息
#[derive(Debug, Clone, Copy)]
pub struct RunInfo<'a> {
    pub query_model: &'a ModelId,
    pub judges: &'a [ModelId],
    pub system_prompt: &'a str,
    pub evaluation_prompt: &'a str,
}

impl RunInfo<'_> {
    /// 文件名中的模型部分：`查询模型_评估模型1_评估模型2`
    pub fn model_info(&self) -> String {
        let mut parts = vec![self.query_model.to_string()];
        parts.extend(self.judges.iter().map(ToString::to_string));
        sanitize_for_filename(&parts.join("_"))
    }
}

/// 写出的文件名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFiles {
    pub summary_csv: String,
    pub full_json: String,
    pub statistics_json: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatisticsDocument<'a> {
    #[serde(flatten)]
    statistics: &'a AggregateStatistics,
    models: ModelsSection<'a>,
    prompts: PromptsSection<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModelsSection<'a> {
    query_model: &'a ModelId,
    evaluation_models: &'a [ModelId],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PromptsSection<'a> {
    system_prompt: &'a str,
    evaluation_prompt: &'a str,
}

pub struct ResultExporter {
    store: Arc<dyn KeyValueStore>,
}

impl ResultExporter {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn export(
        &self,
        run: RunInfo<'_>,
        results: &[QuestionResult],
        statistics: &AggregateStatistics,
        at: DateTime<Utc>,
    ) -> Result<ExportedFiles, StoreError> {
        let suffix = format!("{}_{}", run.model_info(), file_timestamp(at));
        let files = ExportedFiles {
            summary_csv: format!("results_summary_{}.csv", suffix),
            full_json: format!("results_full_{}.json", suffix),
            statistics_json: format!("statistics_{}.json", suffix),
        };

        self.store
            .put(&files.summary_csv, render_summary_csv(results).as_bytes())
            .await?;
        info!("摘要结果已导出: {}", files.summary_csv);

        let full = serde_json::to_vec_pretty(results)
            .map_err(|e| StoreError::json(&files.full_json, e))?;
        self.store.put(&files.full_json, &full).await?;
        info!("完整结果已导出: {}", files.full_json);

        let document = StatisticsDocument {
            statistics,
            models: ModelsSection {
                query_model: run.query_model,
                evaluation_models: run.judges,
            },
            prompts: PromptsSection {
                system_prompt: run.system_prompt,
                evaluation_prompt: run.evaluation_prompt,
            },
        };
        let stats = serde_json::to_vec_pretty(&document)
            .map_err(|e| StoreError::json(&files.statistics_json, e))?;
        self.store.put(&files.statistics_json, &stats).await?;
        info!("统计结果已导出: {}", files.statistics_json);

        Ok(files)
    }
}

/// ISO-8601 时间戳，`:` 替换为 `-` 以便用作文件名
pub fn file_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace(':', "-")
}

/// 每题一行的 CSV 摘要
pub fn render_summary_csv(results: &[QuestionResult]) -> String {
    let mut out = String::new();
    push_record(&mut out, CSV_HEADER.iter().map(|h| h.to_string()));

    for r in results {
        let sample = serde_json::to_string(&r.query_results[..r.query_results.len().min(3)])
            .unwrap_or_else(|_| "[]".to_string());
        push_record(
            &mut out,
            [
                r.question.clone(),
                r.query.clone(),
                r.score.to_string(),
                r.result_count.to_string(),
                r.execution_time_ms.to_string(),
                r.error_occurred.to_string(),
                r.error_message.clone().unwrap_or_default(),
                sample,
            ],
        );
    }
    out
}

fn push_record(out: &mut String, fields: impl IntoIterator<Item = String>) {
    let line = fields
        .into_iter()
        .map(|f| escape_field(&f))
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&line);
    out.push('\n');
}

/// RFC 4180：含逗号、引号或换行的字段用双引号包裹，内部引号加倍
fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
