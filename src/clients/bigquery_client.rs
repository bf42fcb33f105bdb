//! BigQuery 查询执行客户端
//!
//! 流程：`submit` 创建查询作业 → `fetch_results` 轮询直到作业完成并分页取回所有行。
//! 所有错误信息都带上原始 SQL。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::time::Instant;
use tracing::{debug, info};

use crate::error::ExecutionError;
use crate::models::{ExecutionResult, Row};

pub const BIGQUERY_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// 单次轮询时服务端最长等待时间
const POLL_TIMEOUT_MS: u64 = 10_000;

/// 查询约束
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueryConstraints {
    /// 计费字节上限，防止失控查询
    pub byte_limit: u64,
    /// 作业所在区域
    pub region: String,
}

impl Default for QueryConstraints {
    fn default() -> Self {
        Self {
            byte_limit: 1_000_000_000,
            region: "US".to_string(),
        }
    }
}

/// 查询执行服务
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &str) -> Result<ExecutionResult, ExecutionError>;
}

/// 已提交的作业
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: String,
    pub location: String,
}

/// BigQuery REST 客户端
pub struct BigQueryClient {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
    access_token: String,
    constraints: QueryConstraints,
}

// ========== REST 响应格式 ==========

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResponse {
    job_reference: JobReference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResultsResponse {
    #[serde(default)]
    job_complete: bool,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<TableField>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct TableField {
    name: String,
    #[serde(rename = "type", default)]
    field_type: String,
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: JsonValue,
}

impl BigQueryClient {
    pub fn new(
        project_id: impl Into<String>,
        access_token: impl Into<String>,
        constraints: QueryConstraints,
    ) -> Self {
        Self::with_base_url(BIGQUERY_BASE_URL, project_id, access_token, constraints)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        access_token: impl Into<String>,
        constraints: QueryConstraints,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            project_id: project_id.into(),
            access_token: access_token.into(),
            constraints,
        }
    }

    /// 提交查询作业
    pub async fn submit(&self, query: &str) -> Result<JobHandle, ExecutionError> {
        let body = json!({
            "jobReference": {
                "projectId": self.project_id,
                "location": self.constraints.region,
            },
            "configuration": {
                "query": {
                    "query": query,
                    "useLegacySql": false,
                    "maximumBytesBilled": self.constraints.byte_limit.to_string(),
                }
            }
        });

        let response = self
            .http
            .post(format!("{}/projects/{}/jobs", self.base_url, self.project_id))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExecutionError::new(query, format!("提交作业失败: {}", e)))?;

        let job: JobResponse = read_json(response, query).await?;
        let handle = JobHandle {
            location: job
                .job_reference
                .location
                .unwrap_or_else(|| self.constraints.region.clone()),
            job_id: job.job_reference.job_id,
        };

        info!("作业 {} 已启动", handle.job_id);
        Ok(handle)
    }

    /// 等待作业完成并取回所有行
    pub async fn fetch_results(
        &self,
        job: &JobHandle,
        query: &str,
    ) -> Result<Vec<Row>, ExecutionError> {
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.base_url, self.project_id, job.job_id
        );

        let mut rows = Vec::new();
        let mut schema: Option<TableSchema> = None;
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("location", job.location.clone()),
                ("timeoutMs", POLL_TIMEOUT_MS.to_string()),
            ];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }

            let response = self
                .http
                .get(&url)
                .bearer_auth(&self.access_token)
                .query(&params)
                .send()
                .await
                .map_err(|e| ExecutionError::new(query, format!("获取结果失败: {}", e)))?;

            let page: QueryResultsResponse = read_json(response, query).await?;

            if !page.job_complete {
                debug!("作业 {} 尚未完成，继续等待", job.job_id);
                continue;
            }

            if schema.is_none() {
                schema = page.schema;
            }
            let fields = schema.as_ref().map(|s| s.fields.as_slice()).unwrap_or(&[]);
            rows.extend(page.rows.into_iter().map(|row| convert_row(fields, row)));

            match page.page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(rows)
    }
}

#[async_trait]
impl QueryExecutor for BigQueryClient {
    async fn execute(&self, query: &str) -> Result<ExecutionResult, ExecutionError> {
        let started = Instant::now();
        let job = self.submit(query).await?;
        let rows = self.fetch_results(&job, query).await?;
        Ok(ExecutionResult::new(rows, started.elapsed().as_millis() as u64))
    }
}

/// 读取响应体；非 2xx 时提取 BigQuery 的错误信息
async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    query: &str,
) -> Result<T, ExecutionError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ExecutionError::new(query, format!("读取响应失败: {}", e)))?;

    if !status.is_success() {
        let message = serde_json::from_str::<JsonValue>(&text)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or(text);
        return Err(ExecutionError::new(
            query,
            format!("HTTP {}: {}", status.as_u16(), message),
        ));
    }

    serde_json::from_str(&text)
        .map_err(|e| ExecutionError::new(query, format!("响应解析失败: {}", e)))
}

/// 按 schema 把 `f/v` 格式的行转换为列名映射
fn convert_row(fields: &[TableField], row: TableRow) -> Row {
    fields
        .iter()
        .zip(row.f)
        .map(|(field, cell)| (field.name.clone(), convert_cell(field, cell.v)))
        .collect()
}

fn convert_cell(field: &TableField, value: JsonValue) -> JsonValue {
    if field.mode.as_deref() == Some("REPEATED") {
        return match value {
            JsonValue::Array(items) => JsonValue::Array(
                items
                    .into_iter()
                    .map(|item| match item {
                        JsonValue::Object(mut map) => {
                            convert_scalar(&field.field_type, map.remove("v").unwrap_or_default())
                        }
                        other => convert_scalar(&field.field_type, other),
                    })
                    .collect(),
            ),
            other => other,
        };
    }
    convert_scalar(&field.field_type, value)
}

fn convert_scalar(field_type: &str, value: JsonValue) -> JsonValue {
    let JsonValue::String(raw) = value else {
        return value;
    };

    match field_type {
        "INTEGER" | "INT64" => raw
            .parse::<i64>()
            .map(JsonValue::from)
            .unwrap_or(JsonValue::String(raw)),
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::String(raw)),
        "BOOLEAN" | "BOOL" => match raw.as_str() {
            "true" => JsonValue::Bool(true),
            "false" => JsonValue::Bool(false),
            _ => JsonValue::String(raw),
        },
        _ => JsonValue::String(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn field(name: &str, field_type: &str) -> TableField {
        TableField {
            name: name.to_string(),
            field_type: field_type.to_string(),
            mode: None,
        }
    }

    #[test]
    fn test_convert_row_by_schema() {
        let fields = vec![
            field("symbol", "STRING"),
            field("market_cap", "FLOAT"),
            field("rank", "INTEGER"),
            field("dividend", "BOOLEAN"),
            field("sector", "STRING"),
        ];
        let row: TableRow = serde_json::from_value(json!({
            "f": [
                {"v": "NVDA"},
                {"v": "3.2E12"},
                {"v": "1"},
                {"v": "true"},
                {"v": null}
            ]
        }))
        .unwrap();

        let converted = convert_row(&fields, row);
        assert_eq!(converted["symbol"], json!("NVDA"));
        assert_eq!(converted["market_cap"], json!(3.2e12));
        assert_eq!(converted["rank"], json!(1));
        assert_eq!(converted["dividend"], json!(true));
        assert_eq!(converted["sector"], JsonValue::Null);
    }

    #[test]
    fn test_convert_repeated_field() {
        let mut tags = field("tags", "STRING");
        tags.mode = Some("REPEATED".to_string());
        let value = convert_cell(&tags, json!([{"v": "ai"}, {"v": "chips"}]));
        assert_eq!(value, json!(["ai", "chips"]));
    }

    #[tokio::test]
    async fn test_execute_submits_then_fetches_pages() {
        let mut server = mockito::Server::new_async().await;

        let submit = server
            .mock("POST", "/projects/p1/jobs")
            .match_header("authorization", "Bearer tok")
            .match_body(Matcher::PartialJson(json!({
                "configuration": {
                    "query": {
                        "query": "SELECT 1",
                        "useLegacySql": false,
                        "maximumBytesBilled": "1000000000"
                    }
                },
                "jobReference": { "location": "US" }
            })))
            .with_status(200)
            .with_body(r#"{"jobReference":{"projectId":"p1","jobId":"job_1","location":"US"}}"#)
            .create_async()
            .await;

        let second_page = server
            .mock("GET", Matcher::Regex(r"^/projects/p1/queries/job_1".to_string()))
            .match_query(Matcher::Regex("pageToken=t2".to_string()))
            .with_status(200)
            .with_body(r#"{"jobComplete":true,"rows":[{"f":[{"v":"2"}]}]}"#)
            .create_async()
            .await;

        let first_page = server
            .mock("GET", Matcher::Regex(r"^/projects/p1/queries/job_1".to_string()))
            .match_query(Matcher::Regex("^location=US&timeoutMs=10000$".to_string()))
            .with_status(200)
            .with_body(
                r#"{"jobComplete":true,"schema":{"fields":[{"name":"n","type":"INTEGER"}]},"rows":[{"f":[{"v":"1"}]}],"pageToken":"t2"}"#,
            )
            .create_async()
            .await;

        let client = BigQueryClient::with_base_url(
            server.url(),
            "p1",
            "tok",
            QueryConstraints::default(),
        );
        let result = client.execute("SELECT 1").await.unwrap();

        assert_eq!(result.row_count, 2);
        assert_eq!(result.rows[0]["n"], json!(1));
        assert_eq!(result.rows[1]["n"], json!(2));
        submit.assert_async().await;
        first_page.assert_async().await;
        second_page.assert_async().await;
    }

    #[tokio::test]
    async fn test_execute_error_mentions_query() {
        let mut server = mockito::Server::new_async().await;
        let _submit = server
            .mock("POST", "/projects/p1/jobs")
            .with_status(400)
            .with_body(r#"{"error":{"code":400,"message":"Unrecognized name: foo"}}"#)
            .create_async()
            .await;

        let client = BigQueryClient::with_base_url(
            server.url(),
            "p1",
            "tok",
            QueryConstraints::default(),
        );
        let err = client.execute("SELECT foo FROM t").await.unwrap_err();

        assert_eq!(err.query, "SELECT foo FROM t");
        assert!(err.message.contains("Unrecognized name: foo"));
        assert!(err.message.contains("400"));
    }
}
