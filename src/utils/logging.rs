/// 日志工具模块
///
/// 提供日志初始化、横幅输出和文本截断等辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::services::AggregateStatistics;

/// 初始化日志
///
/// # 参数
/// - `filter`: `RUST_LOG` 语法的过滤规则，无法解析时退回 `info`
pub fn init(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    // 重复初始化（例如测试中）时忽略
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
///
/// # 参数
/// - `query_models`: 被测模型数量
/// - `judges`: 评估模型列表
/// - `questions`: 题目数量
/// - `max_concurrent`: 最大并发批次数
pub fn log_startup(query_models: usize, judges: &[String], questions: usize, max_concurrent: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 批量查询评估模式");
    info!("🤖 被测模型: {} 个", query_models);
    info!("⚖️ 评估模型: {}", judges.join(", "));
    info!("📋 题目数量: {}", questions);
    info!("📊 最大并发批次: {}", max_concurrent);
    info!("{}", "=".repeat(60));
}

/// 记录批次开始信息
///
/// # 参数
/// - `query_model`: 被测模型
/// - `start_index`: 起始题目（从 0 开始，恢复时大于 0）
/// - `total`: 题目总数
pub fn log_batch_start(query_model: &str, start_index: usize, total: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始评估模型: {}", query_model);
    if start_index > 0 {
        info!("♻️ 从检查点恢复: 第 {}/{} 题", start_index + 1, total);
    } else {
        info!("📄 共 {} 道题", total);
    }
    info!("{}", "=".repeat(60));
}

/// 打印单个批次的评估汇总
pub fn print_batch_summary(
    query_model: &str,
    judges: &[String],
    stats: &AggregateStatistics,
    successful: usize,
) {
    info!("\n{}", "=".repeat(60));
    info!("📊 评估汇总");
    info!("{}", "=".repeat(60));
    info!("查询模型: {}", query_model);
    info!("评估模型: {}", judges.join(", "));
    info!("题目总数: {}", stats.total_questions);
    info!("成功查询: {}", successful);
    info!("平均分: {:.2}", stats.average_score);
    info!("中位数: {:.2}", stats.median_score);
    info!("最低分: {:.2}", stats.min_score);
    info!("最高分: {:.2}", stats.max_score);
    info!("标准差: {:.2}", stats.standard_deviation);
    info!("成功率: {:.2}%", stats.success_rate);
    info!("平均执行时间: {:.2}ms", stats.average_execution_time_ms);
    info!("\n分数分布:");
    for (label, percent) in stats.score_distribution.labeled() {
        info!("  {}: {:.2}%", label, percent);
    }
    info!("{}", "=".repeat(60));
}

/// 打印所有批次完成后的统计
///
/// # 参数
/// - `successful`: 成功的批次数
/// - `failed`: 失败的批次 `(模型, 错误)`
pub fn print_final_stats(successful: usize, failed: &[(String, String)]) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部评估完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}", successful);
    info!("❌ 失败: {}", failed.len());
    for (model, error) in failed {
        info!("  - {}: {}", model, error);
    }
    info!("{}", "=".repeat(60));
}

/// 按平均分从高到低打印排名
pub fn print_ranking(ranking: &[(String, f64)]) {
    if ranking.is_empty() {
        return;
    }
    info!("\n🏆 模型排名（按平均分）:");
    for (i, (model, score)) in ranking.iter().enumerate() {
        info!("{}. {}: {:.3}", i + 1, model, score);
    }
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度（按字符计）
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text_counts_chars() {
        assert_eq!(truncate_text("abc", 5), "abc");
        assert_eq!(truncate_text("abcdef", 3), "abc...");
        assert_eq!(truncate_text("中文内容很长", 2), "中文...");
    }
}
