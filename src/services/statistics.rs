//! 统计汇总（纯函数）

use serde::{Deserialize, Serialize};

use crate::models::QuestionResult;

/// 分数分布，每个区间的值是占总题数的百分比
///
/// 区间上界包含在内：`<= 0.2`、`<= 0.5`、`<= 0.7`、`<= 0.9`、其余。0 分落在第一个区间。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreDistribution {
    #[serde(rename = "0.0-0.2")]
    pub poor: f64,
    #[serde(rename = "0.3-0.5")]
    pub fair: f64,
    #[serde(rename = "0.6-0.7")]
    pub good: f64,
    #[serde(rename = "0.8-0.9")]
    pub very_good: f64,
    #[serde(rename = "1.0")]
    pub excellent: f64,
}

impl ScoreDistribution {
    fn bucket_mut(&mut self, score: f64) -> &mut f64 {
        if score <= 0.2 {
            &mut self.poor
        } else if score <= 0.5 {
            &mut self.fair
        } else if score <= 0.7 {
            &mut self.good
        } else if score <= 0.9 {
            &mut self.very_good
        } else {
            &mut self.excellent
        }
    }

    /// `(标签, 百分比)`，按区间顺序
    pub fn labeled(&self) -> [(&'static str, f64); 5] {
        [
            ("Poor (0.0-0.2)", self.poor),
            ("Fair (0.3-0.5)", self.fair),
            ("Good (0.6-0.7)", self.good),
            ("Very Good (0.8-0.9)", self.very_good),
            ("Excellent (1.0)", self.excellent),
        ]
    }

    pub fn total(&self) -> f64 {
        self.poor + self.fair + self.good + self.very_good + self.excellent
    }
}

/// 一个批次的汇总统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStatistics {
    pub total_questions: usize,
    pub average_score: f64,
    pub median_score: f64,
    pub min_score: f64,
    pub max_score: f64,
    pub standard_deviation: f64,
    /// 未出错题目的百分比（0-100）
    #[serde(rename = "executionSuccessRate")]
    pub success_rate: f64,
    /// 只统计成功的题目
    pub average_execution_time_ms: f64,
    pub score_distribution: ScoreDistribution,
}

/// 汇总所有题目的结果，失败题目按 0 分参与分数统计
pub fn aggregate(results: &[QuestionResult]) -> AggregateStatistics {
    if results.is_empty() {
        return AggregateStatistics::default();
    }

    let n = results.len() as f64;
    let mut scores: Vec<f64> = results.iter().map(|r| r.score).collect();
    scores.sort_by(f64::total_cmp);

    let average = scores.iter().sum::<f64>() / n;
    let mid = scores.len() / 2;
    let median = if scores.len() % 2 == 0 {
        (scores[mid - 1] + scores[mid]) / 2.0
    } else {
        scores[mid]
    };
    let variance = scores.iter().map(|s| (s - average).powi(2)).sum::<f64>() / n;

    let successes: Vec<&QuestionResult> = results.iter().filter(|r| r.is_success()).collect();
    let average_execution_time_ms = if successes.is_empty() {
        0.0
    } else {
        successes
            .iter()
            .map(|r| r.execution_time_ms as f64)
            .sum::<f64>()
            / successes.len() as f64
    };

    let mut distribution = ScoreDistribution::default();
    for score in &scores {
        *distribution.bucket_mut(*score) += 1.0;
    }
    for bucket in [
        &mut distribution.poor,
        &mut distribution.fair,
        &mut distribution.good,
        &mut distribution.very_good,
        &mut distribution.excellent,
    ] {
        *bucket = *bucket / n * 100.0;
    }

    AggregateStatistics {
        total_questions: results.len(),
        average_score: average,
        median_score: median,
        min_score: scores[0],
        max_score: scores[scores.len() - 1],
        standard_deviation: variance.sqrt(),
        success_rate: successes.len() as f64 / n * 100.0,
        average_execution_time_ms,
        score_distribution: distribution,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn scored(score: f64, time_ms: u64) -> QuestionResult {
        let mut r = QuestionResult::pending("q");
        r.score = score;
        r.execution_time_ms = time_ms;
        r
    }

    fn failed(time_ms: u64) -> QuestionResult {
        let mut r = QuestionResult::pending("q");
        r.mark_failed("boom", time_ms);
        r
    }

    fn from_scores(scores: &[f64]) -> Vec<QuestionResult> {
        scores.iter().map(|s| scored(*s, 10)).collect()
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(aggregate(&from_scores(&[0.8, 0.2, 0.5])).median_score, 0.5);
        let even = aggregate(&from_scores(&[0.2, 0.8, 0.4, 0.6])).median_score;
        assert!((even - 0.5).abs() < EPS);
    }

    #[test]
    fn test_distribution_sums_to_hundred_and_average_matches_sum() {
        let cases: [&[f64]; 4] = [
            &[0.0],
            &[1.0, 1.0, 0.3],
            &[0.1, 0.2, 0.21, 0.5, 0.55, 0.7, 0.75, 0.9, 0.95],
            &[0.33, 0.66, 0.99, 0.0, 0.0, 0.12, 0.5],
        ];
        for scores in cases {
            let stats = aggregate(&from_scores(scores));
            assert!((stats.score_distribution.total() - 100.0).abs() < 1e-6);
            let sum: f64 = scores.iter().sum();
            assert!((stats.average_score * scores.len() as f64 - sum).abs() < 1e-9);
        }
    }

    #[test]
    fn test_bucket_boundaries_are_inclusive() {
        let stats = aggregate(&from_scores(&[0.0, 0.2, 0.5, 0.7, 0.9, 1.0]));
        let d = &stats.score_distribution;
        assert!((d.poor - 200.0 / 6.0).abs() < EPS);
        assert!((d.fair - 100.0 / 6.0).abs() < EPS);
        assert!((d.good - 100.0 / 6.0).abs() < EPS);
        assert!((d.very_good - 100.0 / 6.0).abs() < EPS);
        assert!((d.excellent - 100.0 / 6.0).abs() < EPS);
    }

    #[test]
    fn test_two_scores_and_one_failure() {
        let results = vec![scored(0.6, 100), scored(0.9, 300), failed(5000)];
        let stats = aggregate(&results);

        assert!((stats.average_score - 0.5).abs() < EPS);
        assert!((stats.success_rate - 200.0 / 3.0).abs() < 1e-6);
        assert_eq!(stats.average_execution_time_ms, 200.0);
        assert_eq!(stats.min_score, 0.0);
        assert_eq!(stats.max_score, 0.9);
        assert_eq!(stats.median_score, 0.6);

        let d = &stats.score_distribution;
        let third = 100.0 / 3.0;
        assert!((d.poor - third).abs() < 1e-6);
        assert!((d.good - third).abs() < 1e-6);
        assert!((d.very_good - third).abs() < 1e-6);
        assert_eq!(d.fair, 0.0);
        assert_eq!(d.excellent, 0.0);
    }

    #[test]
    fn test_population_stddev() {
        let stats = aggregate(&from_scores(&[0.2, 0.4, 0.6, 0.8]));
        // 方差 = (0.09 + 0.01 + 0.01 + 0.09) / 4 = 0.05
        assert!((stats.standard_deviation - 0.05f64.sqrt()).abs() < EPS);
    }

    #[test]
    fn test_low_score_success_still_counts_as_success() {
        let stats = aggregate(&[scored(0.0, 40), failed(10)]);
        assert_eq!(stats.success_rate, 50.0);
        assert_eq!(stats.average_execution_time_ms, 40.0);
    }

    #[test]
    fn test_empty_and_all_failed() {
        assert_eq!(aggregate(&[]), AggregateStatistics::default());

        let stats = aggregate(&[failed(10), failed(20)]);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.average_execution_time_ms, 0.0);
        assert_eq!(stats.score_distribution.poor, 100.0);
    }

    #[test]
    fn test_serialized_bucket_names() {
        let value = serde_json::to_value(aggregate(&from_scores(&[1.0]))).unwrap();
        assert_eq!(value["scoreDistribution"]["1.0"], 100.0);
        assert_eq!(value["scoreDistribution"]["0.0-0.2"], 0.0);
        assert!(value.get("averageExecutionTimeMs").is_some());
        assert_eq!(value["executionSuccessRate"], 100.0);
    }
}
