//! 题目处理上下文
//!
//! 封装"哪个查询模型的第几题"这一信息

use std::fmt::Display;

use crate::models::ModelId;

/// 题目处理上下文
#[derive(Debug, Clone)]
pub struct QuestionCtx {
    /// 被测试的查询模型
    pub query_model: ModelId,

    /// 题目序号（从1开始）
    pub question_index: usize,

    /// 本批次题目总数
    pub total_questions: usize,
}

impl QuestionCtx {
    pub fn new(query_model: ModelId, question_index: usize, total_questions: usize) -> Self {
        Self {
            query_model,
            question_index,
            total_questions,
        }
    }
}

impl Display for QuestionCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{} 题目 {}/{}]",
            self.query_model, self.question_index, self.total_questions
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provider;

    #[test]
    fn test_display() {
        let ctx = QuestionCtx::new(ModelId::new(Provider::Requesty, "openai/o3"), 2, 10);
        assert_eq!(ctx.to_string(), "[requesty:openai/o3 题目 2/10]");
    }
}
