//! 判分 - 业务能力层
//!
//! 纯函数、确定性、无部分得分：逐题比对已归一化的大写字母，
//! 未作答（None）永远不等于任何标准答案。

use crate::models::SubmissionDetail;

/// 判分结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreCard {
    pub score: usize,
    pub total_questions: usize,
    /// 每题一条，按题号升序
    pub details: Vec<SubmissionDetail>,
}

/// 对照标准答案判分
///
/// `per_question` 的长度就是题目总数；标准答案短于题数时，
/// 超出部分的 correct 为 None，任何作答都判错。
pub fn score(per_question: &[Option<char>], answer_key: &[char]) -> ScoreCard {
    let mut score = 0;
    let mut details = Vec::with_capacity(per_question.len());

    for (idx, &given) in per_question.iter().enumerate() {
        let correct = answer_key.get(idx).copied();
        let is_correct = given.is_some() && given == correct;
        if is_correct {
            score += 1;
        }
        details.push(SubmissionDetail {
            question_number: idx + 1,
            given,
            correct,
            is_correct,
        });
    }

    ScoreCard {
        score,
        total_questions: per_question.len(),
        details,
    }
}
