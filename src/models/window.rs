//! 访问窗口与提交相关的领域类型

use chrono::{DateTime, Utc};

/// 测试内容页（按 page_number 升序投递）
#[derive(Debug, Clone)]
pub struct TestPage {
    pub page_number: u32,
    pub image_url: String,
}

/// 测试定义
#[derive(Debug, Clone)]
pub struct TestInfo {
    pub id: String,
    /// 题目总数，恒为正
    pub total_questions: usize,
    /// 标准答案，长度等于 total_questions
    pub answer_key: Vec<char>,
    /// 展示用标签，如 "Anatomiya | 3-dars"
    pub lesson_label: String,
    pub pages: Vec<TestPage>,
}

/// 访问窗口：一个学生、一个测试、一个开放区间
///
/// 不变量：opened_at / submitted_at 一旦非空就不再改变
/// （唯一例外是投递失败后的补偿复位 reset_opened）；
/// submitted_at 非空时 is_active 必为 false 且 open_to == submitted_at。
#[derive(Debug, Clone)]
pub struct AccessWindow {
    pub id: String,
    pub student_user_id: String,
    pub test_id: String,
    pub open_from: DateTime<Utc>,
    pub open_to: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub test: TestInfo,
}

/// 提交校验视图（只带提交需要的字段）
#[derive(Debug, Clone)]
pub struct WindowForSubmit {
    pub window_id: String,
    pub test_id: String,
    pub total_questions: usize,
    pub answer_key: Vec<char>,
}

/// 每道题的判分明细
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionDetail {
    /// 题号，从 1 开始
    pub question_number: usize,
    /// 作答字母，未作答为 None
    pub given: Option<char>,
    /// 标准答案字母（答案串短于题数时为 None）
    pub correct: Option<char>,
    pub is_correct: bool,
}

/// 待落库的提交（连同明细和审计记录作为单个原子单元写入）
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub student_user_id: String,
    pub test_id: String,
    pub raw_answer_text: String,
    pub parsed_answers: Vec<Option<char>>,
    pub score: usize,
    pub details: Vec<SubmissionDetail>,
}

/// 结果列表里的一条提交摘要
#[derive(Debug, Clone)]
pub struct SubmissionSummary {
    pub created_at: DateTime<Utc>,
    pub lesson_label: String,
    pub score: usize,
    pub total_questions: usize,
}
