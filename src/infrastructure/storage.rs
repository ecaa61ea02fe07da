//! 存储协作方契约 - 基础设施层
//!
//! 只约定形状，不约定 SQL 方言。核心要求：try_open_once 与
//! lock_for_submission 必须是存储层一次性评估的条件单行更新
//! （compare-and-swap 风格的 updateIf），它们是整个协议唯一的
//! 同步原语，多进程共享同一后端时协议依然成立。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::models::{
    AccessWindow, Actor, NewAppeal, NewSubmission, PhoneLinkOutcome, PhoneMatch,
    SubmissionSummary, WindowForSubmit,
};

/// 存储协作方
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// 按消息身份解析 Actor（学生优先，其次家长联系记录）
    async fn resolve_actor(&self, chat_id: i64) -> Result<Option<Actor>, StorageError>;

    /// 按电话号码变体查找可接入的学生/家长
    async fn find_eligible_student_by_phone(
        &self,
        variants: &[String],
    ) -> Result<Option<PhoneMatch>, StorageError>;

    /// 把学生账号绑定到消息身份；号码被其他角色占用是正常结局
    async fn link_student_chat(
        &self,
        student_id: &str,
        chat_id: i64,
    ) -> Result<PhoneLinkOutcome, StorageError>;

    /// 登记/更新家长联系方式与消息身份的绑定
    async fn link_parent_chat(
        &self,
        parent_phone: &str,
        chat_id: i64,
    ) -> Result<(), StorageError>;

    /// 学生当前的活跃窗口（窗口 + 测试 + 答案 + 内容页的联合视图）；
    /// 多个符合时取 open_from 最晚的
    async fn get_active_window(
        &self,
        student_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessWindow>, StorageError>;

    /// 条件单行更新：opened_at 为空 且 is_active 且
    /// open_from <= now <= open_to 时置 opened_at = now，返回是否生效
    async fn try_open_once(
        &self,
        window_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    /// 无条件清空 opened_at（仅作投递失败的补偿）
    async fn reset_opened(&self, window_id: &str) -> Result<(), StorageError>;

    /// 提交校验视图，按 (窗口, 学生, 测试) 三元组精确匹配
    async fn get_window_for_submit(
        &self,
        window_id: &str,
        student_user_id: &str,
        test_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<WindowForSubmit>, StorageError>;

    /// 条件单行更新：is_active 且 submitted_at 为空时置
    /// submitted_at = now、is_active = false、open_to = now
    async fn lock_for_submission(
        &self,
        window_id: &str,
        student_user_id: &str,
        test_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    /// 单个原子单元写入：提交行 + 每题明细 + 审计记录；返回提交 ID
    async fn create_submission_with_details(
        &self,
        submission: NewSubmission,
    ) -> Result<String, StorageError>;

    /// 登记申诉，返回申诉 ID
    async fn create_appeal(&self, appeal: NewAppeal) -> Result<String, StorageError>;

    /// 某学生在 [start, end) 内的提交摘要，按时间倒序
    async fn monthly_submissions(
        &self,
        student_user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SubmissionSummary>, StorageError>;

    /// 某学生最近 limit 条提交摘要，按时间倒序
    async fn recent_submissions(
        &self,
        student_user_id: &str,
        limit: usize,
    ) -> Result<Vec<SubmissionSummary>, StorageError>;
}
