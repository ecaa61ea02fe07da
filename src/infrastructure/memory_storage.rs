//! 内存存储后端 - 基础设施层
//!
//! 用一把互斥锁内的"检查-再-写"实现与条件 SQL 单行更新等价的原子语义：
//! try_open_once / lock_for_submission 的谓词评估和写入发生在同一个
//! 临界区里，并发调用者恰好一个成功。临界区内不做任何 await。
//!
//! 持久化内部实现不属于本系统的范围，这个后端既作默认装配，
//! 也支撑集成测试；换成真实数据库只需要另一个 Storage 实现。

use std::sync::{Mutex as StdMutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::infrastructure::storage::Storage;
use crate::models::{
    AccessWindow, Actor, NewAppeal, NewSubmission, PhoneLinkOutcome, PhoneMatch, StudentProfile,
    SubmissionDetail, SubmissionSummary, TestInfo, WindowForSubmit,
};
use crate::services::phone::phone_variants;

#[derive(Debug, Clone, PartialEq, Eq)]
enum UserRole {
    Student,
    Staff,
}

#[derive(Debug, Clone)]
struct UserRow {
    id: String,
    role: UserRole,
    phone: String,
    chat_id: Option<i64>,
    is_active: bool,
}

#[derive(Debug, Clone)]
struct StudentRow {
    profile: StudentProfile,
    is_active: bool,
}

#[derive(Debug, Clone)]
struct ParentContactRow {
    phone: String,
    chat_id: i64,
}

#[derive(Debug, Clone)]
struct TestRow {
    info: TestInfo,
    is_active: bool,
}

#[derive(Debug, Clone)]
struct WindowRow {
    id: String,
    student_user_id: String,
    test_id: String,
    open_from: DateTime<Utc>,
    open_to: DateTime<Utc>,
    opened_at: Option<DateTime<Utc>>,
    submitted_at: Option<DateTime<Utc>>,
    is_active: bool,
}

#[derive(Debug, Clone)]
struct SubmissionRow {
    id: String,
    student_user_id: String,
    test_id: String,
    raw_answer_text: String,
    parsed_answers: Vec<Option<char>>,
    score: usize,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct DetailRow {
    submission_id: String,
    detail: SubmissionDetail,
}

#[derive(Debug, Clone)]
struct AuditRow {
    actor_id: String,
    action: String,
    entity: String,
    entity_id: String,
}

#[derive(Debug, Clone)]
struct AppealRow {
    id: String,
    appeal: NewAppeal,
}

#[derive(Debug, Default)]
struct Inner {
    seq: u64,
    users: Vec<UserRow>,
    students: Vec<StudentRow>,
    parent_contacts: Vec<ParentContactRow>,
    tests: Vec<TestRow>,
    windows: Vec<WindowRow>,
    submissions: Vec<SubmissionRow>,
    details: Vec<DetailRow>,
    audits: Vec<AuditRow>,
    appeals: Vec<AppealRow>,
}

fn next_id(inner: &mut Inner, prefix: &str) -> String {
    inner.seq += 1;
    format!("{}-{:04}", prefix, inner.seq)
}

/// 窗口行的只读快照（测试断言用）
#[derive(Debug, Clone)]
pub struct WindowState {
    pub opened_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub open_to: DateTime<Utc>,
    pub is_active: bool,
}

/// 内存存储后端
#[derive(Default)]
pub struct MemoryStorage {
    inner: StdMutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========== 数据装配 ==========

    /// 登记一个学生（未绑定消息身份）
    pub fn seed_student(&self, profile: StudentProfile) {
        let mut inner = self.lock();
        inner.students.push(StudentRow {
            profile,
            is_active: true,
        });
    }

    /// 登记一个已识别的学生并绑定消息身份，返回账号 ID
    pub fn seed_linked_student(&self, chat_id: i64, full_name: &str, phone: &str) -> String {
        let mut inner = self.lock();
        let user_id = next_id(&mut inner, "user");
        let student_id = next_id(&mut inner, "student");
        inner.users.push(UserRow {
            id: user_id.clone(),
            role: UserRole::Student,
            phone: phone.to_string(),
            chat_id: Some(chat_id),
            is_active: true,
        });
        inner.students.push(StudentRow {
            profile: StudentProfile {
                id: student_id,
                user_id: Some(user_id.clone()),
                full_name: full_name.to_string(),
                phone: phone.to_string(),
                parent_phone: None,
            },
            is_active: true,
        });
        user_id
    }

    /// 登记一个非学生账号（覆盖"号码被其他角色占用"的路径）
    pub fn seed_staff_user(&self, phone: &str) {
        let mut inner = self.lock();
        let id = next_id(&mut inner, "user");
        inner.users.push(UserRow {
            id,
            role: UserRole::Staff,
            phone: phone.to_string(),
            chat_id: None,
            is_active: true,
        });
    }

    pub fn seed_test(&self, info: TestInfo) {
        let mut inner = self.lock();
        inner.tests.push(TestRow {
            info,
            is_active: true,
        });
    }

    pub fn seed_window(
        &self,
        window_id: &str,
        student_user_id: &str,
        test_id: &str,
        open_from: DateTime<Utc>,
        open_to: DateTime<Utc>,
    ) {
        let mut inner = self.lock();
        inner.windows.push(WindowRow {
            id: window_id.to_string(),
            student_user_id: student_user_id.to_string(),
            test_id: test_id.to_string(),
            open_from,
            open_to,
            opened_at: None,
            submitted_at: None,
            is_active: true,
        });
    }

    // ========== 检视（测试断言用）==========

    pub fn window_state(&self, window_id: &str) -> Option<WindowState> {
        let inner = self.lock();
        inner.windows.iter().find(|w| w.id == window_id).map(|w| WindowState {
            opened_at: w.opened_at,
            submitted_at: w.submitted_at,
            open_to: w.open_to,
            is_active: w.is_active,
        })
    }

    pub fn submission_count(&self) -> usize {
        self.lock().submissions.len()
    }

    pub fn detail_count(&self) -> usize {
        self.lock().details.len()
    }

    pub fn audit_count(&self) -> usize {
        self.lock().audits.len()
    }

    pub fn appeal_count(&self) -> usize {
        self.lock().appeals.len()
    }

    fn lesson_label(inner: &Inner, test_id: &str) -> String {
        inner
            .tests
            .iter()
            .find(|t| t.info.id == test_id)
            .map(|t| t.info.lesson_label.clone())
            .unwrap_or_else(|| "-".to_string())
    }

    fn summaries(inner: &Inner, rows: Vec<&SubmissionRow>) -> Vec<SubmissionSummary> {
        rows.into_iter()
            .map(|row| SubmissionSummary {
                created_at: row.created_at,
                lesson_label: Self::lesson_label(inner, &row.test_id),
                score: row.score,
                total_questions: inner
                    .tests
                    .iter()
                    .find(|t| t.info.id == row.test_id)
                    .map(|t| t.info.total_questions)
                    .unwrap_or(0),
            })
            .collect()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn resolve_actor(&self, chat_id: i64) -> Result<Option<Actor>, StorageError> {
        let inner = self.lock();

        // 学生优先
        if let Some(user) = inner.users.iter().find(|u| {
            u.chat_id == Some(chat_id) && u.role == UserRole::Student && u.is_active
        }) {
            if let Some(student) = inner
                .students
                .iter()
                .find(|s| s.is_active && s.profile.user_id.as_deref() == Some(user.id.as_str()))
            {
                return Ok(Some(Actor::Student {
                    user_id: user.id.clone(),
                    student: student.profile.clone(),
                }));
            }
        }

        // 其次按家长联系记录反查
        let Some(contact) = inner.parent_contacts.iter().find(|c| c.chat_id == chat_id) else {
            return Ok(None);
        };
        let variants = phone_variants(&contact.phone);
        let found = inner.students.iter().find(|s| {
            s.is_active
                && s.profile
                    .parent_phone
                    .as_ref()
                    .map_or(false, |p| variants.iter().any(|v| v == p))
        });
        Ok(found.map(|s| Actor::Parent {
            student: s.profile.clone(),
        }))
    }

    async fn find_eligible_student_by_phone(
        &self,
        variants: &[String],
    ) -> Result<Option<PhoneMatch>, StorageError> {
        let inner = self.lock();
        if let Some(student) = inner
            .students
            .iter()
            .find(|s| s.is_active && variants.iter().any(|v| v == &s.profile.phone))
        {
            return Ok(Some(PhoneMatch::Student(student.profile.clone())));
        }
        let found = inner.students.iter().find(|s| {
            s.is_active
                && s.profile
                    .parent_phone
                    .as_ref()
                    .map_or(false, |p| variants.iter().any(|v| v == p))
        });
        Ok(found.map(|s| PhoneMatch::Parent(s.profile.clone())))
    }

    async fn link_student_chat(
        &self,
        student_id: &str,
        chat_id: i64,
    ) -> Result<PhoneLinkOutcome, StorageError> {
        let mut inner = self.lock();

        let Some(idx) = inner.students.iter().position(|s| s.profile.id == student_id) else {
            return Err(StorageError::backend(format!("学生 {student_id} 不存在")));
        };
        let phone = inner.students[idx].profile.phone.clone();
        let linked_user = inner.students[idx].profile.user_id.clone();

        if inner
            .users
            .iter()
            .any(|u| u.phone == phone && u.role != UserRole::Student)
        {
            return Ok(PhoneLinkOutcome::PhoneUsedByOtherRole);
        }

        let existing = inner
            .users
            .iter()
            .position(|u| linked_user.as_deref() == Some(u.id.as_str()) || u.phone == phone);
        let user_id = match existing {
            Some(pos) => {
                inner.users[pos].chat_id = Some(chat_id);
                inner.users[pos].is_active = true;
                inner.users[pos].id.clone()
            }
            None => {
                let id = next_id(&mut inner, "user");
                inner.users.push(UserRow {
                    id: id.clone(),
                    role: UserRole::Student,
                    phone: phone.clone(),
                    chat_id: Some(chat_id),
                    is_active: true,
                });
                id
            }
        };

        inner.students[idx].profile.user_id = Some(user_id.clone());
        Ok(PhoneLinkOutcome::Linked { user_id })
    }

    async fn link_parent_chat(
        &self,
        parent_phone: &str,
        chat_id: i64,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if let Some(contact) = inner
            .parent_contacts
            .iter_mut()
            .find(|c| c.phone == parent_phone || c.chat_id == chat_id)
        {
            contact.phone = parent_phone.to_string();
            contact.chat_id = chat_id;
        } else {
            inner.parent_contacts.push(ParentContactRow {
                phone: parent_phone.to_string(),
                chat_id,
            });
        }
        Ok(())
    }

    async fn get_active_window(
        &self,
        student_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessWindow>, StorageError> {
        let inner = self.lock();
        let candidate = inner
            .windows
            .iter()
            .filter(|w| {
                w.student_user_id == student_user_id
                    && w.is_active
                    && w.open_from <= now
                    && w.open_to >= now
            })
            .filter(|w| {
                inner
                    .tests
                    .iter()
                    .any(|t| t.info.id == w.test_id && t.is_active)
            })
            .max_by_key(|w| w.open_from);

        let Some(window) = candidate else {
            return Ok(None);
        };
        let Some(test) = inner.tests.iter().find(|t| t.info.id == window.test_id) else {
            return Ok(None);
        };

        Ok(Some(AccessWindow {
            id: window.id.clone(),
            student_user_id: window.student_user_id.clone(),
            test_id: window.test_id.clone(),
            open_from: window.open_from,
            open_to: window.open_to,
            opened_at: window.opened_at,
            submitted_at: window.submitted_at,
            is_active: window.is_active,
            test: test.info.clone(),
        }))
    }

    async fn try_open_once(
        &self,
        window_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut inner = self.lock();
        // 谓词评估与写入在同一临界区内 — 单条条件更新的等价物
        let Some(window) = inner.windows.iter_mut().find(|w| w.id == window_id) else {
            return Ok(false);
        };
        if window.opened_at.is_none()
            && window.is_active
            && window.open_from <= now
            && window.open_to >= now
        {
            window.opened_at = Some(now);
            return Ok(true);
        }
        Ok(false)
    }

    async fn reset_opened(&self, window_id: &str) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if let Some(window) = inner.windows.iter_mut().find(|w| w.id == window_id) {
            window.opened_at = None;
        }
        Ok(())
    }

    async fn get_window_for_submit(
        &self,
        window_id: &str,
        student_user_id: &str,
        test_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<WindowForSubmit>, StorageError> {
        let inner = self.lock();
        let matched = inner.windows.iter().find(|w| {
            w.id == window_id
                && w.student_user_id == student_user_id
                && w.test_id == test_id
                && w.is_active
                && w.submitted_at.is_none()
                && w.open_from <= now
                && w.open_to >= now
        });
        let Some(window) = matched else {
            return Ok(None);
        };
        let Some(test) = inner.tests.iter().find(|t| t.info.id == window.test_id) else {
            return Ok(None);
        };
        Ok(Some(WindowForSubmit {
            window_id: window.id.clone(),
            test_id: window.test_id.clone(),
            total_questions: test.info.total_questions,
            answer_key: test.info.answer_key.clone(),
        }))
    }

    async fn lock_for_submission(
        &self,
        window_id: &str,
        student_user_id: &str,
        test_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut inner = self.lock();
        let matched = inner.windows.iter_mut().find(|w| {
            w.id == window_id
                && w.student_user_id == student_user_id
                && w.test_id == test_id
                && w.is_active
                && w.submitted_at.is_none()
        });
        let Some(window) = matched else {
            return Ok(false);
        };
        window.submitted_at = Some(now);
        window.is_active = false;
        window.open_to = now;
        Ok(true)
    }

    async fn create_submission_with_details(
        &self,
        submission: NewSubmission,
    ) -> Result<String, StorageError> {
        let mut inner = self.lock();
        let submission_id = next_id(&mut inner, "sub");

        inner.submissions.push(SubmissionRow {
            id: submission_id.clone(),
            student_user_id: submission.student_user_id.clone(),
            test_id: submission.test_id.clone(),
            raw_answer_text: submission.raw_answer_text,
            parsed_answers: submission.parsed_answers,
            score: submission.score,
            created_at: Utc::now(),
        });
        for detail in submission.details {
            inner.details.push(DetailRow {
                submission_id: submission_id.clone(),
                detail,
            });
        }
        inner.audits.push(AuditRow {
            actor_id: submission.student_user_id,
            action: "SUBMIT".to_string(),
            entity: "Submission".to_string(),
            entity_id: submission_id.clone(),
        });

        Ok(submission_id)
    }

    async fn create_appeal(&self, appeal: NewAppeal) -> Result<String, StorageError> {
        let mut inner = self.lock();
        let id = next_id(&mut inner, "appeal");
        inner.appeals.push(AppealRow {
            id: id.clone(),
            appeal,
        });
        Ok(id)
    }

    async fn monthly_submissions(
        &self,
        student_user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SubmissionSummary>, StorageError> {
        let inner = self.lock();
        let mut rows: Vec<&SubmissionRow> = inner
            .submissions
            .iter()
            .filter(|s| {
                s.student_user_id == student_user_id
                    && s.created_at >= start
                    && s.created_at < end
            })
            .collect();
        rows.sort_by_key(|s| std::cmp::Reverse(s.created_at));
        rows.truncate(50);
        Ok(Self::summaries(&inner, rows))
    }

    async fn recent_submissions(
        &self,
        student_user_id: &str,
        limit: usize,
    ) -> Result<Vec<SubmissionSummary>, StorageError> {
        let inner = self.lock();
        let mut rows: Vec<&SubmissionRow> = inner
            .submissions
            .iter()
            .filter(|s| s.student_user_id == student_user_id)
            .collect();
        rows.sort_by_key(|s| std::cmp::Reverse(s.created_at));
        rows.truncate(limit);
        Ok(Self::summaries(&inner, rows))
    }
}
