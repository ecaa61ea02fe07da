//! 开测试 + 提交的端到端集成测试
//!
//! 用内存存储 + 录制型对话桩验证流程层的全部结局，
//! 重点是两条条件写（open-once / submit-lock）的并发语义。

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use test_window_submit::error::{DeliveryError, StorageError};
use test_window_submit::models::{
    AccessWindow, Actor, NewAppeal, NewSubmission, PhoneLinkOutcome, PhoneMatch, SessionState,
    SubmissionSummary, TestInfo, TestPage, WindowForSubmit,
};
use test_window_submit::{
    AppError, Config, Dialogue, MemoryStorage, OpenFlow, OpenOutcome, Storage, SubmitFlow,
    SubmitOutcome,
};

// ========== 录制型对话桩 ==========

#[derive(Default)]
struct MockInner {
    next_handle: i64,
    texts: Vec<(i64, String)>,
    photos: Vec<(i64, String)>,
    deleted: Vec<(i64, i64)>,
    fail_photos: bool,
}

#[derive(Default)]
struct MockDialogue {
    inner: StdMutex<MockInner>,
}

impl MockDialogue {
    fn new() -> Self {
        Self::default()
    }

    fn set_fail_photos(&self, fail: bool) {
        self.inner.lock().unwrap().fail_photos = fail;
    }

    fn photo_count(&self) -> usize {
        self.inner.lock().unwrap().photos.len()
    }

    fn deleted_count(&self) -> usize {
        self.inner.lock().unwrap().deleted.len()
    }

    fn last_text(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .texts
            .last()
            .map(|(_, t)| t.clone())
    }
}

#[async_trait]
impl Dialogue for MockDialogue {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        _keyboard: Option<Value>,
    ) -> Result<i64, DeliveryError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_handle += 1;
        inner.texts.push((chat_id, text.to_string()));
        Ok(inner.next_handle)
    }

    async fn send_photo(&self, chat_id: i64, image_url: &str) -> Result<i64, DeliveryError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_photos {
            return Err(DeliveryError::BadResponse {
                description: "mock: photo delivery down".to_string(),
            });
        }
        inner.next_handle += 1;
        inner.photos.push((chat_id, image_url.to_string()));
        Ok(inner.next_handle)
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), DeliveryError> {
        self.inner.lock().unwrap().deleted.push((chat_id, message_id));
        Ok(())
    }

    async fn answer_callback(
        &self,
        _callback_id: &str,
        _text: Option<&str>,
        _show_alert: bool,
    ) -> Result<(), DeliveryError> {
        Ok(())
    }
}

// ========== 故障注入的存储桩 ==========

/// 全部委托给内存后端，可按需注入两种故障：
/// submit-lock 输给别的进程（返回 false），或锁成功后落库失败
struct FaultyStorage {
    inner: Arc<MemoryStorage>,
    lose_submit_lock: bool,
    fail_submission_write: bool,
}

#[async_trait]
impl Storage for FaultyStorage {
    async fn resolve_actor(&self, chat_id: i64) -> Result<Option<Actor>, StorageError> {
        self.inner.resolve_actor(chat_id).await
    }

    async fn find_eligible_student_by_phone(
        &self,
        variants: &[String],
    ) -> Result<Option<PhoneMatch>, StorageError> {
        self.inner.find_eligible_student_by_phone(variants).await
    }

    async fn link_student_chat(
        &self,
        student_id: &str,
        chat_id: i64,
    ) -> Result<PhoneLinkOutcome, StorageError> {
        self.inner.link_student_chat(student_id, chat_id).await
    }

    async fn link_parent_chat(
        &self,
        parent_phone: &str,
        chat_id: i64,
    ) -> Result<(), StorageError> {
        self.inner.link_parent_chat(parent_phone, chat_id).await
    }

    async fn get_active_window(
        &self,
        student_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessWindow>, StorageError> {
        self.inner.get_active_window(student_user_id, now).await
    }

    async fn try_open_once(
        &self,
        window_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        self.inner.try_open_once(window_id, now).await
    }

    async fn reset_opened(&self, window_id: &str) -> Result<(), StorageError> {
        self.inner.reset_opened(window_id).await
    }

    async fn get_window_for_submit(
        &self,
        window_id: &str,
        student_user_id: &str,
        test_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<WindowForSubmit>, StorageError> {
        self.inner
            .get_window_for_submit(window_id, student_user_id, test_id, now)
            .await
    }

    async fn lock_for_submission(
        &self,
        window_id: &str,
        student_user_id: &str,
        test_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        if self.lose_submit_lock {
            return Ok(false);
        }
        self.inner
            .lock_for_submission(window_id, student_user_id, test_id, now)
            .await
    }

    async fn create_submission_with_details(
        &self,
        submission: NewSubmission,
    ) -> Result<String, StorageError> {
        if self.fail_submission_write {
            return Err(StorageError::backend("mock: submissions table down"));
        }
        self.inner.create_submission_with_details(submission).await
    }

    async fn create_appeal(&self, appeal: NewAppeal) -> Result<String, StorageError> {
        self.inner.create_appeal(appeal).await
    }

    async fn monthly_submissions(
        &self,
        student_user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SubmissionSummary>, StorageError> {
        self.inner
            .monthly_submissions(student_user_id, start, end)
            .await
    }

    async fn recent_submissions(
        &self,
        student_user_id: &str,
        limit: usize,
    ) -> Result<Vec<SubmissionSummary>, StorageError> {
        self.inner.recent_submissions(student_user_id, limit).await
    }
}

// ========== 装配辅助 ==========

const CHAT_ID: i64 = 77;

fn sample_test(test_id: &str, total_questions: usize, answer_key: &str) -> TestInfo {
    TestInfo {
        id: test_id.to_string(),
        total_questions,
        answer_key: answer_key.chars().collect(),
        lesson_label: "Biologiya 12-dars".to_string(),
        pages: vec![
            TestPage {
                page_number: 1,
                image_url: "/tests/p1.png".to_string(),
            },
            TestPage {
                page_number: 2,
                image_url: "/tests/p2.png".to_string(),
            },
        ],
    }
}

struct Harness {
    storage: Arc<MemoryStorage>,
    dialogue: Arc<MockDialogue>,
    open_flow: OpenFlow<MemoryStorage, MockDialogue>,
    submit_flow: SubmitFlow<MemoryStorage, MockDialogue>,
    user_id: String,
}

/// 标准场景：一个已识别学生 + 一个 3 题测试 + 一个当前有效的窗口
fn make_harness() -> Harness {
    let config = Config::default();
    let storage = Arc::new(MemoryStorage::new());
    let dialogue = Arc::new(MockDialogue::new());

    let user_id = storage.seed_linked_student(CHAT_ID, "Aziza Karimova", "+998901234567");
    storage.seed_test(sample_test("test-1", 3, "ABC"));
    let now = Utc::now();
    storage.seed_window(
        "win-1",
        &user_id,
        "test-1",
        now - Duration::hours(1),
        now + Duration::hours(1),
    );

    Harness {
        open_flow: OpenFlow::new(storage.clone(), dialogue.clone(), &config),
        submit_flow: SubmitFlow::new(storage.clone(), dialogue.clone(), &config),
        storage,
        dialogue,
        user_id,
    }
}

// ========== 测试 ==========

#[tokio::test]
async fn test_open_then_submit_accepted() {
    let h = make_harness();
    let mut session = SessionState::default();
    let now = Utc::now();

    let outcome = h
        .open_flow
        .open(&mut session, &h.user_id, CHAT_ID, "test-1", now)
        .await
        .unwrap();
    assert_eq!(outcome, OpenOutcome::Opened { total_questions: 3 });
    assert_eq!(session.active_window_id.as_deref(), Some("win-1"));
    // 2 页内容 + 1 条作答说明，全部记录句柄
    assert_eq!(h.dialogue.photo_count(), 2);
    assert_eq!(session.sent_content_message_ids.len(), 3);
    assert!(h.dialogue.last_text().unwrap().contains("1A2B3C"));

    let submit_at = Utc::now();
    let outcome = h
        .submit_flow
        .submit(&mut session, &h.user_id, CHAT_ID, "1A2B3C", submit_at)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SubmitOutcome::Accepted {
            score: 3,
            total_questions: 3
        }
    );

    // 落库：提交 + 3 条明细 + 1 条审计
    assert_eq!(h.storage.submission_count(), 1);
    assert_eq!(h.storage.detail_count(), 3);
    assert_eq!(h.storage.audit_count(), 1);

    // 窗口进入终态：submitted_at 置位，is_active 拉低，open_to 收缩到提交时刻
    let state = h.storage.window_state("win-1").unwrap();
    assert_eq!(state.submitted_at, Some(submit_at));
    assert!(!state.is_active);
    assert_eq!(state.open_to, submit_at);

    // 会话清空，投递过的内容消息全部尽力删除
    assert!(session.active_window_id.is_none());
    assert!(session.sent_content_message_ids.is_empty());
    assert_eq!(h.dialogue.deleted_count(), 3);
}

#[tokio::test]
async fn test_open_once_concurrent_exactly_one_winner() {
    let h = make_harness();
    let now = Utc::now();

    let (a, b) = tokio::join!(
        h.storage.try_open_once("win-1", now),
        h.storage.try_open_once("win-1", now),
    );
    let wins = [a.unwrap(), b.unwrap()].iter().filter(|w| **w).count();
    assert_eq!(wins, 1);

    let state = h.storage.window_state("win-1").unwrap();
    assert_eq!(state.opened_at, Some(now));
}

#[tokio::test]
async fn test_submit_lock_concurrent_exactly_one_winner() {
    let h = make_harness();
    let now = Utc::now();

    let (a, b) = tokio::join!(
        h.storage
            .lock_for_submission("win-1", &h.user_id, "test-1", now),
        h.storage
            .lock_for_submission("win-1", &h.user_id, "test-1", now),
    );
    let wins = [a.unwrap(), b.unwrap()].iter().filter(|w| **w).count();
    assert_eq!(wins, 1);
}

#[tokio::test]
async fn test_incomplete_answers_take_no_lock() {
    let h = make_harness();
    let mut session = SessionState::default();
    session.bind_window("win-1", "test-1");

    let outcome = h
        .submit_flow
        .submit(&mut session, &h.user_id, CHAT_ID, "1A", Utc::now())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SubmitOutcome::IncompleteAnswers {
            total_questions: 3,
            missing_preview: vec![2, 3],
            more: false
        }
    );

    // 可重试：窗口未锁，什么也没落库，会话保持绑定
    let state = h.storage.window_state("win-1").unwrap();
    assert!(state.submitted_at.is_none());
    assert!(state.is_active);
    assert_eq!(h.storage.submission_count(), 0);
    assert_eq!(session.active_window_id.as_deref(), Some("win-1"));
}

#[tokio::test]
async fn test_malformed_text_is_retryable() {
    let h = make_harness();
    let mut session = SessionState::default();
    session.bind_window("win-1", "test-1");

    let outcome = h
        .submit_flow
        .submit(&mut session, &h.user_id, CHAT_ID, "salom bot", Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::ParseFailed { total_questions: 3 });
    assert_eq!(session.active_window_id.as_deref(), Some("win-1"));
    assert_eq!(h.storage.submission_count(), 0);
}

#[tokio::test]
async fn test_window_outside_interval_is_invisible() {
    let config = Config::default();
    let storage = Arc::new(MemoryStorage::new());
    let dialogue = Arc::new(MockDialogue::new());
    let user_id = storage.seed_linked_student(CHAT_ID, "Aziza Karimova", "+998901234567");
    storage.seed_test(sample_test("test-1", 3, "ABC"));

    // 窗口整体在过去
    let now = Utc::now();
    storage.seed_window(
        "win-old",
        &user_id,
        "test-1",
        now - Duration::hours(3),
        now - Duration::hours(1),
    );

    assert!(storage.get_active_window(&user_id, now).await.unwrap().is_none());
    assert!(!storage.try_open_once("win-old", now).await.unwrap());

    let open_flow: OpenFlow<MemoryStorage, MockDialogue> =
        OpenFlow::new(storage.clone(), dialogue, &config);
    let mut session = SessionState::default();
    let outcome = open_flow
        .open(&mut session, &user_id, CHAT_ID, "test-1", now)
        .await
        .unwrap();
    assert_eq!(outcome, OpenOutcome::WindowUnavailable);
}

#[tokio::test]
async fn test_delivery_failure_resets_then_retry_succeeds() {
    let h = make_harness();
    let mut session = SessionState::default();
    let now = Utc::now();

    h.dialogue.set_fail_photos(true);
    let outcome = h
        .open_flow
        .open(&mut session, &h.user_id, CHAT_ID, "test-1", now)
        .await
        .unwrap();
    assert_eq!(outcome, OpenOutcome::DeliveryFailed);

    // 补偿复位：opened_at 回到未开启，窗口可以再试
    let state = h.storage.window_state("win-1").unwrap();
    assert!(state.opened_at.is_none());

    h.dialogue.set_fail_photos(false);
    let outcome = h
        .open_flow
        .open(&mut session, &h.user_id, CHAT_ID, "test-1", now)
        .await
        .unwrap();
    assert_eq!(outcome, OpenOutcome::Opened { total_questions: 3 });
}

#[tokio::test]
async fn test_replayed_open_does_not_resend_content() {
    let h = make_harness();
    let mut session = SessionState::default();
    let now = Utc::now();

    let first = h
        .open_flow
        .open(&mut session, &h.user_id, CHAT_ID, "test-1", now)
        .await
        .unwrap();
    assert_eq!(first, OpenOutcome::Opened { total_questions: 3 });
    assert_eq!(h.dialogue.photo_count(), 2);

    // 第二台设备重放：只重绑会话，不重发内容
    let mut other_session = SessionState::default();
    let second = h
        .open_flow
        .open(&mut other_session, &h.user_id, CHAT_ID, "test-1", now)
        .await
        .unwrap();
    assert_eq!(second, OpenOutcome::AlreadyOpened { total_questions: 3 });
    assert_eq!(h.dialogue.photo_count(), 2);
    assert_eq!(other_session.active_window_id.as_deref(), Some("win-1"));
}

#[tokio::test]
async fn test_second_submit_after_accept_is_rejected_without_writes() {
    let h = make_harness();
    let mut session = SessionState::default();
    let now = Utc::now();

    h.open_flow
        .open(&mut session, &h.user_id, CHAT_ID, "test-1", now)
        .await
        .unwrap();
    let first = h
        .submit_flow
        .submit(&mut session, &h.user_id, CHAT_ID, "1A2B3C", Utc::now())
        .await
        .unwrap();
    assert!(matches!(first, SubmitOutcome::Accepted { .. }));

    // 会话已清空 → 直接不算有测试
    let second = h
        .submit_flow
        .submit(&mut session, &h.user_id, CHAT_ID, "1A2B3C", Utc::now())
        .await
        .unwrap();
    assert_eq!(second, SubmitOutcome::NoActiveTest);

    // 即便强行重绑会话，窗口也已进入终态
    session.bind_window("win-1", "test-1");
    let third = h
        .submit_flow
        .submit(&mut session, &h.user_id, CHAT_ID, "1D2D3D", Utc::now())
        .await
        .unwrap();
    assert_eq!(third, SubmitOutcome::NoActiveTest);
    assert!(session.active_window_id.is_none());
    assert_eq!(h.storage.submission_count(), 1);
}

#[tokio::test]
async fn test_concurrent_submits_accept_exactly_one() {
    let h = make_harness();
    let now = Utc::now();

    // 两台设备各自绑定着同一个窗口，同时交卷
    let mut session_a = SessionState::default();
    session_a.bind_window("win-1", "test-1");
    let mut session_b = SessionState::default();
    session_b.bind_window("win-1", "test-1");

    let (a, b) = tokio::join!(
        h.submit_flow
            .submit(&mut session_a, &h.user_id, CHAT_ID, "1A2B3C", now),
        h.submit_flow
            .submit(&mut session_b, &h.user_id, CHAT_ID, "1D2D3D", now),
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    let accepted = outcomes
        .iter()
        .filter(|o| matches!(o, SubmitOutcome::Accepted { .. }))
        .count();
    let rejected = outcomes
        .iter()
        .filter(|o| matches!(o, SubmitOutcome::NoActiveTest))
        .count();
    assert_eq!(accepted, 1);
    assert_eq!(rejected, 1);

    // 输家的分数被丢弃，只有赢家落库
    assert_eq!(h.storage.submission_count(), 1);
    assert_eq!(h.storage.detail_count(), 3);

    // 两个会话都已解绑
    assert!(session_a.active_window_id.is_none());
    assert!(session_b.active_window_id.is_none());
}

#[tokio::test]
async fn test_lost_submit_lock_discards_score_and_writes_nothing() {
    let config = Config::default();
    let memory = Arc::new(MemoryStorage::new());
    let dialogue = Arc::new(MockDialogue::new());
    let user_id = memory.seed_linked_student(CHAT_ID, "Aziza Karimova", "+998901234567");
    memory.seed_test(sample_test("test-1", 3, "ABC"));
    let now = Utc::now();
    memory.seed_window(
        "win-1",
        &user_id,
        "test-1",
        now - Duration::hours(1),
        now + Duration::hours(1),
    );

    // 提交校验通过，但 submit-lock 输给了另一个进程
    let storage = Arc::new(FaultyStorage {
        inner: memory.clone(),
        lose_submit_lock: true,
        fail_submission_write: false,
    });
    let submit_flow: SubmitFlow<FaultyStorage, MockDialogue> =
        SubmitFlow::new(storage, dialogue.clone(), &config);

    let mut session = SessionState::default();
    session.bind_window("win-1", "test-1");

    let outcome = submit_flow
        .submit(&mut session, &user_id, CHAT_ID, "1A2B3C", now)
        .await
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::NoActiveTest);

    // 刚算出的分数被丢弃，什么都没写，会话解绑
    assert_eq!(memory.submission_count(), 0);
    assert_eq!(memory.detail_count(), 0);
    assert_eq!(memory.audit_count(), 0);
    assert!(session.active_window_id.is_none());
}

#[tokio::test]
async fn test_persistence_failure_after_lock_keeps_window_locked() {
    let config = Config::default();
    let memory = Arc::new(MemoryStorage::new());
    let dialogue = Arc::new(MockDialogue::new());
    let user_id = memory.seed_linked_student(CHAT_ID, "Aziza Karimova", "+998901234567");
    memory.seed_test(sample_test("test-1", 3, "ABC"));
    let now = Utc::now();
    memory.seed_window(
        "win-1",
        &user_id,
        "test-1",
        now - Duration::hours(1),
        now + Duration::hours(1),
    );

    let storage = Arc::new(FaultyStorage {
        inner: memory.clone(),
        lose_submit_lock: false,
        fail_submission_write: true,
    });
    let submit_flow: SubmitFlow<FaultyStorage, MockDialogue> =
        SubmitFlow::new(storage, dialogue.clone(), &config);

    let mut session = SessionState::default();
    session.bind_window("win-1", "test-1");
    session.sent_content_message_ids.push(11);

    let err = submit_flow
        .submit(&mut session, &user_id, CHAT_ID, "1A2B3C", now)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Persistence(_)));

    // 锁不回退：窗口保持终态，绝不给第二次提交机会
    let state = memory.window_state("win-1").unwrap();
    assert_eq!(state.submitted_at, Some(now));
    assert!(!state.is_active);
    assert_eq!(memory.submission_count(), 0);

    // 会话原样保留，内容消息也不删，留给人工对账
    assert_eq!(session.active_window_id.as_deref(), Some("win-1"));
    assert_eq!(session.sent_content_message_ids, vec![11]);
    assert_eq!(dialogue.deleted_count(), 0);
}

#[tokio::test]
async fn test_content_missing_resets_window() {
    let config = Config::default();
    let storage = Arc::new(MemoryStorage::new());
    let dialogue = Arc::new(MockDialogue::new());
    let user_id = storage.seed_linked_student(CHAT_ID, "Aziza Karimova", "+998901234567");

    let mut test = sample_test("test-1", 3, "ABC");
    test.pages.clear();
    storage.seed_test(test);

    let now = Utc::now();
    storage.seed_window(
        "win-1",
        &user_id,
        "test-1",
        now - Duration::hours(1),
        now + Duration::hours(1),
    );

    let open_flow: OpenFlow<MemoryStorage, MockDialogue> =
        OpenFlow::new(storage.clone(), dialogue, &config);
    let mut session = SessionState::default();
    let outcome = open_flow
        .open(&mut session, &user_id, CHAT_ID, "test-1", now)
        .await
        .unwrap();
    assert_eq!(outcome, OpenOutcome::ContentMissing);

    let state = storage.window_state("win-1").unwrap();
    assert!(state.opened_at.is_none());
}

#[tokio::test]
async fn test_partial_submission_allowed_by_config() {
    let config = Config {
        allow_partial_submissions: true,
        ..Config::default()
    };
    let storage = Arc::new(MemoryStorage::new());
    let dialogue = Arc::new(MockDialogue::new());
    let user_id = storage.seed_linked_student(CHAT_ID, "Aziza Karimova", "+998901234567");
    storage.seed_test(sample_test("test-1", 3, "ABC"));
    let now = Utc::now();
    storage.seed_window(
        "win-1",
        &user_id,
        "test-1",
        now - Duration::hours(1),
        now + Duration::hours(1),
    );

    let submit_flow: SubmitFlow<MemoryStorage, MockDialogue> =
        SubmitFlow::new(storage.clone(), dialogue.clone(), &config);
    let mut session = SessionState::default();
    session.bind_window("win-1", "test-1");

    // 只答了第 1 题，且答对
    let outcome = submit_flow
        .submit(&mut session, &user_id, CHAT_ID, "1A", now)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SubmitOutcome::Accepted {
            score: 1,
            total_questions: 3
        }
    );
}
