//! 事件路由器的端到端测试：从入站 Update 一路走到出站消息。

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;

use test_window_submit::error::DeliveryError;
use test_window_submit::infrastructure::telegram::{
    CallbackQuery, Chat, Contact, Message, Update, User,
};
use test_window_submit::models::{StudentProfile, TestInfo, TestPage};
use test_window_submit::{Config, Dialogue, EventRouter, MemoryStorage, Storage};

const CHAT_ID: i64 = 501;

// ========== 录制型对话桩 ==========

#[derive(Default)]
struct Recorded {
    next_handle: i64,
    texts: Vec<String>,
    photos: Vec<String>,
    callbacks: Vec<Option<String>>,
}

#[derive(Default)]
struct MockDialogue {
    inner: StdMutex<Recorded>,
}

impl MockDialogue {
    fn last_text(&self) -> String {
        self.inner
            .lock()
            .unwrap()
            .texts
            .last()
            .cloned()
            .unwrap_or_default()
    }

    fn photo_count(&self) -> usize {
        self.inner.lock().unwrap().photos.len()
    }

    fn last_callback(&self) -> Option<Option<String>> {
        self.inner.lock().unwrap().callbacks.last().cloned()
    }
}

#[async_trait]
impl Dialogue for MockDialogue {
    async fn send_text(
        &self,
        _chat_id: i64,
        text: &str,
        _keyboard: Option<Value>,
    ) -> Result<i64, DeliveryError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_handle += 1;
        inner.texts.push(text.to_string());
        Ok(inner.next_handle)
    }

    async fn send_photo(&self, _chat_id: i64, image_url: &str) -> Result<i64, DeliveryError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_handle += 1;
        inner.photos.push(image_url.to_string());
        Ok(inner.next_handle)
    }

    async fn delete_message(&self, _chat_id: i64, _message_id: i64) -> Result<(), DeliveryError> {
        Ok(())
    }

    async fn answer_callback(
        &self,
        _callback_id: &str,
        text: Option<&str>,
        _show_alert: bool,
    ) -> Result<(), DeliveryError> {
        self.inner
            .lock()
            .unwrap()
            .callbacks
            .push(text.map(str::to_string));
        Ok(())
    }
}

// ========== 入站事件构造 ==========

fn text_update(update_id: i64, text: &str) -> Update {
    Update {
        update_id,
        message: Some(Message {
            message_id: update_id,
            from: Some(User {
                id: CHAT_ID,
                username: None,
                first_name: Some("Aziza".to_string()),
            }),
            chat: Chat { id: CHAT_ID },
            text: Some(text.to_string()),
            contact: None,
        }),
        callback_query: None,
    }
}

fn contact_update(update_id: i64, phone: &str, owner_id: i64) -> Update {
    Update {
        update_id,
        message: Some(Message {
            message_id: update_id,
            from: Some(User {
                id: CHAT_ID,
                username: None,
                first_name: None,
            }),
            chat: Chat { id: CHAT_ID },
            text: None,
            contact: Some(Contact {
                phone_number: phone.to_string(),
                user_id: Some(owner_id),
            }),
        }),
        callback_query: None,
    }
}

fn callback_update(update_id: i64, data: &str) -> Update {
    Update {
        update_id,
        message: None,
        callback_query: Some(CallbackQuery {
            id: format!("cb-{update_id}"),
            from: User {
                id: CHAT_ID,
                username: None,
                first_name: None,
            },
            data: Some(data.to_string()),
            message: Some(Message {
                message_id: update_id,
                from: None,
                chat: Chat { id: CHAT_ID },
                text: None,
                contact: None,
            }),
        }),
    }
}

fn make_router() -> (
    Arc<MemoryStorage>,
    Arc<MockDialogue>,
    EventRouter<MemoryStorage, MockDialogue>,
) {
    let config = Config::default();
    let storage = Arc::new(MemoryStorage::new());
    let dialogue = Arc::new(MockDialogue::default());
    let router = EventRouter::new(storage.clone(), dialogue.clone(), &config);
    (storage, dialogue, router)
}

// ========== 测试 ==========

#[tokio::test]
async fn test_unidentified_start_prompts_for_phone() {
    let (_storage, dialogue, router) = make_router();
    router.handle_update(text_update(1, "/start")).await;
    assert!(dialogue.last_text().contains("tugma orqali yuboring"));
}

#[tokio::test]
async fn test_contact_links_student_and_greets() {
    let (storage, dialogue, router) = make_router();
    storage.seed_student(StudentProfile {
        id: "student-1".to_string(),
        user_id: None,
        full_name: "Aziza Karimova".to_string(),
        phone: "+998901234567".to_string(),
        parent_phone: None,
    });

    router
        .handle_update(contact_update(1, "998901234567", CHAT_ID))
        .await;
    assert!(dialogue.last_text().contains("Aziza Karimova"));

    let actor = storage.resolve_actor(CHAT_ID).await.unwrap();
    assert!(actor.is_some());
}

#[tokio::test]
async fn test_foreign_contact_is_rejected() {
    let (_storage, dialogue, router) = make_router();
    // 别人的联系人卡片，owner 不是发送者
    router
        .handle_update(contact_update(1, "998901234567", CHAT_ID + 1))
        .await;
    assert!(dialogue.last_text().contains("o'zingizning raqamingizni"));
}

#[tokio::test]
async fn test_full_path_menu_callback_submit() {
    let (storage, dialogue, router) = make_router();
    let user_id = storage.seed_linked_student(CHAT_ID, "Aziza Karimova", "+998901234567");
    storage.seed_test(TestInfo {
        id: "test-1".to_string(),
        total_questions: 3,
        answer_key: vec!['A', 'B', 'C'],
        lesson_label: "Biologiya 12-dars".to_string(),
        pages: vec![TestPage {
            page_number: 1,
            image_url: "/tests/p1.png".to_string(),
        }],
    });
    let now = Utc::now();
    storage.seed_window(
        "win-1",
        &user_id,
        "test-1",
        now - Duration::hours(1),
        now + Duration::hours(1),
    );

    // 菜单 → 带开测试按钮的提示
    router
        .handle_update(text_update(1, "📝 Test topshirish"))
        .await;
    assert!(dialogue.last_text().contains("Sizga ochiq test"));

    // 按下按钮 → 内容投递 + 空应答
    router
        .handle_update(callback_update(2, "open_test:test-1"))
        .await;
    assert_eq!(dialogue.photo_count(), 1);
    assert_eq!(dialogue.last_callback(), Some(None));

    // 发送答案 → 接受
    router.handle_update(text_update(3, "1A2B3C")).await;
    assert_eq!(dialogue.last_text(), "Qabul qilindi ✅");
    assert_eq!(storage.submission_count(), 1);

    // 同一文本重发 → 已无活跃测试，不再落库
    router.handle_update(text_update(4, "1A2B3C")).await;
    assert_eq!(storage.submission_count(), 1);
}

#[tokio::test]
async fn test_appeal_length_gate_and_save() {
    let (storage, dialogue, router) = make_router();
    storage.seed_linked_student(CHAT_ID, "Aziza Karimova", "+998901234567");

    router
        .handle_update(text_update(1, "✉️ E'tiroz yuborish"))
        .await;
    router.handle_update(text_update(2, "ok")).await;
    assert!(dialogue.last_text().contains("juda qisqa"));
    assert_eq!(storage.appeal_count(), 0);

    router
        .handle_update(text_update(3, "Testdagi 7-savol javobi noto'g'ri belgilangan"))
        .await;
    assert!(dialogue.last_text().contains("qabul qilindi"));
    assert_eq!(storage.appeal_count(), 1);
}

#[tokio::test]
async fn test_callback_from_unidentified_chat() {
    let (_storage, dialogue, router) = make_router();
    router
        .handle_update(callback_update(1, "open_test:test-1"))
        .await;
    assert_eq!(
        dialogue.last_callback(),
        Some(Some("Avval /start qiling".to_string()))
    );
}
