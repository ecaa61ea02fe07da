//! 事件分发 - 编排层
//!
//! ## 职责
//!
//! 1. **逐事件处理**：每条入站更新一个逻辑任务，跨身份并发不设顺序
//! 2. **按身份串行**：同一身份的处理经由 SessionStore 的按键锁互斥，
//!    避免两台设备/连发消息交错破坏会话状态
//! 3. **事件边界**：一切失败在这里收口，转成用户提示加日志，
//!    绝不让单个事件的失败终止进程
//! 4. **菜单路由**：/start、联系人、学生/家长菜单、申诉、回调按钮

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error};

use crate::config::Config;
use crate::error::AppResult;
use crate::infrastructure::dialogue::Dialogue;
use crate::infrastructure::storage::Storage;
use crate::infrastructure::telegram::{CallbackQuery, Contact, Message, Update};
use crate::models::{
    Actor, AppealSender, NewAppeal, PhoneLinkOutcome, PhoneMatch, SessionState, StudentProfile,
};
use crate::services::formatters::{format_date, format_month, month_bounds};
use crate::services::keyboards;
use crate::services::phone::{normalize_uz_phone, phone_variants};
use crate::services::session_store::SessionStore;
use crate::utils::logging::truncate_text;
use crate::workflow::{OpenFlow, OpenOutcome, SubmitFlow, SubmitOutcome};

/// 事件路由器
pub struct EventRouter<S, D> {
    storage: Arc<S>,
    dialogue: Arc<D>,
    sessions: SessionStore,
    open_flow: OpenFlow<S, D>,
    submit_flow: SubmitFlow<S, D>,
    admin_contact: String,
    debug_updates: bool,
}

impl<S: Storage, D: Dialogue> EventRouter<S, D> {
    pub fn new(storage: Arc<S>, dialogue: Arc<D>, config: &Config) -> Self {
        Self {
            open_flow: OpenFlow::new(storage.clone(), dialogue.clone(), config),
            submit_flow: SubmitFlow::new(storage.clone(), dialogue.clone(), config),
            storage,
            dialogue,
            sessions: SessionStore::new(),
            admin_contact: config.admin_contact.clone(),
            debug_updates: config.debug_updates,
        }
    }

    /// 每事件边界：失败只影响本次事件
    pub async fn handle_update(&self, update: Update) {
        if self.debug_updates {
            debug!(
                "UPDATE #{} from={:?} text={:?}",
                update.update_id,
                update.message.as_ref().and_then(|m| m.from.as_ref().map(|u| u.id)),
                update
                    .message
                    .as_ref()
                    .and_then(|m| m.text.as_deref())
                    .map(|t| truncate_text(t, 60))
            );
        }

        let chat_id = update.message.as_ref().map(|m| m.chat.id).or_else(|| {
            update
                .callback_query
                .as_ref()
                .and_then(|c| c.message.as_ref().map(|m| m.chat.id))
        });

        let result = if let Some(message) = update.message {
            self.handle_message(message).await
        } else if let Some(callback) = update.callback_query {
            self.handle_callback(callback).await
        } else {
            Ok(())
        };

        if let Err(e) = result {
            error!("❌ 事件 #{} 处理失败: {}", update.update_id, e);
            if let Some(chat_id) = chat_id {
                let _ = self
                    .dialogue
                    .send_text(chat_id, "Xatolik bo'ldi. Iltimos, qayta urinib ko'ring.", None)
                    .await;
            }
        }
    }

    async fn handle_message(&self, message: Message) -> AppResult<()> {
        let Some(from) = message.from.clone() else {
            return Ok(());
        };
        let chat_id = message.chat.id;

        if let Some(contact) = message.contact {
            return self.handle_contact(chat_id, from.id, contact).await;
        }
        let Some(text) = message.text else {
            return Ok(());
        };
        let text = text.trim().to_string();

        match text.as_str() {
            "/start" => self.handle_start(chat_id, from.id).await,
            "/ping" => {
                self.dialogue
                    .send_text(chat_id, "Bot ishlayapti ✅", None)
                    .await?;
                Ok(())
            }
            _ => self.handle_text(chat_id, from.id, &text).await,
        }
    }

    // ========== /start 与身份识别 ==========

    async fn handle_start(&self, chat_id: i64, identity: i64) -> AppResult<()> {
        let session_lock = self.sessions.get(identity);
        let mut session = session_lock.lock().await;

        let Some(actor) = self.storage.resolve_actor(identity).await? else {
            session.reset_to_phone_pending();
            self.dialogue
                .send_text(
                    chat_id,
                    "Kelajakmediklari botiga xush kelibsiz. Telefon raqamingizni faqat pastdagi tugma orqali yuboring.",
                    Some(keyboards::phone_keyboard()),
                )
                .await?;
            return Ok(());
        };

        session.clear();
        match actor {
            Actor::Student { student, .. } => {
                self.dialogue
                    .send_text(
                        chat_id,
                        &format!(
                            "Kelajakmediklari botiga xush kelibsiz, {}!",
                            student.full_name
                        ),
                        Some(keyboards::student_menu_keyboard()),
                    )
                    .await?;
            }
            Actor::Parent { student } => {
                self.dialogue
                    .send_text(
                        chat_id,
                        &format!(
                            "Kelajakmediklari botiga xush kelibsiz!\nFarzandingiz: {}",
                            student.full_name
                        ),
                        Some(keyboards::parent_menu_keyboard()),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_contact(
        &self,
        chat_id: i64,
        identity: i64,
        contact: Contact,
    ) -> AppResult<()> {
        // 只接受本人的联系人卡片
        if contact.user_id != Some(identity) {
            self.dialogue
                .send_text(chat_id, "Iltimos, o'zingizning raqamingizni yuboring.", None)
                .await?;
            return Ok(());
        }

        let session_lock = self.sessions.get(identity);
        let mut session = session_lock.lock().await;

        let variants = phone_variants(&contact.phone_number);
        let Some(found) = self.storage.find_eligible_student_by_phone(&variants).await? else {
            self.dialogue
                .send_text(
                    chat_id,
                    keyboards::REJECT_TEXT,
                    Some(keyboards::remove_keyboard()),
                )
                .await?;
            return Ok(());
        };

        match found {
            PhoneMatch::Student(profile) => {
                match self.storage.link_student_chat(&profile.id, identity).await? {
                    PhoneLinkOutcome::PhoneUsedByOtherRole => {
                        self.dialogue
                            .send_text(
                                chat_id,
                                "Telefon boshqa rol bilan band. Administratorga murojaat qiling.",
                                None,
                            )
                            .await?;
                    }
                    PhoneLinkOutcome::Linked { .. } => {
                        session.clear();
                        self.dialogue
                            .send_text(
                                chat_id,
                                &format!(
                                    "Kelajakmediklari botiga xush kelibsiz, {}!",
                                    profile.full_name
                                ),
                                Some(keyboards::student_menu_keyboard()),
                            )
                            .await?;
                    }
                }
            }
            PhoneMatch::Parent(profile) => {
                let parent_phone =
                    normalize_uz_phone(profile.parent_phone.as_deref().unwrap_or(""));
                if parent_phone.is_empty() {
                    self.dialogue
                        .send_text(
                            chat_id,
                            "Ota-ona raqami topilmadi. Administratorga murojaat qiling.",
                            None,
                        )
                        .await?;
                    return Ok(());
                }
                self.storage.link_parent_chat(&parent_phone, identity).await?;
                session.clear();
                self.dialogue
                    .send_text(
                        chat_id,
                        &format!(
                            "Kelajakmediklari botiga xush kelibsiz!\nFarzandingiz: {}",
                            profile.full_name
                        ),
                        Some(keyboards::parent_menu_keyboard()),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    // ========== 文本与菜单 ==========

    async fn handle_text(&self, chat_id: i64, identity: i64, text: &str) -> AppResult<()> {
        let session_lock = self.sessions.get(identity);
        let mut session = session_lock.lock().await;

        let Some(actor) = self.storage.resolve_actor(identity).await? else {
            session.reset_to_phone_pending();
            self.dialogue
                .send_text(
                    chat_id,
                    "Telefon raqamni qo'lda yozmang. Pastdagi tugma orqali yuboring.",
                    Some(keyboards::phone_keyboard()),
                )
                .await?;
            return Ok(());
        };

        if session.awaiting_phone {
            session.awaiting_phone = false;
        }

        match actor {
            Actor::Student { user_id, student } => {
                self.handle_student_text(chat_id, identity, &mut session, &user_id, &student, text)
                    .await
            }
            Actor::Parent { student } => {
                self.handle_parent_text(chat_id, identity, &mut session, &student, text)
                    .await
            }
        }
    }

    async fn handle_student_text(
        &self,
        chat_id: i64,
        identity: i64,
        session: &mut SessionState,
        user_id: &str,
        student: &StudentProfile,
        text: &str,
    ) -> AppResult<()> {
        if session.awaiting_appeal && !keyboards::STUDENT_BUTTONS.contains(&text) {
            let saved = self
                .create_appeal(
                    chat_id,
                    identity,
                    &student.id,
                    AppealSender::Student,
                    Some(student.phone.clone()),
                    text,
                    keyboards::student_menu_keyboard(),
                )
                .await?;
            if saved {
                session.awaiting_appeal = false;
            }
            return Ok(());
        }

        match text {
            keyboards::STUDENT_BTN_APPEAL => {
                session.awaiting_appeal = true;
                self.dialogue
                    .send_text(
                        chat_id,
                        "E'tirozingizni yozishingiz mumkin. Bu xabar to'g'ridan-to'g'ri loyiha rahbariga yuboriladi.",
                        Some(keyboards::student_menu_keyboard()),
                    )
                    .await?;
            }
            keyboards::STUDENT_BTN_RESULTS => {
                session.awaiting_appeal = false;
                self.show_student_monthly_results(chat_id, user_id).await?;
            }
            keyboards::STUDENT_BTN_PAY => {
                session.awaiting_appeal = false;
                // 欠费聚合是外部协作方的职责，这里只给指引
                self.dialogue
                    .send_text(
                        chat_id,
                        &format!(
                            "💳 To'lov holati\n\nTo'lov bo'yicha ma'lumot uchun administrator: {}",
                            self.admin_contact
                        ),
                        Some(keyboards::student_menu_keyboard()),
                    )
                    .await?;
            }
            keyboards::STUDENT_BTN_TEST => {
                session.awaiting_appeal = false;
                self.show_active_test(chat_id, session, user_id).await?;
            }
            _ => {
                if session.active_test_id.is_some() {
                    let outcome = self
                        .submit_flow
                        .submit(session, user_id, chat_id, text, Utc::now())
                        .await?;
                    self.report_submit_outcome(chat_id, outcome).await?;
                    return Ok(());
                }
                self.dialogue
                    .send_text(
                        chat_id,
                        "Kerakli tugmani tanlang.",
                        Some(keyboards::student_menu_keyboard()),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// 学生按下"交卷测试"按钮：展示当前窗口或开测试按钮
    async fn show_active_test(
        &self,
        chat_id: i64,
        session: &mut SessionState,
        user_id: &str,
    ) -> AppResult<()> {
        let Some(window) = self.storage.get_active_window(user_id, Utc::now()).await? else {
            self.dialogue
                .send_text(
                    chat_id,
                    "Hozircha aktiv test yo'q.",
                    Some(keyboards::student_menu_keyboard()),
                )
                .await?;
            return Ok(());
        };

        session.bind_window(&window.id, &window.test_id);
        session.sent_content_message_ids.clear();

        if window.opened_at.is_some() {
            self.dialogue
                .send_text(
                    chat_id,
                    &format!(
                        "Sizga test allaqachon yuborilgan.\nJavoblarni shu botga yuboring. Namuna: 1A2B3C...{}B",
                        window.test.total_questions
                    ),
                    Some(keyboards::student_menu_keyboard()),
                )
                .await?;
            return Ok(());
        }

        self.dialogue
            .send_text(
                chat_id,
                &format!("Sizga ochiq test: {}", window.test.lesson_label),
                Some(keyboards::open_test_keyboard(&window.test_id)),
            )
            .await?;
        Ok(())
    }

    async fn report_submit_outcome(
        &self,
        chat_id: i64,
        outcome: SubmitOutcome,
    ) -> AppResult<()> {
        let menu = keyboards::student_menu_keyboard();
        match outcome {
            SubmitOutcome::NoActiveTest => {
                self.dialogue
                    .send_text(chat_id, "Sizda aktiv test yo'q.", Some(menu))
                    .await?;
            }
            SubmitOutcome::ParseFailed { total_questions } => {
                self.dialogue
                    .send_text(
                        chat_id,
                        &format!("Format xato. Namuna: 1A2B3C...{total_questions}B"),
                        Some(menu),
                    )
                    .await?;
            }
            SubmitOutcome::IncompleteAnswers {
                total_questions,
                missing_preview,
                more,
            } => {
                let preview = missing_preview
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                let suffix = if more { " ..." } else { "" };
                self.dialogue
                    .send_text(
                        chat_id,
                        &format!(
                            "Javob to'liq emas. {total_questions} ta savolning barchasini kiriting. Yetishmayotgan: {preview}{suffix}"
                        ),
                        Some(menu),
                    )
                    .await?;
            }
            SubmitOutcome::Accepted { .. } => {
                self.dialogue
                    .send_text(chat_id, "Qabul qilindi ✅", Some(menu))
                    .await?;
            }
        }
        Ok(())
    }

    async fn show_student_monthly_results(
        &self,
        chat_id: i64,
        user_id: &str,
    ) -> AppResult<()> {
        let now = Utc::now();
        let (start, end) = month_bounds(now);
        let rows = self.storage.monthly_submissions(user_id, start, end).await?;

        if rows.is_empty() {
            self.dialogue
                .send_text(
                    chat_id,
                    "Bu oy uchun topshirilgan test natijalari topilmadi.",
                    Some(keyboards::student_menu_keyboard()),
                )
                .await?;
            return Ok(());
        }

        let lines = rows
            .iter()
            .enumerate()
            .map(|(idx, row)| {
                format!(
                    "{}) {}\n{} | {}/{}",
                    idx + 1,
                    format_date(&row.created_at),
                    row.lesson_label,
                    row.score,
                    row.total_questions
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        self.dialogue
            .send_text(
                chat_id,
                &format!("📊 Joriy oy natijalari ({})\n\n{}", format_month(&now), lines),
                Some(keyboards::student_menu_keyboard()),
            )
            .await?;
        Ok(())
    }

    // ========== 家长侧 ==========

    async fn handle_parent_text(
        &self,
        chat_id: i64,
        identity: i64,
        session: &mut SessionState,
        student: &StudentProfile,
        text: &str,
    ) -> AppResult<()> {
        if session.awaiting_appeal && !keyboards::PARENT_BUTTONS.contains(&text) {
            let saved = self
                .create_appeal(
                    chat_id,
                    identity,
                    &student.id,
                    AppealSender::Parent,
                    student.parent_phone.clone(),
                    text,
                    keyboards::parent_menu_keyboard(),
                )
                .await?;
            if saved {
                session.awaiting_appeal = false;
            }
            return Ok(());
        }

        match text {
            keyboards::PARENT_BTN_RESULTS => {
                session.awaiting_appeal = false;
                self.show_parent_results(chat_id, student).await?;
            }
            keyboards::PARENT_BTN_DEBT => {
                session.awaiting_appeal = false;
                self.dialogue
                    .send_text(
                        chat_id,
                        &format!(
                            "💸 Qarzdorlik bo'yicha ma'lumot uchun administrator: {}",
                            self.admin_contact
                        ),
                        Some(keyboards::parent_menu_keyboard()),
                    )
                    .await?;
            }
            keyboards::PARENT_BTN_APPEAL => {
                session.awaiting_appeal = true;
                self.dialogue
                    .send_text(
                        chat_id,
                        "E'tirozingizni yozishingiz mumkin. Bu xabar to'g'ridan-to'g'ri loyiha rahbariga yuboriladi.",
                        Some(keyboards::parent_menu_keyboard()),
                    )
                    .await?;
            }
            _ => {
                // 家长发来的任何非按钮文本直接按申诉处理
                self.create_appeal(
                    chat_id,
                    identity,
                    &student.id,
                    AppealSender::Parent,
                    student.parent_phone.clone(),
                    text,
                    keyboards::parent_menu_keyboard(),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn show_parent_results(
        &self,
        chat_id: i64,
        student: &StudentProfile,
    ) -> AppResult<()> {
        let rows = match &student.user_id {
            Some(user_id) => self.storage.recent_submissions(user_id, 10).await?,
            None => Vec::new(),
        };

        let body = if rows.is_empty() {
            "Test natijalari topilmadi.".to_string()
        } else {
            rows.iter()
                .enumerate()
                .map(|(idx, row)| {
                    format!(
                        "{}) {}\n{} | {}/{}",
                        idx + 1,
                        format_date(&row.created_at),
                        row.lesson_label,
                        row.score,
                        row.total_questions
                    )
                })
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        self.dialogue
            .send_text(
                chat_id,
                &format!("📘 Oxirgi 10 ta test natija\n\n{body}"),
                Some(keyboards::parent_menu_keyboard()),
            )
            .await?;
        Ok(())
    }

    // ========== 申诉 ==========

    #[allow(clippy::too_many_arguments)]
    async fn create_appeal(
        &self,
        chat_id: i64,
        identity: i64,
        student_id: &str,
        sender: AppealSender,
        sender_phone: Option<String>,
        text: &str,
        menu: serde_json::Value,
    ) -> AppResult<bool> {
        let trimmed = text.trim();
        if trimmed.chars().count() < 5 {
            self.dialogue
                .send_text(
                    chat_id,
                    "E'tiroz matni juda qisqa. Iltimos, batafsil yozing.",
                    Some(menu),
                )
                .await?;
            return Ok(false);
        }

        self.storage
            .create_appeal(NewAppeal {
                student_id: student_id.to_string(),
                sender,
                sender_chat_id: identity,
                sender_phone,
                text: trimmed.to_string(),
            })
            .await?;

        self.dialogue
            .send_text(
                chat_id,
                "E'tirozingiz qabul qilindi ✅\nLoyiha rahbari ko'rib chiqadi.",
                Some(menu),
            )
            .await?;
        Ok(true)
    }

    // ========== 回调按钮 ==========

    async fn handle_callback(&self, callback: CallbackQuery) -> AppResult<()> {
        let data = callback.data.clone().unwrap_or_default();
        let Some(test_id) = data.strip_prefix("open_test:") else {
            self.dialogue.answer_callback(&callback.id, None, false).await?;
            return Ok(());
        };

        let identity = callback.from.id;
        let actor = self.storage.resolve_actor(identity).await?;
        let Some(Actor::Student { user_id, .. }) = actor else {
            self.dialogue
                .answer_callback(&callback.id, Some("Avval /start qiling"), true)
                .await?;
            return Ok(());
        };

        let chat_id = callback
            .message
            .as_ref()
            .map(|m| m.chat.id)
            .unwrap_or(identity);

        let session_lock = self.sessions.get(identity);
        let mut session = session_lock.lock().await;

        let outcome = self
            .open_flow
            .open(&mut session, &user_id, chat_id, test_id, Utc::now())
            .await?;

        let (text, alert) = match outcome {
            OpenOutcome::WindowUnavailable => (Some("Bu test hozir yopiq"), true),
            OpenOutcome::AlreadyOpened { .. } => {
                (Some("Test allaqachon ochilgan. Javoblarni yuboring."), true)
            }
            OpenOutcome::AlreadyOpenedConcurrently => {
                (Some("Bu tugma allaqachon ishlatilgan."), true)
            }
            OpenOutcome::ContentMissing => (
                Some("Bu testga rasm biriktirilmagan. Administratorga murojaat qiling."),
                true,
            ),
            OpenOutcome::DeliveryFailed => (
                Some("Testni ochishda xatolik bo'ldi, qayta urinib ko'ring."),
                true,
            ),
            OpenOutcome::Opened { .. } => (None, false),
        };
        self.dialogue.answer_callback(&callback.id, text, alert).await?;
        Ok(())
    }
}
