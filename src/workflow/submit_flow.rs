//! 提交流程 - 流程层
//!
//! 核心职责：校验窗口可提交 → 解析 → 判分 → 原子锁窗 → 原子落库。
//!
//! 窗口状态机（本流程视角）：SCHEDULED → OPENED → SUBMITTED。
//! SUBMITTED 是终态，之后任何开启/提交都不再被接受；
//! "每窗口至多一次被接受的提交"完全由 submit-lock 这一条条件写保证，
//! 即便多个进程共享同一存储后端也成立。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::infrastructure::dialogue::Dialogue;
use crate::infrastructure::storage::Storage;
use crate::models::{NewSubmission, SessionState};
use crate::services::answer_parser::parse_answer_text;
use crate::services::scorer;
use crate::services::window_access::WindowAccessController;

/// 缺失题号预览的上限
const MISSING_PREVIEW_LIMIT: usize = 20;

/// 提交的结局
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// 会话没有绑定窗口，或窗口已不可提交 — 正常终态，不是错误
    NoActiveTest,
    /// 答案文本无法解析 — 可重试，会话不动
    ParseFailed { total_questions: usize },
    /// 不允许部分提交时缺了题 — 可重试，会话不动
    IncompleteAnswers {
        total_questions: usize,
        /// 缺失题号升序预览（至多 20 个）
        missing_preview: Vec<usize>,
        /// 预览之外还有更多缺失
        more: bool,
    },
    /// 提交已被接受
    Accepted {
        score: usize,
        total_questions: usize,
    },
}

/// 提交协调器
pub struct SubmitFlow<S, D> {
    storage: Arc<S>,
    access: WindowAccessController<S>,
    dialogue: Arc<D>,
    allow_partial_submissions: bool,
}

impl<S: Storage, D: Dialogue> SubmitFlow<S, D> {
    pub fn new(storage: Arc<S>, dialogue: Arc<D>, config: &Config) -> Self {
        Self {
            access: WindowAccessController::new(storage.clone()),
            storage,
            dialogue,
            allow_partial_submissions: config.allow_partial_submissions,
        }
    }

    pub async fn submit(
        &self,
        session: &mut SessionState,
        student_user_id: &str,
        chat_id: i64,
        raw_text: &str,
        now: DateTime<Utc>,
    ) -> AppResult<SubmitOutcome> {
        // 步骤 1: 会话必须绑定着窗口和测试（没有不算错误，会话不动）
        let (Some(window_id), Some(test_id)) = (
            session.active_window_id.clone(),
            session.active_test_id.clone(),
        ) else {
            return Ok(SubmitOutcome::NoActiveTest);
        };

        // 步骤 2: 窗口仍须可提交，且与 (窗口, 学生, 测试) 三元组精确匹配
        let Some(view) = self
            .access
            .window_for_submit(&window_id, student_user_id, &test_id, now)
            .await?
        else {
            session.clear();
            return Ok(SubmitOutcome::NoActiveTest);
        };

        // 步骤 3: 解析（失败可重发，会话不动）
        let Ok(parsed) = parse_answer_text(raw_text, view.total_questions) else {
            return Ok(SubmitOutcome::ParseFailed {
                total_questions: view.total_questions,
            });
        };

        // 步骤 4: 完整性政策（解析层不管缺答，这里管）
        if !self.allow_partial_submissions {
            let mut missing: Vec<usize> = parsed
                .per_question
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.is_none())
                .map(|(idx, _)| idx + 1)
                .collect();
            if !missing.is_empty() {
                let more = missing.len() > MISSING_PREVIEW_LIMIT;
                missing.truncate(MISSING_PREVIEW_LIMIT);
                return Ok(SubmitOutcome::IncompleteAnswers {
                    total_questions: view.total_questions,
                    missing_preview: missing,
                    more,
                });
            }
        }

        // 步骤 5: 判分
        let card = scorer::score(&parsed.per_question, &view.answer_key);

        // 步骤 6: 原子锁窗。输掉竞争时丢弃刚算出的分数，什么都不落库
        if !self
            .access
            .lock_for_submission(&window_id, student_user_id, &test_id, now)
            .await?
        {
            info!("[会话 {}] 窗口 {} submit-lock 竞争失败", chat_id, window_id);
            session.clear();
            return Ok(SubmitOutcome::NoActiveTest);
        }

        // 步骤 7: 提交 + 明细 + 审计，单个原子单元。
        // 失败时窗口保持已锁定（接受的取舍：绝不给第二次提交机会），
        // 记日志等人工对账。
        let submission_id = self
            .storage
            .create_submission_with_details(NewSubmission {
                student_user_id: student_user_id.to_string(),
                test_id: test_id.clone(),
                raw_answer_text: raw_text.to_string(),
                parsed_answers: parsed.per_question.clone(),
                score: card.score,
                details: card.details,
            })
            .await
            .map_err(|e| {
                error!(
                    "[会话 {}] ❌ 窗口 {} 已锁定但落库失败，需人工对账: {}",
                    chat_id, window_id, e
                );
                AppError::Persistence(e)
            })?;

        // 步骤 8: 尽力删除投递过的内容消息，并发进行，失败只记日志
        let delivered = std::mem::take(&mut session.sent_content_message_ids);
        let results = futures::future::join_all(
            delivered
                .iter()
                .map(|&message_id| self.dialogue.delete_message(chat_id, message_id)),
        )
        .await;
        for (message_id, result) in delivered.iter().zip(results) {
            if let Err(e) = result {
                debug!("[会话 {}] 内容消息 {} 删除失败: {}", chat_id, message_id, e);
            }
        }

        session.clear();
        info!(
            "[会话 {}] ✓ 提交 {} 已接受: {}/{}",
            chat_id, submission_id, card.score, card.total_questions
        );
        Ok(SubmitOutcome::Accepted {
            score: card.score,
            total_questions: card.total_questions,
        })
    }
}
