//! 开测试流程 - 流程层
//!
//! 核心职责：把"打开一份定时测试"走完整：
//!
//! 1. 解析活跃窗口，校验与请求的测试一致
//! 2. opened_at 已置位 → 幂等重放（只重绑会话，不重发内容）
//! 3. try_open_once 条件写，输掉竞争 → "按钮已被使用"
//! 4. 绑定会话，按序投递内容页并记录消息句柄
//! 5. 投递中途失败 → 补偿复位 reset_opened，让对方可以重试
//!
//! 第 5 步是补偿事务而非回滚：复位是第二次写，不经过事务机制。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::AppResult;
use crate::infrastructure::dialogue::Dialogue;
use crate::infrastructure::storage::Storage;
use crate::models::SessionState;
use crate::services::keyboards;
use crate::services::window_access::WindowAccessController;

/// 开测试的结局
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// 没有活跃窗口，或窗口对应的不是请求的测试
    WindowUnavailable,
    /// 已经开过 — 幂等重放，提示继续提交即可
    AlreadyOpened { total_questions: usize },
    /// 并发竞争中输给了另一次尝试
    AlreadyOpenedConcurrently,
    /// 测试没有配置内容页（已补偿复位）
    ContentMissing,
    /// 内容投递中途失败（已补偿复位，可重试）
    DeliveryFailed,
    /// 成功开启并送达全部内容页
    Opened { total_questions: usize },
}

/// 开测试流程
pub struct OpenFlow<S, D> {
    access: WindowAccessController<S>,
    dialogue: Arc<D>,
    web_base_url: String,
}

impl<S: Storage, D: Dialogue> OpenFlow<S, D> {
    pub fn new(storage: Arc<S>, dialogue: Arc<D>, config: &Config) -> Self {
        Self {
            access: WindowAccessController::new(storage),
            dialogue,
            web_base_url: config.web_base_url.clone(),
        }
    }

    pub async fn open(
        &self,
        session: &mut SessionState,
        student_user_id: &str,
        chat_id: i64,
        requested_test_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<OpenOutcome> {
        // 步骤 1: 活跃窗口必须存在且就是请求的测试
        let Some(window) = self.access.get_active_window(student_user_id, now).await? else {
            return Ok(OpenOutcome::WindowUnavailable);
        };
        if window.test_id != requested_test_id {
            return Ok(OpenOutcome::WindowUnavailable);
        }

        let total_questions = window.test.total_questions;

        // 步骤 2: 幂等重放 — 内容已经送达过一次，不再重发
        if window.opened_at.is_some() {
            session.bind_window(&window.id, &window.test_id);
            info!("[会话 {}] 测试 {} 已开过，幂等重放", chat_id, window.test_id);
            return Ok(OpenOutcome::AlreadyOpened { total_questions });
        }

        // 步骤 3: 唯一的 open-once 保证就在这一条条件写上
        if !self.access.try_open_once(&window.id, now).await? {
            info!("[会话 {}] 窗口 {} 竞争失败", chat_id, window.id);
            return Ok(OpenOutcome::AlreadyOpenedConcurrently);
        }

        // 步骤 4: 绑定会话并投递内容
        session.bind_window(&window.id, &window.test_id);
        session.sent_content_message_ids.clear();

        if window.test.pages.is_empty() {
            self.access.reset_opened(&window.id).await?;
            return Ok(OpenOutcome::ContentMissing);
        }

        info!(
            "[会话 {}] 📤 开启窗口 {}，投递 {} 页内容",
            chat_id,
            window.id,
            window.test.pages.len()
        );

        for page in &window.test.pages {
            let url = resolve_image_url(&self.web_base_url, &page.image_url);
            match self.dialogue.send_photo(chat_id, &url).await {
                Ok(handle) => session.sent_content_message_ids.push(handle),
                Err(e) => {
                    warn!(
                        "[会话 {}] ⚠️ 第 {} 页投递失败: {}",
                        chat_id, page.page_number, e
                    );
                    // 步骤 5: 补偿复位，别让"已开启却没有内容"卡死窗口
                    self.access.reset_opened(&window.id).await?;
                    return Ok(OpenOutcome::DeliveryFailed);
                }
            }
        }

        // 作答说明也算投递内容，一并记录句柄
        let instruction = format!(
            "Javoblarni bitta qatorda yuboring. Masalan: 1A2B3C...{}B",
            total_questions
        );
        match self
            .dialogue
            .send_text(chat_id, &instruction, Some(keyboards::student_menu_keyboard()))
            .await
        {
            Ok(handle) => session.sent_content_message_ids.push(handle),
            Err(e) => {
                warn!("[会话 {}] ⚠️ 作答说明投递失败: {}", chat_id, e);
                self.access.reset_opened(&window.id).await?;
                return Ok(OpenOutcome::DeliveryFailed);
            }
        }

        info!("[会话 {}] ✓ 窗口 {} 开启完成", chat_id, window.id);
        Ok(OpenOutcome::Opened { total_questions })
    }
}

/// 相对路径拼到 Web 端基础 URL 上
fn resolve_image_url(web_base_url: &str, image_url: &str) -> String {
    let lower = image_url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return image_url.to_string();
    }
    if image_url.starts_with('/') {
        return format!("{web_base_url}{image_url}");
    }
    format!("{web_base_url}/{image_url}")
}
