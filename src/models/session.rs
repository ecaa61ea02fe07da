//! 单个会话身份的临时状态
//!
//! 只活在进程内，不做持久化；进程重启即丢失（明确的非目标）。

/// 会话状态
///
/// 首次接触某个身份时惰性创建，流程结束或放弃时回到中性状态
#[derive(Debug, Clone)]
pub struct SessionState {
    /// 是否还在等待对方分享电话号码（未识别身份）
    pub awaiting_phone: bool,
    /// 是否在等待申诉正文
    pub awaiting_appeal: bool,
    /// 当前绑定的测试 ID（开窗成功后写入）
    pub active_test_id: Option<String>,
    /// 当前绑定的访问窗口 ID
    pub active_window_id: Option<String>,
    /// 已投递的测试内容消息句柄，提交成功后用于删除
    pub sent_content_message_ids: Vec<i64>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            awaiting_phone: true,
            awaiting_appeal: false,
            active_test_id: None,
            active_window_id: None,
            sent_content_message_ids: Vec::new(),
        }
    }
}

impl SessionState {
    /// 回到已识别身份的中性状态（没有进行中的流程）
    pub fn clear(&mut self) {
        self.awaiting_phone = false;
        self.awaiting_appeal = false;
        self.active_test_id = None;
        self.active_window_id = None;
        self.sent_content_message_ids.clear();
    }

    /// 回到未识别身份的状态（重新等待电话号码）
    pub fn reset_to_phone_pending(&mut self) {
        self.awaiting_phone = true;
        self.awaiting_appeal = false;
        self.active_test_id = None;
        self.active_window_id = None;
        self.sent_content_message_ids.clear();
    }

    /// 绑定当前窗口/测试
    pub fn bind_window(&mut self, window_id: &str, test_id: &str) {
        self.active_window_id = Some(window_id.to_string());
        self.active_test_id = Some(test_id.to_string());
    }
}
