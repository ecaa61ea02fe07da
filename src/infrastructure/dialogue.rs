//! 对话协作方契约（出站半边）- 基础设施层
//!
//! 每次发送返回一个不透明的消息句柄，供之后删除使用。

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DeliveryError;

/// 出站消息能力
#[async_trait]
pub trait Dialogue: Send + Sync + 'static {
    /// 发送文本，可附带键盘标记
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<Value>,
    ) -> Result<i64, DeliveryError>;

    /// 发送一页测试内容（防转发）
    async fn send_photo(&self, chat_id: i64, image_url: &str) -> Result<i64, DeliveryError>;

    /// 删除之前发出的消息
    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), DeliveryError>;

    /// 应答内联按钮回调
    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), DeliveryError>;
}
