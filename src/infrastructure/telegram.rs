//! Telegram Bot API 客户端 - 基础设施层
//!
//! 封装所有与 Bot API 相关的调用：长轮询拉取更新（入站）
//! 和 Dialogue 契约的出站实现。

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::Config;
use crate::error::DeliveryError;
use crate::infrastructure::dialogue::Dialogue;

// ========== 入站更新的线缆类型 ==========

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub contact: Option<Contact>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Contact {
    pub phone_number: String,
    #[serde(default)]
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<Message>,
}

/// Bot API 客户端
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    poll_timeout_secs: u64,
}

impl TelegramClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("https://api.telegram.org/bot{}", config.bot_token),
            poll_timeout_secs: config.poll_timeout_secs,
        }
    }

    /// 调用任意 Bot API 方法，校验 ok 字段后返回 result
    async fn call(&self, method: &str, payload: Value) -> Result<Value, DeliveryError> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self
            .http
            .post(&url)
            .json(&payload)
            .timeout(std::time::Duration::from_secs(self.poll_timeout_secs + 15))
            .send()
            .await
            .map_err(|source| DeliveryError::Request { source })?;

        let body: Value = response
            .json()
            .await
            .map_err(|source| DeliveryError::Request { source })?;

        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            let description = body
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("未知错误")
                .to_string();
            return Err(DeliveryError::BadResponse { description });
        }

        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    /// 机器人自检，返回 username
    pub async fn get_me(&self) -> Result<String, DeliveryError> {
        let result = self.call("getMe", json!({})).await?;
        Ok(result
            .get("username")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string())
    }

    /// 切换到长轮询前清掉 webhook
    pub async fn delete_webhook(&self, drop_pending_updates: bool) -> Result<(), DeliveryError> {
        self.call(
            "deleteWebhook",
            json!({ "drop_pending_updates": drop_pending_updates }),
        )
        .await?;
        Ok(())
    }

    /// 长轮询拉取一批更新
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, DeliveryError> {
        let result = self
            .call(
                "getUpdates",
                json!({
                    "offset": offset,
                    "timeout": self.poll_timeout_secs,
                    "allowed_updates": ["message", "callback_query"],
                }),
            )
            .await?;

        let updates: Vec<Update> =
            serde_json::from_value(result).map_err(|e| DeliveryError::BadResponse {
                description: format!("更新负载解析失败: {e}"),
            })?;
        Ok(updates)
    }
}

#[async_trait]
impl Dialogue for TelegramClient {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<Value>,
    ) -> Result<i64, DeliveryError> {
        let mut payload = json!({ "chat_id": chat_id, "text": text });
        if let Some(markup) = keyboard {
            payload["reply_markup"] = markup;
        }
        let result = self.call("sendMessage", payload).await?;
        Ok(result
            .get("message_id")
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }

    async fn send_photo(&self, chat_id: i64, image_url: &str) -> Result<i64, DeliveryError> {
        debug!("发送内容页: chat={} url={}", chat_id, image_url);
        let result = self
            .call(
                "sendPhoto",
                json!({
                    "chat_id": chat_id,
                    "photo": image_url,
                    "protect_content": true,
                }),
            )
            .await?;
        Ok(result
            .get("message_id")
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), DeliveryError> {
        self.call(
            "deleteMessage",
            json!({ "chat_id": chat_id, "message_id": message_id }),
        )
        .await?;
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), DeliveryError> {
        let mut payload = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            payload["text"] = json!(text);
            payload["show_alert"] = json!(show_alert);
        }
        self.call("answerCallbackQuery", payload).await?;
        Ok(())
    }
}
